use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::admin::status::{exclusion_key, machine_address};
use crate::config::RECOVERY_WAIT_DELAY;
use crate::controller::context::Context;
use crate::controller::coordination::deletions;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::controller::state_machine::{
    ProcessGroupEvent, ProcessGroupPhase, ProcessGroupStateMachine, TransitionContext,
    TransitionResult,
};
use crate::crd::{ProcessGroupId, ProcessGroupStatus};
use crate::resources::common::{process_group_object_name, pvc_name};

/// Delete the objects of excluded process groups, include them again and
/// drop them from status
pub struct RemoveProcessGroups;

/// Delete the pod, volume claim and service of a group.
///
/// Returns how many of them still exist afterwards.
async fn remove_resources(
    ctx: &Context,
    pass: &ReconcilePass,
    namespace: &str,
    process_group: &ProcessGroupStatus,
) -> Result<usize> {
    let name = process_group_object_name(&pass.cluster, &process_group.process_group_id);
    let claim = pvc_name(&pass.cluster, &process_group.process_group_id);

    if ctx.store.get_pod(namespace, &name).await?.is_some() {
        info!(pod = %name, "Deleting pod of removed process group");
        ctx.store.delete_pod(namespace, &name).await?;
    }
    if ctx.store.get_pvc(namespace, &claim).await?.is_some() {
        info!(pvc = %claim, "Deleting volume claim of removed process group");
        ctx.store.delete_pvc(namespace, &claim).await?;
    }
    if ctx.store.get_service(namespace, &name).await?.is_some() {
        info!(service = %name, "Deleting service of removed process group");
        ctx.store.delete_service(namespace, &name).await?;
    }

    // Deletion is asynchronous on a real API server
    let mut remaining = 0;
    if ctx.store.get_pod(namespace, &name).await?.is_some() {
        remaining += 1;
    }
    if ctx.store.get_pvc(namespace, &claim).await?.is_some() {
        remaining += 1;
    }
    if ctx.store.get_service(namespace, &name).await?.is_some() {
        remaining += 1;
    }
    Ok(remaining)
}

/// Exclusion list entries that belong to the given groups, as listed by the database
fn inclusion_entries(process_groups: &[&ProcessGroupStatus], exclusions: &[String]) -> Vec<String> {
    let mut keys: BTreeSet<String> = BTreeSet::new();
    for process_group in process_groups {
        keys.insert(process_group.exclusion_string());
        for address in &process_group.addresses {
            keys.insert(machine_address(address).to_string());
        }
    }

    let mut seen = BTreeSet::new();
    exclusions
        .iter()
        .filter(|e| keys.contains(exclusion_key(e)))
        .filter(|e| seen.insert(e.as_str()))
        .cloned()
        .collect()
}

#[async_trait]
impl Step for RemoveProcessGroups {
    fn name(&self) -> &'static str {
        "RemoveProcessGroups"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let candidates: Vec<ProcessGroupStatus> = pass
            .cluster
            .process_groups()
            .iter()
            .filter(|pg| pg.is_ready_for_removal())
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }
        let namespace = pass.cluster.namespace().unwrap_or_default();
        let machine = ProcessGroupStateMachine::new();

        let mut removable: Vec<&ProcessGroupStatus> = Vec::new();
        let mut terminating = Vec::new();
        for process_group in &candidates {
            let remaining = remove_resources(ctx, pass, &namespace, process_group).await?;
            let transition_ctx =
                TransitionContext::for_group(process_group).with_resources_remaining(remaining);
            match machine.transition(
                ProcessGroupPhase::Excluded,
                ProcessGroupEvent::ResourcesRemoved,
                &transition_ctx,
            ) {
                TransitionResult::Success { .. } => removable.push(process_group),
                TransitionResult::GuardFailed { reason, .. } => {
                    debug!(process_group = %process_group.process_group_id, "Not removable yet: {}", reason);
                    terminating.push(process_group.process_group_id.clone());
                }
                TransitionResult::InvalidTransition { .. } => {}
            }
        }

        if removable.is_empty() {
            return Ok(Some(Requeue::wait(format!(
                "waiting for resources of {:?} to be deleted",
                terminating
            ))));
        }

        let status = pass.observed_status().await?;
        let entries = inclusion_entries(&removable, &status.exclusions());
        if !entries.is_empty() {
            if let Err(reason) = status.check_recovery_state(
                ctx.config.minimum_recovery_time_for_inclusion.as_secs_f64(),
            ) {
                return Ok(Some(Requeue::wait_for(RECOVERY_WAIT_DELAY, reason)));
            }

            let guard = pass.lock.acquire("include processes").await?;
            info!(trace_id = %pass.trace_id, entries = ?entries, "Including processes");
            let included = pass.admin.include_processes(&entries).await;
            guard.release().await;
            included?;
            pass.reset_recovery_clock();
            pass.refresh_cached_status().await?;
        }

        let removed: Vec<ProcessGroupId> = removable
            .iter()
            .map(|pg| pg.process_group_id.clone())
            .collect();
        if pass.cluster.is_global_synchronization() {
            let updates = deletions(removed.iter());
            pass.admin.update_pending_for_exclusion(&updates).await?;
            pass.admin.update_ready_for_exclusion(&updates).await?;
        }

        info!(process_groups = ?removed, "Removing process groups from status");
        pass.cluster
            .status_mut()
            .process_groups
            .retain(|pg| !removed.contains(&pg.process_group_id));
        pass.persist_status(ctx).await?;

        if !terminating.is_empty() {
            return Ok(Some(Requeue::wait(format!(
                "waiting for resources of {:?} to be deleted",
                terminating
            ))));
        }
        Ok(None)
    }
}
