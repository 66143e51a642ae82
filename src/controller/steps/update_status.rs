use std::collections::BTreeSet;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

use super::unix_now;
use crate::admin::status::{exclusion_key, machine_address};
use crate::admin::{AdminClient, ClusterObservedStatus};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::controller::state_machine::{
    ProcessGroupEvent, ProcessGroupPhase, ProcessGroupStateMachine, TransitionContext,
    TransitionResult, determine_event,
};
use crate::controller::status::{ProcessGroupSummary, pass_conditions};
use crate::crd::{ProcessGroupConditionType, ProcessGroupStatus};
use crate::resources::common::process_group_object_name;

/// Merge the observed database status into the process groups
pub struct UpdateStatus;

/// Whether the database lists the group as excluded, by locality or by every address
fn in_exclusion_list(process_group: &ProcessGroupStatus, excluded: &BTreeSet<&str>) -> bool {
    if excluded.contains(process_group.exclusion_string().as_str()) {
        return true;
    }
    !process_group.addresses.is_empty()
        && process_group
            .addresses
            .iter()
            .all(|a| excluded.contains(machine_address(a)))
}

/// Entries to check for remaining data
fn exclusion_entries(process_group: &ProcessGroupStatus, use_localities: bool) -> Vec<String> {
    if use_localities {
        vec![process_group.exclusion_string()]
    } else {
        process_group.addresses.clone()
    }
}

/// Advance a marked process group to excluded once no data is left on it
async fn update_exclusion(
    machine: &ProcessGroupStateMachine,
    admin: &dyn AdminClient,
    process_group: &mut ProcessGroupStatus,
    excluded: &BTreeSet<&str>,
    use_localities: bool,
    now: i64,
) -> Result<()> {
    let listed = in_exclusion_list(process_group, excluded);
    let phase = ProcessGroupPhase::of(process_group, listed);
    let mut transition_ctx = TransitionContext::for_group(process_group).with_exclusion(listed, 0);

    if phase == ProcessGroupPhase::Excluding {
        let remaining = admin
            .can_safely_remove(&exclusion_entries(process_group, use_localities))
            .await?;
        transition_ctx.data_remaining = remaining.len();
    }

    let Some(event) = determine_event(phase, &transition_ctx) else {
        return Ok(());
    };
    if event != ProcessGroupEvent::ExclusionCompleted {
        return Ok(());
    }

    match machine.transition(phase, event, &transition_ctx) {
        TransitionResult::Success { description, .. } => {
            info!(
                process_group = %process_group.process_group_id,
                "{}", description
            );
            process_group.set_excluded(now);
        }
        TransitionResult::GuardFailed { reason, .. } => {
            debug!(
                process_group = %process_group.process_group_id,
                "Exclusion not complete: {}", reason
            );
        }
        TransitionResult::InvalidTransition { .. } => {}
    }
    Ok(())
}

fn merge_processes(
    process_group: &mut ProcessGroupStatus,
    status: &ClusterObservedStatus,
    incompatible: &BTreeSet<String>,
    desired_version: &str,
    now: i64,
) {
    let mut reported = false;
    let mut outdated = false;
    let mut zone = None;
    let mut addresses = Vec::new();
    for process in status.processes_for_group(&process_group.process_group_id) {
        reported = true;
        outdated |= !process.version.is_empty() && process.version != desired_version;
        addresses.push(machine_address(&process.address).to_string());
        if let Some(z) = process.zone() {
            zone = Some(z.to_string());
        }
    }

    for address in &addresses {
        process_group.add_address(address);
    }
    if zone.is_some() {
        process_group.fault_domain = zone;
    }

    // Excluded processes are expected to go away
    let missing = !reported && !process_group.is_excluded();
    process_group.update_condition(ProcessGroupConditionType::MissingProcesses, missing, now);

    let is_incompatible = process_group
        .addresses
        .iter()
        .any(|a| incompatible.contains(a.as_str()));
    process_group.update_condition(
        ProcessGroupConditionType::IncompatibleConnections,
        is_incompatible,
        now,
    );
    process_group.update_condition(
        ProcessGroupConditionType::PendingRestart,
        outdated && !process_group.is_marked_for_removal(),
        now,
    );
}

/// Version the cluster runs once every reporting process runs the desired one
pub fn next_running_version(
    current: Option<&str>,
    desired: &str,
    status: &ClusterObservedStatus,
) -> Option<String> {
    let Some(current) = current else {
        return Some(desired.to_string());
    };
    let versions = status.running_versions();
    if current != desired && !versions.is_empty() && versions.iter().all(|v| *v == desired) {
        return Some(desired.to_string());
    }
    Some(current.to_string())
}

#[async_trait]
impl Step for UpdateStatus {
    fn name(&self) -> &'static str {
        "UpdateStatus"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let status = match pass.observed_status().await {
            Ok(status) => status,
            Err(e) => return Ok(Some(Requeue::retry(e))),
        };
        let now = unix_now();
        let namespace = pass.cluster.namespace().unwrap_or_default();
        let use_localities = pass.cluster.use_localities_for_exclusion();
        let exclusions = status.exclusions();
        let excluded: BTreeSet<&str> = exclusions.iter().map(|e| exclusion_key(e)).collect();
        let incompatible = status.incompatible_addresses();
        let machine = ProcessGroupStateMachine::new();
        let version = pass.cluster.spec.version.clone();

        let mut process_groups = pass.cluster.process_groups().to_vec();
        for process_group in process_groups.iter_mut() {
            merge_processes(process_group, &status, &incompatible, &version, now);

            let pod_name = process_group_object_name(&pass.cluster, &process_group.process_group_id);
            let pod_missing = ctx.store.get_pod(&namespace, &pod_name).await?.is_none();
            process_group.update_condition(
                ProcessGroupConditionType::MissingPod,
                pod_missing && !process_group.is_marked_for_removal(),
                now,
            );

            if process_group.is_marked_for_removal() && !process_group.is_excluded() {
                update_exclusion(
                    &machine,
                    pass.admin.as_ref(),
                    process_group,
                    &excluded,
                    use_localities,
                    now,
                )
                .await?;
            }
        }

        let cluster_status = pass.cluster.status_mut();
        cluster_status.process_groups = process_groups;
        cluster_status.configured = true;
        if !status.cluster.connection_string.is_empty()
            && cluster_status.connection_string != status.cluster.connection_string
        {
            info!(
                previous = %cluster_status.connection_string,
                current = %status.cluster.connection_string,
                "Updating out-of-date connection string"
            );
            cluster_status.connection_string = status.cluster.connection_string.clone();
        }
        let running = next_running_version(
            cluster_status.running_version.as_deref(),
            &version,
            &status,
        );
        if running != cluster_status.running_version {
            info!(
                previous = ?cluster_status.running_version,
                current = ?running,
                "Updating running version"
            );
            cluster_status.running_version = running;
        }

        pass.persist_status(ctx).await?;
        Ok(None)
    }
}

/// Record the outcome of the pass in status
pub struct FinalizeStatus;

#[async_trait]
impl Step for FinalizeStatus {
    fn name(&self) -> &'static str {
        "FinalizeStatus"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let generation = pass.cluster.metadata.generation;
        let summary = ProcessGroupSummary::of(&pass.cluster);
        let settled = summary.is_settled();
        ctx.record_process_groups(&pass.key, summary.total, summary.pending_removal);
        let conditions = pass_conditions(&pass.cluster, pass.requeue_requested);

        let status = pass.cluster.status_mut();
        status.observed_generation = generation;
        status.conditions = conditions;
        if settled
            && !pass.requeue_requested
            && let Some(generation) = generation
        {
            status.generations.reconciled = generation;
        }

        pass.persist_status(ctx).await?;
        Ok(None)
    }
}
