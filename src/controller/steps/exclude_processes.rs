use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use super::unix_now;
use crate::admin::ClusterObservedStatus;
use crate::admin::status::exclusion_key;
use crate::config::{MISSING_PROCESS_GRACE, PARTIAL_EXCLUSION_DELAY, RECOVERY_WAIT_DELAY};
use crate::controller::context::Context;
use crate::controller::coordination::{
    additions, addresses_from_coordination_state, all_processes_ready_for_exclusion,
};
use crate::controller::coordinator::change_coordinators;
use crate::controller::error::Result;
use crate::controller::exclusion::{ExclusionSelection, coordinators_in, plan_exclusions};
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;

/// Exclude process groups marked for removal, as many as is safe
pub struct ExcludeProcesses;

const NOTHING_ALLOWED: &str =
    "more exclusions needed but not allowed, have to wait for new processes to come up";

/// Register this instance's candidates in the shared maps.
///
/// Every candidate is pending; the ones that may go now are also ready.
async fn register_candidates(pass: &ReconcilePass, selection: &ExclusionSelection) -> Result<()> {
    let prefix = &pass.cluster.spec.process_group_id_prefix;
    let pending = pass.admin.get_pending_for_exclusion(prefix).await?;
    let ready = pass.admin.get_ready_for_exclusion(prefix).await?;

    let candidates = selection
        .chosen
        .iter()
        .chain(selection.waiting.iter())
        .map(|c| &c.process_group_id);
    let pending_updates = additions(candidates, &pending);
    if !pending_updates.is_empty() {
        pass.admin.update_pending_for_exclusion(&pending_updates).await?;
    }

    let ready_updates = additions(selection.chosen.iter().map(|c| &c.process_group_id), &ready);
    if !ready_updates.is_empty() {
        pass.admin.update_ready_for_exclusion(&ready_updates).await?;
    }
    Ok(())
}

/// Exclude call arguments agreed on by all instances, read under the lock
async fn coordinated_entries(ctx: &Context, pass: &ReconcilePass) -> Result<Option<Vec<String>>> {
    // Entries of every instance, whatever their prefix
    let pending = pass.admin.get_pending_for_exclusion("").await?;
    let ready = pass.admin.get_ready_for_exclusion("").await?;

    let allowed = match all_processes_ready_for_exclusion(
        &pending,
        &ready,
        ctx.config.global_synchronization_wait,
        Utc::now(),
    ) {
        Ok(allowed) => allowed,
        Err(e) => {
            info!("{}", e);
            return Ok(None);
        }
    };

    let entries = addresses_from_coordination_state(
        pass.admin.as_ref(),
        &allowed,
        pass.cluster.use_localities_for_exclusion(),
    )
    .await?;
    Ok(Some(entries))
}

/// Outcome of the locked section
enum Excluded {
    Entries(usize),
    NothingAllowed,
    Waiting,
}

async fn exclude_locked(
    ctx: &Context,
    pass: &mut ReconcilePass,
    status: &ClusterObservedStatus,
    selection: &ExclusionSelection,
) -> Result<Excluded> {
    let mut entries = if pass.cluster.is_global_synchronization() {
        match coordinated_entries(ctx, pass).await? {
            Some(entries) => entries,
            None => return Ok(Excluded::Waiting),
        }
    } else {
        selection.entries()
    };

    // Never exclude the same entry twice for one removal
    let exclusions = status.exclusions();
    let already: BTreeSet<&str> = exclusions.iter().map(|e| exclusion_key(e)).collect();
    entries.retain(|e| !already.contains(exclusion_key(e)));
    if entries.is_empty() {
        return Ok(Excluded::NothingAllowed);
    }

    info!(trace_id = %pass.trace_id, entries = ?entries, "Excluding processes");
    pass.admin
        .exclude_processes_with_no_wait(&entries, pass.lock.is_enabled())
        .await?;
    pass.reset_recovery_clock();
    ctx.record_exclusions(&pass.key, entries.len());

    let coordinator_entries = coordinators_in(
        &entries,
        &pass.cluster,
        &status.coordinator_process_group_ids(),
        &status.coordinator_addresses(),
    );
    if !coordinator_entries.is_empty() {
        info!(
            trace_id = %pass.trace_id,
            coordinators = ?coordinator_entries,
            "Excluded coordinators, changing coordinators"
        );
        change_coordinators(ctx, pass, "coordinator excluded").await?;
        pass.persist_status(ctx).await?;
    } else {
        pass.refresh_cached_status().await?;
    }

    Ok(Excluded::Entries(entries.len()))
}

#[async_trait]
impl Step for ExcludeProcesses {
    fn name(&self) -> &'static str {
        "ExcludeProcesses"
    }

    #[instrument(skip_all, fields(cluster = %pass.key))]
    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let status = pass.observed_status().await?;
        let plan = plan_exclusions(
            &pass.cluster,
            &status.exclusions(),
            &pass.cluster.spec.process_counts.map(),
            unix_now(),
            MISSING_PROCESS_GRACE.as_secs() as i64,
        );
        if !plan.has_candidates() {
            return Ok(None);
        }

        for (class, class_plan) in &plan.by_class {
            debug!(
                class = %class,
                candidates = class_plan.candidates.len(),
                ongoing = class_plan.ongoing,
                valid = class_plan.valid,
                desired = class_plan.desired,
                missing = ?class_plan.missing,
                allowed = class_plan.allowed(plan.fault_tolerance),
                "Exclusion plan"
            );
        }

        let selection = plan.select();
        if selection.transaction_suppressed {
            info!("Holding back exclusions of the transaction system until all of them are allowed");
        }

        // Other instances only see candidates that were registered
        if pass.cluster.is_global_synchronization() {
            register_candidates(pass, &selection).await?;
        }
        if selection.chosen.is_empty() {
            return Ok(Some(Requeue::wait(NOTHING_ALLOWED)));
        }

        if let Err(reason) = status.check_recovery_state(
            ctx.config
                .minimum_recovery_time_for_exclusion
                .as_secs_f64(),
        ) {
            return Ok(Some(Requeue::wait_for(RECOVERY_WAIT_DELAY, reason)));
        }

        let guard = pass.lock.acquire("exclude processes").await?;
        let outcome = exclude_locked(ctx, pass, &status, &selection).await;
        guard.release().await;

        let excluded = match outcome? {
            Excluded::Waiting => {
                return Ok(Some(Requeue::wait(
                    "waiting for other operator instances to mark their process groups ready",
                )));
            }
            Excluded::NothingAllowed => return Ok(Some(Requeue::wait(NOTHING_ALLOWED))),
            Excluded::Entries(count) => count,
        };

        if !selection.all_chosen() {
            return Ok(Some(Requeue::wait_for(
                PARTIAL_EXCLUSION_DELAY,
                format!(
                    "Additional processes must be excluded, {} excluded and {} waiting",
                    excluded,
                    selection.waiting.len()
                ),
            )));
        }
        Ok(None)
    }
}
