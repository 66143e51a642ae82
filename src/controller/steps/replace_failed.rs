use async_trait::async_trait;
use tracing::{debug, info};

use super::unix_now;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::{FoundationDBCluster, ProcessGroupConditionType, ProcessGroupId};

/// Mark process groups for removal that have been failing for too long.
///
/// AddProcessGroups creates the replacements later in the same pass, and the
/// failed groups leave through the usual exclusion protocol.
pub struct ReplaceFailedProcessGroups;

const FAILURE_CONDITIONS: [ProcessGroupConditionType; 2] = [
    ProcessGroupConditionType::MissingProcesses,
    ProcessGroupConditionType::MissingPod,
];

/// Unmarked process groups failing since before `now - failure_time`, longest failing first
pub fn failed_process_groups(
    cluster: &FoundationDBCluster,
    failure_time: i64,
    now: i64,
) -> Vec<ProcessGroupId> {
    let mut failed: Vec<(i64, &ProcessGroupId)> = cluster
        .process_groups()
        .iter()
        .filter(|pg| !pg.is_marked_for_removal())
        .filter_map(|pg| {
            FAILURE_CONDITIONS
                .iter()
                .filter_map(|c| pg.condition_time(*c))
                .min()
                .filter(|since| now - since >= failure_time)
                .map(|since| (since, &pg.process_group_id))
        })
        .collect();
    failed.sort();
    failed.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Replacements still running: marked groups whose processes are not excluded yet
fn replacements_in_flight(cluster: &FoundationDBCluster) -> usize {
    cluster
        .process_groups()
        .iter()
        .filter(|pg| pg.is_marked_for_removal() && !pg.is_excluded())
        .count()
}

#[async_trait]
impl Step for ReplaceFailedProcessGroups {
    fn name(&self) -> &'static str {
        "ReplaceFailedProcessGroups"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        if !pass.cluster.automatic_replacements_enabled() {
            return Ok(None);
        }
        let now = unix_now();
        let failure_time = pass
            .cluster
            .failure_detection_time(ctx.config.replace_failed_after)
            .as_secs() as i64;
        let failed = failed_process_groups(&pass.cluster, failure_time, now);
        if failed.is_empty() {
            return Ok(None);
        }

        let limit = pass
            .cluster
            .max_concurrent_replacements(ctx.config.max_concurrent_replacements);
        let allowed = limit.saturating_sub(replacements_in_flight(&pass.cluster));
        if allowed == 0 {
            debug!(
                failed = ?failed,
                limit,
                "Replacements are already in progress, not replacing more process groups"
            );
            return Ok(None);
        }

        let replaced: Vec<ProcessGroupId> = failed.into_iter().take(allowed).collect();
        for process_group in pass.cluster.status_mut().process_groups.iter_mut() {
            if replaced.contains(&process_group.process_group_id) {
                info!(
                    process_group = %process_group.process_group_id,
                    "Replacing failed process group"
                );
                process_group.mark_for_removal(now);
            }
        }
        pass.persist_status(ctx).await?;
        ctx.record_replacements(&pass.key, replaced.len());

        Ok(Some(Requeue::wait(format!(
            "replaced {} failed process group(s)",
            replaced.len()
        ))))
    }
}
