use async_trait::async_trait;
use tracing::{info, instrument};

use super::unix_now;
use crate::admin::ClusterObservedStatus;
use crate::config::RECOVERY_WAIT_DELAY;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::{FoundationDBCluster, ProcessGroupConditionType, ProcessGroupId};

/// Restart processes of groups waiting for a restart
pub struct BounceProcesses;

/// Groups waiting for a restart and the full addresses of their processes
pub fn processes_to_bounce(
    cluster: &FoundationDBCluster,
    status: &ClusterObservedStatus,
) -> (Vec<ProcessGroupId>, Vec<String>) {
    let mut groups = Vec::new();
    let mut addresses = Vec::new();
    for process_group in cluster.process_groups() {
        if process_group.is_marked_for_removal()
            || !process_group.has_condition(ProcessGroupConditionType::PendingRestart)
        {
            continue;
        }
        let before = addresses.len();
        addresses.extend(
            status
                .processes_for_group(&process_group.process_group_id)
                .map(|p| p.address.clone()),
        );
        if addresses.len() > before {
            groups.push(process_group.process_group_id.clone());
        }
    }
    (groups, addresses)
}

#[async_trait]
impl Step for BounceProcesses {
    fn name(&self) -> &'static str {
        "BounceProcesses"
    }

    #[instrument(skip_all, fields(cluster = %pass.key))]
    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        if !pass.cluster.kill_processes_enabled() {
            return Ok(None);
        }
        let status = pass.observed_status().await?;
        let (groups, addresses) = processes_to_bounce(&pass.cluster, &status);
        if addresses.is_empty() {
            return Ok(None);
        }

        if let Err(reason) = status.check_recovery_state(
            ctx.config.minimum_recovery_time_for_bounce.as_secs_f64(),
        ) {
            return Ok(Some(Requeue::wait_for(RECOVERY_WAIT_DELAY, reason)));
        }

        let guard = pass.lock.acquire("bounce processes").await?;
        info!(trace_id = %pass.trace_id, addresses = ?addresses, "Restarting processes");
        let killed = pass.admin.kill_processes(&addresses).await;
        guard.release().await;
        killed?;

        pass.reset_recovery_clock();
        ctx.record_process_restarts(&pass.key, addresses.len());

        let now = unix_now();
        for process_group in pass.cluster.status_mut().process_groups.iter_mut() {
            if groups.contains(&process_group.process_group_id) {
                process_group.update_condition(ProcessGroupConditionType::PendingRestart, false, now);
            }
        }
        pass.persist_status(ctx).await?;

        Ok(Some(Requeue::wait(format!(
            "restarted {} process(es)",
            addresses.len()
        ))))
    }
}
