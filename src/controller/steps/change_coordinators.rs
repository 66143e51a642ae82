use async_trait::async_trait;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::coordinator::{change_coordinators, needs_change};
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;

/// Rotate coordinators that are unhealthy, misplaced or being removed
pub struct ChangeCoordinators;

#[async_trait]
impl Step for ChangeCoordinators {
    fn name(&self) -> &'static str {
        "ChangeCoordinators"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        if !pass.cluster.status.as_ref().is_some_and(|s| s.configured) {
            return Ok(None);
        }

        let status = pass.observed_status().await?;
        let Some(reason) = needs_change(&pass.cluster, &status) else {
            return Ok(None);
        };
        info!(trace_id = %pass.trace_id, reason = %reason, "Coordinators need to change");

        let guard = pass.lock.acquire("change coordinators").await?;
        let changed = change_coordinators(ctx, pass, &reason).await;
        guard.release().await;
        changed?;

        pass.persist_status(ctx).await?;
        Ok(None)
    }
}
