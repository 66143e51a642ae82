use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::ProcessGroupConditionType;
use crate::resources::common::process_group_object_name;

/// Delete pods whose processes connect with an incompatible version.
///
/// The pod is recreated by the next pass and comes up with the right version.
/// Nothing is restarted while the cluster is being upgraded, since processes
/// on either side of the upgrade legitimately see each other as incompatible.
pub struct RemoveIncompatibleProcesses;

#[async_trait]
impl Step for RemoveIncompatibleProcesses {
    fn name(&self) -> &'static str {
        "RemoveIncompatibleProcesses"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        if !pass
            .cluster
            .restart_incompatible_processes(ctx.config.restart_incompatible_processes)
        {
            return Ok(None);
        }
        if let Some(running) = pass.cluster.upgrade_in_progress() {
            info!(
                running = %running,
                desired = %pass.cluster.spec.version,
                "Skipping restart of incompatible processes during an upgrade"
            );
            return Ok(None);
        }
        let namespace = pass.cluster.namespace().unwrap_or_default();

        let incompatible: Vec<String> = pass
            .cluster
            .process_groups()
            .iter()
            .filter(|pg| {
                !pg.is_marked_for_removal()
                    && pg.has_condition(ProcessGroupConditionType::IncompatibleConnections)
            })
            .map(|pg| pg.process_group_id.clone())
            .collect();
        if incompatible.is_empty() {
            return Ok(None);
        }

        let mut deleted = 0;
        for id in &incompatible {
            let name = process_group_object_name(&pass.cluster, id);
            if ctx.store.get_pod(&namespace, &name).await?.is_none() {
                continue;
            }
            info!(process_group = %id, pod = %name, "Deleting pod with incompatible connections");
            ctx.store.delete_pod(&namespace, &name).await?;
            deleted += 1;
        }

        if deleted > 0 {
            return Ok(Some(Requeue::wait(format!(
                "restarted {} process(es) with incompatible connections",
                deleted
            ))));
        }
        Ok(None)
    }
}
