use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::{FoundationDBCluster, ProcessGroupStatus, process_group_id};

/// Create process group entries until every class has its desired count
pub struct AddProcessGroups;

/// New process groups for the classes that are short, using the smallest free indices
pub fn missing_process_groups(cluster: &FoundationDBCluster) -> Vec<ProcessGroupStatus> {
    let prefix = &cluster.spec.process_group_id_prefix;
    let mut created = Vec::new();

    for (class, desired) in cluster.spec.process_counts.map() {
        let of_class: Vec<&ProcessGroupStatus> = cluster
            .process_groups()
            .iter()
            .filter(|pg| pg.process_class == class)
            .collect();
        let active = of_class
            .iter()
            .filter(|pg| !pg.is_marked_for_removal())
            .count() as i32;

        // Indices of groups being removed stay taken until they are gone
        let mut used: BTreeSet<u32> = of_class.iter().filter_map(|pg| pg.index()).collect();
        let mut next = 1u32;
        for _ in active..desired {
            while used.contains(&next) {
                next += 1;
            }
            used.insert(next);
            created.push(ProcessGroupStatus::new(
                process_group_id(prefix, class, next),
                class,
            ));
        }
    }

    created
}

#[async_trait]
impl Step for AddProcessGroups {
    fn name(&self) -> &'static str {
        "AddProcessGroups"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let created = missing_process_groups(&pass.cluster);
        if created.is_empty() {
            return Ok(None);
        }

        let ids: Vec<&str> = created.iter().map(|pg| pg.process_group_id.as_str()).collect();
        info!(process_groups = ?ids, "Adding process groups");

        pass.cluster.status_mut().process_groups.extend(created);
        // IDs must be durable before objects are created for them
        pass.persist_status(ctx).await?;
        Ok(None)
    }
}
