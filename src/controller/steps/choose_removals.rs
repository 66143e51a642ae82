use std::cmp::Reverse;
use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::info;

use super::unix_now;
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::{FoundationDBCluster, ProcessClass, ProcessGroupId};

/// Mark surplus process groups and the ones the user asked to replace
pub struct ChooseRemovals;

/// Process groups that should be marked for removal and are not yet
pub fn choose_removals(cluster: &FoundationDBCluster) -> Vec<ProcessGroupId> {
    let requested: BTreeSet<&str> = cluster
        .spec
        .process_groups_to_remove
        .iter()
        .map(String::as_str)
        .collect();
    let mut chosen: Vec<ProcessGroupId> = cluster
        .process_groups()
        .iter()
        .filter(|pg| !pg.is_marked_for_removal() && requested.contains(pg.process_group_id.as_str()))
        .map(|pg| pg.process_group_id.clone())
        .collect();

    for class in ProcessClass::ALL {
        let desired = cluster.spec.process_counts.get(class).max(0) as usize;
        let mut active: Vec<_> = cluster
            .process_groups()
            .iter()
            .filter(|pg| pg.process_class == class && !pg.is_marked_for_removal())
            .filter(|pg| !chosen.contains(&pg.process_group_id))
            .collect();
        if active.len() <= desired {
            continue;
        }

        // Newest groups go first
        active.sort_by_key(|pg| Reverse((pg.index(), pg.process_group_id.clone())));
        let surplus = active.len() - desired;
        chosen.extend(
            active
                .into_iter()
                .take(surplus)
                .map(|pg| pg.process_group_id.clone()),
        );
    }

    chosen
}

#[async_trait]
impl Step for ChooseRemovals {
    fn name(&self) -> &'static str {
        "ChooseRemovals"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let chosen = choose_removals(&pass.cluster);
        if chosen.is_empty() {
            return Ok(None);
        }

        info!(process_groups = ?chosen, "Marking process groups for removal");
        let now = unix_now();
        for process_group in pass.cluster.status_mut().process_groups.iter_mut() {
            if chosen.contains(&process_group.process_group_id) {
                process_group.mark_for_removal(now);
            }
        }
        pass.persist_status(ctx).await?;
        Ok(None)
    }
}
