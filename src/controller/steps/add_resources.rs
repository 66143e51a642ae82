use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::pipeline::{ReconcilePass, Step};
use crate::controller::requeue::Requeue;
use crate::crd::ProcessGroupStatus;
use crate::resources::common::{process_group_object_name, pvc_name};
use crate::resources::pod::generate_pod;
use crate::resources::pvc::generate_pvc;
use crate::resources::service::generate_process_group_service;

/// Groups that still need their objects
fn active_groups(pass: &ReconcilePass) -> Vec<ProcessGroupStatus> {
    pass.cluster
        .process_groups()
        .iter()
        .filter(|pg| !pg.is_marked_for_removal())
        .cloned()
        .collect()
}

/// Create a service per process group when per-pod services are enabled
pub struct AddServices;

#[async_trait]
impl Step for AddServices {
    fn name(&self) -> &'static str {
        "AddServices"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        if !pass.cluster.spec.routing.define_pod_services {
            return Ok(None);
        }
        let namespace = pass.cluster.namespace().unwrap_or_default();

        for process_group in active_groups(pass) {
            let name = process_group_object_name(&pass.cluster, &process_group.process_group_id);
            if ctx.store.get_service(&namespace, &name).await?.is_some() {
                continue;
            }
            info!(service = %name, "Creating service");
            ctx.store
                .create_service(&generate_process_group_service(&pass.cluster, &process_group))
                .await?;
        }
        Ok(None)
    }
}

/// Create volume claims for stateful process groups
pub struct AddPvcs;

#[async_trait]
impl Step for AddPvcs {
    fn name(&self) -> &'static str {
        "AddPvcs"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let namespace = pass.cluster.namespace().unwrap_or_default();

        for process_group in active_groups(pass) {
            if !process_group.process_class.is_stateful() {
                continue;
            }
            let name = pvc_name(&pass.cluster, &process_group.process_group_id);
            if ctx.store.get_pvc(&namespace, &name).await?.is_some() {
                continue;
            }
            info!(pvc = %name, "Creating volume claim");
            ctx.store
                .create_pvc(&generate_pvc(&pass.cluster, &process_group))
                .await?;
        }
        Ok(None)
    }
}

/// Create pods for process groups that have none
pub struct AddPods;

#[async_trait]
impl Step for AddPods {
    fn name(&self) -> &'static str {
        "AddPods"
    }

    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>> {
        let namespace = pass.cluster.namespace().unwrap_or_default();

        for process_group in active_groups(pass) {
            let name = process_group_object_name(&pass.cluster, &process_group.process_group_id);
            if ctx.store.get_pod(&namespace, &name).await?.is_some() {
                continue;
            }
            info!(pod = %name, "Creating pod");
            ctx.store
                .create_pod(&generate_pod(&pass.cluster, &process_group))
                .await?;
        }
        Ok(None)
    }
}
