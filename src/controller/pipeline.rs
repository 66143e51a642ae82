//! Ordered reconciliation pipeline
//!
//! A pass runs every [`Step`] of a [`Pipeline`] in order against one
//! [`ReconcilePass`]. Steps that grow or repair the topology come first,
//! steps that depend on the observed database status come next, and steps
//! that shrink the topology run last.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::admin::{AdminClient, ClusterObservedStatus};
use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::lock::ClusterLock;
use crate::controller::requeue::Requeue;
use crate::controller::steps;
use crate::crd::{FoundationDBCluster, FoundationDBClusterStatus};
use crate::store::ClusterKey;

/// State shared by the steps of one pass
pub struct ReconcilePass {
    pub key: ClusterKey,
    pub cluster: FoundationDBCluster,
    pub admin: Arc<dyn AdminClient>,
    pub lock: ClusterLock,
    pub trace_id: Uuid,
    /// A step earlier in this pass asked for a requeue
    pub requeue_requested: bool,
    cached_status: Option<ClusterObservedStatus>,
    persisted_status: Option<FoundationDBClusterStatus>,
}

impl ReconcilePass {
    pub fn new(
        key: ClusterKey,
        cluster: FoundationDBCluster,
        admin: Arc<dyn AdminClient>,
        lock: ClusterLock,
    ) -> Self {
        let persisted_status = cluster.status.clone();
        Self {
            key,
            cluster,
            admin,
            lock,
            trace_id: Uuid::new_v4(),
            requeue_requested: false,
            cached_status: None,
            persisted_status,
        }
    }

    /// Share one database status between the steps of this pass
    pub fn cache_status(&mut self, status: ClusterObservedStatus) {
        self.cached_status = Some(status);
    }

    pub fn cached_status(&self) -> Option<&ClusterObservedStatus> {
        self.cached_status.as_ref()
    }

    /// The cached status, or a fresh one from the database
    pub async fn observed_status(&self) -> Result<ClusterObservedStatus> {
        match &self.cached_status {
            Some(status) => Ok(status.clone()),
            None => Ok(self.admin.get_status().await?),
        }
    }

    /// Replace the cached status after a mutation, if one is cached
    pub async fn refresh_cached_status(&mut self) -> Result<()> {
        if self.cached_status.is_some() {
            self.cached_status = Some(self.admin.get_status().await?);
        }
        Ok(())
    }

    /// The operator just caused a recovery
    pub fn reset_recovery_clock(&mut self) {
        if let Some(status) = self.cached_status.as_mut() {
            status.reset_recovery_clock();
        }
    }

    pub fn status_changed(&self) -> bool {
        self.cluster.status != self.persisted_status
    }

    /// Write the cluster status if it changed since it was last read or written
    pub async fn persist_status(&mut self, ctx: &Context) -> Result<bool> {
        if !self.status_changed() {
            return Ok(false);
        }
        let updated = ctx.store.update_status(&self.cluster).await?;
        debug!(trace_id = %self.trace_id, "Persisted cluster status");
        self.cluster.metadata.resource_version = updated.metadata.resource_version;
        self.persisted_status = self.cluster.status.clone();
        Ok(true)
    }
}

/// One sub-reconciler of the pipeline
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the step. `None` means the pass continues without a requeue.
    ///
    /// Errors are mapped with [`Requeue::from_error`].
    async fn reconcile(&self, ctx: &Context, pass: &mut ReconcilePass) -> Result<Option<Requeue>>;
}

/// Fixed ordered list of steps
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// The pipeline the operator runs
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(steps::UpdateStatus),
            Box::new(steps::UpdateConfigMap),
            Box::new(steps::ReplaceFailedProcessGroups),
            Box::new(steps::AddProcessGroups),
            Box::new(steps::AddServices),
            Box::new(steps::AddPvcs),
            Box::new(steps::AddPods),
            Box::new(steps::RemoveIncompatibleProcesses),
            Box::new(steps::ChooseRemovals),
            Box::new(steps::ExcludeProcesses),
            Box::new(steps::ChangeCoordinators),
            Box::new(steps::BounceProcesses),
            Box::new(steps::RemoveProcessGroups),
            Box::new(steps::FinalizeStatus),
        ])
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}
