pub mod admin;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;
pub mod store;

pub use config::OperatorConfig;
pub use controller::{BackoffConfig, Context, Error, Result, error_policy, reconcile, run_pass};
pub use crd::FoundationDBCluster;
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::runtime::Controller;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Run the FoundationDBCluster controller.
///
/// When `namespace` is `Some(ns)`, only watches resources in that namespace.
/// When `namespace` is `None`, watches resources cluster-wide.
///
/// The context carries the store and database client provider, so tests can
/// run the same loop against other implementations.
pub async fn run_controller_scoped(client: Client, ctx: Arc<Context>, namespace: Option<&str>) {
    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for FoundationDBCluster resources (scope: {})",
        scope_msg
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    let clusters: Api<FoundationDBCluster> = scoped_api(client.clone(), namespace);
    let pods: Api<Pod> = scoped_api(client.clone(), namespace);
    let pvcs: Api<PersistentVolumeClaim> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);

    let watcher_config = WatcherConfig::default().any_semantic();
    let controller_config =
        ControllerConfig::default().concurrency(ctx.config.max_concurrent_reconciles);

    // Watch FoundationDBCluster and all owned resources to trigger reconciliation
    Controller::new(clusters, watcher_config.clone())
        .with_config(controller_config)
        .owns(pods, watcher_config.clone())
        .owns(pvcs, watcher_config.clone())
        .owns(services, watcher_config.clone())
        .owns(configmaps, watcher_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events of owned objects can still arrive after the cluster is gone
                    let is_not_found = matches!(
                        &e,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
                    );
                    if is_not_found {
                        tracing::debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        tracing::error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
}
