//! Reconciliation driver for FoundationDBCluster resources
//!
//! One pass loads the cluster, normalizes and validates it, binds database
//! clients and runs the pipeline. Delays requested by steps are aggregated;
//! stop and failure outcomes abort the remaining steps.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::admin::AdminClient;
use crate::config::DEFAULT_REQUEUE_DELAY;
use crate::controller::context::Context;
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::lock::ClusterLock;
use crate::controller::pipeline::ReconcilePass;
use crate::controller::requeue::Requeue;
use crate::controller::status::invalid_spec_conditions;
use crate::controller::validation::{normalize, validate_spec};
use crate::crd::FoundationDBCluster;
use crate::store::ClusterKey;

/// Default backoff configuration for error handling
fn default_backoff() -> BackoffConfig {
    BackoffConfig::default()
}

/// Record a rejected spec in the cluster's conditions. Failures are only logged.
async fn report_invalid_spec(ctx: &Context, cluster: &mut FoundationDBCluster, message: &str) {
    let conditions = invalid_spec_conditions(cluster, message);
    if cluster.status.as_ref().map(|s| &s.conditions) == Some(&conditions) {
        return;
    }
    cluster.status_mut().conditions = conditions;
    if let Err(e) = ctx.store.update_status(cluster).await {
        warn!("Failed to record invalid spec: {}", e);
    }
}

/// Run the pipeline with bound clients. Returns the requested requeue delay.
async fn run_steps(
    ctx: &Context,
    key: &ClusterKey,
    cluster: FoundationDBCluster,
    admin: Arc<dyn AdminClient>,
) -> Result<Option<Duration>> {
    let lock_client = ctx.provider.lock_client(&cluster).await?;
    let lock = ClusterLock::new(lock_client, cluster.should_use_locks());
    let cache = cluster.cache_database_status(ctx.config.cache_database_status);
    let mut pass = ReconcilePass::new(key.clone(), cluster, admin, lock);

    if cache {
        match pass.admin.get_status().await {
            Ok(status) => pass.cache_status(status),
            // Steps fetch their own status if the cache is empty
            Err(e) => warn!(trace_id = %pass.trace_id, "Failed to fetch database status: {}", e),
        }
    }

    let mut requested: Option<Duration> = None;
    for step in ctx.pipeline.steps() {
        let span = info_span!("step", name = step.name(), trace_id = %pass.trace_id);
        let started = Instant::now();
        let outcome = match step.reconcile(ctx, &mut pass).instrument(span).await {
            Ok(outcome) => outcome,
            Err(e) => Some(Requeue::from_error(e)),
        };
        debug!(
            trace_id = %pass.trace_id,
            step = step.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Step finished"
        );

        let Some(requeue) = outcome else {
            continue;
        };
        match requeue {
            Requeue::Delayed {
                delay,
                message,
                error,
            } => {
                if let Some(error) = &error {
                    warn!(trace_id = %pass.trace_id, step = step.name(), "Step failed, requeuing: {}", error);
                    ctx.record_error(key);
                }
                if let Some(message) = &message {
                    info!(trace_id = %pass.trace_id, step = step.name(), "{}", message);
                }
                pass.requeue_requested = true;
                requested = Some(requested.map_or(delay, |d| d.max(delay)));
            }
            Requeue::Stop { delay, message } => {
                info!(trace_id = %pass.trace_id, step = step.name(), "Stopping pass: {}", message);
                return Ok(Some(if delay.is_zero() {
                    DEFAULT_REQUEUE_DELAY
                } else {
                    delay
                }));
            }
            Requeue::Failed(error) => {
                error!(trace_id = %pass.trace_id, step = step.name(), "Step failed: {}", error);
                return Err(error);
            }
        }
    }

    let generation = pass.cluster.metadata.generation.unwrap_or_default();
    if requested.is_none() && pass.cluster.reconciled_generation() >= generation {
        info!(trace_id = %pass.trace_id, generation, "Cluster fully reconciled");
        return Ok(None);
    }

    let delay = match requested {
        Some(delay) if !delay.is_zero() => delay,
        _ => DEFAULT_REQUEUE_DELAY,
    };
    Ok(Some(delay))
}

/// Run one reconciliation pass.
///
/// Returns `None` when the cluster is fully reconciled or gone, otherwise the
/// delay after which the cluster should be reconciled again.
pub async fn run_pass(ctx: &Context, key: &ClusterKey) -> Result<Option<Duration>> {
    let _in_flight = ctx.begin_pass(key)?;

    let Some(mut cluster) = ctx.store.get_cluster(key).await? else {
        debug!(cluster = %key, "Cluster no longer exists");
        return Ok(None);
    };

    if cluster.spec.skip {
        info!(cluster = %key, "Reconciliation is disabled for this cluster");
        return Ok(None);
    }

    normalize(&mut cluster);
    if let Err(e) = validate_spec(&cluster) {
        report_invalid_spec(ctx, &mut cluster, &e.to_string()).await;
        return Err(e);
    }

    let admin = ctx.provider.admin_client(&cluster).await?;
    admin.set_timeout(ctx.config.admin_timeout);

    let result = match admin.version_supported(&cluster.spec.version).await {
        Ok(true) => run_steps(ctx, key, cluster, admin.clone()).await,
        Ok(false) => {
            let version = cluster.spec.version.clone();
            let err = Error::UnsupportedVersion(version);
            report_invalid_spec(ctx, &mut cluster, &err.to_string()).await;
            Err(err)
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = admin.close().await {
        warn!(cluster = %key, "Failed to close admin client: {}", e);
    }
    result
}

/// Controller entry point
#[instrument(skip(cluster, ctx), fields(name = %cluster.name_any(), namespace = cluster.namespace().unwrap_or_default()))]
pub async fn reconcile(cluster: Arc<FoundationDBCluster>, ctx: Arc<Context>) -> Result<Action> {
    let key = ClusterKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any());
    let started = Instant::now();

    info!("Reconciling FoundationDBCluster");
    let requeue = run_pass(&ctx, &key).await?;

    ctx.record_reconcile(&key, started.elapsed().as_secs_f64());
    ctx.reset_failures(&key);

    match requeue {
        Some(delay) => {
            debug!("Requeuing in {:?}", delay);
            Ok(Action::requeue(delay))
        }
        None => Ok(Action::requeue(ctx.config.resync_period)),
    }
}

/// Error policy for the controller with exponential backoff
pub fn error_policy(cluster: Arc<FoundationDBCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ClusterKey::new(cluster.namespace().unwrap_or_default(), cluster.name_any());
    let backoff = default_backoff();

    ctx.record_error(&key);
    let retry_count = ctx.record_failure(&key);
    let delay = backoff.delay_for_error(error, retry_count);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            key, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            key, error, delay
        );
    }

    Action::requeue(delay)
}
