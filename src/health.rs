//! Probe and metrics server
//!
//! `/healthz` answers while the process runs, `/readyz` once the controller
//! stream is up, and `/metrics` exposes pass, exclusion and coordinator
//! counters per cluster.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Metric labels identifying a FoundationDBCluster
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl prometheus_client::encoding::EncodeLabelSet for ClusterLabels {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder<'_>,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Operator metrics, labelled per cluster
pub struct Metrics {
    /// Passes that ended without error
    pub reconciliations_total: Family<ClusterLabels, Counter>,
    pub reconciliation_errors_total: Family<ClusterLabels, Counter>,
    pub reconcile_duration_seconds: Family<ClusterLabels, Histogram>,

    /// Entries passed to exclude calls
    pub exclusions_total: Family<ClusterLabels, Counter>,
    /// Successful coordinator changes
    pub coordinator_changes_total: Family<ClusterLabels, Counter>,
    /// Processes restarted through the admin client
    pub process_restarts_total: Family<ClusterLabels, Counter>,
    /// Failed process groups marked for replacement
    pub replacements_total: Family<ClusterLabels, Counter>,
    /// Process groups in status per cluster
    pub process_groups: Family<ClusterLabels, Gauge>,
    /// Process groups marked for removal per cluster
    pub process_groups_pending_removal: Family<ClusterLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_reconciliations",
            "Reconciliation passes that ended without error",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_reconciliation_errors",
            "Reconciliation passes that ended with an error",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "fdb_operator_reconcile_duration_seconds",
            "Wall time of a reconciliation pass in seconds",
            reconcile_duration_seconds.clone(),
        );

        let exclusions_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_exclusions",
            "Total number of addresses or localities excluded",
            exclusions_total.clone(),
        );

        let coordinator_changes_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_coordinator_changes",
            "Total number of coordinator changes",
            coordinator_changes_total.clone(),
        );

        let process_restarts_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_process_restarts",
            "Total number of processes restarted",
            process_restarts_total.clone(),
        );

        let replacements_total = Family::<ClusterLabels, Counter>::default();
        registry.register(
            "fdb_operator_replacements",
            "Total number of failed process groups marked for replacement",
            replacements_total.clone(),
        );

        let process_groups = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "fdb_operator_process_groups",
            "Number of process groups in each cluster's status",
            process_groups.clone(),
        );

        let process_groups_pending_removal = Family::<ClusterLabels, Gauge>::default();
        registry.register(
            "fdb_operator_process_groups_pending_removal",
            "Number of process groups marked for removal in each cluster",
            process_groups_pending_removal.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            exclusions_total,
            coordinator_changes_total,
            process_restarts_total,
            replacements_total,
            process_groups,
            process_groups_pending_removal,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn record_exclusions(&self, namespace: &str, name: &str, count: u64) {
        self.exclusions_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc_by(count);
    }

    pub fn record_coordinator_change(&self, namespace: &str, name: &str) {
        self.coordinator_changes_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn record_process_restarts(&self, namespace: &str, name: &str, count: u64) {
        self.process_restarts_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc_by(count);
    }

    pub fn record_replacements(&self, namespace: &str, name: &str, count: u64) {
        self.replacements_total
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc_by(count);
    }

    /// Update process group gauges of a cluster
    pub fn set_process_groups(&self, namespace: &str, name: &str, total: i64, pending_removal: i64) {
        let labels = ClusterLabels::new(namespace, name);
        self.process_groups.get_or_create(&labels).set(total);
        self.process_groups_pending_removal
            .get_or_create(&labels)
            .set(pending_removal);
    }

    /// Prometheus text exposition of every registered metric
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// State shared between the controller and the probe server
pub struct HealthState {
    /// Set once the controller stream runs, cleared on shutdown
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
    /// Unix seconds of the last pass that ended without error, 0 before the first
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Remember when the last pass succeeded, in unix seconds
    pub fn touch_reconcile(&self, unix_secs: u64) {
        self.last_reconcile.store(unix_secs, Ordering::Relaxed);
    }

    pub fn last_reconcile(&self) -> u64 {
        self.last_reconcile.load(Ordering::Relaxed)
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 503 until the controller runs; reports the last successful pass otherwise
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if !state.is_ready().await {
        return (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response();
    }
    match state.last_reconcile() {
        0 => (StatusCode::OK, "ready").into_response(),
        last => (StatusCode::OK, format!("ready, last pass at {}", last)).into_response(),
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.encode(),
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let address = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Health server listening on {}", address);

    axum::serve(listener, app).await
}
