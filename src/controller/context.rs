use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::admin::DatabaseClientProvider;
use crate::config::OperatorConfig;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::Pipeline;
use crate::health::HealthState;
use crate::store::{ClusterKey, ClusterStore};

/// Shared context for the controller
///
/// The store and the database client provider are required; a context
/// cannot be assembled without them.
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub provider: Arc<dyn DatabaseClientProvider>,
    pub config: OperatorConfig,
    pub pipeline: Pipeline,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    in_flight: Mutex<HashSet<ClusterKey>>,
    failures: Mutex<HashMap<ClusterKey, u32>>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        provider: Arc<dyn DatabaseClientProvider>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            pipeline: Pipeline::standard(),
            health_state: None,
            in_flight: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    /// Claim the right to run a pass for a cluster.
    ///
    /// The claim is held until the returned guard is dropped. A second claim
    /// for the same cluster fails while the first one is alive.
    pub fn begin_pass(&self, key: &ClusterKey) -> Result<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(key.clone()) {
            return Err(Error::InFlightError(key.to_string()));
        }
        Ok(InFlightGuard {
            context: self,
            key: key.clone(),
        })
    }

    /// Count a failed pass; returns the number of failures before this one
    pub fn record_failure(&self, key: &ClusterKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset_failures(&self, key: &ClusterKey) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }

    /// Record a successful reconciliation in metrics
    pub fn record_reconcile(&self, key: &ClusterKey, duration_secs: f64) {
        if let Some(ref health_state) = self.health_state {
            health_state
                .metrics
                .record_reconcile(&key.namespace, &key.name, duration_secs);
            let now = chrono::Utc::now().timestamp().max(0) as u64;
            health_state.touch_reconcile(now);
        }
    }

    /// Record a reconciliation error in metrics
    pub fn record_error(&self, key: &ClusterKey) {
        if let Some(ref health_state) = self.health_state {
            health_state.metrics.record_error(&key.namespace, &key.name);
        }
    }

    pub fn record_exclusions(&self, key: &ClusterKey, count: usize) {
        if let Some(ref health_state) = self.health_state {
            health_state
                .metrics
                .record_exclusions(&key.namespace, &key.name, count as u64);
        }
    }

    pub fn record_process_restarts(&self, key: &ClusterKey, count: usize) {
        if let Some(ref health_state) = self.health_state {
            health_state
                .metrics
                .record_process_restarts(&key.namespace, &key.name, count as u64);
        }
    }

    pub fn record_replacements(&self, key: &ClusterKey, count: usize) {
        if let Some(ref health_state) = self.health_state {
            health_state
                .metrics
                .record_replacements(&key.namespace, &key.name, count as u64);
        }
    }

    pub fn record_process_groups(&self, key: &ClusterKey, total: usize, pending_removal: usize) {
        if let Some(ref health_state) = self.health_state {
            health_state.metrics.set_process_groups(
                &key.namespace,
                &key.name,
                total as i64,
                pending_removal as i64,
            );
        }
    }

    pub fn record_coordinator_change(&self, key: &ClusterKey) {
        if let Some(ref health_state) = self.health_state {
            health_state
                .metrics
                .record_coordinator_change(&key.namespace, &key.name);
        }
    }
}

/// Releases a cluster's in-flight claim on drop
pub struct InFlightGuard<'a> {
    context: &'a Context,
    key: ClusterKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self
            .context
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}
