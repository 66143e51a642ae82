//! In-memory database used by tests and local runs
//!
//! [`MockDatabase`] keeps a mutable [`ClusterObservedStatus`] and applies
//! exclusions, inclusions and coordinator changes to it, so a second
//! reconciliation pass observes the effects of the first. Every mutating call
//! is recorded, and failures can be injected per operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::status::{
    ExcludedServer, LOCALITY_INSTANCE_ID, LOCALITY_ZONE_ID, ProcessInfo, ProcessRole,
    ROLE_COORDINATOR, RecoveryState, machine_address,
};
use super::{
    AdminClient, AdminError, AdminResult, ClusterObservedStatus, DatabaseClientProvider,
    ExclusionMap, ExclusionUpdates, LockClient, UpdateAction,
};
use crate::crd::{FoundationDBCluster, LOCALITY_INSTANCE_ID_PREFIX, ProcessClass};

/// Operations that accept injected failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MockOperation {
    GetStatus,
    Exclude,
    Include,
    CanSafelyRemove,
    Kill,
    ChangeCoordinators,
    PendingForExclusion,
    ReadyForExclusion,
    TakeLock,
    ReleaseLock,
}

#[derive(Default)]
struct MockState {
    status: ClusterObservedStatus,
    unsupported_versions: BTreeSet<String>,
    failures: BTreeMap<MockOperation, AdminError>,
    /// Addresses that still hold data and cannot be removed yet
    remaining_data: BTreeSet<String>,
    pending: ExclusionMap,
    ready: ExclusionMap,
    exclude_calls: Vec<Vec<String>>,
    include_calls: Vec<Vec<String>>,
    kill_calls: Vec<Vec<String>>,
    coordinator_changes: Vec<Vec<String>>,
    status_fetches: usize,
    lock_holder: Option<String>,
    lock_takes: usize,
    lock_releases: usize,
    timeout: Option<Duration>,
    closed: bool,
}

/// Shared in-memory database. Clones share state.
#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        let db = Self::default();
        db.state().status.cluster.recovery_state = Some(RecoveryState {
            name: "fully_recovered".to_string(),
            seconds_since_last_recovered: 600.0,
        });
        db.state().status.cluster.connection_string = "mock:initial@127.0.0.1:4501".to_string();
        db.state().status.client.database_status.available = true;
        db
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_failure(&self, operation: MockOperation) -> AdminResult<()> {
        match self.state().failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Register a running process for a process group
    pub fn add_process(&self, process_group_id: &str, class: ProcessClass, address: &str, zone: &str) {
        let locality = BTreeMap::from([
            (LOCALITY_INSTANCE_ID.to_string(), process_group_id.to_string()),
            (LOCALITY_ZONE_ID.to_string(), zone.to_string()),
        ]);
        self.state().status.cluster.processes.insert(
            process_group_id.to_string(),
            ProcessInfo {
                address: format!("{}:4501", address),
                class_type: class.as_str().to_string(),
                excluded: false,
                locality,
                roles: Vec::new(),
                version: String::new(),
            },
        );
    }

    pub fn remove_process(&self, process_group_id: &str) {
        self.state().status.cluster.processes.remove(process_group_id);
    }

    /// Make the processes of the given groups the coordinators
    pub fn set_coordinators(&self, process_group_ids: &[&str]) {
        let mut state = self.state();
        let mut addresses = Vec::new();
        for process in state.status.cluster.processes.values_mut() {
            process.roles.retain(|r| r.role != ROLE_COORDINATOR);
            if let Some(id) = process.process_group_id()
                && process_group_ids.contains(&id)
            {
                process.roles.push(ProcessRole {
                    role: ROLE_COORDINATOR.to_string(),
                });
                addresses.push(process.address.clone());
            }
        }
        state.status.client.coordinators.coordinators = addresses
            .iter()
            .map(|a| super::status::CoordinatorInfo {
                address: a.clone(),
                reachable: true,
            })
            .collect();
        state.status.cluster.connection_string = format!("mock:initial@{}", addresses.join(","));
    }

    pub fn set_seconds_since_last_recovered(&self, seconds: f64) {
        self.state().status.cluster.recovery_state = Some(RecoveryState {
            name: "fully_recovered".to_string(),
            seconds_since_last_recovered: seconds,
        });
    }

    pub fn set_incompatible_connections(&self, addresses: &[&str]) {
        self.state().status.cluster.incompatible_connections =
            addresses.iter().map(|a| a.to_string()).collect();
    }

    /// Report `version` for the processes of the given groups, or for all of them when empty
    pub fn set_process_version(&self, process_group_ids: &[&str], version: &str) {
        for process in self.state().status.cluster.processes.values_mut() {
            let selected = process_group_ids.is_empty()
                || process
                    .process_group_id()
                    .is_some_and(|id| process_group_ids.contains(&id));
            if selected {
                process.version = version.to_string();
            }
        }
    }

    pub fn set_version_unsupported(&self, version: &str) {
        self.state().unsupported_versions.insert(version.to_string());
    }

    /// Keep addresses reported as still holding data
    pub fn set_remaining_data(&self, addresses: &[&str]) {
        self.state().remaining_data = addresses.iter().map(|a| a.to_string()).collect();
    }

    pub fn fail(&self, operation: MockOperation, error: AdminError) {
        self.state().failures.insert(operation, error);
    }

    pub fn clear_failure(&self, operation: MockOperation) {
        self.state().failures.remove(&operation);
    }

    /// Hold the lock as another operator instance
    pub fn hold_lock(&self, holder: &str) {
        self.state().lock_holder = Some(holder.to_string());
    }

    pub fn status(&self) -> ClusterObservedStatus {
        self.state().status.clone()
    }

    pub fn exclude_calls(&self) -> Vec<Vec<String>> {
        self.state().exclude_calls.clone()
    }

    pub fn include_calls(&self) -> Vec<Vec<String>> {
        self.state().include_calls.clone()
    }

    pub fn kill_calls(&self) -> Vec<Vec<String>> {
        self.state().kill_calls.clone()
    }

    pub fn coordinator_changes(&self) -> Vec<Vec<String>> {
        self.state().coordinator_changes.clone()
    }

    pub fn status_fetches(&self) -> usize {
        self.state().status_fetches
    }

    pub fn lock_takes(&self) -> usize {
        self.state().lock_takes
    }

    pub fn lock_releases(&self) -> usize {
        self.state().lock_releases
    }

    pub fn lock_holder(&self) -> Option<String> {
        self.state().lock_holder.clone()
    }

    pub fn pending(&self) -> ExclusionMap {
        self.state().pending.clone()
    }

    pub fn ready(&self) -> ExclusionMap {
        self.state().ready.clone()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state().timeout
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of calls that changed the database
    pub fn mutating_calls(&self) -> usize {
        let state = self.state();
        state.exclude_calls.len()
            + state.include_calls.len()
            + state.kill_calls.len()
            + state.coordinator_changes.len()
    }

    /// Lock client acting on behalf of the given operator instance
    pub fn lock_client(&self, holder_id: &str) -> MockLockClient {
        MockLockClient {
            db: self.clone(),
            holder_id: holder_id.to_string(),
        }
    }
}

fn apply_updates(map: &mut ExclusionMap, updates: &ExclusionUpdates) {
    let now = Utc::now();
    for (id, action) in updates {
        match action {
            UpdateAction::Add => {
                map.entry(id.clone()).or_insert(now);
            }
            UpdateAction::Delete => {
                map.remove(id);
            }
        }
    }
}

fn filter_prefix(map: &ExclusionMap, prefix: &str) -> ExclusionMap {
    map.iter()
        .filter(|(id, _)| id.starts_with(prefix))
        .map(|(id, ts)| (id.clone(), *ts))
        .collect()
}

#[async_trait]
impl AdminClient for MockDatabase {
    async fn get_status(&self) -> AdminResult<ClusterObservedStatus> {
        self.check_failure(MockOperation::GetStatus)?;
        let mut state = self.state();
        state.status_fetches += 1;
        Ok(state.status.clone())
    }

    async fn version_supported(&self, version: &str) -> AdminResult<bool> {
        Ok(!self.state().unsupported_versions.contains(version))
    }

    async fn exclude_processes_with_no_wait(
        &self,
        addresses: &[String],
        _use_locks: bool,
    ) -> AdminResult<()> {
        self.check_failure(MockOperation::Exclude)?;
        let mut state = self.state();
        state.exclude_calls.push(addresses.to_vec());

        for entry in addresses {
            let server = match entry.strip_prefix(LOCALITY_INSTANCE_ID_PREFIX) {
                Some(_) => ExcludedServer {
                    address: None,
                    locality: Some(entry.clone()),
                },
                None => ExcludedServer {
                    address: Some(entry.clone()),
                    locality: None,
                },
            };
            if !state.status.cluster.configuration.excluded_servers.contains(&server) {
                state.status.cluster.configuration.excluded_servers.push(server);
            }

            for process in state.status.cluster.processes.values_mut() {
                let matches_locality = entry
                    .strip_prefix(LOCALITY_INSTANCE_ID_PREFIX)
                    .is_some_and(|id| process.process_group_id() == Some(id));
                if matches_locality || machine_address(&process.address) == entry {
                    process.excluded = true;
                }
            }
        }

        if let Some(recovery) = state.status.cluster.recovery_state.as_mut() {
            recovery.seconds_since_last_recovered = 0.0;
        }
        Ok(())
    }

    async fn include_processes(&self, addresses: &[String]) -> AdminResult<()> {
        self.check_failure(MockOperation::Include)?;
        let mut state = self.state();
        state.include_calls.push(addresses.to_vec());
        state
            .status
            .cluster
            .configuration
            .excluded_servers
            .retain(|server| {
                let entry = server
                    .locality
                    .clone()
                    .or_else(|| server.address.clone())
                    .unwrap_or_default();
                !addresses.contains(&entry)
            });
        Ok(())
    }

    async fn can_safely_remove(&self, addresses: &[String]) -> AdminResult<Vec<String>> {
        self.check_failure(MockOperation::CanSafelyRemove)?;
        let state = self.state();
        Ok(addresses
            .iter()
            .filter(|a| state.remaining_data.contains(*a))
            .cloned()
            .collect())
    }

    async fn kill_processes(&self, addresses: &[String]) -> AdminResult<()> {
        self.check_failure(MockOperation::Kill)?;
        let mut state = self.state();
        state.kill_calls.push(addresses.to_vec());
        if let Some(recovery) = state.status.cluster.recovery_state.as_mut() {
            recovery.seconds_since_last_recovered = 0.0;
        }
        Ok(())
    }

    async fn change_coordinators(&self, coordinators: &[String]) -> AdminResult<String> {
        self.check_failure(MockOperation::ChangeCoordinators)?;
        let mut state = self.state();
        state.coordinator_changes.push(coordinators.to_vec());

        let wanted: BTreeSet<&str> = coordinators.iter().map(|c| machine_address(c)).collect();
        for process in state.status.cluster.processes.values_mut() {
            process.roles.retain(|r| r.role != ROLE_COORDINATOR);
            if wanted.contains(machine_address(&process.address)) {
                process.roles.push(ProcessRole {
                    role: ROLE_COORDINATOR.to_string(),
                });
            }
        }
        state.status.client.coordinators.coordinators = coordinators
            .iter()
            .map(|a| super::status::CoordinatorInfo {
                address: a.clone(),
                reachable: true,
            })
            .collect();

        let generation = state.coordinator_changes.len();
        let connection_string = format!("mock:gen{}@{}", generation, coordinators.join(","));
        state.status.cluster.connection_string = connection_string.clone();
        if let Some(recovery) = state.status.cluster.recovery_state.as_mut() {
            recovery.seconds_since_last_recovered = 0.0;
        }
        Ok(connection_string)
    }

    async fn get_pending_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap> {
        self.check_failure(MockOperation::PendingForExclusion)?;
        Ok(filter_prefix(&self.state().pending, prefix))
    }

    async fn update_pending_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()> {
        self.check_failure(MockOperation::PendingForExclusion)?;
        apply_updates(&mut self.state().pending, updates);
        Ok(())
    }

    async fn get_ready_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap> {
        self.check_failure(MockOperation::ReadyForExclusion)?;
        Ok(filter_prefix(&self.state().ready, prefix))
    }

    async fn update_ready_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()> {
        self.check_failure(MockOperation::ReadyForExclusion)?;
        apply_updates(&mut self.state().ready, updates);
        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) {
        self.state().timeout = Some(timeout);
    }

    async fn close(&self) -> AdminResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

/// Lock client of one operator instance against a [`MockDatabase`]
#[derive(Clone)]
pub struct MockLockClient {
    db: MockDatabase,
    holder_id: String,
}

#[async_trait]
impl LockClient for MockLockClient {
    async fn take_lock(&self) -> AdminResult<()> {
        self.db.check_failure(MockOperation::TakeLock)?;
        let mut state = self.db.state();
        match &state.lock_holder {
            Some(holder) if *holder != self.holder_id => Err(AdminError::LockHeld(holder.clone())),
            _ => {
                state.lock_holder = Some(self.holder_id.clone());
                state.lock_takes += 1;
                Ok(())
            }
        }
    }

    async fn release_lock(&self) -> AdminResult<()> {
        self.db.check_failure(MockOperation::ReleaseLock)?;
        let mut state = self.db.state();
        state.lock_releases += 1;
        if state.lock_holder.as_deref() == Some(self.holder_id.as_str()) {
            state.lock_holder = None;
        }
        Ok(())
    }
}

/// Provider handing out clients bound to one [`MockDatabase`]
#[derive(Clone)]
pub struct MockClientProvider {
    pub db: MockDatabase,
    pub holder_id: String,
}

impl MockClientProvider {
    pub fn new(db: MockDatabase) -> Self {
        Self {
            db,
            holder_id: "operator-0".to_string(),
        }
    }
}

#[async_trait]
impl DatabaseClientProvider for MockClientProvider {
    async fn admin_client(
        &self,
        _cluster: &FoundationDBCluster,
    ) -> AdminResult<Arc<dyn AdminClient>> {
        Ok(Arc::new(self.db.clone()))
    }

    async fn lock_client(
        &self,
        _cluster: &FoundationDBCluster,
    ) -> AdminResult<Arc<dyn LockClient>> {
        Ok(Arc::new(self.db.lock_client(&self.holder_id)))
    }
}
