use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::process_group::{ProcessClass, ProcessGroupStatus};

/// FoundationDBCluster is the Schema for the foundationdbclusters API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "apps.foundationdb.org",
    version = "v1beta2",
    kind = "FoundationDBCluster",
    plural = "foundationdbclusters",
    shortname = "fdb",
    namespaced,
    status = "FoundationDBClusterStatus",
    printcolumn = r#"{"name":"Generation", "type":"integer", "jsonPath":".metadata.generation"}"#,
    printcolumn = r#"{"name":"Reconciled", "type":"integer", "jsonPath":".status.generations.reconciled"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FoundationDBClusterSpec {
    /// FoundationDB version (e.g., "7.1.57", "7.3.43")
    pub version: String,

    /// Desired number of processes per process class
    #[serde(default)]
    pub process_counts: ProcessCounts,

    #[serde(default)]
    pub database_configuration: DatabaseConfiguration,

    /// Prefix for generated process group IDs
    #[serde(default, rename = "processGroupIDPrefix")]
    pub process_group_id_prefix: String,

    /// Process groups the user asked to have replaced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_groups_to_remove: Vec<String>,

    #[serde(default)]
    pub lock_options: LockOptions,

    #[serde(default)]
    pub automation_options: AutomationOptions,

    /// Coordinator class priorities; higher priority classes are chosen first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coordinator_selection: Vec<CoordinatorSelectionSetting>,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Storage for stateful process classes
    #[serde(default)]
    pub storage: StorageSpec,

    /// Container image for FoundationDB processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Labels added to every object the operator creates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Stop reconciling this cluster
    #[serde(default)]
    pub skip: bool,
}

/// Desired process counts; zero means "use the default for the redundancy mode"
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCounts {
    #[serde(default)]
    pub storage: i32,
    #[serde(default)]
    pub log: i32,
    #[serde(default)]
    pub transaction: i32,
    #[serde(default)]
    pub stateless: i32,
    #[serde(default)]
    pub commit_proxy: i32,
    #[serde(default)]
    pub grv_proxy: i32,
    #[serde(default)]
    pub resolution: i32,
    #[serde(default)]
    pub cluster_controller: i32,
    #[serde(default)]
    pub coordinator: i32,
    #[serde(default)]
    pub test: i32,
}

impl ProcessCounts {
    pub fn get(&self, class: ProcessClass) -> i32 {
        match class {
            ProcessClass::Storage => self.storage,
            ProcessClass::Log => self.log,
            ProcessClass::Transaction => self.transaction,
            ProcessClass::Stateless => self.stateless,
            ProcessClass::CommitProxy => self.commit_proxy,
            ProcessClass::GrvProxy => self.grv_proxy,
            ProcessClass::Resolution => self.resolution,
            ProcessClass::ClusterController => self.cluster_controller,
            ProcessClass::Coordinator => self.coordinator,
            ProcessClass::Test => self.test,
        }
    }

    pub fn set(&mut self, class: ProcessClass, count: i32) {
        let slot = match class {
            ProcessClass::Storage => &mut self.storage,
            ProcessClass::Log => &mut self.log,
            ProcessClass::Transaction => &mut self.transaction,
            ProcessClass::Stateless => &mut self.stateless,
            ProcessClass::CommitProxy => &mut self.commit_proxy,
            ProcessClass::GrvProxy => &mut self.grv_proxy,
            ProcessClass::Resolution => &mut self.resolution,
            ProcessClass::ClusterController => &mut self.cluster_controller,
            ProcessClass::Coordinator => &mut self.coordinator,
            ProcessClass::Test => &mut self.test,
        };
        *slot = count;
    }

    /// Counts keyed by class, skipping classes with no desired processes
    pub fn map(&self) -> BTreeMap<ProcessClass, i32> {
        ProcessClass::ALL
            .into_iter()
            .map(|class| (class, self.get(class)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Replication mode of the database
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyMode {
    Single,
    #[default]
    Double,
    Triple,
}

impl RedundancyMode {
    /// Number of zone failures the cluster must survive
    pub fn fault_tolerance(&self) -> i32 {
        match self {
            RedundancyMode::Single => 0,
            RedundancyMode::Double => 1,
            RedundancyMode::Triple => 2,
        }
    }

    pub fn coordinator_count(&self) -> usize {
        match self {
            RedundancyMode::Single => 1,
            RedundancyMode::Double => 3,
            RedundancyMode::Triple => 5,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfiguration {
    #[serde(default)]
    pub redundancy_mode: RedundancyMode,
}

/// Locking between operator instances that manage the same cluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockOptions {
    /// Explicitly enable or disable locking; defaults to on in global synchronization mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_locks: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_key_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_duration_minutes: Option<i32>,
}

/// How multiple operator instances agree on cluster mutations
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynchronizationMode {
    #[default]
    Local,
    Global,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutomationOptions {
    /// Fetch the database status once per pass and share it between steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_database_status_for_reconciliation: Option<bool>,

    /// Exclude by `locality_instance_id` instead of by IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_localities_for_exclusion: Option<bool>,

    #[serde(default)]
    pub synchronization_mode: SynchronizationMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_restart_incompatible_processes: Option<bool>,

    /// Restart processes that run with an outdated version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_processes: Option<bool>,

    #[serde(default)]
    pub replacements: AutomaticReplacementOptions,
}

/// Replacement of process groups that have been failing for a while
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticReplacementOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// How long a process group has to be failing before it is replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detection_time_seconds: Option<i64>,

    /// Upper bound on process groups being replaced at the same time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_replacements: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorSelectionSetting {
    pub process_class: ProcessClass,
    pub priority: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Create one Service per process group
    #[serde(default)]
    pub define_pod_services: bool,
}

/// Storage configuration for stateful process volumes
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name (uses default if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Size of the persistent volume (e.g., "10Gi", "100Gi")
    pub size: String,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            storage_class: None,
            size: "128Gi".to_string(),
        }
    }
}

/// Status of the FoundationDBCluster
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FoundationDBClusterStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_groups: Vec<ProcessGroupStatus>,

    #[serde(default)]
    pub generations: ClusterGenerationStatus,

    /// Cluster file contents used to reach the database
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_string: String,

    /// Whether the database was configured at least once
    #[serde(default)]
    pub configured: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_version: Option<String>,

    /// Generation seen by the last pass, reconciled or not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGenerationStatus {
    /// Last generation that was fully reconciled
    #[serde(default)]
    pub reconciled: i64,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl FoundationDBCluster {
    pub fn process_groups(&self) -> &[ProcessGroupStatus] {
        self.status
            .as_ref()
            .map(|s| s.process_groups.as_slice())
            .unwrap_or_default()
    }

    /// Status, created on first use
    pub fn status_mut(&mut self) -> &mut FoundationDBClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }

    pub fn desired_fault_tolerance(&self) -> i32 {
        self.spec
            .database_configuration
            .redundancy_mode
            .fault_tolerance()
    }

    pub fn desired_coordinator_count(&self) -> usize {
        self.spec
            .database_configuration
            .redundancy_mode
            .coordinator_count()
    }

    pub fn synchronization_mode(&self) -> SynchronizationMode {
        self.spec.automation_options.synchronization_mode
    }

    pub fn is_global_synchronization(&self) -> bool {
        self.synchronization_mode() == SynchronizationMode::Global
    }

    /// Locks are on when requested, and by default whenever several instances coordinate
    pub fn should_use_locks(&self) -> bool {
        match self.spec.lock_options.disable_locks {
            Some(disabled) => !disabled,
            None => self.is_global_synchronization(),
        }
    }

    pub fn use_localities_for_exclusion(&self) -> bool {
        self.spec
            .automation_options
            .use_localities_for_exclusion
            .unwrap_or(false)
    }

    pub fn cache_database_status(&self, default: bool) -> bool {
        self.spec
            .automation_options
            .cache_database_status_for_reconciliation
            .unwrap_or(default)
    }

    pub fn restart_incompatible_processes(&self, default: bool) -> bool {
        self.spec
            .automation_options
            .enable_restart_incompatible_processes
            .unwrap_or(default)
    }

    pub fn automatic_replacements_enabled(&self) -> bool {
        self.spec.automation_options.replacements.enabled.unwrap_or(true)
    }

    pub fn failure_detection_time(&self, default: Duration) -> Duration {
        self.spec
            .automation_options
            .replacements
            .failure_detection_time_seconds
            .and_then(|s| u64::try_from(s).ok())
            .map_or(default, Duration::from_secs)
    }

    pub fn max_concurrent_replacements(&self, default: usize) -> usize {
        self.spec
            .automation_options
            .replacements
            .max_concurrent_replacements
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(default)
    }

    pub fn kill_processes_enabled(&self) -> bool {
        self.spec.automation_options.kill_processes.unwrap_or(true)
    }

    /// The version still running while the spec asks for another one
    pub fn upgrade_in_progress(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.running_version.as_deref())
            .filter(|running| *running != self.spec.version)
    }

    pub fn reconciled_generation(&self) -> i64 {
        self.status
            .as_ref()
            .map(|s| s.generations.reconciled)
            .unwrap_or(0)
    }

    /// Coordinator selection priority for a class; unlisted classes get 0
    pub fn coordinator_priority(&self, class: ProcessClass) -> i32 {
        self.spec
            .coordinator_selection
            .iter()
            .find(|s| s.process_class == class)
            .map(|s| s.priority)
            .unwrap_or(0)
    }
}
