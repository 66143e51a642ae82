use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stable identifier of a process group, kept across pod recreation
pub type ProcessGroupId = String;

/// Exclusion string prefix used when excluding by locality instead of IP
pub const LOCALITY_INSTANCE_ID_PREFIX: &str = "locality_instance_id:";

/// Process class of a FoundationDB process
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProcessClass {
    Storage,
    Log,
    Transaction,
    Stateless,
    CommitProxy,
    GrvProxy,
    Resolution,
    ClusterController,
    Coordinator,
    Test,
}

impl ProcessClass {
    /// All classes the operator manages, in the order they are created
    pub const ALL: [ProcessClass; 10] = [
        ProcessClass::Storage,
        ProcessClass::Log,
        ProcessClass::Transaction,
        ProcessClass::Stateless,
        ProcessClass::CommitProxy,
        ProcessClass::GrvProxy,
        ProcessClass::Resolution,
        ProcessClass::ClusterController,
        ProcessClass::Coordinator,
        ProcessClass::Test,
    ];

    /// Whether processes of this class take part in the transaction subsystem.
    ///
    /// Turning over part of the transaction system triggers a recovery per
    /// change, so exclusions for these classes are issued together or not at all.
    pub fn is_transaction(&self) -> bool {
        matches!(
            self,
            ProcessClass::Log
                | ProcessClass::Transaction
                | ProcessClass::Stateless
                | ProcessClass::CommitProxy
                | ProcessClass::GrvProxy
                | ProcessClass::Resolution
                | ProcessClass::ClusterController
                | ProcessClass::Coordinator
        )
    }

    /// Whether processes of this class keep data on a persistent volume
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            ProcessClass::Storage | ProcessClass::Log | ProcessClass::Transaction
        )
    }

    /// Whether processes of this class may serve as coordinators
    pub fn is_coordinator_eligible(&self) -> bool {
        self.is_stateful() || *self == ProcessClass::Coordinator
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessClass::Storage => "storage",
            ProcessClass::Log => "log",
            ProcessClass::Transaction => "transaction",
            ProcessClass::Stateless => "stateless",
            ProcessClass::CommitProxy => "commit_proxy",
            ProcessClass::GrvProxy => "grv_proxy",
            ProcessClass::Resolution => "resolution",
            ProcessClass::ClusterController => "cluster_controller",
            ProcessClass::Coordinator => "coordinator",
            ProcessClass::Test => "test",
        }
    }

    /// Parse the class name reported in the machine-readable status
    pub fn parse(value: &str) -> Option<Self> {
        ProcessClass::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for ProcessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition types tracked per process group
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub enum ProcessGroupConditionType {
    /// The process is not reported in the cluster status
    MissingProcesses,
    /// The pod backing the process group does not exist
    MissingPod,
    /// The volume claim backing the process group does not exist
    #[serde(rename = "MissingPVC")]
    MissingPvc,
    /// The process connects with an incompatible protocol version
    IncompatibleConnections,
    /// The process must be restarted to pick up new configuration
    PendingRestart,
    /// Resources of the process group are being deleted
    ResourcesTerminating,
}

impl fmt::Display for ProcessGroupConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A condition with the unix timestamp it was first observed
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroupCondition {
    #[serde(rename = "type")]
    pub condition_type: ProcessGroupConditionType,
    pub timestamp: i64,
}

/// Status of one process group
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGroupStatus {
    #[serde(rename = "processGroupID")]
    pub process_group_id: ProcessGroupId,

    pub process_class: ProcessClass,

    /// Every address the process group was seen with, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_group_conditions: Vec<ProcessGroupCondition>,

    /// Set when the process group was marked for removal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removal_timestamp: Option<i64>,

    /// Set once the exclusion finished and no data is left on the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusion_timestamp: Option<i64>,

    /// Zone the process runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault_domain: Option<String>,
}

impl ProcessGroupStatus {
    pub fn new(process_group_id: impl Into<ProcessGroupId>, process_class: ProcessClass) -> Self {
        Self {
            process_group_id: process_group_id.into(),
            process_class,
            addresses: Vec::new(),
            process_group_conditions: Vec::new(),
            removal_timestamp: None,
            exclusion_timestamp: None,
            fault_domain: None,
        }
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.removal_timestamp.is_some()
    }

    pub fn is_excluded(&self) -> bool {
        self.exclusion_timestamp.is_some()
    }

    /// Only process groups that are marked for removal and fully excluded may be removed
    pub fn is_ready_for_removal(&self) -> bool {
        self.is_marked_for_removal() && self.is_excluded()
    }

    /// Mark the process group for removal, keeping the first timestamp
    pub fn mark_for_removal(&mut self, now: i64) {
        if self.removal_timestamp.is_none() {
            self.removal_timestamp = Some(now);
        }
    }

    pub fn set_excluded(&mut self, now: i64) {
        if self.exclusion_timestamp.is_none() {
            self.exclusion_timestamp = Some(now);
        }
    }

    /// The locality based exclusion string for this process group
    pub fn exclusion_string(&self) -> String {
        format!("{}{}", LOCALITY_INSTANCE_ID_PREFIX, self.process_group_id)
    }

    pub fn condition_time(&self, condition_type: ProcessGroupConditionType) -> Option<i64> {
        self.process_group_conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
            .map(|c| c.timestamp)
    }

    pub fn has_condition(&self, condition_type: ProcessGroupConditionType) -> bool {
        self.condition_time(condition_type).is_some()
    }

    /// Add or clear a condition. An existing condition keeps its original timestamp.
    ///
    /// Returns true if the conditions changed.
    pub fn update_condition(
        &mut self,
        condition_type: ProcessGroupConditionType,
        present: bool,
        now: i64,
    ) -> bool {
        let existing = self.has_condition(condition_type);
        match (present, existing) {
            (true, false) => {
                self.process_group_conditions.push(ProcessGroupCondition {
                    condition_type,
                    timestamp: now,
                });
                true
            }
            (false, true) => {
                self.process_group_conditions
                    .retain(|c| c.condition_type != condition_type);
                true
            }
            _ => false,
        }
    }

    /// Record an address, keeping older ones so exclusions by IP still match
    pub fn add_address(&mut self, address: &str) -> bool {
        if self.addresses.iter().any(|a| a == address) {
            return false;
        }
        self.addresses.push(address.to_string());
        true
    }

    /// Index parsed from the trailing `-<n>` of the process group ID
    pub fn index(&self) -> Option<u32> {
        self.process_group_id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
    }
}

/// Build the process group ID for a class and index
pub fn process_group_id(prefix: &str, class: ProcessClass, index: u32) -> ProcessGroupId {
    if prefix.is_empty() {
        format!("{}-{}", class.as_str(), index)
    } else {
        format!("{}-{}-{}", prefix, class.as_str(), index)
    }
}
