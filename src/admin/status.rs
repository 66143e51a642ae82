//! Machine-readable database status
//!
//! Only the parts of the status document the reconciler reads are modelled.
//! Unknown fields are ignored so newer database versions keep parsing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crd::{LOCALITY_INSTANCE_ID_PREFIX, ProcessClass, ProcessGroupId};

/// Locality key holding the process group ID
pub const LOCALITY_INSTANCE_ID: &str = "instance_id";

/// Locality key holding the zone
pub const LOCALITY_ZONE_ID: &str = "zoneid";

/// Role name reported for coordinators
pub const ROLE_COORDINATOR: &str = "coordinator";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterObservedStatus {
    #[serde(default)]
    pub cluster: ClusterInfo,
    #[serde(default)]
    pub client: ClientInfo,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterInfo {
    #[serde(default)]
    pub processes: BTreeMap<String, ProcessInfo>,
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub fault_tolerance: FaultTolerance,
    #[serde(default)]
    pub recovery_state: Option<RecoveryState>,
    #[serde(default)]
    pub configuration: DatabaseConfigurationInfo,
    #[serde(default)]
    pub incompatible_connections: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProcessInfo {
    pub address: String,
    #[serde(default)]
    pub class_type: String,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub locality: BTreeMap<String, String>,
    #[serde(default)]
    pub roles: Vec<ProcessRole>,
    /// Database version the process runs, empty when not reported
    #[serde(default)]
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProcessRole {
    pub role: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FaultTolerance {
    #[serde(default)]
    pub max_zone_failures_without_losing_availability: i32,
    #[serde(default)]
    pub max_zone_failures_without_losing_data: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RecoveryState {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub seconds_since_last_recovered: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DatabaseConfigurationInfo {
    #[serde(default)]
    pub excluded_servers: Vec<ExcludedServer>,
}

/// One entry of the exclusion list, either by address or by locality
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExcludedServer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClientInfo {
    #[serde(default)]
    pub coordinators: CoordinatorsInfo,
    #[serde(default)]
    pub database_status: DatabaseAvailability,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CoordinatorsInfo {
    #[serde(default)]
    pub coordinators: Vec<CoordinatorInfo>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CoordinatorInfo {
    pub address: String,
    #[serde(default)]
    pub reachable: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DatabaseAvailability {
    #[serde(default)]
    pub available: bool,
}

/// Strip port and flags from a process address: `10.1.1.1:4501:tls` -> `10.1.1.1`
pub fn machine_address(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    address.split(':').next().unwrap_or(address)
}

impl ProcessInfo {
    pub fn process_group_id(&self) -> Option<&str> {
        self.locality.get(LOCALITY_INSTANCE_ID).map(String::as_str)
    }

    pub fn zone(&self) -> Option<&str> {
        self.locality.get(LOCALITY_ZONE_ID).map(String::as_str)
    }

    pub fn process_class(&self) -> Option<ProcessClass> {
        ProcessClass::parse(&self.class_type)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.role == role)
    }
}

impl ClusterObservedStatus {
    /// Current exclusion list as address or `locality_instance_id:` strings
    pub fn exclusions(&self) -> Vec<String> {
        self.cluster
            .configuration
            .excluded_servers
            .iter()
            .filter_map(|server| {
                server
                    .locality
                    .clone()
                    .or_else(|| server.address.as_deref().map(|a| machine_address(a).to_string()))
            })
            .collect()
    }

    /// Process group IDs of processes that currently serve as coordinators
    pub fn coordinator_process_group_ids(&self) -> BTreeSet<ProcessGroupId> {
        self.cluster
            .processes
            .values()
            .filter(|p| p.has_role(ROLE_COORDINATOR))
            .filter_map(|p| p.process_group_id().map(str::to_string))
            .collect()
    }

    /// Machine addresses of the coordinators as known to the client
    pub fn coordinator_addresses(&self) -> BTreeSet<String> {
        self.client
            .coordinators
            .coordinators
            .iter()
            .map(|c| machine_address(&c.address).to_string())
            .collect()
    }

    /// Processes reported for a process group
    pub fn processes_for_group<'a>(
        &'a self,
        process_group_id: &'a str,
    ) -> impl Iterator<Item = &'a ProcessInfo> + 'a {
        self.cluster
            .processes
            .values()
            .filter(move |p| p.process_group_id() == Some(process_group_id))
    }

    /// Process group ID -> machine addresses reported for it
    pub fn addresses_by_process_group(&self) -> BTreeMap<ProcessGroupId, Vec<String>> {
        let mut result: BTreeMap<ProcessGroupId, Vec<String>> = BTreeMap::new();
        for process in self.cluster.processes.values() {
            if let Some(id) = process.process_group_id() {
                let address = machine_address(&process.address).to_string();
                let entry = result.entry(id.to_string()).or_default();
                if !entry.contains(&address) {
                    entry.push(address);
                }
            }
        }
        result
    }

    /// Addresses with incompatible connections that are not reported as processes.
    ///
    /// A process that shows up in the process list is already running a
    /// compatible version and only the stale connection is left over.
    pub fn incompatible_addresses(&self) -> BTreeSet<String> {
        let known: BTreeSet<&str> = self
            .cluster
            .processes
            .values()
            .map(|p| machine_address(&p.address))
            .collect();

        self.cluster
            .incompatible_connections
            .iter()
            .map(|c| machine_address(c))
            .filter(|a| !known.contains(a))
            .map(str::to_string)
            .collect()
    }

    /// Distinct versions reported by the processes
    pub fn running_versions(&self) -> BTreeSet<&str> {
        self.cluster
            .processes
            .values()
            .map(|p| p.version.as_str())
            .filter(|v| !v.is_empty())
            .collect()
    }

    pub fn seconds_since_last_recovered(&self) -> Option<f64> {
        self.cluster
            .recovery_state
            .as_ref()
            .map(|r| r.seconds_since_last_recovered)
    }

    /// Record that the operator just triggered a recovery
    pub fn reset_recovery_clock(&mut self) {
        if let Some(state) = self.cluster.recovery_state.as_mut() {
            state.seconds_since_last_recovered = 0.0;
        }
    }

    /// Check the cluster has been up long enough since the last recovery.
    ///
    /// Versions that do not report a recovery state are always allowed.
    pub fn check_recovery_state(&self, minimum_seconds: f64) -> Result<(), String> {
        match self.seconds_since_last_recovered() {
            Some(seconds) if seconds < minimum_seconds => Err(format!(
                "cluster recovered {:.1}s ago, waiting until it is up for at least {:.1}s",
                seconds, minimum_seconds
            )),
            _ => Ok(()),
        }
    }
}

/// Whether an exclusion entry targets a locality
pub fn is_locality_exclusion(entry: &str) -> bool {
    entry.starts_with(LOCALITY_INSTANCE_ID_PREFIX)
}

/// Comparable form of an exclusion entry: locality strings as is, addresses without port
pub fn exclusion_key(entry: &str) -> &str {
    if is_locality_exclusion(entry) {
        entry
    } else {
        machine_address(entry)
    }
}
