//! Cluster conditions
//!
//! Conditions are derived from the process groups in status at the end of
//! every pass. A condition's transition time only moves when its status
//! flips, so an unchanged cluster produces an unchanged status.

use chrono::Utc;

use crate::crd::{Condition, FoundationDBCluster, ProcessGroupConditionType};

/// Condition types following Kubernetes conventions
pub mod condition_types {
    /// Every process group matches the declared topology
    pub const RECONCILED: &str = "Reconciled";
    /// Process groups are being added, excluded or removed
    pub const PROGRESSING: &str = "Progressing";
    /// Some processes are missing or incompatible
    pub const DEGRADED: &str = "Degraded";
    pub const CONFIG_VALID: &str = "ConfigurationValid";
}

pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

fn status_str(value: bool) -> &'static str {
    if value {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    }
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition. The transition time only changes with the status.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status.to_string();
                    existing.last_transition_time = Utc::now().to_rfc3339();
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
                existing.observed_generation = self.generation;
            }
            None => self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: Utc::now().to_rfc3339(),
                observed_generation: self.generation,
            }),
        }
        self
    }

    pub fn reconciled(self, reconciled: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::RECONCILED, status_str(reconciled), reason, message)
    }

    pub fn progressing(self, progressing: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::PROGRESSING, status_str(progressing), reason, message)
    }

    pub fn degraded(self, degraded: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::DEGRADED, status_str(degraded), reason, message)
    }

    pub fn config_valid(self, valid: bool, reason: &str, message: &str) -> Self {
        self.set_condition(condition_types::CONFIG_VALID, status_str(valid), reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Counts of process groups by lifecycle progress
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroupSummary {
    pub total: usize,
    pub pending_removal: usize,
    pub pending_exclusion: usize,
    pub missing: usize,
    pub incompatible: usize,
}

impl ProcessGroupSummary {
    pub fn of(cluster: &FoundationDBCluster) -> Self {
        let mut summary = Self::default();
        for process_group in cluster.process_groups() {
            summary.total += 1;
            if process_group.is_marked_for_removal() {
                summary.pending_removal += 1;
                if !process_group.is_excluded() {
                    summary.pending_exclusion += 1;
                }
            }
            if process_group.has_condition(ProcessGroupConditionType::MissingProcesses) {
                summary.missing += 1;
            }
            if process_group.has_condition(ProcessGroupConditionType::IncompatibleConnections) {
                summary.incompatible += 1;
            }
        }
        summary
    }

    pub fn is_settled(&self) -> bool {
        self.pending_removal == 0
    }
}

/// Conditions for the end of a pass.
///
/// `outstanding` is true when a step asked for a requeue.
pub fn pass_conditions(cluster: &FoundationDBCluster, outstanding: bool) -> Vec<Condition> {
    let summary = ProcessGroupSummary::of(cluster);
    let existing = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let reconciled = !outstanding && summary.is_settled();

    let builder = ConditionBuilder::from_existing(existing, cluster.metadata.generation)
        .config_valid(true, "Valid", "Cluster spec is valid");

    let builder = if reconciled {
        builder
            .reconciled(true, "Reconciled", "All process groups match the desired topology")
            .progressing(false, "Stable", "No pending changes")
    } else {
        let message = format!(
            "{} process group(s) pending removal, {} pending exclusion",
            summary.pending_removal, summary.pending_exclusion
        );
        builder
            .reconciled(false, "Reconciling", &message)
            .progressing(true, "Reconciling", &message)
    };

    if summary.missing > 0 || summary.incompatible > 0 {
        builder
            .degraded(
                true,
                "ProcessesUnhealthy",
                &format!(
                    "{} missing, {} with incompatible connections",
                    summary.missing, summary.incompatible
                ),
            )
            .build()
    } else {
        builder
            .degraded(false, "Healthy", "All processes are reported")
            .build()
    }
}

/// Conditions for a cluster whose spec was rejected
pub fn invalid_spec_conditions(cluster: &FoundationDBCluster, message: &str) -> Vec<Condition> {
    let existing = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    ConditionBuilder::from_existing(existing, cluster.metadata.generation)
        .config_valid(false, "InvalidSpec", message)
        .reconciled(false, "InvalidSpec", message)
        .build()
}
