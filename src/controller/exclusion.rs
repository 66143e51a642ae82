//! Exclusion planning
//!
//! Decides which process groups marked for removal may be excluded in this
//! pass. Everything here is a pure function of the cluster status, the
//! database's exclusion list and the clock, so it can be tested in isolation
//! and recomputed from authoritative state on every pass.

use std::collections::{BTreeMap, BTreeSet};

use crate::admin::status::{exclusion_key, machine_address};
use crate::crd::{
    FoundationDBCluster, ProcessClass, ProcessGroupConditionType, ProcessGroupId,
    ProcessGroupStatus,
};

/// Number of process groups of one class that may be excluded.
///
/// Only processes with a ready replacement may be excluded, with the fault
/// tolerance as buffer. Never negative.
pub fn allowed_exclusions(
    valid_processes: i32,
    fault_tolerance: i32,
    desired_count: i32,
    ongoing_exclusions: i32,
) -> i32 {
    (valid_processes + fault_tolerance - desired_count - ongoing_exclusions).max(0)
}

/// A process group that still has to be excluded
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExclusionCandidate {
    pub process_group_id: ProcessGroupId,
    pub process_class: ProcessClass,
    /// Entries to pass to the exclude call: addresses or one locality string
    pub entries: Vec<String>,
}

/// Exclusion bookkeeping of one process class
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassExclusions {
    /// Candidates in status order
    pub candidates: Vec<ExclusionCandidate>,
    /// Excluded in the database but not yet marked excluded in status
    pub ongoing: i32,
    pub valid: i32,
    pub desired: i32,
    /// Process groups currently flagged missing
    pub missing: Vec<ProcessGroupId>,
    /// A missing process is still within the grace window
    pub blocked_by_missing: bool,
}

impl ClassExclusions {
    pub fn allowed(&self, fault_tolerance: i32) -> i32 {
        if self.blocked_by_missing {
            return 0;
        }
        allowed_exclusions(self.valid, fault_tolerance, self.desired, self.ongoing)
    }
}

/// Outcome of exclusion planning
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionPlan {
    pub by_class: BTreeMap<ProcessClass, ClassExclusions>,
    pub fault_tolerance: i32,
}

/// Candidates chosen for this pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSelection {
    pub chosen: Vec<ExclusionCandidate>,
    /// Candidates left for a later pass
    pub waiting: Vec<ExclusionCandidate>,
    /// Transaction classes were held back because one of them may not exclude
    pub transaction_suppressed: bool,
}

impl ExclusionSelection {
    pub fn all_chosen(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Exclude call arguments, deduplicated, in selection order
    pub fn entries(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.chosen
            .iter()
            .flat_map(|c| c.entries.iter())
            .filter(|e| seen.insert(e.as_str()))
            .cloned()
            .collect()
    }
}

impl ExclusionPlan {
    pub fn has_candidates(&self) -> bool {
        self.by_class.values().any(|c| !c.candidates.is_empty())
    }

    pub fn candidates(&self) -> impl Iterator<Item = &ExclusionCandidate> {
        self.by_class.values().flat_map(|c| c.candidates.iter())
    }

    /// Pick the candidates that may be excluded in this pass.
    ///
    /// Per class the first `allowed` candidates are taken. If any class of
    /// the transaction system with candidates may not exclude at all, no
    /// transaction class candidate is taken; storage is unaffected.
    pub fn select(&self) -> ExclusionSelection {
        let mut selection = ExclusionSelection::default();

        let transaction_blocked = self.by_class.iter().any(|(class, plan)| {
            class.is_transaction()
                && !plan.candidates.is_empty()
                && plan.allowed(self.fault_tolerance) == 0
        });
        selection.transaction_suppressed = transaction_blocked;

        for (class, plan) in &self.by_class {
            let allowed = if transaction_blocked && class.is_transaction() {
                0
            } else {
                plan.allowed(self.fault_tolerance).max(0) as usize
            };

            for (index, candidate) in plan.candidates.iter().enumerate() {
                if index < allowed {
                    selection.chosen.push(candidate.clone());
                } else {
                    selection.waiting.push(candidate.clone());
                }
            }
        }

        selection
    }
}

fn missing_since(process_group: &ProcessGroupStatus) -> Option<i64> {
    process_group.condition_time(ProcessGroupConditionType::MissingProcesses)
}

/// Build the exclusion plan.
///
/// `exclusions` is the database's current exclusion list; `now` and
/// `missing_grace_secs` are unix seconds.
pub fn plan_exclusions(
    cluster: &FoundationDBCluster,
    exclusions: &[String],
    desired_counts: &BTreeMap<ProcessClass, i32>,
    now: i64,
    missing_grace_secs: i64,
) -> ExclusionPlan {
    let excluded: BTreeSet<&str> = exclusions.iter().map(|e| exclusion_key(e)).collect();
    let use_localities = cluster.use_localities_for_exclusion();
    let mut by_class: BTreeMap<ProcessClass, ClassExclusions> = BTreeMap::new();

    for process_group in cluster.process_groups() {
        if process_group.process_class == ProcessClass::Test
            || !process_group.is_marked_for_removal()
            || process_group.is_excluded()
        {
            continue;
        }

        let class = by_class.entry(process_group.process_class).or_default();
        let exclusion_string = process_group.exclusion_string();

        if excluded.contains(exclusion_string.as_str()) {
            class.ongoing += 1;
            continue;
        }

        if use_localities {
            class.candidates.push(ExclusionCandidate {
                process_group_id: process_group.process_group_id.clone(),
                process_class: process_group.process_class,
                entries: vec![exclusion_string],
            });
            continue;
        }

        let remaining: Vec<String> = process_group
            .addresses
            .iter()
            .filter(|a| !excluded.contains(machine_address(a)))
            .cloned()
            .collect();

        if remaining.is_empty() {
            // Every known address is excluded; a new address would mean the
            // pod was recreated and the new one must be excluded too
            class.ongoing += 1;
        } else {
            class.candidates.push(ExclusionCandidate {
                process_group_id: process_group.process_group_id.clone(),
                process_class: process_group.process_class,
                entries: remaining,
            });
        }
    }

    // Only classes with outstanding work matter from here on
    by_class.retain(|_, c| !c.candidates.is_empty());

    for (class, plan) in by_class.iter_mut() {
        plan.desired = desired_counts.get(class).copied().unwrap_or(0);

        for process_group in cluster
            .process_groups()
            .iter()
            .filter(|pg| pg.process_class == *class)
        {
            if process_group.is_marked_for_removal() {
                continue;
            }
            if let Some(since) = missing_since(process_group) {
                plan.missing.push(process_group.process_group_id.clone());
                if now - since < missing_grace_secs {
                    plan.blocked_by_missing = true;
                }
                continue;
            }
            plan.valid += 1;
        }
    }

    ExclusionPlan {
        by_class,
        fault_tolerance: cluster.desired_fault_tolerance(),
    }
}

/// Entries that belong to a current coordinator
pub fn coordinators_in(
    entries: &[String],
    cluster: &FoundationDBCluster,
    coordinator_ids: &BTreeSet<ProcessGroupId>,
    coordinator_addresses: &BTreeSet<String>,
) -> Vec<String> {
    let mut coordinator_entries: BTreeSet<String> = coordinator_addresses.clone();
    for process_group in cluster.process_groups() {
        if !coordinator_ids.contains(&process_group.process_group_id) {
            continue;
        }
        coordinator_entries.insert(process_group.exclusion_string());
        for address in &process_group.addresses {
            coordinator_entries.insert(machine_address(address).to_string());
        }
    }

    entries
        .iter()
        .filter(|e| coordinator_entries.contains(exclusion_key(e)))
        .cloned()
        .collect()
}
