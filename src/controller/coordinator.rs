//! Coordinator selection and rotation
//!
//! The coordinator set is replaced only through the database's atomic change
//! call. The connection string in the cluster status is updated after that
//! call succeeded, so a failed attempt leaves nothing half committed.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::admin::ClusterObservedStatus;
use crate::admin::status::{ProcessInfo, machine_address};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::pipeline::ReconcilePass;
use crate::crd::{FoundationDBCluster, ProcessClass, ProcessGroupStatus};

/// A process that may serve as coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorCandidate {
    pub process_group_id: String,
    pub process_class: ProcessClass,
    /// Full process address passed to the change call
    pub address: String,
    pub zone: String,
    pub priority: i32,
    pub current: bool,
}

fn class_allowed(cluster: &FoundationDBCluster, class: ProcessClass) -> bool {
    if cluster.spec.coordinator_selection.is_empty() {
        class.is_coordinator_eligible()
    } else {
        cluster
            .spec
            .coordinator_selection
            .iter()
            .any(|s| s.process_class == class)
    }
}

fn usable(process_group: &ProcessGroupStatus, process: &ProcessInfo, excluded: &BTreeSet<&str>) -> bool {
    !process_group.is_marked_for_removal()
        && !process_group.is_excluded()
        && !process.excluded
        && !excluded.contains(machine_address(&process.address))
        && !excluded.contains(process_group.exclusion_string().as_str())
}

/// Pick the desired coordinator set.
///
/// One process per zone. Higher priority classes win, current coordinators
/// are kept when possible, and the process group ID breaks ties.
pub fn select_coordinators(
    cluster: &FoundationDBCluster,
    status: &ClusterObservedStatus,
) -> Result<Vec<CoordinatorCandidate>> {
    let exclusions = status.exclusions();
    let excluded: BTreeSet<&str> = exclusions.iter().map(String::as_str).collect();
    let current = status.coordinator_process_group_ids();
    let groups: BTreeMap<&str, &ProcessGroupStatus> = cluster
        .process_groups()
        .iter()
        .map(|pg| (pg.process_group_id.as_str(), pg))
        .collect();

    let mut candidates: Vec<CoordinatorCandidate> = status
        .cluster
        .processes
        .values()
        .filter_map(|process| {
            let id = process.process_group_id()?;
            let process_group = groups.get(id)?;
            let class = process_group.process_class;
            if !class_allowed(cluster, class) || !usable(process_group, process, &excluded) {
                return None;
            }
            Some(CoordinatorCandidate {
                process_group_id: id.to_string(),
                process_class: class,
                address: process.address.clone(),
                zone: process.zone().unwrap_or(id).to_string(),
                priority: cluster.coordinator_priority(class),
                current: current.contains(id),
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        (Reverse(a.priority), Reverse(a.current), &a.process_group_id).cmp(&(
            Reverse(b.priority),
            Reverse(b.current),
            &b.process_group_id,
        ))
    });

    let desired = cluster.desired_coordinator_count();
    let mut zones = BTreeSet::new();
    let chosen: Vec<CoordinatorCandidate> = candidates
        .into_iter()
        .filter(|c| zones.insert(c.zone.clone()))
        .take(desired)
        .collect();

    if chosen.len() < desired {
        return Err(Error::TransientError(format!(
            "could only select {} coordinators in distinct zones, {} are required",
            chosen.len(),
            desired
        )));
    }
    Ok(chosen)
}

/// Why the current coordinators must be replaced, if they must
pub fn needs_change(cluster: &FoundationDBCluster, status: &ClusterObservedStatus) -> Option<String> {
    let coordinators = &status.client.coordinators.coordinators;
    let desired = cluster.desired_coordinator_count();
    if coordinators.len() != desired {
        return Some(format!(
            "cluster has {} coordinators, {} are desired",
            coordinators.len(),
            desired
        ));
    }

    if let Some(unreachable) = coordinators.iter().find(|c| !c.reachable) {
        return Some(format!("coordinator {} is unreachable", unreachable.address));
    }

    let by_address: BTreeMap<&str, &ProcessInfo> = status
        .cluster
        .processes
        .values()
        .map(|p| (machine_address(&p.address), p))
        .collect();
    let groups: BTreeMap<&str, &ProcessGroupStatus> = cluster
        .process_groups()
        .iter()
        .map(|pg| (pg.process_group_id.as_str(), pg))
        .collect();
    let exclusions = status.exclusions();
    let excluded: BTreeSet<&str> = exclusions.iter().map(String::as_str).collect();

    let mut zones = BTreeSet::new();
    for coordinator in coordinators {
        let address = machine_address(&coordinator.address);
        let Some(process) = by_address.get(address) else {
            return Some(format!("coordinator {} is not reported as a process", address));
        };
        let id = process.process_group_id().unwrap_or(address);
        if let Some(process_group) = groups.get(id)
            && !usable(process_group, process, &excluded)
        {
            return Some(format!("coordinator {} is being removed", id));
        }
        if process.excluded || excluded.contains(address) {
            return Some(format!("coordinator {} is excluded", id));
        }
        if !zones.insert(process.zone().unwrap_or(id)) {
            return Some(format!("more than one coordinator in zone of {}", id));
        }
    }

    None
}

/// Replace the coordinators with a freshly selected set.
///
/// Callers hold the cluster lock. The connection string in status is updated
/// only after the change succeeded.
pub async fn change_coordinators(ctx: &Context, pass: &mut ReconcilePass, reason: &str) -> Result<()> {
    let status = pass.admin.get_status().await?;
    if !status.client.database_status.available {
        return Err(Error::TransientError(
            "database is unavailable, not changing coordinators".to_string(),
        ));
    }

    let selected = select_coordinators(&pass.cluster, &status)?;
    let addresses: Vec<String> = selected.iter().map(|c| c.address.clone()).collect();
    info!(
        trace_id = %pass.trace_id,
        reason,
        coordinators = ?addresses,
        "Changing coordinators"
    );

    let connection_string = match pass.admin.change_coordinators(&addresses).await {
        Ok(connection_string) => connection_string,
        Err(e) => {
            warn!(trace_id = %pass.trace_id, "Coordinator change failed: {}", e);
            return Err(e.into());
        }
    };

    pass.cluster.status_mut().connection_string = connection_string;
    pass.reset_recovery_clock();
    pass.refresh_cached_status().await?;
    ctx.record_coordinator_change(&pass.key);
    Ok(())
}
