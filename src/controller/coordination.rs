//! Agreement between operator instances in global synchronization mode
//!
//! Instances register candidates in the shared pending map and mark the
//! ones they consider safe in the shared ready map. The exclude call is
//! issued for ready process groups only, and only once every pending entry
//! is ready or the instances had long enough to converge.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::admin::status::machine_address;
use crate::admin::{AdminClient, ExclusionMap, ExclusionUpdates, UpdateAction};
use crate::controller::error::{Error, Result};
use crate::crd::{LOCALITY_INSTANCE_ID_PREFIX, ProcessGroupId};

/// Process groups of the ready map that may be excluded now.
///
/// If every pending process group is ready, all of them may go. Otherwise
/// the ready subset is allowed only once no entry in either map changed
/// during the last `wait`. Before that, an error asks the caller to retry.
pub fn all_processes_ready_for_exclusion(
    pending: &ExclusionMap,
    ready: &ExclusionMap,
    wait: Duration,
    now: DateTime<Utc>,
) -> Result<ExclusionMap> {
    let all_ready = pending.keys().all(|id| ready.contains_key(id));
    if all_ready {
        return Ok(ready.clone());
    }

    let newest = pending.values().chain(ready.values()).max();
    let settled = match newest {
        Some(newest) => now.signed_duration_since(*newest).to_std().unwrap_or_default() >= wait,
        None => true,
    };

    if settled {
        let not_ready: Vec<&ProcessGroupId> =
            pending.keys().filter(|id| !ready.contains_key(*id)).collect();
        info!(
            ready = ready.len(),
            not_ready = ?not_ready,
            "Wait window passed, excluding the ready subset"
        );
        return Ok(ready.clone());
    }

    Err(Error::TransientError(format!(
        "{} of {} pending process groups are ready for exclusion, waiting up to {:?} for the rest",
        ready.len(),
        pending.len(),
        wait
    )))
}

/// Exclude call arguments for the allowed process groups.
///
/// With localities every group maps to its locality string. Otherwise the
/// addresses are taken from the live database status so groups registered
/// by other instances resolve too.
pub async fn addresses_from_coordination_state(
    admin: &dyn AdminClient,
    allowed: &ExclusionMap,
    use_localities: bool,
) -> Result<Vec<String>> {
    if use_localities {
        return Ok(allowed
            .keys()
            .map(|id| format!("{}{}", LOCALITY_INSTANCE_ID_PREFIX, id))
            .collect());
    }

    let status = admin.get_status().await?;
    let mut seen = BTreeSet::new();
    let mut addresses = Vec::new();
    for process in status.cluster.processes.values() {
        let Some(id) = process.process_group_id() else {
            continue;
        };
        if !allowed.contains_key(id) {
            continue;
        }
        let address = machine_address(&process.address).to_string();
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

/// Updates adding every listed process group not already in `map`
pub fn additions<'a>(
    ids: impl IntoIterator<Item = &'a ProcessGroupId>,
    map: &ExclusionMap,
) -> ExclusionUpdates {
    ids.into_iter()
        .filter(|id| !map.contains_key(*id))
        .map(|id| (id.clone(), UpdateAction::Add))
        .collect()
}

/// Updates deleting every listed process group
pub fn deletions<'a>(ids: impl IntoIterator<Item = &'a ProcessGroupId>) -> ExclusionUpdates {
    ids.into_iter()
        .map(|id| (id.clone(), UpdateAction::Delete))
        .collect::<BTreeMap<_, _>>()
}
