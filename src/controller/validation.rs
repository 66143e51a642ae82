//! Normalization and validation of the declared cluster spec
//!
//! Normalization fills in defaults that depend on other fields so the rest
//! of the pass never has to. Validation rejects specs the operator cannot act
//! on; those errors are terminal.

use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{FoundationDBCluster, ProcessClass};

/// Upper bound on the desired processes of one class
pub const MAX_PROCESSES_PER_CLASS: i32 = 1000;

/// Default process count of a class for the cluster's redundancy mode
pub fn default_process_count(cluster: &FoundationDBCluster, class: ProcessClass) -> i32 {
    let fault_tolerance = cluster.desired_fault_tolerance();
    match class {
        ProcessClass::Storage | ProcessClass::Log => 2 * fault_tolerance + 1,
        ProcessClass::Stateless => fault_tolerance + 1,
        _ => 0,
    }
}

/// Fill in defaults: the process group ID prefix and zero process counts
pub fn normalize(cluster: &mut FoundationDBCluster) {
    if cluster.spec.process_group_id_prefix.is_empty() {
        cluster.spec.process_group_id_prefix = cluster.name_any();
    }

    for class in [ProcessClass::Storage, ProcessClass::Log, ProcessClass::Stateless] {
        if cluster.spec.process_counts.get(class) == 0 {
            let count = default_process_count(cluster, class);
            cluster.spec.process_counts.set(class, count);
        }
    }
}

/// Validate the cluster spec
pub fn validate_spec(cluster: &FoundationDBCluster) -> Result<()> {
    validate_version(&cluster.spec.version)?;
    validate_process_counts(cluster)?;
    validate_lock_options(cluster)?;
    validate_replacement_options(cluster)?;
    Ok(())
}

/// Parse `major.minor.patch`
pub fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

fn validate_version(version: &str) -> Result<()> {
    if parse_version(version).is_none() {
        return Err(Error::ValidationError(format!(
            "version must have the form major.minor.patch: {:?}",
            version
        )));
    }
    Ok(())
}

fn validate_process_counts(cluster: &FoundationDBCluster) -> Result<()> {
    for class in ProcessClass::ALL {
        let count = cluster.spec.process_counts.get(class);
        if count < 0 {
            return Err(Error::ValidationError(format!(
                "process count for {} must not be negative: {}",
                class, count
            )));
        }
        if count > MAX_PROCESSES_PER_CLASS {
            return Err(Error::ValidationError(format!(
                "process count for {} exceeds maximum {}: {}",
                class, MAX_PROCESSES_PER_CLASS, count
            )));
        }
    }

    if cluster.spec.process_counts.get(ProcessClass::Storage) == 0 {
        return Err(Error::ValidationError(
            "cluster needs at least one storage process".to_string(),
        ));
    }

    Ok(())
}

fn validate_lock_options(cluster: &FoundationDBCluster) -> Result<()> {
    if let Some(minutes) = cluster.spec.lock_options.lock_duration_minutes
        && minutes <= 0
    {
        return Err(Error::ValidationError(format!(
            "lockDurationMinutes must be positive: {}",
            minutes
        )));
    }
    Ok(())
}

fn validate_replacement_options(cluster: &FoundationDBCluster) -> Result<()> {
    let replacements = &cluster.spec.automation_options.replacements;
    for (field, value) in [
        ("failureDetectionTimeSeconds", replacements.failure_detection_time_seconds),
        ("maxConcurrentReplacements", replacements.max_concurrent_replacements),
    ] {
        if let Some(value) = value
            && value < 0
        {
            return Err(Error::ValidationError(format!(
                "replacements.{} must not be negative: {}",
                field, value
            )));
        }
    }
    Ok(())
}
