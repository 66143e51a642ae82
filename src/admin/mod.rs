//! Capabilities the reconciler uses to talk to the database
//!
//! The operator never speaks the database protocol directly. Everything it
//! needs from a running cluster goes through [`AdminClient`], and mutations
//! that must not race across operator instances are bracketed by a
//! [`LockClient`]. Both are obtained per cluster from a
//! [`DatabaseClientProvider`], which is a required dependency of the
//! controller context.

pub mod cli;
pub mod lease;
pub mod mock;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::crd::{FoundationDBCluster, ProcessGroupId};

pub use status::ClusterObservedStatus;

/// Errors returned by admin and lock clients. All of them are retryable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("lock is held by {0}")]
    LockHeld(String),

    #[error("coordinator change failed: {0}")]
    CoordinatorChange(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("could not parse database response: {0}")]
    Parse(String),
}

pub type AdminResult<T> = Result<T, AdminError>;

/// Change applied to an entry of the shared pending/ready exclusion maps
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateAction {
    Add,
    Delete,
}

/// Timestamps of process groups registered in a shared exclusion map
pub type ExclusionMap = BTreeMap<ProcessGroupId, DateTime<Utc>>;

/// Updates for a shared exclusion map
pub type ExclusionUpdates = BTreeMap<ProcessGroupId, UpdateAction>;

/// Administrative access to one database cluster.
///
/// None of the calls are idempotent on the wire; callers recompute their
/// inputs from a fresh status instead of replaying previous arguments.
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Fetch the machine-readable status
    async fn get_status(&self) -> AdminResult<ClusterObservedStatus>;

    /// Whether the operator can manage a cluster running this version
    async fn version_supported(&self, version: &str) -> AdminResult<bool>;

    /// Start excluding the addresses; returns once the exclusion was accepted
    async fn exclude_processes_with_no_wait(
        &self,
        addresses: &[String],
        use_locks: bool,
    ) -> AdminResult<()>;

    /// Remove the addresses from the exclusion list
    async fn include_processes(&self, addresses: &[String]) -> AdminResult<()>;

    /// Returns the subset of addresses that still hold data
    async fn can_safely_remove(&self, addresses: &[String]) -> AdminResult<Vec<String>>;

    /// Restart the processes listening on the addresses
    async fn kill_processes(&self, addresses: &[String]) -> AdminResult<()>;

    /// Atomically replace the coordinators; returns the new connection string
    async fn change_coordinators(&self, coordinators: &[String]) -> AdminResult<String>;

    async fn get_pending_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap>;

    async fn update_pending_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()>;

    async fn get_ready_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap>;

    async fn update_ready_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()>;

    /// Timeout applied to every following call
    fn set_timeout(&self, timeout: Duration);

    async fn close(&self) -> AdminResult<()>;
}

/// Lock serializing cluster mutations across operator instances
#[async_trait]
pub trait LockClient: Send + Sync {
    async fn take_lock(&self) -> AdminResult<()>;

    async fn release_lock(&self) -> AdminResult<()>;
}

/// Creates admin and lock clients bound to a cluster
#[async_trait]
pub trait DatabaseClientProvider: Send + Sync {
    async fn admin_client(
        &self,
        cluster: &FoundationDBCluster,
    ) -> AdminResult<Arc<dyn AdminClient>>;

    async fn lock_client(&self, cluster: &FoundationDBCluster)
    -> AdminResult<Arc<dyn LockClient>>;
}
