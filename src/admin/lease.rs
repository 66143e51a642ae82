//! Lock client backed by a Kubernetes Lease
//!
//! Every operator instance managing a cluster competes for one Lease per
//! cluster. Holding the lease grants the right to mutate the database.

use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tracing::{debug, warn};

use super::{AdminError, AdminResult, LockClient};

/// Lease based [`LockClient`]
pub struct LeaseLockClient {
    lease: LeaseLock,
    lease_name: String,
}

impl LeaseLockClient {
    pub fn new(
        client: Client,
        namespace: &str,
        lease_name: String,
        holder_id: String,
        ttl: Duration,
    ) -> Self {
        let lease = LeaseLock::new(
            client,
            namespace,
            LeaseLockParams {
                holder_id,
                lease_name: lease_name.clone(),
                lease_ttl: ttl,
            },
        );
        Self { lease, lease_name }
    }
}

#[async_trait]
impl LockClient for LeaseLockClient {
    async fn take_lock(&self) -> AdminResult<()> {
        match self.lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                debug!(lease = %self.lease_name, "Acquired cluster lock");
                Ok(())
            }
            Ok(_) => Err(AdminError::LockHeld(format!(
                "another operator instance (lease {})",
                self.lease_name
            ))),
            Err(e) => {
                warn!(lease = %self.lease_name, "Failed to acquire cluster lock: {}", e);
                Err(AdminError::Unavailable(e.to_string()))
            }
        }
    }

    async fn release_lock(&self) -> AdminResult<()> {
        self.lease
            .step_down()
            .await
            .map_err(|e| AdminError::Unavailable(e.to_string()))?;
        debug!(lease = %self.lease_name, "Released cluster lock");
        Ok(())
    }
}
