//! Scoped cluster lock
//!
//! Mutations that must not race across operator instances run while a
//! [`LockGuard`] is alive. The guard releases the lock exactly once: either
//! through [`LockGuard::release`] or, if the holder is dropped early (error
//! return, cancellation), from a background task spawned in `Drop`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::admin::LockClient;
use crate::controller::error::{Error, Result};

#[derive(Clone)]
pub struct ClusterLock {
    client: Arc<dyn LockClient>,
    enabled: bool,
}

impl ClusterLock {
    pub fn new(client: Arc<dyn LockClient>, enabled: bool) -> Self {
        Self { client, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Take the lock for `action`. Does nothing when locking is disabled.
    pub async fn acquire(&self, action: &str) -> Result<LockGuard> {
        if !self.enabled {
            return Ok(LockGuard {
                client: None,
                action: action.to_string(),
            });
        }

        self.client
            .take_lock()
            .await
            .map_err(|e| Error::LockError(format!("{}: {}", action, e)))?;
        debug!(action, "Took cluster lock");

        Ok(LockGuard {
            client: Some(self.client.clone()),
            action: action.to_string(),
        })
    }
}

/// Proof of holding the cluster lock
#[must_use = "the lock is released when the guard is dropped"]
pub struct LockGuard {
    client: Option<Arc<dyn LockClient>>,
    action: String,
}

impl LockGuard {
    pub fn is_held(&self) -> bool {
        self.client.is_some()
    }

    /// Release the lock, waiting for the release to finish.
    ///
    /// A failed release is logged; the lease expires on its own.
    pub async fn release(mut self) {
        if let Some(client) = self.client.take() {
            match client.release_lock().await {
                Ok(()) => debug!(action = %self.action, "Released cluster lock"),
                Err(e) => warn!(action = %self.action, "Failed to release cluster lock: {}", e),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let action = std::mem::take(&mut self.action);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.release_lock().await {
                        warn!(action = %action, "Failed to release cluster lock: {}", e);
                    }
                });
            }
            Err(_) => warn!(action = %action, "No runtime to release cluster lock, leaving it to expire"),
        }
    }
}
