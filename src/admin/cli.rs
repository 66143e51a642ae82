//! Admin client that drives `fdbcli`
//!
//! Each call spawns one `fdbcli --exec` process against a cluster file written
//! from the cluster's connection string. The child is killed when the call is
//! dropped, so a cancelled reconciliation does not leave commands running.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::{Client, ResourceExt};
use tokio::process::Command;
use tracing::{debug, instrument};

use super::lease::LeaseLockClient;
use super::status::machine_address;
use super::{
    AdminClient, AdminError, AdminResult, ClusterObservedStatus, DatabaseClientProvider,
    ExclusionMap, ExclusionUpdates, LockClient, UpdateAction,
};
use crate::controller::validation::parse_version;
use crate::crd::{FoundationDBCluster, LOCALITY_INSTANCE_ID_PREFIX};

/// Key prefix for operator bookkeeping when the cluster does not set one
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "\\xff\\x02/org.foundationdb.kubernetes-operator";

/// Oldest version the operator manages
const MIN_SUPPORTED_VERSION: (u32, u32, u32) = (6, 2, 20);

/// Roles that keep data on a process
const DATA_ROLES: [&str; 2] = ["storage", "log"];

/// Upper bound on keys read from one bookkeeping range
const RANGE_LIMIT: u32 = 10_000;

pub struct CliAdminClient {
    binary: PathBuf,
    cluster_file: PathBuf,
    key_prefix: String,
    timeout_ms: AtomicU64,
}

impl CliAdminClient {
    pub fn new(binary: PathBuf, cluster_file: PathBuf, key_prefix: String, timeout: Duration) -> Self {
        Self {
            binary,
            cluster_file,
            key_prefix,
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    #[instrument(skip(self), fields(cluster_file = %self.cluster_file.display()))]
    async fn run(&self, command: &str) -> AdminResult<String> {
        let timeout = self.timeout();
        debug!("Running fdbcli command");

        let child = Command::new(&self.binary)
            .arg("-C")
            .arg(&self.cluster_file)
            .arg("--exec")
            .arg(command)
            .arg("--timeout")
            .arg(timeout.as_secs().max(1).to_string())
            .kill_on_drop(true)
            .output();

        // fdbcli enforces its own timeout; the outer one catches a hung process
        let output = tokio::time::timeout(timeout + Duration::from_secs(5), child)
            .await
            .map_err(|_| AdminError::Timeout(timeout))?
            .map_err(|e| AdminError::Unavailable(format!("failed to spawn fdbcli: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AdminError::CommandFailed(format!(
                "`{}` exited with {}: {}{}",
                command,
                output.status,
                stderr.trim(),
                stdout.trim()
            )));
        }
        Ok(stdout)
    }

    fn map_key(&self, map: &str) -> String {
        format!("{}/{}/", self.key_prefix, map)
    }

    async fn get_map(&self, map: &str, prefix: &str) -> AdminResult<ExclusionMap> {
        let begin = format!("{}{}", self.map_key(map), prefix);
        let end = format!("{}\\xff", begin);
        let output = self
            .run(&format!(
                "option on ACCESS_SYSTEM_KEYS; getrange \"{}\" \"{}\" {}",
                begin, end, RANGE_LIMIT
            ))
            .await?;
        Ok(parse_range_output(&output, &self.map_key(map)))
    }

    async fn update_map(&self, map: &str, updates: &ExclusionUpdates) -> AdminResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut command = String::from("option on ACCESS_SYSTEM_KEYS; writemode on;");
        for (id, action) in updates {
            let key = format!("{}{}", self.map_key(map), id);
            match action {
                UpdateAction::Add => command.push_str(&format!(" set \"{}\" \"{}\";", key, now)),
                UpdateAction::Delete => command.push_str(&format!(" clear \"{}\";", key)),
            }
        }
        self.run(&command).await.map(|_| ())
    }
}

/// Parse ``\`key' is \`value'`` lines printed by `getrange`
fn parse_range_output(output: &str, key_prefix: &str) -> ExclusionMap {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix('`')?;
            let (key, value) = rest.split_once("' is `")?;
            let value = value.strip_suffix('\'')?;
            let id = key.strip_prefix(key_prefix)?;
            let timestamp = value
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))?;
            Some((id.to_string(), timestamp))
        })
        .collect()
}

#[async_trait]
impl AdminClient for CliAdminClient {
    async fn get_status(&self) -> AdminResult<ClusterObservedStatus> {
        let output = self.run("status json").await?;
        serde_json::from_str(&output).map_err(|e| AdminError::Parse(e.to_string()))
    }

    async fn version_supported(&self, version: &str) -> AdminResult<bool> {
        Ok(parse_version(version).is_some_and(|v| v >= MIN_SUPPORTED_VERSION))
    }

    async fn exclude_processes_with_no_wait(
        &self,
        addresses: &[String],
        _use_locks: bool,
    ) -> AdminResult<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.run(&format!("exclude no_wait {}", addresses.join(" ")))
            .await
            .map(|_| ())
    }

    async fn include_processes(&self, addresses: &[String]) -> AdminResult<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        self.run(&format!("include {}", addresses.join(" ")))
            .await
            .map(|_| ())
    }

    async fn can_safely_remove(&self, addresses: &[String]) -> AdminResult<Vec<String>> {
        let status = self.get_status().await?;
        Ok(addresses
            .iter()
            .filter(|entry| {
                status.cluster.processes.values().any(|process| {
                    let matches = match entry.strip_prefix(LOCALITY_INSTANCE_ID_PREFIX) {
                        Some(id) => process.process_group_id() == Some(id),
                        None => machine_address(&process.address) == entry.as_str(),
                    };
                    matches && DATA_ROLES.iter().any(|role| process.has_role(role))
                })
            })
            .cloned()
            .collect())
    }

    async fn kill_processes(&self, addresses: &[String]) -> AdminResult<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        // The first `kill` populates the list of known processes
        self.run(&format!("kill; kill {}", addresses.join(" ")))
            .await
            .map(|_| ())
    }

    async fn change_coordinators(&self, coordinators: &[String]) -> AdminResult<String> {
        self.run(&format!("coordinators {}", coordinators.join(" ")))
            .await
            .map_err(|e| AdminError::CoordinatorChange(e.to_string()))?;

        // fdbcli rewrites the cluster file with the new connection string
        let contents = tokio::fs::read_to_string(&self.cluster_file)
            .await
            .map_err(|e| AdminError::CoordinatorChange(e.to_string()))?;
        Ok(contents.trim().to_string())
    }

    async fn get_pending_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap> {
        self.get_map("pendingForExclusion", prefix).await
    }

    async fn update_pending_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()> {
        self.update_map("pendingForExclusion", updates).await
    }

    async fn get_ready_for_exclusion(&self, prefix: &str) -> AdminResult<ExclusionMap> {
        self.get_map("readyForExclusion", prefix).await
    }

    async fn update_ready_for_exclusion(&self, updates: &ExclusionUpdates) -> AdminResult<()> {
        self.update_map("readyForExclusion", updates).await
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    async fn close(&self) -> AdminResult<()> {
        Ok(())
    }
}

/// Provider used by the operator binary
pub struct CliClientProvider {
    pub client: Client,
    pub binary: PathBuf,
    pub cluster_file_dir: PathBuf,
    pub holder_id: String,
    pub timeout: Duration,
    pub lock_ttl: Duration,
}

#[async_trait]
impl DatabaseClientProvider for CliClientProvider {
    async fn admin_client(
        &self,
        cluster: &FoundationDBCluster,
    ) -> AdminResult<Arc<dyn AdminClient>> {
        let connection_string = cluster
            .status
            .as_ref()
            .map(|s| s.connection_string.as_str())
            .unwrap_or_default();
        if connection_string.is_empty() {
            return Err(AdminError::Unavailable(
                "cluster has no connection string yet".to_string(),
            ));
        }

        let cluster_file = self.cluster_file_dir.join(format!(
            "{}-{}.cluster",
            cluster.namespace().unwrap_or_default(),
            cluster.name_any()
        ));
        tokio::fs::write(&cluster_file, connection_string)
            .await
            .map_err(|e| AdminError::Unavailable(format!("failed to write cluster file: {}", e)))?;

        let key_prefix = cluster
            .spec
            .lock_options
            .lock_key_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCK_KEY_PREFIX.to_string());

        Ok(Arc::new(CliAdminClient::new(
            self.binary.clone(),
            cluster_file,
            key_prefix,
            self.timeout,
        )))
    }

    async fn lock_client(
        &self,
        cluster: &FoundationDBCluster,
    ) -> AdminResult<Arc<dyn LockClient>> {
        let ttl = cluster
            .spec
            .lock_options
            .lock_duration_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(m as u64 * 60))
            .unwrap_or(self.lock_ttl);

        Ok(Arc::new(LeaseLockClient::new(
            self.client.clone(),
            &cluster.namespace().unwrap_or_default(),
            format!("{}-fdb-lock", cluster.name_any()),
            self.holder_id.clone(),
            ttl,
        )))
    }
}
