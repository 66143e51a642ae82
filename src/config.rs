//! Operator configuration
//!
//! Every setting has a default and can be overridden through an environment
//! variable. Unparsable values are ignored with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Delay used when a pass has outstanding work but no step asked for a specific delay
pub const DEFAULT_REQUEUE_DELAY: Duration = Duration::from_secs(2);

/// Grace window during which a missing process blocks exclusions of its class
pub const MISSING_PROCESS_GRACE: Duration = Duration::from_secs(5 * 60);

/// Requeue delay when not all process groups could be excluded in one pass
pub const PARTIAL_EXCLUSION_DELAY: Duration = Duration::from_secs(5 * 60);

/// Requeue delay when the last recovery is too recent for a disruptive change
pub const RECOVERY_WAIT_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Only watch clusters in this namespace
    pub namespace: Option<String>,
    /// Identity of this operator instance for leases and locks
    pub instance_id: String,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    pub max_concurrent_reconciles: u16,
    /// Timeout for get/list calls against the API server
    pub read_timeout: Duration,
    /// Timeout for create/update/delete calls against the API server
    pub write_timeout: Duration,
    /// Timeout for every admin client call
    pub admin_timeout: Duration,
    pub minimum_recovery_time_for_exclusion: Duration,
    pub minimum_recovery_time_for_inclusion: Duration,
    /// How long instances wait for each other before excluding a subset
    pub global_synchronization_wait: Duration,
    /// Share one database status between steps unless the cluster overrides it
    pub cache_database_status: bool,
    pub restart_incompatible_processes: bool,
    /// Mark a process group for replacement after it has been failing this long
    pub replace_failed_after: Duration,
    /// Upper bound on process groups being replaced at the same time
    pub max_concurrent_replacements: usize,
    /// Minimum time since the last recovery before processes are restarted
    pub minimum_recovery_time_for_bounce: Duration,
    /// Requeue interval of fully reconciled clusters
    pub resync_period: Duration,
    pub health_port: u16,
    pub leader_election: bool,
    pub lease_name: String,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
    /// TTL of per-cluster lock leases
    pub lock_ttl: Duration,
    pub fdbcli_path: PathBuf,
    pub cluster_file_dir: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            instance_id: "fdb-operator".to_string(),
            pod_namespace: "default".to_string(),
            max_concurrent_reconciles: 4,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
            admin_timeout: Duration::from_secs(10),
            minimum_recovery_time_for_exclusion: Duration::from_secs(120),
            minimum_recovery_time_for_inclusion: Duration::from_secs(600),
            global_synchronization_wait: Duration::from_secs(30),
            cache_database_status: false,
            restart_incompatible_processes: true,
            replace_failed_after: Duration::from_secs(2 * 60 * 60),
            max_concurrent_replacements: 1,
            minimum_recovery_time_for_bounce: Duration::from_secs(300),
            resync_period: Duration::from_secs(600),
            health_port: 8080,
            leader_election: true,
            lease_name: "fdb-operator-leader".to_string(),
            lease_ttl: Duration::from_secs(15),
            lease_renew_interval: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(10 * 60),
            fdbcli_path: PathBuf::from("/usr/bin/fdbcli"),
            cluster_file_dir: std::env::temp_dir(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value, "Ignoring invalid configuration value");
            None
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value, "Ignoring invalid boolean configuration value");
            None
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let seconds = |key: &str| {
            lookup(key)
                .and_then(|v| parse::<u64>(key, &v))
                .map(Duration::from_secs)
        };
        let boolean = |key: &str| lookup(key).and_then(|v| parse_bool(key, &v));

        if let Some(ns) = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()) {
            config.namespace = Some(ns);
        }
        if let Some(id) = lookup("POD_NAME").filter(|id| !id.is_empty()) {
            config.instance_id = id;
        } else if let Ok(host) = hostname::get() {
            config.instance_id = host.to_string_lossy().to_string();
        }
        if let Some(ns) = lookup("POD_NAMESPACE").filter(|ns| !ns.is_empty()) {
            config.pod_namespace = ns;
        }
        if let Some(n) = lookup("MAX_CONCURRENT_RECONCILES")
            .and_then(|v| parse::<u16>("MAX_CONCURRENT_RECONCILES", &v))
            .filter(|n| *n > 0)
        {
            config.max_concurrent_reconciles = n;
        }
        if let Some(d) = seconds("READ_TIMEOUT_SECONDS") {
            config.read_timeout = d;
        }
        if let Some(d) = seconds("WRITE_TIMEOUT_SECONDS") {
            config.write_timeout = d;
        }
        if let Some(d) = seconds("ADMIN_TIMEOUT_SECONDS") {
            config.admin_timeout = d;
        }
        if let Some(d) = seconds("MINIMUM_RECOVERY_TIME_FOR_EXCLUSION_SECONDS") {
            config.minimum_recovery_time_for_exclusion = d;
        }
        if let Some(d) = seconds("MINIMUM_RECOVERY_TIME_FOR_INCLUSION_SECONDS") {
            config.minimum_recovery_time_for_inclusion = d;
        }
        if let Some(d) = seconds("GLOBAL_SYNCHRONIZATION_WAIT_SECONDS") {
            config.global_synchronization_wait = d;
        }
        if let Some(b) = boolean("CACHE_DATABASE_STATUS") {
            config.cache_database_status = b;
        }
        if let Some(b) = boolean("RESTART_INCOMPATIBLE_PROCESSES") {
            config.restart_incompatible_processes = b;
        }
        if let Some(d) = seconds("REPLACE_FAILED_AFTER_SECONDS") {
            config.replace_failed_after = d;
        }
        if let Some(n) = lookup("MAX_CONCURRENT_REPLACEMENTS")
            .and_then(|v| parse::<usize>("MAX_CONCURRENT_REPLACEMENTS", &v))
        {
            config.max_concurrent_replacements = n;
        }
        if let Some(d) = seconds("MINIMUM_RECOVERY_TIME_FOR_BOUNCE_SECONDS") {
            config.minimum_recovery_time_for_bounce = d;
        }
        if let Some(d) = seconds("RESYNC_PERIOD_SECONDS") {
            config.resync_period = d;
        }
        if let Some(port) = lookup("HEALTH_PORT").and_then(|v| parse::<u16>("HEALTH_PORT", &v)) {
            config.health_port = port;
        }
        if let Some(b) = boolean("LEADER_ELECTION") {
            config.leader_election = b;
        }
        if let Some(name) = lookup("LEASE_NAME").filter(|n| !n.is_empty()) {
            config.lease_name = name;
        }
        if let Some(d) = seconds("LOCK_TTL_SECONDS") {
            config.lock_ttl = d;
        }
        if let Some(path) = lookup("FDBCLI_PATH").filter(|p| !p.is_empty()) {
            config.fdbcli_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("CLUSTER_FILE_DIR").filter(|d| !d.is_empty()) {
            config.cluster_file_dir = PathBuf::from(dir);
        }

        config
    }
}
