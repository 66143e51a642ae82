use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};

use fdb_operator::admin::cli::CliClientProvider;
use fdb_operator::health::{HealthState, run_health_server};
use fdb_operator::store::KubeStore;
use fdb_operator::{Context, OperatorConfig, run_controller_scoped};

/// Time given to in-flight passes, which may hold a database lock, before exit
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

fn lease_lock(client: &Client, config: &OperatorConfig) -> LeaseLock {
    LeaseLock::new(
        client.clone(),
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: config.instance_id.clone(),
            lease_name: config.lease_name.clone(),
            lease_ttl: config.lease_ttl,
        },
    )
}

/// Block until this instance holds the operator lease
async fn acquire_leadership(lease: &LeaseLock, config: &OperatorConfig) {
    info!(
        holder_id = %config.instance_id,
        namespace = %config.pod_namespace,
        lease_name = %config.lease_name,
        "Waiting to acquire leadership"
    );
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting"),
            Err(e) => warn!("Failed to acquire lease: {}, retrying", e),
        }
        tokio::time::sleep(config.lease_renew_interval).await;
    }
}

/// Renew the lease until it is lost, then exit into a fresh election
async fn renew_leadership(lease: LeaseLock, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Lost leadership, shutting down");
                std::process::exit(1);
            }
            Err(e) => {
                error!("Failed to renew lease: {}, shutting down", e);
                std::process::exit(1);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fdb_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting fdb-operator");
    let config = OperatorConfig::from_env();

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    tokio::fs::create_dir_all(&config.cluster_file_dir).await?;

    let health_state = Arc::new(HealthState::new());

    // Probes answer on standby instances too
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_renewal_handle = if config.leader_election {
        let lease = lease_lock(&client, &config);
        acquire_leadership(&lease, &config).await;
        Some(tokio::spawn(renew_leadership(lease, config.lease_renew_interval)))
    } else {
        info!("Leader election disabled, running as the only instance");
        None
    };

    info!("Watching FoundationDBCluster resources (apiVersion: apps.foundationdb.org/v1beta2)");

    let store = Arc::new(KubeStore::new(
        client.clone(),
        config.read_timeout,
        config.write_timeout,
    ));
    let provider = Arc::new(CliClientProvider {
        client: client.clone(),
        binary: config.fdbcli_path.clone(),
        cluster_file_dir: config.cluster_file_dir.clone(),
        holder_id: config.instance_id.clone(),
        timeout: config.admin_timeout,
        lock_ttl: config.lock_ttl,
    });
    let namespace = config.namespace.clone();
    let ctx = Arc::new(Context::new(store, provider, config).with_health_state(health_state.clone()));

    let controller_handle = {
        let controller_client = client.clone();
        tokio::spawn(async move {
            run_controller_scoped(controller_client, ctx, namespace.as_deref()).await;
        })
    };

    let lease_future = async {
        match lease_renewal_handle {
            Some(handle) => {
                // Lease renewal only exits via process::exit() or panic
                if let Err(e) = handle.await {
                    error!("Lease renewal task panicked: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Cluster controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        _ = lease_future => {}
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready to stop receiving new work
            health_state.set_ready(false).await;
            info!("Marked operator as not ready");

            // Give in-flight reconciliations time to complete
            info!(
                "Waiting {}s for in-flight reconciliations to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
