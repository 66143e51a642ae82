//! Process group lifecycle: status merge, removal, inclusion and full passes

use fdb_operator::admin::AdminClient;
use fdb_operator::config::RECOVERY_WAIT_DELAY;
use fdb_operator::controller::steps::{RemoveIncompatibleProcesses, RemoveProcessGroups, UpdateStatus};
use fdb_operator::controller::{Step, run_pass};
use fdb_operator::crd::{FoundationDBCluster, ProcessClass, ProcessGroupConditionType};
use fdb_operator::resources::common::{process_group_object_name, pvc_name};
use fdb_operator::resources::pod::generate_pod;
use fdb_operator::resources::pvc::generate_pvc;
use fdb_operator::store::{ClusterKey, ClusterStore};
use serde_json::json;

use crate::common::*;

async fn exclude(env: &TestEnv, entries: &[&str]) {
    let entries: Vec<String> = entries.iter().map(|e| e.to_string()).collect();
    env.db.exclude_processes_with_no_wait(&entries, false).await.unwrap();
}

/// Create the pod and volume claim of every process group in the cluster
async fn create_objects(env: &TestEnv, cluster: &FoundationDBCluster) {
    for process_group in cluster.process_groups() {
        env.store
            .create_pod(&generate_pod(cluster, process_group))
            .await
            .unwrap();
        env.store
            .create_pvc(&generate_pvc(cluster, process_group))
            .await
            .unwrap();
    }
}

/// Three storage groups plus an excluded storage-4 that only needs cleaning up
async fn excluded_fourth() -> (TestEnv, ClusterKey, FoundationDBCluster) {
    let env = TestEnv::new();
    let mut removed = marked_group("sample-storage-4", ProcessClass::Storage, "10.0.1.4");
    removed.set_excluded(2);
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 3}))
        .with_groups(storage_groups(1..=3))
        .with_group(removed)
        .build();
    env.add_processes(&cluster);
    create_objects(&env, &cluster).await;
    exclude(&env, &["10.0.1.4"]).await;
    env.db.set_seconds_since_last_recovered(900.0);
    let key = env.insert(cluster.clone());
    (env, key, cluster)
}

#[tokio::test]
async fn test_update_status_merges_processes() {
    let env = TestEnv::new();
    let mut pending = active_group("sample-storage-2", ProcessClass::Storage, "10.0.1.2");
    pending.addresses.clear();
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 2}))
        .with_group(active_group("sample-storage-1", ProcessClass::Storage, "10.0.1.1"))
        .with_group(pending)
        .build();
    env.db
        .add_process("sample-storage-2", ProcessClass::Storage, "10.0.1.2", "zone-b");
    let key = env.insert(cluster);

    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();

    let reported = env.group(&key, "sample-storage-2");
    assert_eq!(reported.addresses, vec!["10.0.1.2"]);
    assert_eq!(reported.fault_domain.as_deref(), Some("zone-b"));
    assert!(!reported.has_condition(ProcessGroupConditionType::MissingProcesses));

    let missing = env.group(&key, "sample-storage-1");
    assert!(missing.has_condition(ProcessGroupConditionType::MissingProcesses));
    assert!(missing.has_condition(ProcessGroupConditionType::MissingPod));

    let status = env.cluster(&key).status.unwrap();
    assert!(status.configured);
    assert_eq!(status.running_version.as_deref(), Some(VERSION));
}

#[tokio::test]
async fn test_update_status_marks_drained_group_excluded() {
    let env = TestEnv::new();
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 3}))
        .with_groups(storage_groups(1..=3))
        .with_group(marked_group("sample-storage-4", ProcessClass::Storage, "10.0.1.4"))
        .build();
    env.add_processes(&cluster);
    exclude(&env, &["10.0.1.4"]).await;
    env.db.set_remaining_data(&["10.0.1.4"]);
    let key = env.insert(cluster);

    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
    assert!(!env.group(&key, "sample-storage-4").is_excluded());

    env.db.set_remaining_data(&[]);
    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
    assert!(env.group(&key, "sample-storage-4").is_excluded());
}

#[tokio::test]
async fn test_marked_group_outside_exclusion_list_stays() {
    let env = TestEnv::new();
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 3}))
        .with_groups(storage_groups(1..=3))
        .with_group(marked_group("sample-storage-4", ProcessClass::Storage, "10.0.1.4"))
        .build();
    env.add_processes(&cluster);
    let key = env.insert(cluster);

    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert!(!env.group(&key, "sample-storage-4").is_excluded());
}

#[tokio::test]
async fn test_removal_deletes_objects_and_includes() {
    let (env, key, cluster) = excluded_fourth().await;
    let pod = process_group_object_name(&cluster, "sample-storage-4");
    let claim = pvc_name(&cluster, "sample-storage-4");

    let mut pass = env.pass(&key);
    let outcome = RemoveProcessGroups.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert!(outcome.is_none());
    assert!(!env.store.pod_names().contains(&pod));
    assert!(!env.store.pvc_names().contains(&claim));
    assert_eq!(env.db.include_calls(), vec![vec!["10.0.1.4".to_string()]]);
    assert!(env.db.status().exclusions().is_empty());
    assert_eq!(
        env.group_ids(&key),
        vec!["sample-storage-1", "sample-storage-2", "sample-storage-3"]
    );
}

#[tokio::test]
async fn test_inclusion_waits_for_recovery() {
    let (env, key, _) = excluded_fourth().await;
    env.db.set_seconds_since_last_recovered(30.0);

    let mut pass = env.pass(&key);
    let outcome = RemoveProcessGroups.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(outcome.unwrap().delay(), RECOVERY_WAIT_DELAY);
    assert!(env.db.include_calls().is_empty());
    assert!(env.group_ids(&key).contains(&"sample-storage-4".to_string()));
}

#[tokio::test]
async fn test_marked_but_not_excluded_is_not_removed() {
    let env = TestEnv::new();
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 3}))
        .with_groups(storage_groups(1..=3))
        .with_group(marked_group("sample-storage-4", ProcessClass::Storage, "10.0.1.4"))
        .build();
    create_objects(&env, &cluster).await;
    let writes = env.store.writes();
    let key = env.insert(cluster);

    let mut pass = env.pass(&key);
    let outcome = RemoveProcessGroups.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(env.store.writes(), writes);
    assert_eq!(env.group_ids(&key).len(), 4);
}

/// Two running storage groups, the first one flagged with incompatible connections
async fn incompatible_first(builder: ClusterBuilder) -> (TestEnv, ClusterKey, FoundationDBCluster) {
    let env = TestEnv::new();
    let mut incompatible = active_group("sample-storage-1", ProcessClass::Storage, "10.0.1.1");
    incompatible.update_condition(ProcessGroupConditionType::IncompatibleConnections, true, 1);
    let cluster = builder
        .with_counts(json!({"storage": 2}))
        .with_group(incompatible)
        .with_group(active_group("sample-storage-2", ProcessClass::Storage, "10.0.1.2"))
        .build();
    create_objects(&env, &cluster).await;
    let key = env.insert(cluster.clone());
    (env, key, cluster)
}

#[tokio::test]
async fn test_incompatible_process_pod_is_deleted() {
    let (env, key, cluster) = incompatible_first(ClusterBuilder::new()).await;

    let mut pass = env.pass(&key);
    let outcome = RemoveIncompatibleProcesses
        .reconcile(&env.ctx, &mut pass)
        .await
        .unwrap();

    let requeue = outcome.unwrap();
    assert!(!requeue.is_terminal());
    let pods = env.store.pod_names();
    assert!(!pods.contains(&process_group_object_name(&cluster, "sample-storage-1")));
    assert!(pods.contains(&process_group_object_name(&cluster, "sample-storage-2")));
}

#[tokio::test]
async fn test_incompatible_restart_can_be_disabled() {
    let (env, key, _) = incompatible_first(
        ClusterBuilder::new()
            .with_spec("automationOptions", json!({"enableRestartIncompatibleProcesses": false})),
    )
    .await;
    let writes = env.store.writes();

    let mut pass = env.pass(&key);
    let outcome = RemoveIncompatibleProcesses
        .reconcile(&env.ctx, &mut pass)
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(env.store.writes(), writes);
}

#[tokio::test]
async fn test_incompatible_restart_paused_during_upgrade() {
    let (env, key, cluster) =
        incompatible_first(ClusterBuilder::new().with_spec("version", json!("7.3.43"))).await;
    let mut stored = env.cluster(&key);
    stored.status_mut().running_version = Some(VERSION.to_string());
    env.store.update_status(&stored).await.unwrap();

    let mut pass = env.pass(&key);
    let outcome = RemoveIncompatibleProcesses
        .reconcile(&env.ctx, &mut pass)
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert!(
        env.store
            .pod_names()
            .contains(&process_group_object_name(&cluster, "sample-storage-1"))
    );
}

#[tokio::test]
async fn test_upgrade_completes_once_all_processes_report_new_version() {
    let (env, key, _) =
        incompatible_first(ClusterBuilder::new().with_spec("version", json!("7.3.43"))).await;
    env.db.add_process("sample-storage-1", ProcessClass::Storage, "10.0.1.1", "zone-1");
    env.db.add_process("sample-storage-2", ProcessClass::Storage, "10.0.1.2", "zone-2");
    env.db.set_process_version(&[], VERSION);
    let mut stored = env.cluster(&key);
    stored.status_mut().running_version = Some(VERSION.to_string());
    env.store.update_status(&stored).await.unwrap();

    env.db.set_process_version(&["sample-storage-1"], "7.3.43");
    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
    let status = env.cluster(&key).status.unwrap();
    assert_eq!(status.running_version.as_deref(), Some(VERSION));

    env.db.set_process_version(&[], "7.3.43");
    let mut pass = env.pass(&key);
    UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
    let status = env.cluster(&key).status.unwrap();
    assert_eq!(status.running_version.as_deref(), Some("7.3.43"));
    assert_eq!(env.cluster(&key).upgrade_in_progress(), None);
}

/// A cluster created from scratch with its processes already running
async fn converged() -> (TestEnv, ClusterKey) {
    let env = TestEnv::new();
    let cluster = ClusterBuilder::new()
        .with_counts(json!({"storage": 3, "log": 3, "stateless": 2}))
        .build();
    for n in 1..=3u32 {
        let id = format!("sample-storage-{}", n);
        env.db.add_process(&id, ProcessClass::Storage, &format!("10.0.1.{}", n), &format!("zone-{}", id));
        let id = format!("sample-log-{}", n);
        env.db.add_process(&id, ProcessClass::Log, &format!("10.0.2.{}", n), &format!("zone-{}", id));
    }
    for n in 1..=2u32 {
        let id = format!("sample-stateless-{}", n);
        env.db.add_process(&id, ProcessClass::Stateless, &format!("10.0.3.{}", n), &format!("zone-{}", id));
    }
    env.db
        .set_coordinators(&["sample-storage-1", "sample-storage-2", "sample-storage-3"]);
    let key = env.insert(cluster);

    assert_eq!(run_pass(&env.ctx, &key).await.unwrap(), None);
    assert_eq!(run_pass(&env.ctx, &key).await.unwrap(), None);
    (env, key)
}

#[tokio::test]
async fn test_new_cluster_converges() {
    let (env, key) = converged().await;

    let cluster = env.cluster(&key);
    assert_eq!(cluster.reconciled_generation(), 1);
    assert_eq!(cluster.process_groups().len(), 8);
    assert_eq!(env.store.pod_names().len(), 8);
    // Stateless processes have no volume
    assert_eq!(env.store.pvc_names().len(), 6);
    assert!(env.store.config_map(NAMESPACE, "sample-config").is_some());
    assert!(
        cluster
            .process_groups()
            .iter()
            .all(|pg| !pg.addresses.is_empty())
    );
}

#[tokio::test]
async fn test_converged_pass_changes_nothing() {
    let (env, key) = converged().await;
    let writes = env.store.writes();
    let status_updates = env.store.status_updates();

    assert_eq!(run_pass(&env.ctx, &key).await.unwrap(), None);

    assert_eq!(env.store.writes(), writes);
    assert_eq!(env.store.status_updates(), status_updates);
    assert_eq!(env.db.mutating_calls(), 0);
}

#[tokio::test]
async fn test_scale_down_removes_coordinator_safely() {
    let (env, key) = converged().await;
    env.store
        .update_spec(&key, |cluster| cluster.spec.process_counts.storage = 2);

    // First pass marks, excludes and moves the coordinator away
    let requeue = run_pass(&env.ctx, &key).await.unwrap();
    assert!(requeue.is_some());
    assert_eq!(env.db.exclude_calls(), vec![vec!["10.0.1.3".to_string()]]);
    assert_eq!(env.db.coordinator_changes().len(), 1);
    assert!(!env.db.coordinator_changes()[0].contains(&"10.0.1.3:4501".to_string()));
    assert!(env.group(&key, "sample-storage-3").is_marked_for_removal());

    // Once the cluster has been up long enough the group is dropped
    env.db.set_seconds_since_last_recovered(900.0);
    assert_eq!(run_pass(&env.ctx, &key).await.unwrap(), None);

    assert_eq!(env.db.include_calls(), vec![vec!["10.0.1.3".to_string()]]);
    assert!(!env.group_ids(&key).contains(&"sample-storage-3".to_string()));
    assert!(!env.store.pod_names().contains(&"sample-sample-storage-3".to_string()));
    assert_eq!(env.cluster(&key).reconciled_generation(), 2);
}
