//! Exclusion step scenarios against the in-memory database

use fdb_operator::admin::AdminError;
use fdb_operator::admin::mock::MockOperation;
use fdb_operator::config::{PARTIAL_EXCLUSION_DELAY, RECOVERY_WAIT_DELAY};
use fdb_operator::controller::steps::ExcludeProcesses;
use fdb_operator::controller::{Requeue, Step};
use fdb_operator::crd::ProcessClass;
use serde_json::json;

use crate::common::*;

/// Five serving storage processes plus `marked` groups marked for removal
fn surplus_storage(marked: std::ops::RangeInclusive<u32>) -> ClusterBuilder {
    let mut builder = ClusterBuilder::new()
        .with_counts(json!({"storage": 5}))
        .with_groups(storage_groups(1..=5));
    for n in marked {
        builder = builder.with_group(marked_group(
            &format!("sample-storage-{}", n),
            ProcessClass::Storage,
            &format!("10.0.1.{}", n),
        ));
    }
    builder
}

fn setup(builder: ClusterBuilder) -> (TestEnv, fdb_operator::store::ClusterKey) {
    let env = TestEnv::new();
    let cluster = builder.build();
    env.add_processes(&cluster);
    let key = env.insert(cluster);
    (env, key)
}

fn delay_of(outcome: &Option<Requeue>) -> std::time::Duration {
    outcome.as_ref().map(|r| r.delay()).unwrap_or_default()
}

#[tokio::test]
async fn test_excludes_only_the_safe_number() {
    let (env, key) = setup(surplus_storage(6..=8));

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(env.db.exclude_calls(), vec![vec!["10.0.1.6".to_string()]]);
    let requeue = outcome.unwrap();
    assert!(!requeue.is_terminal());
    assert_eq!(requeue.delay(), PARTIAL_EXCLUSION_DELAY);
    assert!(requeue.to_string().contains("1 excluded and 2 waiting"), "{}", requeue);
}

#[tokio::test]
async fn test_ongoing_exclusion_counts_against_allowance() {
    let (env, key) = setup(surplus_storage(6..=8));

    let mut pass = env.pass(&key);
    ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();
    env.db.set_seconds_since_last_recovered(600.0);

    // storage-6 is excluded in the database but its data has not moved yet
    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(env.db.exclude_calls().len(), 1);
    let requeue = outcome.unwrap();
    assert!(!requeue.is_terminal());
    assert!(requeue.delay().is_zero());
    assert!(requeue.to_string().contains("not allowed"));
}

#[tokio::test]
async fn test_recent_recovery_defers_exclusion() {
    let (env, key) = setup(surplus_storage(6..=6));
    env.db.set_seconds_since_last_recovered(30.0);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(delay_of(&outcome), RECOVERY_WAIT_DELAY);
    assert!(env.db.exclude_calls().is_empty());
}

#[tokio::test]
async fn test_nothing_allowed_reported_before_recovery_wait() {
    let builder = ClusterBuilder::new()
        .with_counts(json!({"storage": 5}))
        .with_groups(storage_groups(1..=4))
        .with_group(marked_group("sample-storage-6", ProcessClass::Storage, "10.0.1.6"));
    let (env, key) = setup(builder);
    env.db.set_seconds_since_last_recovered(30.0);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    let requeue = outcome.unwrap();
    assert!(requeue.delay().is_zero());
    assert!(requeue.to_string().contains("not allowed"));
    assert!(env.db.exclude_calls().is_empty());
    assert_eq!(env.db.lock_takes(), 0);
}

#[tokio::test]
async fn test_transaction_classes_held_back_together() {
    let builder = ClusterBuilder::new()
        .with_counts(json!({"storage": 3, "log": 4}))
        .with_groups(storage_groups(1..=4))
        .with_group(marked_group("sample-storage-5", ProcessClass::Storage, "10.0.1.5"))
        .with_group(marked_group("sample-storage-6", ProcessClass::Storage, "10.0.1.6"))
        .with_group(active_group("sample-log-1", ProcessClass::Log, "10.0.2.1"))
        .with_group(active_group("sample-log-2", ProcessClass::Log, "10.0.2.2"))
        .with_group(active_group("sample-log-3", ProcessClass::Log, "10.0.2.3"))
        .with_group(marked_group("sample-log-4", ProcessClass::Log, "10.0.2.4"));
    let (env, key) = setup(builder);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    // Storage is not part of the transaction system and goes ahead alone
    assert_eq!(
        env.db.exclude_calls(),
        vec![vec!["10.0.1.5".to_string(), "10.0.1.6".to_string()]]
    );
    assert_eq!(delay_of(&outcome), PARTIAL_EXCLUSION_DELAY);
}

#[tokio::test]
async fn test_recently_missing_process_blocks_class() {
    let builder = ClusterBuilder::new()
        .with_counts(json!({"storage": 5}))
        .with_groups(storage_groups(1..=4))
        .with_group(missing_group("sample-storage-5", ProcessClass::Storage, "10.0.1.5", now()))
        .with_group(marked_group("sample-storage-6", ProcessClass::Storage, "10.0.1.6"));
    let (env, key) = setup(builder);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert!(env.db.exclude_calls().is_empty());
    assert!(!outcome.unwrap().is_terminal());
}

#[tokio::test]
async fn test_long_missing_process_only_stops_counting() {
    let builder = ClusterBuilder::new()
        .with_counts(json!({"storage": 5}))
        .with_groups(storage_groups(1..=5))
        .with_group(missing_group(
            "sample-storage-6",
            ProcessClass::Storage,
            "10.0.1.6",
            now() - 600,
        ))
        .with_group(marked_group("sample-storage-7", ProcessClass::Storage, "10.0.1.7"));
    let (env, key) = setup(builder);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(env.db.exclude_calls(), vec![vec!["10.0.1.7".to_string()]]);
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_excluding_coordinator_rotates_coordinators() {
    let (env, key) = setup(surplus_storage(6..=6));
    env.db
        .set_coordinators(&["sample-storage-6", "sample-storage-1", "sample-storage-2"]);

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();
    assert!(outcome.is_none());

    assert_eq!(env.db.exclude_calls(), vec![vec!["10.0.1.6".to_string()]]);
    let changes = env.db.coordinator_changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].len(), 3);
    assert!(!changes[0].contains(&"10.0.1.6:4501".to_string()));

    // The new connection string is persisted after the change succeeded
    let stored = env.cluster(&key);
    let connection_string = &stored.status.as_ref().unwrap().connection_string;
    assert!(connection_string.starts_with("mock:gen1@"));
    assert!(!connection_string.contains("10.0.1.6"));
}

#[tokio::test]
async fn test_exclusion_brackets_lock() {
    let (env, key) = setup(surplus_storage(6..=6).with_locks());

    let mut pass = env.pass(&key);
    ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(env.db.exclude_calls().len(), 1);
    assert_eq!(env.db.lock_takes(), 1);
    assert_eq!(env.db.lock_releases(), 1);
    assert_eq!(env.db.lock_holder(), None);
}

#[tokio::test]
async fn test_lock_held_elsewhere_prevents_exclusion() {
    let (env, key) = setup(surplus_storage(6..=6).with_locks());
    env.db.hold_lock("operator-1");

    let mut pass = env.pass(&key);
    let err = ExcludeProcesses
        .reconcile(&env.ctx, &mut pass)
        .await
        .err()
        .unwrap();

    assert!(err.is_retryable());
    assert!(env.db.exclude_calls().is_empty());
    assert_eq!(env.db.lock_releases(), 0);
    assert_eq!(env.db.lock_holder().as_deref(), Some("operator-1"));
}

#[tokio::test]
async fn test_failed_exclusion_still_releases_lock() {
    let (env, key) = setup(surplus_storage(6..=6).with_locks());
    env.db.fail(
        MockOperation::Exclude,
        AdminError::CommandFailed("exclude rejected".to_string()),
    );

    let mut pass = env.pass(&key);
    let err = ExcludeProcesses
        .reconcile(&env.ctx, &mut pass)
        .await
        .err()
        .unwrap();

    assert!(err.is_retryable());
    assert_eq!(env.db.lock_takes(), 1);
    assert_eq!(env.db.lock_releases(), 1);
    assert_eq!(env.db.lock_holder(), None);
}

#[tokio::test]
async fn test_locality_exclusion_uses_instance_id() {
    let builder = surplus_storage(6..=6)
        .with_spec("automationOptions", json!({"useLocalitiesForExclusion": true}));
    let (env, key) = setup(builder);

    let mut pass = env.pass(&key);
    ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert_eq!(
        env.db.exclude_calls(),
        vec![vec!["locality_instance_id:sample-storage-6".to_string()]]
    );
    assert!(env.db.status().cluster.processes["sample-storage-6"].excluded);
}

#[tokio::test]
async fn test_nothing_marked_makes_no_calls() {
    let (env, key) = setup(surplus_storage(1..=0));

    let mut pass = env.pass(&key);
    let outcome = ExcludeProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(env.db.mutating_calls(), 0);
}
