//! Replacement of failed process groups and restarts of outdated processes

use fdb_operator::admin::AdminError;
use fdb_operator::admin::mock::MockOperation;
use fdb_operator::config::RECOVERY_WAIT_DELAY;
use fdb_operator::controller::Step;
use fdb_operator::controller::steps::{
    AddProcessGroups, BounceProcesses, ReplaceFailedProcessGroups, UpdateStatus,
};
use fdb_operator::crd::{ProcessClass, ProcessGroupConditionType};
use fdb_operator::store::ClusterKey;
use serde_json::json;

use crate::common::*;

const THREE_HOURS: i64 = 3 * 60 * 60;

fn setup(builder: ClusterBuilder) -> (TestEnv, ClusterKey) {
    let env = TestEnv::new();
    let cluster = builder.build();
    env.add_processes(&cluster);
    let key = env.insert(cluster);
    (env, key)
}

mod replacement_tests {
    use super::*;

    fn failing_third(since: i64) -> ClusterBuilder {
        ClusterBuilder::new()
            .with_counts(json!({"storage": 3}))
            .with_groups(storage_groups(1..=2))
            .with_group(missing_group("sample-storage-3", ProcessClass::Storage, "10.0.1.3", since))
    }

    #[tokio::test]
    async fn test_long_failing_group_is_replaced() {
        let (env, key) = setup(failing_third(now() - THREE_HOURS));

        let mut pass = env.pass(&key);
        let outcome = ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();
        AddProcessGroups.reconcile(&env.ctx, &mut pass).await.unwrap();

        let requeue = outcome.unwrap();
        assert!(!requeue.is_terminal());
        assert!(env.group(&key, "sample-storage-3").is_marked_for_removal());
        assert!(env.group_ids(&key).contains(&"sample-storage-4".to_string()));
    }

    #[tokio::test]
    async fn test_recent_failure_is_not_replaced() {
        let (env, key) = setup(failing_third(now() - 60));

        let mut pass = env.pass(&key);
        let outcome = ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(!env.group(&key, "sample-storage-3").is_marked_for_removal());
    }

    #[tokio::test]
    async fn test_replacements_are_capped() {
        let builder = ClusterBuilder::new()
            .with_counts(json!({"storage": 3}))
            .with_groups(storage_groups(1..=1))
            .with_group(missing_group(
                "sample-storage-2",
                ProcessClass::Storage,
                "10.0.1.2",
                now() - THREE_HOURS,
            ))
            .with_group(missing_group(
                "sample-storage-3",
                ProcessClass::Storage,
                "10.0.1.3",
                now() - 2 * THREE_HOURS,
            ));
        let (env, key) = setup(builder);

        let mut pass = env.pass(&key);
        ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();

        // The longest failing group goes first
        assert!(env.group(&key, "sample-storage-3").is_marked_for_removal());
        assert!(!env.group(&key, "sample-storage-2").is_marked_for_removal());

        // storage-3 is not excluded yet and uses up the only slot
        let mut pass = env.pass(&key);
        let outcome = ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(!env.group(&key, "sample-storage-2").is_marked_for_removal());
    }

    #[tokio::test]
    async fn test_replacements_can_be_disabled() {
        let (env, key) = setup(
            failing_third(now() - THREE_HOURS)
                .with_spec("automationOptions", json!({"replacements": {"enabled": false}})),
        );
        let writes = env.store.writes();

        let mut pass = env.pass(&key);
        let outcome = ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert_eq!(env.store.writes(), writes);
    }

    #[tokio::test]
    async fn test_failure_detection_time_from_spec() {
        let (env, key) = setup(failing_third(now() - 120).with_spec(
            "automationOptions",
            json!({"replacements": {"failureDetectionTimeSeconds": 60}}),
        ));

        let mut pass = env.pass(&key);
        ReplaceFailedProcessGroups
            .reconcile(&env.ctx, &mut pass)
            .await
            .unwrap();

        assert!(env.group(&key, "sample-storage-3").is_marked_for_removal());
    }
}

mod bounce_tests {
    use super::*;

    /// Three storage processes with storage-2 still on an older patch release
    fn outdated_second(builder: ClusterBuilder) -> (TestEnv, ClusterKey) {
        let (env, key) = setup(
            builder
                .with_counts(json!({"storage": 3}))
                .with_groups(storage_groups(1..=3)),
        );
        env.db.set_process_version(&[], VERSION);
        env.db.set_process_version(&["sample-storage-2"], "7.1.50");
        (env, key)
    }

    #[tokio::test]
    async fn test_outdated_process_is_restarted_under_lock() {
        let (env, key) = outdated_second(ClusterBuilder::new().with_locks());

        let mut pass = env.pass(&key);
        UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
        assert!(
            pass.cluster
                .process_groups()
                .iter()
                .any(|pg| pg.has_condition(ProcessGroupConditionType::PendingRestart))
        );
        let outcome = BounceProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

        assert!(!outcome.unwrap().is_terminal());
        assert_eq!(env.db.kill_calls(), vec![vec!["10.0.1.2:4501".to_string()]]);
        assert_eq!(env.db.lock_takes(), 1);
        assert_eq!(env.db.lock_releases(), 1);
        assert!(
            !env.group(&key, "sample-storage-2")
                .has_condition(ProcessGroupConditionType::PendingRestart)
        );
    }

    #[tokio::test]
    async fn test_recent_recovery_defers_restart() {
        let (env, key) = outdated_second(ClusterBuilder::new());
        env.db.set_seconds_since_last_recovered(30.0);

        let mut pass = env.pass(&key);
        UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
        let outcome = BounceProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

        assert_eq!(outcome.unwrap().delay(), RECOVERY_WAIT_DELAY);
        assert!(env.db.kill_calls().is_empty());
    }

    #[tokio::test]
    async fn test_restart_can_be_disabled() {
        let (env, key) = outdated_second(
            ClusterBuilder::new().with_spec("automationOptions", json!({"killProcesses": false})),
        );

        let mut pass = env.pass(&key);
        UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
        let outcome = BounceProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

        assert!(outcome.is_none());
        assert!(env.db.kill_calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_releases_lock_and_keeps_condition() {
        let (env, key) = outdated_second(ClusterBuilder::new().with_locks());
        env.db
            .fail(MockOperation::Kill, AdminError::CommandFailed("kill rejected".to_string()));

        let mut pass = env.pass(&key);
        UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
        let result = BounceProcesses.reconcile(&env.ctx, &mut pass).await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(env.db.lock_holder(), None);
        assert!(
            env.group(&key, "sample-storage-2")
                .has_condition(ProcessGroupConditionType::PendingRestart)
        );
    }

    #[tokio::test]
    async fn test_current_processes_are_left_alone() {
        let (env, key) = setup(
            ClusterBuilder::new()
                .with_counts(json!({"storage": 3}))
                .with_groups(storage_groups(1..=3)),
        );
        env.db.set_process_version(&[], VERSION);

        let mut pass = env.pass(&key);
        UpdateStatus.reconcile(&env.ctx, &mut pass).await.unwrap();
        let outcome = BounceProcesses.reconcile(&env.ctx, &mut pass).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(env.db.mutating_calls(), 0);
    }
}
