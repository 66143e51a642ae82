//! Unit tests for spec normalization and validation

use fdb_operator::controller::validation::{
    MAX_PROCESSES_PER_CLASS, default_process_count, normalize, parse_version, validate_spec,
};
use fdb_operator::controller::Error;
use fdb_operator::crd::{ProcessClass, RedundancyMode};
use serde_json::json;

use crate::common::*;

fn normalized(builder: ClusterBuilder) -> fdb_operator::crd::FoundationDBCluster {
    let mut cluster = builder.build();
    normalize(&mut cluster);
    cluster
}

mod normalize_tests {
    use super::*;

    #[test]
    fn test_empty_counts_get_redundancy_defaults() {
        let cluster = normalized(ClusterBuilder::new());

        assert_eq!(cluster.spec.process_counts.storage, 3);
        assert_eq!(cluster.spec.process_counts.log, 3);
        assert_eq!(cluster.spec.process_counts.stateless, 2);
        assert!(validate_spec(&cluster).is_ok());
    }

    #[test]
    fn test_triple_redundancy_defaults() {
        let mut cluster = ClusterBuilder::new().build();
        cluster.spec.database_configuration.redundancy_mode = RedundancyMode::Triple;

        assert_eq!(default_process_count(&cluster, ProcessClass::Storage), 5);
        assert_eq!(default_process_count(&cluster, ProcessClass::Stateless), 3);
        assert_eq!(default_process_count(&cluster, ProcessClass::Resolution), 0);
    }

    #[test]
    fn test_missing_prefix_uses_cluster_name() {
        let cluster = normalized(ClusterBuilder::new().with_spec("processGroupIDPrefix", json!("")));
        assert_eq!(cluster.spec.process_group_id_prefix, CLUSTER_NAME);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalized(ClusterBuilder::new().with_counts(json!({"storage": 4})));
        let mut twice = once.clone();
        normalize(&mut twice);

        assert_eq!(once.spec.process_counts, twice.spec.process_counts);
        assert_eq!(twice.spec.process_counts.storage, 4);
    }
}

mod version_tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version(VERSION), Some((7, 1, 57)));
        assert_eq!(parse_version(" 7.3.43 "), Some((7, 3, 43)));
        assert_eq!(parse_version("7"), None);
        assert_eq!(parse_version("7.x.1"), None);
    }

    #[test]
    fn test_malformed_version_rejected() {
        let cluster = normalized(ClusterBuilder::new().with_spec("version", json!("7.1")));
        let err = validate_spec(&cluster).unwrap_err();

        assert!(matches!(err, Error::ValidationError(_)));
        assert!(!err.is_retryable());
    }
}

mod count_tests {
    use super::*;

    #[test]
    fn test_negative_count_rejected() {
        let cluster = normalized(ClusterBuilder::new().with_counts(json!({"stateless": -2})));
        let err = validate_spec(&cluster).unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
    }

    #[test]
    fn test_count_above_maximum_rejected() {
        let cluster = normalized(
            ClusterBuilder::new().with_counts(json!({"storage": MAX_PROCESSES_PER_CLASS + 1})),
        );
        assert!(validate_spec(&cluster).is_err());

        let cluster = normalized(
            ClusterBuilder::new().with_counts(json!({"storage": MAX_PROCESSES_PER_CLASS})),
        );
        assert!(validate_spec(&cluster).is_ok());
    }

    #[test]
    fn test_storage_required() {
        let mut cluster = normalized(ClusterBuilder::new());
        cluster.spec.process_counts.storage = 0;

        let err = validate_spec(&cluster).unwrap_err();
        assert!(err.to_string().contains("storage"));
    }
}

mod lock_option_tests {
    use super::*;

    #[test]
    fn test_non_positive_lock_duration_rejected() {
        for minutes in [0, -5] {
            let cluster = normalized(
                ClusterBuilder::new()
                    .with_spec("lockOptions", json!({"lockDurationMinutes": minutes})),
            );
            assert!(validate_spec(&cluster).is_err(), "{} minutes", minutes);
        }
    }

    #[test]
    fn test_positive_lock_duration_accepted() {
        let cluster = normalized(
            ClusterBuilder::new().with_spec("lockOptions", json!({"lockDurationMinutes": 10})),
        );
        assert!(validate_spec(&cluster).is_ok());
    }
}

mod replacement_option_tests {
    use super::*;

    #[test]
    fn test_negative_replacement_options_rejected() {
        for replacements in [
            json!({"failureDetectionTimeSeconds": -1}),
            json!({"maxConcurrentReplacements": -3}),
        ] {
            let cluster = normalized(
                ClusterBuilder::new()
                    .with_spec("automationOptions", json!({"replacements": replacements})),
            );
            let err = validate_spec(&cluster).unwrap_err();
            assert!(err.to_string().contains("must not be negative"), "{}", err);
        }
    }

    #[test]
    fn test_replacement_defaults() {
        let cluster = normalized(ClusterBuilder::new());
        assert!(cluster.automatic_replacements_enabled());
        assert!(cluster.kill_processes_enabled());
        assert_eq!(cluster.max_concurrent_replacements(1), 1);
    }
}
