// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for exclusion safety, coordinator selection,
//! the process group state machine and spec validation
//!
//! These tests use proptest to generate random cluster shapes and verify that:
//! 1. The exclusion allowance is never negative and never exceeded
//! 2. A recently missing process always blocks exclusions of its class
//! 3. Selected coordinators always sit in distinct zones
//! 4. The state machine never panics on any event sequence
//! 5. Validation is deterministic and normalization idempotent

#[path = "../common/mod.rs"]
mod common;

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use fdb_operator::admin::mock::MockDatabase;
use fdb_operator::controller::coordinator::select_coordinators;
use fdb_operator::controller::exclusion::{allowed_exclusions, plan_exclusions};
use fdb_operator::controller::state_machine::{
    ProcessGroupEvent, ProcessGroupPhase, ProcessGroupStateMachine, TransitionContext,
    TransitionResult,
};
use fdb_operator::controller::validation::{normalize, validate_spec};
use fdb_operator::crd::{FoundationDBCluster, ProcessClass, ProcessGroupStatus};
use serde_json::json;

use common::*;

/// Missing grace window used by the planning properties
const GRACE_SECS: i64 = 300;

// =============================================================================
// Strategy generators
// =============================================================================

fn any_phase() -> impl Strategy<Value = ProcessGroupPhase> {
    prop_oneof![
        Just(ProcessGroupPhase::Provisioning),
        Just(ProcessGroupPhase::Active),
        Just(ProcessGroupPhase::MarkedForRemoval),
        Just(ProcessGroupPhase::Excluding),
        Just(ProcessGroupPhase::Excluded),
        Just(ProcessGroupPhase::Removed),
    ]
}

fn any_event() -> impl Strategy<Value = ProcessGroupEvent> {
    prop_oneof![
        Just(ProcessGroupEvent::ProcessReported),
        Just(ProcessGroupEvent::RemovalRequested),
        Just(ProcessGroupEvent::ExclusionIssued),
        Just(ProcessGroupEvent::ExclusionCompleted),
        Just(ProcessGroupEvent::ResourcesRemoved),
    ]
}

fn any_context() -> impl Strategy<Value = TransitionContext> {
    (any::<bool>(), any::<bool>(), any::<bool>(), 0..3usize, 0..3usize).prop_map(
        |(has_addresses, marked_for_removal, in_exclusion_list, data, resources)| {
            TransitionContext {
                has_addresses,
                marked_for_removal,
                in_exclusion_list,
                data_remaining: data,
                resources_remaining: resources,
            }
        },
    )
}

/// Storage cluster with `serving` active groups and `marked` surplus groups
fn storage_cluster(desired: i32, serving: u32, marked: u32) -> FoundationDBCluster {
    let mut builder = ClusterBuilder::new()
        .with_counts(json!({"storage": desired}))
        .with_groups(storage_groups(1..=serving));
    for n in serving + 1..=serving + marked {
        builder = builder.with_group(marked_group(
            &format!("sample-storage-{}", n),
            ProcessClass::Storage,
            &format!("10.0.1.{}", n),
        ));
    }
    builder.build()
}

fn desired_storage(count: i32) -> BTreeMap<ProcessClass, i32> {
    BTreeMap::from([(ProcessClass::Storage, count)])
}

// =============================================================================
// Exclusion allowance
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn allowance_is_never_negative(
        valid in -10..50i32,
        fault_tolerance in 0..3i32,
        desired in 0..50i32,
        ongoing in 0..20i32,
    ) {
        let allowed = allowed_exclusions(valid, fault_tolerance, desired, ongoing);
        prop_assert!(allowed >= 0);
        prop_assert!(allowed >= valid + fault_tolerance - desired - ongoing);
    }

    #[test]
    fn selection_never_exceeds_allowance(
        desired in 1..8i32,
        serving in 0..10u32,
        marked in 0..6u32,
    ) {
        let cluster = storage_cluster(desired, serving, marked);
        let plan = plan_exclusions(&cluster, &[], &desired_storage(desired), now(), GRACE_SECS);
        let selection = plan.select();

        let allowed = plan
            .by_class
            .get(&ProcessClass::Storage)
            .map(|c| c.allowed(plan.fault_tolerance))
            .unwrap_or(0);
        prop_assert!(selection.chosen.len() as i32 <= allowed);
        prop_assert_eq!(
            selection.chosen.len() + selection.waiting.len(),
            marked as usize
        );
        prop_assert_eq!(selection.all_chosen(), selection.waiting.is_empty());

        // Exclusions never leave fewer serving processes than desired minus the buffer
        prop_assert!(
            serving as i32 + plan.fault_tolerance - selection.chosen.len() as i32 >= desired
                || selection.chosen.is_empty()
        );
    }

    #[test]
    fn recent_missing_process_blocks_class(
        serving in 1..10u32,
        marked in 1..4u32,
        age in 0..GRACE_SECS,
    ) {
        let now = now();
        let mut cluster = storage_cluster(1, serving, marked);
        cluster
            .status_mut()
            .process_groups
            .push(missing_group("sample-storage-99", ProcessClass::Storage, "10.0.9.9", now - age));

        let plan = plan_exclusions(&cluster, &[], &desired_storage(1), now, GRACE_SECS);
        let storage = &plan.by_class[&ProcessClass::Storage];

        prop_assert!(storage.blocked_by_missing);
        prop_assert_eq!(storage.allowed(plan.fault_tolerance), 0);
        prop_assert!(plan.select().chosen.is_empty());
    }

    #[test]
    fn excluded_entries_count_as_ongoing(marked in 1..5u32, already in 0..5u32) {
        let already = already.min(marked);
        let cluster = storage_cluster(3, 5, marked);
        let exclusions: Vec<String> = (6..6 + already).map(|n| format!("10.0.1.{}", n)).collect();

        let plan = plan_exclusions(&cluster, &exclusions, &desired_storage(3), now(), GRACE_SECS);
        let candidates = plan.candidates().count() as u32;

        prop_assert_eq!(candidates, marked - already);
        if let Some(storage) = plan.by_class.get(&ProcessClass::Storage) {
            prop_assert_eq!(storage.ongoing, already as i32);
        }
    }
}

// =============================================================================
// Coordinator selection
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn coordinators_sit_in_distinct_zones(groups in 1..10u32, zones in 1..6u32) {
        let mut cluster = ClusterBuilder::new()
            .with_counts(json!({"storage": groups}))
            .with_groups(storage_groups(1..=groups))
            .build();
        cluster.status_mut().configured = true;

        let db = MockDatabase::new();
        for n in 1..=groups {
            db.add_process(
                &format!("sample-storage-{}", n),
                ProcessClass::Storage,
                &format!("10.0.1.{}", n),
                &format!("zone-{}", n % zones),
            );
        }

        let distinct_zones = groups.min(zones) as usize;
        match select_coordinators(&cluster, &db.status()) {
            Ok(chosen) => {
                let chosen_zones: BTreeSet<&str> = chosen.iter().map(|c| c.zone.as_str()).collect();
                prop_assert_eq!(chosen.len(), cluster.desired_coordinator_count());
                prop_assert_eq!(chosen_zones.len(), chosen.len());
            }
            Err(err) => {
                prop_assert!(distinct_zones < cluster.desired_coordinator_count());
                prop_assert!(err.is_retryable());
            }
        }
    }
}

// =============================================================================
// State machine
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn state_machine_never_panics(
        start in any_phase(),
        steps in prop::collection::vec((any_event(), any_context()), 0..20),
    ) {
        let machine = ProcessGroupStateMachine::new();
        let mut phase = start;

        for (event, ctx) in steps {
            match machine.transition(phase, event, &ctx) {
                TransitionResult::Success { from, to, .. } => {
                    prop_assert_eq!(from, phase);
                    prop_assert!(machine.can_transition(phase, event));
                    phase = to;
                }
                TransitionResult::GuardFailed { from, .. } => prop_assert_eq!(from, phase),
                TransitionResult::InvalidTransition { current, .. } => {
                    prop_assert_eq!(current, phase);
                    prop_assert!(!machine.can_transition(phase, event));
                }
            }
        }
    }

    #[test]
    fn removal_requires_exclusion_first(ctx in any_context(), event in any_event()) {
        let machine = ProcessGroupStateMachine::new();
        for phase in [ProcessGroupPhase::Provisioning, ProcessGroupPhase::Active] {
            if let TransitionResult::Success { to, .. } = machine.transition(phase, event, &ctx) {
                prop_assert_ne!(to, ProcessGroupPhase::Removed);
                prop_assert_ne!(to, ProcessGroupPhase::Excluded);
            }
        }
        prop_assert!(machine.valid_events(ProcessGroupPhase::Removed).is_empty());
    }

    #[test]
    fn phase_derivation_matches_flags(
        has_address in any::<bool>(),
        marked in any::<bool>(),
        excluded in any::<bool>(),
        listed in any::<bool>(),
    ) {
        let mut pg = ProcessGroupStatus::new("sample-storage-1", ProcessClass::Storage);
        if has_address {
            pg.add_address("10.0.1.1");
        }
        if marked {
            pg.mark_for_removal(1);
        }
        if marked && excluded {
            pg.set_excluded(2);
        }

        let phase = ProcessGroupPhase::of(&pg, listed);
        prop_assert_eq!(phase == ProcessGroupPhase::Excluded, marked && excluded);
        prop_assert_ne!(phase, ProcessGroupPhase::Removed);
        if !marked {
            prop_assert!(matches!(
                phase,
                ProcessGroupPhase::Provisioning | ProcessGroupPhase::Active
            ));
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn validation_is_deterministic(
        storage in -5..1100i32,
        log in -5..1100i32,
        major in 0..10u32,
        minor in 0..10u32,
        patch in 0..100u32,
    ) {
        let mut cluster = ClusterBuilder::new()
            .with_spec("version", json!(format!("{}.{}.{}", major, minor, patch)))
            .with_counts(json!({"storage": storage, "log": log}))
            .build();
        normalize(&mut cluster);

        let first = validate_spec(&cluster).map_err(|e| e.to_string());
        let second = validate_spec(&cluster).map_err(|e| e.to_string());
        prop_assert_eq!(&first, &second);

        let in_range = |count: i32| (0..=1000).contains(&count);
        prop_assert_eq!(first.is_ok(), in_range(storage) && in_range(log));
    }

    #[test]
    fn normalize_is_idempotent(storage in 0..20i32, stateless in 0..20i32) {
        let mut once = ClusterBuilder::new()
            .with_counts(json!({"storage": storage, "stateless": stateless}))
            .build();
        normalize(&mut once);
        let mut twice = once.clone();
        normalize(&mut twice);

        prop_assert_eq!(&once.spec.process_counts, &twice.spec.process_counts);
        prop_assert!(once.spec.process_counts.storage > 0);
        prop_assert!(once.spec.process_counts.stateless > 0);
    }
}
