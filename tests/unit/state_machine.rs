//! Additional unit tests for process group state machine transitions

use fdb_operator::controller::state_machine::{
    ProcessGroupEvent, ProcessGroupPhase, ProcessGroupStateMachine, TransitionContext,
    TransitionResult, determine_event,
};
use fdb_operator::crd::{ProcessClass, ProcessGroupStatus};

fn group(addresses: &[&str], marked: bool, excluded: bool) -> ProcessGroupStatus {
    let mut pg = ProcessGroupStatus::new("sample-storage-1", ProcessClass::Storage);
    pg.addresses = addresses.iter().map(|a| a.to_string()).collect();
    if marked {
        pg.mark_for_removal(1);
    }
    if excluded {
        pg.set_excluded(2);
    }
    pg
}

mod phase_tests {
    use super::*;

    #[test]
    fn test_phase_of_new_group() {
        assert_eq!(
            ProcessGroupPhase::of(&group(&[], false, false), false),
            ProcessGroupPhase::Provisioning
        );
    }

    #[test]
    fn test_phase_of_reported_group() {
        assert_eq!(
            ProcessGroupPhase::of(&group(&["10.0.0.1"], false, false), false),
            ProcessGroupPhase::Active
        );
    }

    #[test]
    fn test_phase_follows_exclusion_list() {
        let pg = group(&["10.0.0.1"], true, false);
        assert_eq!(ProcessGroupPhase::of(&pg, false), ProcessGroupPhase::MarkedForRemoval);
        assert_eq!(ProcessGroupPhase::of(&pg, true), ProcessGroupPhase::Excluding);
    }

    #[test]
    fn test_excluded_timestamp_wins() {
        let pg = group(&["10.0.0.1"], true, true);
        assert_eq!(ProcessGroupPhase::of(&pg, false), ProcessGroupPhase::Excluded);
    }
}

mod transition_tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let machine = ProcessGroupStateMachine::new();
        let ctx = TransitionContext {
            has_addresses: true,
            marked_for_removal: true,
            in_exclusion_list: true,
            ..Default::default()
        };

        let steps = [
            (ProcessGroupPhase::Provisioning, ProcessGroupEvent::ProcessReported),
            (ProcessGroupPhase::Active, ProcessGroupEvent::RemovalRequested),
            (ProcessGroupPhase::MarkedForRemoval, ProcessGroupEvent::ExclusionIssued),
            (ProcessGroupPhase::Excluding, ProcessGroupEvent::ExclusionCompleted),
            (ProcessGroupPhase::Excluded, ProcessGroupEvent::ResourcesRemoved),
        ];
        for (from, event) in steps {
            assert!(machine.transition(from, event, &ctx).is_success(), "{} on {}", event, from);
        }
    }

    #[test]
    fn test_cannot_skip_exclusion() {
        let machine = ProcessGroupStateMachine::new();
        let ctx = TransitionContext {
            has_addresses: true,
            marked_for_removal: true,
            ..Default::default()
        };

        let result = machine.transition(
            ProcessGroupPhase::Active,
            ProcessGroupEvent::ResourcesRemoved,
            &ctx,
        );
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));

        let result = machine.transition(
            ProcessGroupPhase::MarkedForRemoval,
            ProcessGroupEvent::ExclusionCompleted,
            &ctx,
        );
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_group_without_addresses_needs_no_exclusion() {
        let machine = ProcessGroupStateMachine::new();
        let ctx = TransitionContext {
            marked_for_removal: true,
            ..Default::default()
        };

        let result = machine.transition(
            ProcessGroupPhase::MarkedForRemoval,
            ProcessGroupEvent::ExclusionCompleted,
            &ctx,
        );
        assert!(result.is_success());
    }

    #[test]
    fn test_remaining_data_blocks_completion() {
        let machine = ProcessGroupStateMachine::new();
        let ctx = TransitionContext {
            has_addresses: true,
            marked_for_removal: true,
            in_exclusion_list: true,
            data_remaining: 2,
            ..Default::default()
        };

        let result = machine.transition(
            ProcessGroupPhase::Excluding,
            ProcessGroupEvent::ExclusionCompleted,
            &ctx,
        );
        match result {
            TransitionResult::GuardFailed { reason, .. } => assert!(reason.contains("still hold data")),
            other => panic!("expected guard failure, got {:?}", other),
        }
    }

    #[test]
    fn test_remaining_resources_block_removal() {
        let machine = ProcessGroupStateMachine::new();
        let ctx = TransitionContext {
            marked_for_removal: true,
            resources_remaining: 1,
            ..Default::default()
        };

        assert!(
            !machine
                .transition(ProcessGroupPhase::Excluded, ProcessGroupEvent::ResourcesRemoved, &ctx)
                .is_success()
        );
    }

    #[test]
    fn test_removed_is_terminal() {
        let machine = ProcessGroupStateMachine::new();
        assert!(machine.valid_events(ProcessGroupPhase::Removed).is_empty());
    }
}

mod determine_event_tests {
    use super::*;

    #[test]
    fn test_marked_group_requests_removal() {
        let ctx = TransitionContext::for_group(&group(&["10.0.0.1"], true, false));
        assert_eq!(
            determine_event(ProcessGroupPhase::Active, &ctx),
            Some(ProcessGroupEvent::RemovalRequested)
        );
    }

    #[test]
    fn test_listed_group_issues_exclusion() {
        let ctx = TransitionContext::for_group(&group(&["10.0.0.1"], true, false))
            .with_exclusion(true, 0);
        assert_eq!(
            determine_event(ProcessGroupPhase::MarkedForRemoval, &ctx),
            Some(ProcessGroupEvent::ExclusionIssued)
        );
    }

    #[test]
    fn test_active_group_has_no_event() {
        let ctx = TransitionContext::for_group(&group(&["10.0.0.1"], false, false));
        assert_eq!(determine_event(ProcessGroupPhase::Active, &ctx), None);
    }
}
