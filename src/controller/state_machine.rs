//! Finite state machine for the process group lifecycle
//!
//! The phase of a process group is never stored. It is derived from the
//! status entry and the database's exclusion list on every pass, and the
//! transition table decides which of the observed changes may be applied.

use std::fmt;

use crate::crd::ProcessGroupStatus;

/// Lifecycle phase of a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessGroupPhase {
    /// Created in status, the process was never reported
    Provisioning,
    /// Serving
    Active,
    /// Marked for removal, not yet in the exclusion list
    MarkedForRemoval,
    /// In the exclusion list, data may still be moving off
    Excluding,
    /// Exclusion finished, no data left on the process
    Excluded,
    /// Resources deleted and status entry dropped
    Removed,
}

impl ProcessGroupPhase {
    /// Derive the phase of a status entry.
    ///
    /// `in_exclusion_list` tells whether the database lists the group as excluded.
    pub fn of(process_group: &ProcessGroupStatus, in_exclusion_list: bool) -> Self {
        if process_group.is_excluded() {
            ProcessGroupPhase::Excluded
        } else if process_group.is_marked_for_removal() {
            if in_exclusion_list {
                ProcessGroupPhase::Excluding
            } else {
                ProcessGroupPhase::MarkedForRemoval
            }
        } else if process_group.addresses.is_empty() {
            ProcessGroupPhase::Provisioning
        } else {
            ProcessGroupPhase::Active
        }
    }
}

impl fmt::Display for ProcessGroupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Events that trigger process group transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessGroupEvent {
    /// The process showed up in the database status
    ProcessReported,
    /// Surplus or explicitly requested for replacement
    RemovalRequested,
    /// The exclude call for the group was accepted
    ExclusionIssued,
    /// No data is left on the group's addresses
    ExclusionCompleted,
    /// Pod, volume and service of the group are gone
    ResourcesRemoved,
}

impl fmt::Display for ProcessGroupEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Observations available to guards
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    pub has_addresses: bool,
    pub marked_for_removal: bool,
    pub in_exclusion_list: bool,
    /// Addresses of the group that still hold data
    pub data_remaining: usize,
    /// Child objects of the group that still exist
    pub resources_remaining: usize,
}

impl TransitionContext {
    pub fn for_group(process_group: &ProcessGroupStatus) -> Self {
        Self {
            has_addresses: !process_group.addresses.is_empty(),
            marked_for_removal: process_group.is_marked_for_removal(),
            ..Default::default()
        }
    }

    pub fn with_exclusion(mut self, in_exclusion_list: bool, data_remaining: usize) -> Self {
        self.in_exclusion_list = in_exclusion_list;
        self.data_remaining = data_remaining;
        self
    }

    pub fn with_resources_remaining(mut self, resources_remaining: usize) -> Self {
        self.resources_remaining = resources_remaining;
        self
    }
}

#[derive(Debug)]
pub struct Transition {
    pub from: ProcessGroupPhase,
    pub to: ProcessGroupPhase,
    pub event: ProcessGroupEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ProcessGroupPhase,
        to: ProcessGroupPhase,
        event: ProcessGroupEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: ProcessGroupPhase,
        to: ProcessGroupPhase,
        event: ProcessGroupEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: ProcessGroupPhase,
        event: ProcessGroupEvent,
    },
    GuardFailed {
        from: ProcessGroupPhase,
        to: ProcessGroupPhase,
        event: ProcessGroupEvent,
        reason: String,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success { .. })
    }
}

pub struct ProcessGroupStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ProcessGroupStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroupStateMachine {
    pub fn new() -> Self {
        use ProcessGroupEvent as E;
        use ProcessGroupPhase as P;

        Self {
            transitions: vec![
                Transition::new(
                    P::Provisioning,
                    P::Active,
                    E::ProcessReported,
                    "Process reported by the database",
                ),
                Transition::new(
                    P::Provisioning,
                    P::MarkedForRemoval,
                    E::RemovalRequested,
                    "Removal requested before the process came up",
                ),
                Transition::new(
                    P::Active,
                    P::MarkedForRemoval,
                    E::RemovalRequested,
                    "Removal requested",
                ),
                Transition::new(
                    P::MarkedForRemoval,
                    P::Excluding,
                    E::ExclusionIssued,
                    "Exclusion accepted by the database",
                ),
                // A group that never held data needs no exclusion
                Transition::new(
                    P::MarkedForRemoval,
                    P::Excluded,
                    E::ExclusionCompleted,
                    "No data on the process group",
                ),
                Transition::new(
                    P::Excluding,
                    P::Excluded,
                    E::ExclusionCompleted,
                    "Data moved off the excluded processes",
                ),
                Transition::new(
                    P::Excluded,
                    P::Removed,
                    E::ResourcesRemoved,
                    "Resources deleted, dropping process group",
                ),
                // Removed is terminal
            ],
        }
    }

    pub fn transition(
        &self,
        current: ProcessGroupPhase,
        event: ProcessGroupEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: ProcessGroupPhase, event: ProcessGroupEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    pub fn valid_events(&self, state: ProcessGroupPhase) -> Vec<ProcessGroupEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            ProcessGroupEvent::ProcessReported if !ctx.has_addresses => {
                Some("No address reported".to_string())
            }
            ProcessGroupEvent::ExclusionIssued if !ctx.in_exclusion_list => {
                Some("Not in the exclusion list".to_string())
            }
            ProcessGroupEvent::ExclusionCompleted if ctx.data_remaining > 0 => Some(format!(
                "{} address(es) still hold data",
                ctx.data_remaining
            )),
            ProcessGroupEvent::ExclusionCompleted
                if transition.from == ProcessGroupPhase::MarkedForRemoval && ctx.has_addresses =>
            {
                Some("Process group must be excluded first".to_string())
            }
            ProcessGroupEvent::ResourcesRemoved if !ctx.marked_for_removal => {
                Some("Process group is not marked for removal".to_string())
            }
            ProcessGroupEvent::ResourcesRemoved if ctx.resources_remaining > 0 => Some(format!(
                "{} resource(s) still exist",
                ctx.resources_remaining
            )),
            _ => None,
        }
    }
}

/// The event implied by the observations, if any
pub fn determine_event(
    current: ProcessGroupPhase,
    ctx: &TransitionContext,
) -> Option<ProcessGroupEvent> {
    match current {
        ProcessGroupPhase::Provisioning | ProcessGroupPhase::Active if ctx.marked_for_removal => {
            Some(ProcessGroupEvent::RemovalRequested)
        }
        ProcessGroupPhase::Provisioning if ctx.has_addresses => {
            Some(ProcessGroupEvent::ProcessReported)
        }
        ProcessGroupPhase::MarkedForRemoval if ctx.in_exclusion_list => {
            Some(ProcessGroupEvent::ExclusionIssued)
        }
        ProcessGroupPhase::MarkedForRemoval if !ctx.has_addresses => {
            Some(ProcessGroupEvent::ExclusionCompleted)
        }
        ProcessGroupPhase::Excluding => Some(ProcessGroupEvent::ExclusionCompleted),
        ProcessGroupPhase::Excluded => Some(ProcessGroupEvent::ResourcesRemoved),
        _ => None,
    }
}
