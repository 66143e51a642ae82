//! Sub-reconcilers of the standard pipeline
//!
//! Each step is a unit struct implementing [`Step`](crate::controller::pipeline::Step).
//! Steps recompute their inputs from the cluster status and the database
//! status on every run, so a step that ran to completion has nothing left to
//! do when it runs again.

mod add_process_groups;
mod add_resources;
mod bounce_processes;
mod change_coordinators;
mod choose_removals;
mod exclude_processes;
mod remove_incompatible;
mod remove_process_groups;
mod replace_failed;
mod update_config_map;
mod update_status;

pub use add_process_groups::AddProcessGroups;
pub use add_resources::{AddPods, AddPvcs, AddServices};
pub use bounce_processes::{BounceProcesses, processes_to_bounce};
pub use change_coordinators::ChangeCoordinators;
pub use choose_removals::ChooseRemovals;
pub use exclude_processes::ExcludeProcesses;
pub use remove_incompatible::RemoveIncompatibleProcesses;
pub use remove_process_groups::RemoveProcessGroups;
pub use replace_failed::{ReplaceFailedProcessGroups, failed_process_groups};
pub use update_config_map::UpdateConfigMap;
pub use update_status::{FinalizeStatus, UpdateStatus, next_running_version};

/// Current time as unix seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
