pub mod context;
pub mod coordination;
pub mod coordinator;
pub mod error;
pub mod exclusion;
pub mod lock;
pub mod pipeline;
pub mod reconciler;
pub mod requeue;
pub mod state_machine;
pub mod status;
pub mod steps;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, ErrorKind, Result};
pub use pipeline::{Pipeline, ReconcilePass, Step};
pub use reconciler::{error_policy, reconcile, run_pass};
pub use requeue::Requeue;
pub use status::ConditionBuilder;
pub use validation::{normalize, validate_spec};
