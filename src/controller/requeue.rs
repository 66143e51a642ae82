//! Outcome signals of pipeline steps

use std::fmt;
use std::time::Duration;

use crate::controller::error::Error;

/// What a step asks the driver to do after it ran.
///
/// A step that has nothing to report returns `None` and the pass continues.
#[derive(Debug)]
pub enum Requeue {
    /// Run the remaining steps, then requeue the cluster. A zero delay lets
    /// the driver pick its default.
    Delayed {
        delay: Duration,
        message: Option<String>,
        error: Option<Error>,
    },
    /// Abort the remaining steps and requeue after `delay`
    Stop { delay: Duration, message: String },
    /// Abort the remaining steps and report the error
    Failed(Error),
}

impl Requeue {
    /// Deferred for a safety reason, not an error
    pub fn wait(message: impl Into<String>) -> Self {
        Requeue::Delayed {
            delay: Duration::ZERO,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn wait_for(delay: Duration, message: impl Into<String>) -> Self {
        Requeue::Delayed {
            delay,
            message: Some(message.into()),
            error: None,
        }
    }

    /// Retryable error; the rest of the pass still runs
    pub fn retry(error: impl Into<Error>) -> Self {
        Requeue::Delayed {
            delay: Duration::ZERO,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn retry_after(delay: Duration, error: impl Into<Error>) -> Self {
        Requeue::Delayed {
            delay,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn stop(delay: Duration, message: impl Into<String>) -> Self {
        Requeue::Stop {
            delay,
            message: message.into(),
        }
    }

    pub fn fail(error: impl Into<Error>) -> Self {
        Requeue::Failed(error.into())
    }

    /// Map a step error: transient failures delay, everything else aborts the pass
    pub fn from_error(error: Error) -> Self {
        if error.is_retryable() {
            Requeue::retry(error)
        } else {
            Requeue::Failed(error)
        }
    }

    /// Whether the remaining steps of the pass are skipped
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Requeue::Delayed { .. })
    }

    pub fn delay(&self) -> Duration {
        match self {
            Requeue::Delayed { delay, .. } | Requeue::Stop { delay, .. } => *delay,
            Requeue::Failed(_) => Duration::ZERO,
        }
    }
}

impl fmt::Display for Requeue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requeue::Delayed {
                delay,
                message,
                error,
            } => {
                write!(f, "delayed requeue ({:?})", delay)?;
                if let Some(message) = message {
                    write!(f, ": {}", message)?;
                }
                if let Some(error) = error {
                    write!(f, ": {}", error)?;
                }
                Ok(())
            }
            Requeue::Stop { delay, message } => write!(f, "stop ({:?}): {}", delay, message),
            Requeue::Failed(error) => write!(f, "failed: {}", error),
        }
    }
}
