//! Error types for the FoundationDBCluster controller

use std::time::Duration;

use thiserror::Error;

use crate::admin::AdminError;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `ValidationError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database admin error: {0}")]
    AdminError(#[from] AdminError),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Version {0} is not supported")]
    UnsupportedVersion(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflicting update of {0}, the object changed since it was read")]
    ConflictError(String),

    #[error("Timed out after {0:?}")]
    TimeoutError(Duration),

    #[error("Failed to take lock: {0}")]
    LockError(String),

    #[error("Reconciliation of {0} is already in progress")]
    InFlightError(String),

    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),
}

/// Coarse error classification used to decide how the driver reacts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported declared spec, never retried
    Validation,
    /// Network, timeout or conflict talking to the store or the database
    TransientInfra,
    /// Misconfiguration of the operator itself
    ProtocolInvariant,
}

impl Error {
    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::KubeError(e) => matches!(e, kube::Error::Api(api_err) if api_err.code == 404),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ValidationError(_) | Error::UnsupportedVersion(_) => ErrorKind::Validation,
            Error::MissingCollaborator(_) | Error::MissingObjectKey(_) => {
                ErrorKind::ProtocolInvariant
            }
            Error::KubeError(kube::Error::Api(api_err))
                if (400..500).contains(&api_err.code)
                    && api_err.code != 404
                    && api_err.code != 409
                    && api_err.code != 429 =>
            {
                ErrorKind::Validation
            }
            _ => ErrorKind::TransientInfra,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Stale writes are retried with fresh state
            Error::ConflictError(_) => true,
            Error::SerializationError(_) => false,
            _ => self.kind() == ErrorKind::TransientInfra,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for a spec change or manual intervention
            self.max_delay
        }
    }
}
