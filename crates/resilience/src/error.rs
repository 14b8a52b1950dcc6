//! Error taxonomy for resilient execution
//!
//! Every call through a [`ResiliencyDecorator`](crate::ResiliencyDecorator)
//! ends in a value or exactly one of five failure kinds:
//!
//! | Kind | Variant | Retried by the core |
//! |------|---------|---------------------|
//! | Capacity rejected | [`ResilienceError::BulkheadFull`] | no |
//! | Circuit open | [`ResilienceError::CircuitOpen`] | no |
//! | Attempt timed out | [`ResilienceError::Timeout`] | yes |
//! | Retries exhausted | [`ResilienceError::MaxRetriesExceeded`] | terminal |
//! | Operation failed | [`ResilienceError::OperationFailed`] | yes |
//!
//! The error is generic over the operation's own error type `E` so the
//! original cause is never erased.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a single attempt failed.
///
/// This is the failure half of [`AttemptOutcome`]; it is attached to
/// [`ResilienceError::MaxRetriesExceeded`] as the last cause.
#[derive(Debug, Error)]
pub enum AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The operation itself returned an error
    #[error("operation failed: {0}")]
    Operation(#[source] E),

    /// The attempt did not finish before its deadline
    #[error("attempt timed out after {timeout:?}")]
    TimedOut { timeout: Duration },
}

impl<E> AttemptFailure<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether the failure was a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Borrow the operation's error, if the operation raised one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Outcome of one attempt. Created and consumed inside the retry loop.
pub type AttemptOutcome<T, E> = Result<T, AttemptFailure<E>>;

/// Errors surfaced by resilient execution.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// No bulkhead slot freed up within the configured wait
    #[error(
        "Bulkhead full: no slot of {max_concurrent_calls} freed within {max_wait:?}"
    )]
    BulkheadFull { max_concurrent_calls: usize, max_wait: Duration },

    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen {
        /// Remaining time before the breaker will admit a probe, when known
        retry_after: Option<Duration>,
    },

    /// The attempt timed out
    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Every allowed attempt failed
    #[error("Retries exhausted after {attempts} attempts")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last_cause: AttemptFailure<E>,
    },

    /// The underlying operation failed
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Fieldless discriminant of [`ResilienceError`], for logging and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BulkheadFull,
    CircuitOpen,
    Timeout,
    MaxRetriesExceeded,
    OperationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BulkheadFull => "bulkhead_full",
            Self::CircuitOpen => "circuit_open",
            Self::Timeout => "timeout",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::OperationFailed => "operation_failed",
        };
        f.write_str(label)
    }
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BulkheadFull { .. } => ErrorKind::BulkheadFull,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            Self::OperationFailed { .. } => ErrorKind::OperationFailed,
        }
    }

    /// Whether the call was turned away before the operation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. } | Self::CircuitOpen { .. })
    }

    /// Borrow the operation's own error, directly or as the last cause.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            Self::MaxRetriesExceeded { last_cause, .. } => last_cause.operation_error(),
            _ => None,
        }
    }

    /// Consume the error and return the operation's own error, if any.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source }
            | Self::MaxRetriesExceeded { last_cause: AttemptFailure::Operation(source), .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

impl<E> From<AttemptFailure<E>> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(failure: AttemptFailure<E>) -> Self {
        match failure {
            AttemptFailure::Operation(source) => Self::OperationFailed { source },
            AttemptFailure::TimedOut { timeout } => Self::Timeout { timeout },
        }
    }
}

/// Result type for resilient execution
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Policy construction or parsing error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to parse {format} policy: {message}")]
    Parse { format: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Severity level used for alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// Immediate action required
    Critical,
}

/// Standard classification interface for errors
pub trait ErrorClassification {
    /// Whether a caller may reasonably try the call again later
    fn is_retryable(&self) -> bool;

    /// Severity for monitoring and alerting
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error signals a broken invariant
    fn is_critical(&self) -> bool;

    /// Suggested delay before trying again, if known
    fn retry_after(&self) -> Option<Duration>;
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        // Rejections clear on their own; exhaustion already spent the budget.
        match self {
            Self::BulkheadFull { .. } | Self::CircuitOpen { .. } | Self::Timeout { .. } => true,
            Self::MaxRetriesExceeded { .. } | Self::OperationFailed { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::BulkheadFull { .. } | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. }
            | Self::MaxRetriesExceeded { .. }
            | Self::OperationFailed { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => *retry_after,
            Self::BulkheadFull { max_wait, .. } => Some(*max_wait),
            _ => None,
        }
    }
}
