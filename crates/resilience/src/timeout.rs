//! Per-attempt deadline enforcement
//!
//! When the deadline expires, the attempt's future is dropped. That cancels
//! it at its next suspension point; a future that never yields can overrun
//! its deadline, but its result is discarded either way.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// The wrapped future did not finish in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {timeout:?} elapsed")]
pub struct TimedOut {
    /// The deadline that elapsed
    pub timeout: Duration,
}

/// Run `future` with a deadline of `timeout`.
pub async fn with_timeout<F, T>(timeout: Duration, future: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await.map_err(|_elapsed| {
        debug!(timeout_ms = timeout.as_millis() as u64, "Attempt deadline elapsed");
        TimedOut { timeout }
    })
}

/// Bounds the wall-clock time of each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    timeout: Duration,
}

impl TimeoutGuard {
    /// Create a guard; the timeout must be non-zero
    pub fn new(timeout: Duration) -> ConfigResult<Self> {
        if timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than 0"));
        }
        Ok(Self { timeout })
    }

    /// The per-attempt deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one attempt under this guard's deadline
    pub async fn run<F, T>(&self, future: F) -> Result<T, TimedOut>
    where
        F: Future<Output = T>,
    {
        with_timeout(self.timeout, future).await
    }
}
