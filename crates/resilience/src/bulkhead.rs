//! Bulkhead pattern for limiting concurrent calls
//!
//! The bulkhead caps in-flight calls against one dependency. A caller that
//! finds every slot taken waits, in arrival order, for at most
//! `max_wait_duration` before being turned away.
//!
//! Slots are permits of a fair [`tokio::sync::Semaphore`]. Releasing a permit
//! while callers are queued hands the slot straight to the head of the queue,
//! so a newly arriving caller can never take it first. Dropping a pending
//! acquisition removes it from the queue without consuming a slot.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, instrument};

use crate::error::{ConfigError, ConfigResult, ResilienceError};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct BulkheadConfig {
    /// Maximum number of concurrent calls
    pub max_concurrent_calls: usize,
    /// How long a caller may wait for a slot; zero fails immediately
    #[cfg_attr(feature = "config", serde(with = "crate::serde::duration_millis"))]
    pub max_wait_duration: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent_calls: 10, max_wait_duration: Duration::ZERO }
    }
}

impl BulkheadConfig {
    /// Create a new configuration builder
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid("max_concurrent_calls must be greater than 0"));
        }
        if self.max_concurrent_calls > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(format!(
                "max_concurrent_calls must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(())
    }
}

/// Builder for BulkheadConfig
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    /// Maximum calls admitted at once
    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.config.max_concurrent_calls = max;
        self
    }

    /// Longest a caller queues for a slot
    pub fn max_wait_duration(mut self, wait: Duration) -> Self {
        self.config.max_wait_duration = wait;
        self
    }

    /// Reject immediately when no slot is free
    pub fn no_wait(mut self) -> Self {
        self.config.max_wait_duration = Duration::ZERO;
        self
    }

    /// Validate and finish
    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// No slot became free within the allowed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Bulkhead full: no slot of {max_concurrent_calls} freed within {max_wait:?}")]
pub struct BulkheadFull {
    /// Configured concurrency cap
    pub max_concurrent_calls: usize,
    /// Configured maximum wait
    pub max_wait: Duration,
}

impl<E> From<BulkheadFull> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(full: BulkheadFull) -> Self {
        ResilienceError::BulkheadFull {
            max_concurrent_calls: full.max_concurrent_calls,
            max_wait: full.max_wait,
        }
    }
}

/// A held bulkhead slot. The slot is released when the permit drops.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    /// Calls granted a slot
    pub total_admitted: u64,
    /// Calls granted a slot only after queueing
    pub admitted_after_wait: u64,
    /// Calls turned away
    pub rejected: u64,
    /// Calls currently holding a slot
    pub in_flight: usize,
    /// Calls currently queued for a slot
    pub waiting: usize,
    /// Configured slot count
    pub max_concurrent_calls: usize,
}

impl BulkheadMetrics {
    /// Current utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.in_flight as f64 / self.max_concurrent_calls as f64
    }

    /// Fraction of calls rejected (0.0 to 1.0)
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_admitted + self.rejected;
        if total == 0 {
            return 0.0;
        }
        self.rejected as f64 / total as f64
    }

    /// Every slot is taken
    pub fn is_at_capacity(&self) -> bool {
        self.in_flight >= self.max_concurrent_calls
    }

    /// Human-readable status line
    pub fn status_message(&self) -> String {
        format!(
            "Bulkhead: {}/{} in flight ({:.1}% utilized), {} waiting, {} rejected",
            self.in_flight,
            self.max_concurrent_calls,
            self.utilization() * 100.0,
            self.waiting,
            self.rejected
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    admitted_after_wait: AtomicU64,
    rejected: AtomicU64,
    waiting: AtomicUsize,
}

/// Decrements the waiting gauge however the wait ends, including when the
/// waiting future is dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(gauge)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Concurrency-capping admission gate.
///
/// Clones share slots and counters.
#[derive(Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("max_concurrent_calls", &self.config.max_concurrent_calls)
            .field("in_flight", &self.in_flight())
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl Bulkhead {
    /// Create a bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            name: Arc::from("default"),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_calls)),
            counters: Arc::new(Counters::default()),
            config,
        })
    }

    /// Attach the protected dependency's name, used in log fields
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Configuration this bulkhead enforces
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    fn full(&self) -> BulkheadFull {
        BulkheadFull {
            max_concurrent_calls: self.config.max_concurrent_calls,
            max_wait: self.config.max_wait_duration,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        BulkheadPermit { _permit: permit }
    }

    fn reject(&self) -> BulkheadFull {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        self.full()
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        Arc::clone(&self.semaphore).try_acquire_owned().ok().map(|permit| self.admit(permit))
    }

    /// Take a slot, waiting in arrival order up to `max_wait_duration`.
    ///
    /// A caller that gives up, or whose future is dropped, never holds a
    /// slot.
    #[instrument(skip(self), fields(bulkhead = %self.name))]
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit)),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => return Err(self.reject()),
        }

        let max_wait = self.config.max_wait_duration;
        if max_wait.is_zero() {
            debug!("Bulkhead full, rejecting without wait");
            return Err(self.reject());
        }

        let _waiting = Waiting::enter(&self.counters.waiting);
        debug!(max_wait_ms = max_wait.as_millis() as u64, "Bulkhead full, queueing");

        match tokio::time::timeout(max_wait, Arc::clone(&self.semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => {
                self.counters.admitted_after_wait.fetch_add(1, Ordering::Relaxed);
                Ok(self.admit(permit))
            }
            Ok(Err(_closed)) => Err(self.reject()),
            Err(_elapsed) => {
                debug!("Bulkhead wait expired");
                Err(self.reject())
            }
        }
    }

    /// Calls currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent_calls.saturating_sub(self.semaphore.available_permits())
    }

    /// Calls currently queued for a slot
    pub fn waiting(&self) -> usize {
        self.counters.waiting.load(Ordering::Acquire)
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_admitted: self.counters.admitted.load(Ordering::Acquire),
            admitted_after_wait: self.counters.admitted_after_wait.load(Ordering::Acquire),
            rejected: self.counters.rejected.load(Ordering::Acquire),
            in_flight: self.in_flight(),
            waiting: self.waiting(),
            max_concurrent_calls: self.config.max_concurrent_calls,
        }
    }
}
