//! Circuit breaker for fail-fast gating with recovery probing
//!
//! # States
//! - Closed: all calls admitted, consecutive failures counted
//! - Open: every admission rejected until the recovery timeout elapses
//! - Half-Open: a bounded number of concurrent probes test recovery
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      consecutive_failures reaches failure_threshold
//! Open      → Half-Open: first admission check after recovery_timeout
//! Half-Open → Closed:    half_open_successes reaches success_threshold
//! Half-Open → Open:      any failure
//! ```
//!
//! The Open → Half-Open move is lazy: it happens inside
//! [`CircuitBreaker::check_admission`], never on a timer. All state lives in
//! one [`Phase`] value behind a single mutex, so every transition is a
//! compare-and-transition step serialized against concurrent callers.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited probes to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time spent open before the next admission check probes recovery
    #[cfg_attr(feature = "config", serde(with = "crate::serde::duration_millis"))]
    pub recovery_timeout: Duration,
    /// Maximum concurrent probes while half-open
    pub half_open_max_calls: u32,
    /// Probe successes needed to close; `None` means `half_open_max_calls`
    #[cfg_attr(feature = "config", serde(skip_serializing_if = "Option::is_none"))]
    pub success_threshold: Option<u32>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
            success_threshold: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Successes required in half-open state before closing
    pub fn effective_success_threshold(&self) -> u32 {
        self.success_threshold.unwrap_or(self.half_open_max_calls)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }

        if self.success_threshold == Some(0) {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Time spent open before probing
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Concurrent probes allowed while half-open
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Probe successes needed to close
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = Some(threshold);
        self
    }

    /// Validate and finish
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed; report its outcome with the ticket
    Admitted(BreakerTicket),
    /// The call must not run
    Rejected {
        /// Time until the breaker will probe again, when it is known
        retry_after: Option<Duration>,
    },
}

impl Admission {
    /// Whether the call may run
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

/// Proof of admission handed to the outcome recorders.
///
/// A ticket issued in half-open state owns one probe slot of that half-open
/// phase. Recording through it frees the slot; tickets from an earlier phase
/// never free slots of a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTicket {
    probe_epoch: Option<u64>,
}

impl BreakerTicket {
    /// Whether this call was admitted as a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe_epoch.is_some()
    }
}

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    /// State at snapshot time
    pub state: CircuitState,
    /// Failures counted while closed
    pub consecutive_failures: u32,
    /// Probe successes in the current half-open phase
    pub half_open_successes: u32,
    /// Probes currently running
    pub half_open_inflight: u32,
    /// Last transition into open, while open
    pub opened_at: Option<Instant>,
    /// Admissions granted since creation
    pub total_admitted: u64,
    /// Admissions refused since creation
    pub total_rejected: u64,
    /// Transitions into open since creation
    pub times_opened: u64,
    /// Instant of the last state change
    pub last_transition: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32, inflight: u32 },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    phase: Phase,
    /// Bumped on every entry into half-open
    probe_epoch: u64,
    total_admitted: u64,
    total_rejected: u64,
    times_opened: u64,
    last_transition: Instant,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Closed { consecutive_failures: 0 },
            probe_epoch: 0,
            total_admitted: 0,
            total_rejected: 0,
            times_opened: 0,
            last_transition: now,
        }
    }

    fn open(&mut self, now: Instant) {
        self.phase = Phase::Open { opened_at: now };
        self.times_opened += 1;
        self.last_transition = now;
    }

    fn close(&mut self, now: Instant) {
        self.phase = Phase::Closed { consecutive_failures: 0 };
        self.last_transition = now;
    }

    fn half_open(&mut self, now: Instant) {
        self.probe_epoch += 1;
        self.phase = Phase::HalfOpen { successes: 0, inflight: 0 };
        self.last_transition = now;
    }

    /// Frees the ticket's probe slot. True when the ticket is a probe of the
    /// current half-open phase.
    fn release_probe(&mut self, ticket: &BreakerTicket) -> bool {
        let Some(epoch) = ticket.probe_epoch else { return false };
        match &mut self.phase {
            Phase::HalfOpen { inflight, .. } if epoch == self.probe_epoch => {
                *inflight = inflight.saturating_sub(1);
                true
            }
            _ => false,
        }
    }
}

/// Three-state circuit breaker.
///
/// Clones share state; one breaker instance guards one dependency.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::from_parts(CircuitBreakerConfig::default(), Arc::new(SystemClock))
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        Self::with_shared_clock(config, Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(
        config: CircuitBreakerConfig,
        clock: Arc<C>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    fn from_parts(config: CircuitBreakerConfig, clock: Arc<C>) -> Self {
        let now = clock.now();
        Self {
            name: Arc::from("default"),
            config,
            state: Arc::new(Mutex::new(BreakerState::new(now))),
            clock,
        }
    }

    /// Attach the protected dependency's name, used in log fields
    #[must_use]
    pub fn named(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration this breaker enforces
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may run.
    ///
    /// Never blocks. When open for at least `recovery_timeout`, this call
    /// moves the breaker to half-open and is evaluated as its first probe.
    pub fn check_admission(&self) -> Admission {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Phase::Open { opened_at } = state.phase {
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed < self.config.recovery_timeout {
                state.total_rejected += 1;
                debug!(breaker = %self.name, "Circuit breaker rejecting call - state: OPEN");
                return Admission::Rejected {
                    retry_after: Some(self.config.recovery_timeout - elapsed),
                };
            }
            state.half_open(now);
            info!(breaker = %self.name, "Circuit breaker half-open, probing recovery");
        }

        match &mut state.phase {
            Phase::Closed { .. } => {
                state.total_admitted += 1;
                Admission::Admitted(BreakerTicket { probe_epoch: None })
            }
            Phase::HalfOpen { inflight, .. } if *inflight < self.config.half_open_max_calls => {
                *inflight += 1;
                state.total_admitted += 1;
                Admission::Admitted(BreakerTicket { probe_epoch: Some(state.probe_epoch) })
            }
            Phase::HalfOpen { .. } | Phase::Open { .. } => {
                state.total_rejected += 1;
                debug!(breaker = %self.name, "Circuit breaker rejecting call - probes exhausted");
                Admission::Rejected { retry_after: None }
            }
        }
    }

    /// Record a successful attempt; returns the state after recording
    pub fn record_success(&self, ticket: &BreakerTicket) -> CircuitState {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let current_probe = state.release_probe(ticket);

        match &mut state.phase {
            Phase::Closed { consecutive_failures } => {
                *consecutive_failures = 0;
            }
            Phase::HalfOpen { .. } if !current_probe => {
                debug!(breaker = %self.name, "Ignoring success of a call not admitted as a probe");
            }
            Phase::HalfOpen { successes, .. } => {
                *successes += 1;
                let successes = *successes;
                if successes >= self.config.effective_success_threshold() {
                    state.close(now);
                    info!(
                        breaker = %self.name,
                        successes,
                        "Circuit breaker closed after recovery"
                    );
                }
            }
            Phase::Open { .. } => {
                debug!(breaker = %self.name, "Ignoring success recorded while open");
            }
        }

        state.phase.state()
    }

    /// Record a failed attempt; returns the state after recording
    pub fn record_failure(&self, ticket: &BreakerTicket) -> CircuitState {
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release_probe(ticket);

        match &mut state.phase {
            Phase::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                let failures = *consecutive_failures;
                if failures >= self.config.failure_threshold {
                    state.open(now);
                    warn!(breaker = %self.name, failures, "Circuit breaker opened");
                }
            }
            Phase::HalfOpen { successes, .. } => {
                let discarded = *successes;
                state.open(now);
                warn!(
                    breaker = %self.name,
                    discarded_successes = discarded,
                    "Circuit breaker re-opened from half-open"
                );
            }
            Phase::Open { .. } => {
                // Already open; opened_at is left untouched.
            }
        }

        state.phase.state()
    }

    /// Current state. Does not perform the lazy Open → Half-Open move.
    pub fn state(&self) -> CircuitState {
        self.state.lock().phase.state()
    }

    /// Instant of the last transition into Open, while open
    pub fn opened_at(&self) -> Option<Instant> {
        match self.state.lock().phase {
            Phase::Open { opened_at } => Some(opened_at),
            _ => None,
        }
    }

    /// Remaining time before an open breaker will admit a probe
    pub fn retry_after(&self) -> Option<Duration> {
        let opened_at = self.opened_at()?;
        let elapsed = self.clock.elapsed_since(opened_at);
        Some(self.config.recovery_timeout.saturating_sub(elapsed))
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.lock();
        let (consecutive_failures, half_open_successes, half_open_inflight, opened_at) =
            match state.phase {
                Phase::Closed { consecutive_failures } => (consecutive_failures, 0, 0, None),
                Phase::Open { opened_at } => (0, 0, 0, Some(opened_at)),
                Phase::HalfOpen { successes, inflight } => (0, successes, inflight, None),
            };

        CircuitBreakerMetrics {
            state: state.phase.state(),
            consecutive_failures,
            half_open_successes,
            half_open_inflight,
            opened_at,
            total_admitted: state.total_admitted,
            total_rejected: state.total_rejected,
            times_opened: state.times_opened,
            last_transition: state.last_transition,
        }
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let now = self.clock.now();
        self.state.lock().close(now);
        info!(breaker = %self.name, "Circuit breaker manually reset to closed state");
    }
}
