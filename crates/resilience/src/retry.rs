//! Bounded re-execution with exponential backoff
//!
//! The [`RetryController`] runs an operation up to `max_attempts` times.
//! Each attempt is optionally bounded by a [`TimeoutGuard`] and reported to
//! the circuit breaker the call was admitted through, so the breaker sees
//! every attempt rather than only the final outcome. Every attempt after
//! the first passes breaker admission again, so a breaker opened during a
//! backoff stops the call.
//!
//! Delays follow `min(base_delay × 2^(attempt−1), max_delay)`, optionally
//! randomized by a [`Jitter`] mode.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::circuit_breaker::{Admission, BreakerTicket, CircuitBreaker, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::error::{
    AttemptFailure, AttemptOutcome, ConfigError, ConfigResult, ResilienceError, ResilienceResult,
};
use crate::timeout::{TimedOut, TimeoutGuard};

/// Trait for determining whether an operation error should be retried
pub trait RetryPolicy<E> {
    /// Decide for the failure of attempt number `attempt` (starting at 1)
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the configured backoff
    Retry,
    /// Retry after a custom delay
    RetryAfter(Duration),
    /// Don't retry; surface the error as is
    Stop,
}

/// Randomization applied to backoff delays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Jitter {
    /// Exact computed delay
    #[default]
    None,
    /// Uniform in `0..=delay`
    Full,
    /// Uniform in `delay/2..=delay`
    Equal,
}

impl Jitter {
    /// Apply jitter to a computed delay
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => random_between(Duration::ZERO, delay),
            Jitter::Equal => random_between(delay / 2, delay),
        }
    }
}

fn random_between(low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    let low = u64::try_from(low.as_nanos()).unwrap_or(u64::MAX);
    let high = u64::try_from(high.as_nanos()).unwrap_or(u64::MAX);
    Duration::from_nanos(rand::thread_rng().gen_range(low..=high))
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retrying
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    #[cfg_attr(feature = "config", serde(with = "crate::serde::duration_millis"))]
    pub base_delay: Duration,
    /// Upper bound on any single delay
    #[cfg_attr(feature = "config", serde(with = "crate::serde::duration_millis"))]
    pub max_delay: Duration,
    /// Randomization applied to each delay
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: Jitter::None,
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Plain execution: one attempt, no retry
    pub fn single_attempt() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid("base_delay must not exceed max_delay"));
        }
        Ok(())
    }

    /// Un-jittered delay after failed attempt number `attempt` (from 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay after failed attempt number `attempt`, with jitter applied
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.jitter.apply(self.delay_for(attempt))
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Start from the default configuration
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    /// Total attempts, including the first
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Delay before the second attempt
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Cap on any single delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Randomization mode
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Use exact delays
    pub fn no_jitter(self) -> Self {
        self.jitter(Jitter::None)
    }

    /// Randomize each delay over `[0, delay]`
    pub fn full_jitter(self) -> Self {
        self.jitter(Jitter::Full)
    }

    /// Randomize each delay over `[delay / 2, delay]`
    pub fn equal_jitter(self) -> Self {
        self.jitter(Jitter::Equal)
    }

    /// Validate and finish
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A breaker admission to report attempts through.
pub struct BreakerGate<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    ticket: BreakerTicket,
}

impl<'a, C: Clock> BreakerGate<'a, C> {
    /// Pair a breaker with the ticket its admission returned
    pub fn new(breaker: &'a CircuitBreaker<C>, ticket: BreakerTicket) -> Self {
        Self { breaker, ticket }
    }

    /// Ask the breaker again before a later attempt of the same call.
    ///
    /// Admission yields a gate holding the fresh ticket; rejection yields
    /// its `retry_after`.
    fn readmit(self) -> Result<Self, Option<Duration>> {
        match self.breaker.check_admission() {
            Admission::Admitted(ticket) => Ok(Self { ticket, ..self }),
            Admission::Rejected { retry_after } => Err(retry_after),
        }
    }
}

impl<C: Clock> Clone for BreakerGate<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: Clock> Copy for BreakerGate<'_, C> {}

impl<C: Clock> fmt::Debug for BreakerGate<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerGate")
            .field("breaker", &self.breaker.name())
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// Reports one attempt's outcome to the breaker exactly once. An attempt
/// dropped before it settles (the caller was cancelled) counts as a failure.
struct AttemptGuard<'a, C: Clock> {
    gate: Option<BreakerGate<'a, C>>,
    armed: bool,
}

impl<'a, C: Clock> AttemptGuard<'a, C> {
    fn arm(gate: Option<BreakerGate<'a, C>>) -> Self {
        Self { gate, armed: true }
    }

    fn succeeded(mut self) {
        self.armed = false;
        if let Some(gate) = self.gate {
            gate.breaker.record_success(&gate.ticket);
        }
    }

    fn failed(mut self) -> Option<CircuitState> {
        self.armed = false;
        self.gate.map(|gate| gate.breaker.record_failure(&gate.ticket))
    }
}

impl<C: Clock> Drop for AttemptGuard<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(gate) = self.gate {
            let state = gate.breaker.record_failure(&gate.ticket);
            debug!(
                breaker = %gate.breaker.name(),
                state = %state,
                "Attempt abandoned in flight, recorded as failure"
            );
        }
    }
}

async fn run_attempt<T, E, F, Fut>(
    operation: &mut F,
    timeout: Option<TimeoutGuard>,
) -> AttemptOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match timeout {
        Some(guard) => match guard.run(operation()).await {
            Ok(result) => result.map_err(AttemptFailure::Operation),
            Err(TimedOut { timeout }) => Err(AttemptFailure::TimedOut { timeout }),
        },
        None => operation().await.map_err(AttemptFailure::Operation),
    }
}

/// Drives the attempt loop of one call
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryController {
    /// Create a controller after validating `config`
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// A controller that never retries
    pub fn single_attempt() -> Self {
        Self { config: RetryConfig::single_attempt() }
    }

    /// Retry settings in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` without a timeout or breaker
    pub async fn retry<T, E, F, Fut, P>(&self, policy: &P, operation: F) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryPolicy<E> + ?Sized,
    {
        self.run(operation, None, None::<BreakerGate<'_, SystemClock>>, policy).await
    }

    /// Run the attempt loop.
    ///
    /// After each failed attempt, in order:
    /// 1. the attempt budget is checked; exhaustion surfaces
    ///    [`ResilienceError::MaxRetriesExceeded`] (or the bare failure when
    ///    `max_attempts` is 1),
    /// 2. a breaker left open by the recorded failure surfaces
    ///    [`ResilienceError::CircuitOpen`],
    /// 3. `policy` may stop the loop with the bare operation error.
    ///
    /// Timeouts skip the policy and are always retried. Once the backoff
    /// has elapsed, the next attempt must pass breaker admission again; a
    /// rejection surfaces [`ResilienceError::CircuitOpen`] without running
    /// the operation.
    pub async fn run<T, E, F, Fut, P, C>(
        &self,
        mut operation: F,
        timeout: Option<TimeoutGuard>,
        mut gate: Option<BreakerGate<'_, C>>,
        policy: &P,
    ) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryPolicy<E> + ?Sized,
        C: Clock,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "Executing attempt");

            let guard = AttemptGuard::arm(gate);
            let failure = match run_attempt(&mut operation, timeout).await {
                Ok(value) => {
                    guard.succeeded();
                    if attempt > 1 {
                        debug!(attempts = attempt, "Operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            let breaker_state = guard.failed();

            if attempt >= max_attempts {
                if max_attempts == 1 {
                    return Err(failure.into());
                }
                warn!(attempts = attempt, error = %failure, "All retry attempts exhausted");
                return Err(ResilienceError::MaxRetriesExceeded {
                    attempts: attempt,
                    last_cause: failure,
                });
            }

            if breaker_state == Some(CircuitState::Open) {
                let retry_after = gate.and_then(|gate| gate.breaker.retry_after());
                warn!(attempt, "Circuit breaker opened, abandoning remaining attempts");
                return Err(ResilienceError::CircuitOpen { retry_after });
            }

            let decision = match &failure {
                AttemptFailure::Operation(error) => policy.should_retry(error, attempt),
                AttemptFailure::TimedOut { .. } => RetryDecision::Retry,
            };
            let delay = match decision {
                RetryDecision::Retry => self.config.backoff(attempt),
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::Stop => {
                    debug!(attempt, error = %failure, "Retry policy declined to retry");
                    return Err(failure.into());
                }
            };

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;

            if let Some(current) = gate {
                match current.readmit() {
                    Ok(next) => gate = Some(next),
                    Err(retry_after) => {
                        warn!(attempt, "Circuit breaker rejected retry, abandoning attempts");
                        return Err(ResilienceError::CircuitOpen { retry_after });
                    }
                }
            }
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use super::{RetryDecision, RetryPolicy};

    /// Retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries operation errors; timeouts are still retried
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries while the predicate holds
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        /// Retry while `predicate(error, attempt)` holds
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
