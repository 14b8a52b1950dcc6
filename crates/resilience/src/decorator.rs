//! Resiliency decorator
//!
//! Runs one call through a fixed pipeline:
//!
//! ```text
//! bulkhead.acquire ─► breaker.check_admission ─► retry loop ─► permit drop
//!                                                 └─ timeout + breaker record per attempt,
//!                                                    re-admission before each retry
//! ```
//!
//! A bulkhead rejection never reaches the breaker, and a breaker rejection
//! never runs the operation. The bulkhead permit lives on the call's stack
//! and is released on every exit path, including when the caller drops the
//! call's future.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::bulkhead::{Bulkhead, BulkheadMetrics};
use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerMetrics};
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigResult, ResilienceError, ResilienceResult};
use crate::policy::ResiliencyPolicy;
use crate::retry::policies::AlwaysRetry;
use crate::retry::{BreakerGate, RetryController, RetryPolicy};
use crate::timeout::TimeoutGuard;

/// Snapshot of a decorator's shared state
#[derive(Debug, Clone)]
pub struct DecoratorMetrics {
    /// Breaker snapshot, when a breaker is configured
    pub breaker: Option<CircuitBreakerMetrics>,
    /// Bulkhead snapshot, when a bulkhead is configured
    pub bulkhead: Option<BulkheadMetrics>,
}

/// Protects calls to one dependency according to a [`ResiliencyPolicy`].
///
/// Clones share the breaker and bulkhead, so a decorator can be cloned into
/// every task calling the same dependency.
pub struct ResiliencyDecorator<C: Clock = SystemClock> {
    name: Arc<str>,
    policy: ResiliencyPolicy,
    bulkhead: Option<Bulkhead>,
    breaker: Option<CircuitBreaker<C>>,
    timeout: Option<TimeoutGuard>,
    retry: RetryController,
}

impl<C: Clock> Clone for ResiliencyDecorator<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            policy: self.policy.clone(),
            bulkhead: self.bulkhead.clone(),
            breaker: self.breaker.clone(),
            timeout: self.timeout,
            retry: self.retry.clone(),
        }
    }
}

impl<C: Clock> fmt::Debug for ResiliencyDecorator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencyDecorator")
            .field("name", &self.name)
            .field("bulkhead", &self.bulkhead)
            .field("breaker", &self.breaker)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ResiliencyDecorator<SystemClock> {
    /// Build the mechanisms `policy` configures for the dependency `name`
    pub fn new(name: impl Into<Arc<str>>, policy: &ResiliencyPolicy) -> ConfigResult<Self> {
        Self::with_clock(name, policy, SystemClock)
    }
}

impl<C: Clock> ResiliencyDecorator<C> {
    /// Like [`ResiliencyDecorator::new`], with the breaker reading `clock`
    pub fn with_clock(
        name: impl Into<Arc<str>>,
        policy: &ResiliencyPolicy,
        clock: C,
    ) -> ConfigResult<Self> {
        policy.validate()?;
        let name = name.into();

        let bulkhead = policy
            .bulkhead
            .clone()
            .map(|config| Bulkhead::new(config).map(|b| b.named(Arc::clone(&name))))
            .transpose()?;

        let clock = Arc::new(clock);
        let breaker = policy
            .circuit_breaker
            .clone()
            .map(|config| {
                CircuitBreaker::with_shared_clock(config, Arc::clone(&clock))
                    .map(|b| b.named(Arc::clone(&name)))
            })
            .transpose()?;

        let timeout = policy.timeout.map(TimeoutGuard::new).transpose()?;

        let retry = match &policy.retry {
            Some(config) => RetryController::new(config.clone())?,
            None => RetryController::single_attempt(),
        };

        Ok(Self { name, policy: policy.clone(), bulkhead, breaker, timeout, retry })
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Policy the decorator was built from
    pub fn policy(&self) -> &ResiliencyPolicy {
        &self.policy
    }

    /// The shared breaker, if configured
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker<C>> {
        self.breaker.as_ref()
    }

    /// The shared bulkhead, if configured
    pub fn bulkhead(&self) -> Option<&Bulkhead> {
        self.bulkhead.as_ref()
    }

    /// Per-attempt timeout, if configured
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(|guard| guard.timeout())
    }

    /// Current breaker and bulkhead snapshots
    pub fn metrics(&self) -> DecoratorMetrics {
        DecoratorMetrics {
            breaker: self.breaker.as_ref().map(CircuitBreaker::metrics),
            bulkhead: self.bulkhead.as_ref().map(Bulkhead::metrics),
        }
    }

    /// Run `operation` under the policy, retrying on any attempt failure
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(&AlwaysRetry, operation).await
    }

    /// Run `operation` under the policy, letting `retry_policy` classify
    /// operation errors
    #[instrument(skip_all, fields(name = %self.name))]
    pub async fn execute_with<T, E, F, Fut, P>(
        &self,
        retry_policy: &P,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryPolicy<E> + ?Sized,
    {
        let _permit = match &self.bulkhead {
            Some(bulkhead) => Some(bulkhead.acquire().await?),
            None => None,
        };

        let gate = match &self.breaker {
            Some(breaker) => match breaker.check_admission() {
                Admission::Admitted(ticket) => Some(BreakerGate::new(breaker, ticket)),
                Admission::Rejected { retry_after } => {
                    return Err(ResilienceError::CircuitOpen { retry_after });
                }
            },
            None => None,
        };

        self.retry.run(operation, self.timeout, gate, retry_policy).await
    }
}
