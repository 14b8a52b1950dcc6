//! Composable resiliency policies for calls to unreliable dependencies.
//!
//! A [`ResiliencyDecorator`] wraps an asynchronous operation with up to four
//! independently configured mechanisms:
//! - **Bulkhead**: caps concurrent calls, queueing briefly in FIFO order
//! - **Circuit Breaker**: fails fast while a dependency is known bad and
//!   probes for recovery
//! - **Timeout**: bounds each attempt
//! - **Retry**: re-runs failed attempts with exponential backoff
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rampart_resilience::{
//!     CircuitBreakerConfig, ResiliencyDecorator, ResiliencyPolicy, RetryConfig,
//! };
//!
//! # async fn fetch() -> Result<u32, std::io::Error> { Ok(1) }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = ResiliencyPolicy::builder()
//!     .retry(RetryConfig::builder().max_attempts(3).build()?)
//!     .timeout(Duration::from_secs(2))
//!     .circuit_breaker(CircuitBreakerConfig::default())
//!     .build()?;
//!
//! let decorator = ResiliencyDecorator::new("inventory", &policy)?;
//! let value = decorator.execute(|| fetch()).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `config` (default): serde derives and TOML/JSON policy loading
//! - `test-utils`: scripted operations for downstream tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod decorator;
pub mod error;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod timeout;

#[cfg(feature = "config")]
pub mod serde;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types
// ------------------------------------------------------------------
pub use bulkhead::{
    Bulkhead, BulkheadConfig, BulkheadConfigBuilder, BulkheadFull, BulkheadMetrics, BulkheadPermit,
};
pub use circuit_breaker::{
    Admission, BreakerTicket, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use decorator::{DecoratorMetrics, ResiliencyDecorator};
pub use error::{
    AttemptFailure, AttemptOutcome, ConfigError, ConfigResult, ErrorClassification, ErrorKind,
    ErrorSeverity, ResilienceError, ResilienceResult,
};
pub use policy::{ResiliencyPolicy, ResiliencyPolicyBuilder};
pub use registry::PolicyRegistry;
pub use retry::{
    policies, BreakerGate, Jitter, RetryConfig, RetryConfigBuilder, RetryController,
    RetryDecision, RetryPolicy,
};
pub use timeout::{with_timeout, TimedOut, TimeoutGuard};
