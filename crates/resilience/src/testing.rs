//! Scripted operations for exercising resilient execution in tests
//!
//! A [`ScriptedOperation`] plays back a fixed sequence of [`Step`]s, one per
//! invocation, and counts how often it was invoked. Once the script runs
//! out, the last step repeats.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error produced by scripted operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl TestError {
    /// A failure worth retrying
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// A failure retries cannot fix
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Whether this failure is transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One scripted invocation
#[derive(Debug, Clone)]
pub enum Step<T> {
    /// Return the value immediately
    Succeed(T),
    /// Fail immediately
    Fail(TestError),
    /// Sleep, then return the value
    SucceedAfter(Duration, T),
    /// Sleep, then fail
    FailAfter(Duration, TestError),
    /// Never complete
    Hang,
}

/// Replays a script of outcomes; clones share the script and call counter.
#[derive(Debug, Clone)]
pub struct ScriptedOperation<T> {
    steps: Arc<[Step<T>]>,
    calls: Arc<AtomicU32>,
}

impl<T> ScriptedOperation<T>
where
    T: Clone + Send + 'static,
{
    /// Script the given steps in order
    pub fn new(steps: impl IntoIterator<Item = Step<T>>) -> Self {
        Self { steps: steps.into_iter().collect(), calls: Arc::new(AtomicU32::new(0)) }
    }

    /// Always succeed with `value`
    pub fn always_ok(value: T) -> Self {
        Self::new([Step::Succeed(value)])
    }

    /// Always fail with a transient error
    pub fn always_fail(message: &str) -> Self {
        Self::new([Step::Fail(TestError::transient(message))])
    }

    /// Fail `failures` times with transient errors, then succeed
    pub fn fail_then_succeed(failures: u32, value: T) -> Self {
        let failing =
            (1..=failures).map(|n| Step::Fail(TestError::transient(format!("attempt {n}"))));
        Self::new(failing.chain([Step::Succeed(value)]))
    }

    /// Never complete
    pub fn hanging() -> Self {
        Self::new([Step::Hang])
    }

    /// Number of invocations so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Start the next scripted invocation
    pub fn call(&self) -> impl Future<Output = Result<T, TestError>> + Send + 'static {
        let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self.steps.get(index).or_else(|| self.steps.last()).cloned();

        async move {
            match step {
                Some(Step::Succeed(value)) => Ok(value),
                Some(Step::Fail(error)) => Err(error),
                Some(Step::SucceedAfter(delay, value)) => {
                    tokio::time::sleep(delay).await;
                    Ok(value)
                }
                Some(Step::FailAfter(delay, error)) => {
                    tokio::time::sleep(delay).await;
                    Err(error)
                }
                Some(Step::Hang) => std::future::pending().await,
                None => Err(TestError::permanent("empty script")),
            }
        }
    }
}
