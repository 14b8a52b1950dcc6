//! Composite resiliency policy
//!
//! A [`ResiliencyPolicy`] names which of the four mechanisms protect a call.
//! Every part is optional; an absent part is a passthrough.
//!
//! With the `config` feature, policies load from TOML or JSON. Durations are
//! integer milliseconds:
//!
//! ```toml
//! timeout = 2000
//!
//! [retry]
//! max_attempts = 3
//! base_delay = 100
//! max_delay = 2000
//! jitter = "equal"
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! recovery_timeout = 30000
//!
//! [bulkhead]
//! max_concurrent_calls = 16
//! max_wait_duration = 50
//! ```

use std::time::Duration;

use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::retry::RetryConfig;

/// Immutable description of how one dependency's calls are protected
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct ResiliencyPolicy {
    /// Retry budget and backoff
    #[cfg_attr(feature = "config", serde(skip_serializing_if = "Option::is_none"))]
    pub retry: Option<RetryConfig>,

    /// Per-attempt deadline
    #[cfg_attr(
        feature = "config",
        serde(
            with = "crate::serde::option_duration_millis",
            skip_serializing_if = "Option::is_none"
        )
    )]
    pub timeout: Option<Duration>,

    /// Failure gating
    #[cfg_attr(feature = "config", serde(skip_serializing_if = "Option::is_none"))]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Concurrency cap
    #[cfg_attr(feature = "config", serde(skip_serializing_if = "Option::is_none"))]
    pub bulkhead: Option<BulkheadConfig>,
}

impl ResiliencyPolicy {
    /// Create a policy builder
    pub fn builder() -> ResiliencyPolicyBuilder {
        ResiliencyPolicyBuilder::new()
    }

    /// A policy with every mechanism absent
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Whether calls under this policy run unprotected
    pub fn is_passthrough(&self) -> bool {
        let single_attempt = self.retry.as_ref().map_or(true, |retry| retry.max_attempts == 1);
        single_attempt
            && self.timeout.is_none()
            && self.circuit_breaker.is_none()
            && self.bulkhead.is_none()
    }

    /// Validate every configured part
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ConfigError::invalid("timeout must be greater than 0"));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(bulkhead) = &self.bulkhead {
            bulkhead.validate()?;
        }
        Ok(())
    }
}

#[cfg(feature = "config")]
impl ResiliencyPolicy {
    /// Parse and validate a TOML policy document
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let policy: Self = toml::from_str(input)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Parse and validate a JSON policy document
    pub fn from_json_str(input: &str) -> ConfigResult<Self> {
        let policy: Self = serde_json::from_str(input)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Render the policy as TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })
    }
}

/// Builder for ResiliencyPolicy
#[derive(Debug, Default)]
pub struct ResiliencyPolicyBuilder {
    policy: ResiliencyPolicy,
}

impl ResiliencyPolicyBuilder {
    /// Start from an empty policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry failed attempts
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.policy.retry = Some(config);
        self
    }

    /// Bound every attempt
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    /// Gate calls on recent failures
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.policy.circuit_breaker = Some(config);
        self
    }

    /// Cap concurrent calls
    pub fn bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.policy.bulkhead = Some(config);
        self
    }

    /// Validate and finish
    pub fn build(self) -> ConfigResult<ResiliencyPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_passthrough() {
        let policy = ResiliencyPolicy::default();
        assert!(policy.is_passthrough());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_single_attempt_retry_is_passthrough() {
        let policy =
            ResiliencyPolicy::builder().retry(RetryConfig::single_attempt()).build().unwrap();
        assert!(policy.is_passthrough());

        let policy = ResiliencyPolicy::builder().retry(RetryConfig::default()).build().unwrap();
        assert!(!policy.is_passthrough());
    }

    #[test]
    fn test_validation_reaches_every_part() {
        let zero_timeout = ResiliencyPolicy::builder().timeout(Duration::ZERO).build();
        assert!(zero_timeout.is_err());

        let bad_bulkhead = ResiliencyPolicy {
            bulkhead: Some(BulkheadConfig { max_concurrent_calls: 0, ..Default::default() }),
            ..Default::default()
        };
        assert!(bad_bulkhead.validate().is_err());

        let bad_retry = ResiliencyPolicy {
            retry: Some(RetryConfig { max_attempts: 0, ..Default::default() }),
            ..Default::default()
        };
        assert!(bad_retry.validate().is_err());
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_parse_partial_toml() {
        let policy = ResiliencyPolicy::from_toml_str(
            r#"
            timeout = 250

            [retry]
            max_attempts = 4
            base_delay = 10
            "#,
        )
        .expect("Should parse");

        assert_eq!(policy.timeout, Some(Duration::from_millis(250)));
        let retry = policy.retry.expect("retry section present");
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(10));
        assert_eq!(retry.max_delay, Duration::from_secs(10), "unset keys take defaults");
        assert!(policy.circuit_breaker.is_none());
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_parse_rejects_unknown_section() {
        let err = ResiliencyPolicy::from_toml_str("[rate_limiter]\nrate = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_parse_runs_validation() {
        let err = ResiliencyPolicy::from_json_str(r#"{"bulkhead":{"max_concurrent_calls":0}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
