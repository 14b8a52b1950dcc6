//! Integration tests for policy loading
//!
//! Policies arrive as TOML or JSON documents with millisecond durations.

use std::time::Duration;

use rampart_resilience::{
    ConfigError, Jitter, PolicyRegistry, ResiliencyDecorator, ResiliencyPolicy,
};

const FULL_POLICY: &str = r#"
timeout = 2000

[retry]
max_attempts = 4
base_delay = 50
max_delay = 800
jitter = "equal"

[circuit_breaker]
failure_threshold = 3
recovery_timeout = 15000
half_open_max_calls = 2
success_threshold = 1

[bulkhead]
max_concurrent_calls = 16
max_wait_duration = 25
"#;

#[test]
fn test_full_toml_policy() {
    let policy = ResiliencyPolicy::from_toml_str(FULL_POLICY).expect("valid policy");

    assert_eq!(policy.timeout, Some(Duration::from_secs(2)));

    let retry = policy.retry.as_ref().unwrap();
    assert_eq!(retry.max_attempts, 4);
    assert_eq!(retry.base_delay, Duration::from_millis(50));
    assert_eq!(retry.max_delay, Duration::from_millis(800));
    assert_eq!(retry.jitter, Jitter::Equal);

    let breaker = policy.circuit_breaker.as_ref().unwrap();
    assert_eq!(breaker.failure_threshold, 3);
    assert_eq!(breaker.recovery_timeout, Duration::from_secs(15));
    assert_eq!(breaker.half_open_max_calls, 2);
    assert_eq!(breaker.effective_success_threshold(), 1);

    let bulkhead = policy.bulkhead.as_ref().unwrap();
    assert_eq!(bulkhead.max_concurrent_calls, 16);
    assert_eq!(bulkhead.max_wait_duration, Duration::from_millis(25));
}

#[test]
fn test_empty_document_is_passthrough() {
    let policy = ResiliencyPolicy::from_toml_str("").unwrap();
    assert!(policy.is_passthrough());
}

#[test]
fn test_empty_sections_take_defaults() {
    let policy = ResiliencyPolicy::from_toml_str("[circuit_breaker]\n[bulkhead]\n").unwrap();

    let breaker = policy.circuit_breaker.unwrap();
    assert_eq!(breaker.failure_threshold, 5);
    assert_eq!(breaker.recovery_timeout, Duration::from_secs(30));
    assert_eq!(breaker.success_threshold, None);

    let bulkhead = policy.bulkhead.unwrap();
    assert_eq!(bulkhead.max_concurrent_calls, 10);
    assert_eq!(bulkhead.max_wait_duration, Duration::ZERO);
}

#[test]
fn test_invalid_values_rejected() {
    let cases = [
        "[retry]\nmax_attempts = 0\n",
        "[retry]\nbase_delay = 500\nmax_delay = 100\n",
        "[circuit_breaker]\nhalf_open_max_calls = 0\n",
        "timeout = 0\n",
    ];
    for case in cases {
        let err = ResiliencyPolicy::from_toml_str(case).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{case:?} gave {err}");
    }
}

#[test]
fn test_malformed_documents_rejected() {
    let err = ResiliencyPolicy::from_toml_str("[retry\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));

    let err = ResiliencyPolicy::from_toml_str("[retry]\njitter = \"sometimes\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));

    let err = ResiliencyPolicy::from_json_str("{\"timeout\": -1}").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { format: "JSON", .. }));
}

#[test]
fn test_json_policy() {
    let json = r#"{
        "retry": { "max_attempts": 2, "jitter": "full" },
        "bulkhead": { "max_concurrent_calls": 1 }
    }"#;
    let policy = ResiliencyPolicy::from_json_str(json).unwrap();

    assert_eq!(policy.retry.unwrap().jitter, Jitter::Full);
    assert_eq!(policy.bulkhead.unwrap().max_concurrent_calls, 1);
    assert_eq!(policy.timeout, None);
}

#[test]
fn test_toml_output_reloads() {
    let policy = ResiliencyPolicy::from_toml_str(FULL_POLICY).unwrap();
    let rendered = policy.to_toml_string().unwrap();

    assert!(rendered.contains("recovery_timeout = 15000"));
    assert_eq!(ResiliencyPolicy::from_toml_str(&rendered).unwrap(), policy);
}

#[test]
fn test_loaded_policy_drives_registry() {
    let policy = ResiliencyPolicy::from_toml_str(FULL_POLICY).unwrap();
    let registry = PolicyRegistry::new();

    let decorator: ResiliencyDecorator = registry.register("warehouse", &policy).unwrap();

    assert_eq!(decorator.timeout(), Some(Duration::from_secs(2)));
    assert_eq!(decorator.bulkhead().unwrap().config().max_concurrent_calls, 16);
    assert_eq!(decorator.circuit_breaker().unwrap().name(), "warehouse");
}
