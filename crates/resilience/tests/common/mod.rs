//! Shared helpers for integration tests

use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,rampart_resilience=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).with_test_writer().try_init();
}
