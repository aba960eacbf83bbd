//! Logging setup for hosts embedding the memory engine

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_DIRECTIVE: &str = "info,strata=debug";

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. Returns false if a subscriber was already set.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Subscriber for tests: captured output, ignores repeat installs
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("strata=debug"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
