//! Structured logging setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured log level applies to
/// the whole process. Safe to call more than once (later calls are no-ops),
/// which keeps tests that share a process from panicking.
pub fn init(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("echo_app={}", config.log_level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
