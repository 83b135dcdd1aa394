use crate::config::AppConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber for binaries and tests that embed
/// this crate. `RUST_LOG` overrides the configured level. Calling it twice
/// is harmless; the second call is ignored.
pub fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
