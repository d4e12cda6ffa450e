//! Tracing setup.
//!
//! The crate itself only emits `tracing` events. Binaries and test harnesses that
//! want to see them call [`init`] once with the configured [`LogConfig`].

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LogConfig;

/// Installs a global `fmt` subscriber. `RUST_LOG` wins over the configured filter.
///
/// Returns `false` when logging is disabled or a global subscriber is already set.
pub fn init(config: &LogConfig) -> bool {
    if !config.enabled {
        return false;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}
