//! Logging setup for the injected DLL.
//!
//! The host process may already have installed a global subscriber, so
//! initialization is best-effort.

use tracing_subscriber::EnvFilter;
use wcsc_lib::consts::ENV_LOG;

const DEFAULT_FILTER: &str = "warn";

/// Filter from `WCSC_LOG`, falling back to warnings only.
pub fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a stderr subscriber. Returns false if one was already set.
pub fn init() -> bool {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr)
    .with_target(false)
    .without_time()
    .try_init()
    .is_ok()
}
