//! Logging setup for programs embedding the supervisor.
//!
//! The library only emits `tracing` events; it never installs a subscriber
//! on its own.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    let _ = try_init("info");
}

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` when the variable is unset or invalid.
pub fn try_init(default_directive: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::ConfigError(format!("logging already initialised: {}", e)))
}
