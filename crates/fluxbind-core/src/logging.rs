#![forbid(unsafe_code)]

//! Production log output.
//!
//! The engine emits `tracing` events; this module installs a JSON subscriber
//! filtered by `RUST_LOG` for hosts that want structured logs without wiring
//! their own subscriber.

use tracing_subscriber::EnvFilter;

/// Install a global JSON subscriber. Fails if one is already installed.
pub fn init_json_logging() -> Result<(), String> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| e.to_string())
}
