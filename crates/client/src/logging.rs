//! Tracing setup for the binary.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to whoever embeds it.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "portcall_client=debug";

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Calling it twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();
}
