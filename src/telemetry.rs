//! Structured logging setup.
//!
//! Emits `tracing` spans/events at the seams the executor and optimizer
//! instrument; deliberately does not render or colorize output beyond what
//! `tracing-subscriber`'s default formatter provides.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a global `tracing` subscriber reading `RUST_LOG` (defaulting to
/// `info`). Call once, from `main`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
