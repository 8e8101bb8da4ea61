//! Shared `tracing` setup for the workspace binaries.
//!
//! Libraries only emit events through the `tracing` macros; a binary calls
//! [`init`] once at startup to get them printed to stderr.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling it more than once is harmless: later calls keep the first subscriber.
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Same as [`init`] but with a caller-chosen fallback filter directive.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
