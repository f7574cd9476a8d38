//! Thin CLI wrapper around [`sio_core::logging::init_logging`]: library
//! crates only ever emit `tracing` events, so this binary is the one
//! place in the workspace that installs a subscriber.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use sio_core::logging::{init_logging, LogGuard};

/// Minimal console-only logger, used when `--no-log-file` is passed.
pub fn init_console_logging(level: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init();
}
