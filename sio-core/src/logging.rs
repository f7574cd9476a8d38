//! Structured logging setup using the `tracing` ecosystem.
//!
//! Library crates only ever emit `tracing` events; only a binary entry
//! point (see `sio-cli`) calls [`init_logging`] to install a subscriber.

use std::path::Path;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::SioResult;

/// Initialize the global tracing subscriber.
///
/// Sets up a compact console layer filtered by `level`, plus (when
/// `log_dir` is given) a non-blocking daily-rotated file layer.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> SioResult<Option<LogGuard>> {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)?;
        let file_appender = tracing_appender::rolling::daily(dir, "socketio-client.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(level, dir = %dir.display(), "logging initialized");
        Ok(Some(LogGuard { _guard: guard }))
    } else {
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        tracing::info!(level, "logging initialized (console only)");
        Ok(None)
    }
}

/// Guard that keeps the non-blocking file writer alive; drop to flush.
pub struct LogGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}
