//! Logging and tracing configuration
//!
//! The subscriber is installed once by `main`. Components never reach for a
//! global logger of their own; they are handed a parent span and emit events
//! through it.

use std::fs::File;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Target used for free-text lines printed by suite processes
pub const OUTPUT_TARGET: &str = "certsuite::output";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("certsuite=info,warn"))
}

/// Initialize tracing for commands that do not run suites (stderr only)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a test run (stderr + harness log file)
///
/// The file receives full detail at debug level so the archived harness log
/// is useful even when the console was filtered down.
pub fn init_run(log_file: File) {
    let file_layer = fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(EnvFilter::new("certsuite=debug,info"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .compact()
        .with_filter(default_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();
}
