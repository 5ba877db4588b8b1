//! Tracing subscriber setup shared by both binaries.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directive used when `RUST_LOG` is unset.
///
/// `-q` wins over `-v`; one `-v` means debug, two or more mean trace.
#[must_use]
pub fn default_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Installs the global subscriber.
///
/// Events go to stderr and, when `log_dir` is set, to a daily-rotated
/// `<file_prefix>.<date>` file in that directory. The returned guard must
/// be held until exit so buffered file lines are flushed.
///
/// # Errors
///
/// Returns [`InitError`] if the log directory or file cannot be created.
pub fn init_tracing(
    verbose: u8,
    quiet: bool,
    log_dir: Option<&Path>,
    file_prefix: &str,
) -> Result<Option<WorkerGuard>, InitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, quiet)));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(file_prefix)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}
