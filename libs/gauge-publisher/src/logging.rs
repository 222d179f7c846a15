//! Daemon logging facade
//!
//! Console output for foreground runs, a daily-rolling file appender for
//! service deployments. `RUST_LOG` overrides the configured level.

use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global subscriber for a daemon.
///
/// The guard must be held for the process lifetime when file logging is
/// active, otherwise buffered lines are lost on exit.
pub fn init_logger(
    log_dir: impl AsRef<Path>,
    service_name: &str,
    level: &str,
    console: bool,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if console {
        fmt().with_env_filter(env_filter).init();
        return Ok(None);
    }

    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, format!("{}.log", service_name));
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(Some(guard))
}
