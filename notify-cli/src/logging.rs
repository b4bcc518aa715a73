//! Console and optional rolling-file logging with local timestamps.

use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::CliError;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "campus_notify=info,campus_notify_cli=info";

const VERBOSE_LOG_FILTER: &str = "campus_notify=debug,campus_notify_cli=debug";

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber.
///
/// With `log_dir`, logs are also written to a daily-rolling file; keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, CliError> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .with_timer(LocalTimer);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                CliError::Logging(format!("creating log directory {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, "campus-notify.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Logging(format!("failed to set global subscriber: {e}")))?;

    Ok(guard)
}
