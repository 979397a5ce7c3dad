//! Log output setup.
//!
//! Human-readable logs go to stderr, filtered by `RUST_LOG` (default
//! `info`). When `logging.log_dir` is set, the same events are also written
//! without ANSI colours to a daily-rotated `feedspeak.log` in that
//! directory.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::config::LoggingConfig;
use crate::error::{PipelineError, Result};

/// File name prefix for rotated logs.
pub const LOG_FILE_PREFIX: &str = "feedspeak.log";

/// Filter from `RUST_LOG`, falling back to `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the life of the process. It is `None` when file logging is off.
///
/// # Errors
///
/// [`PipelineError::Config`] if a global subscriber is already installed or
/// the log directory cannot be created.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                PipelineError::Config(format!("cannot create log dir {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PipelineError::Config(format!("cannot install logger: {e}")))?;

    Ok(guard)
}
