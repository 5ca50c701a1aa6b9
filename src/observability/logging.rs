use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{PipelineError, Result};

/// Initialize logging for daemon modes (coordinator/worker): stdout plus a
/// daily-rotating log file. `RUST_LOG` overrides the configured level.
pub fn init_daemon_logging(level: &str, log_dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&log_dir)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "halopipe.log");

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| PipelineError::Config(format!("failed to initialize logging: {e}")))?;

    tracing::info!(log_dir = %log_dir.display(), level = %level, "logging initialized");
    Ok(())
}

/// Initialize stdout-only logging for one-shot runs.
pub fn init_logging(level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false),
        )
        .try_init()
        .map_err(|e| PipelineError::Config(format!("failed to initialize logging: {e}")))?;

    Ok(())
}
