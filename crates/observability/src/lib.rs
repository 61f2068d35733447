// crates/observability/src/lib.rs
//! Tracing setup for cbwsh binaries.
//!
//! Installs a `tracing-subscriber` registry with:
//!  - a console layer on stderr (stdout belongs to builtin output)
//!  - an optional daily-rolling file layer, compact text or JSON lines
//!
//! `RUST_LOG` wins over the configured level when set.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "cbwsh.log";

/// Log line format for the file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" | "jsonl" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level directive, e.g. `warn` or `cbwsh_jobs=debug`.
    pub level: String,
    pub console: bool,
    /// Directory for rolling log files; `None` disables the file layer.
    pub file_dir: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            console: true,
            file_dir: None,
            format: LogFormat::Compact,
        }
    }
}

/// `<state dir>/cbwsh/logs`, falling back to the local data dir.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("cbwsh").join("logs"))
}

/// Build the filter from `RUST_LOG`, or from `level` when it is unset.
pub fn build_env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).with_context(|| format!("invalid tracing filter '{level}'"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes and stops the file writer.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let console_layer = if config.console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(build_env_filter(&config.level)?),
        )
    } else {
        None
    };

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = match config.format {
                LogFormat::Json => tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_filter(build_env_filter(&config.level)?)
                    .boxed(),
                LogFormat::Compact => tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_target(true)
                    .with_filter(build_env_filter(&config.level)?)
                    .boxed(),
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    tracing::debug!(level = %config.level, file = ?config.file_dir, "Tracing initialized");
    Ok(guard)
}
