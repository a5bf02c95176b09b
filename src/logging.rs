//! Logging for horus-deploy.
//!
//! Two layers: a timestamped file under `<config dir>/logs/` with
//! retention cleanup, and a compact stderr layer whose level follows the
//! `-v` count. Nothing is ever logged to stdout, which carries the JSON
//! output of `resolve` and `connect`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Default log retention in hours.
pub const DEFAULT_LOG_RETENTION_HOURS: u32 = 24;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration, the `[log]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log retention period in hours.
    pub retention_hours: u32,
    /// Log level (trace, debug, info, warn, error, off).
    pub level: String,
    /// Whether file logging is enabled.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_LOG_RETENTION_HOURS,
            level: DEFAULT_LOG_LEVEL.to_string(),
            enabled: true,
        }
    }
}

impl LogConfig {
    /// Parses log level from string.
    #[must_use]
    pub fn parse_level(value: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

/// Returns the log directory inside a config directory.
#[must_use]
pub fn log_directory(config_dir: &Path) -> PathBuf {
    config_dir.join("logs")
}

/// Returns a log file path for the current time.
#[must_use]
pub fn current_log_path(log_dir: &Path) -> PathBuf {
    let now = chrono::Local::now();
    let filename = format!("horus_deploy_{}.log", now.format("%Y-%m-%d_%H-%M-%S"));
    log_dir.join(filename)
}

/// Maps the `-v` count onto the stderr level.
#[must_use]
pub fn stderr_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn stderr_layer<S>(verbosity: u8) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .with_filter(stderr_level(verbosity))
}

/// Deletes `.log` files older than the retention period.
///
/// # Errors
/// Returns error if the directory cannot be read.
pub fn cleanup_old_logs(log_dir: &Path, retention_hours: u32) -> io::Result<u32> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let retention = Duration::from_secs(u64::from(retention_hours) * 3600);
    let now = SystemTime::now();
    let mut deleted_count = 0;

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if age.is_some_and(|age| age > retention) && fs::remove_file(&path).is_ok() {
            deleted_count += 1;
        }
    }

    Ok(deleted_count)
}

/// Initializes logging.
///
/// Returns the log file path when file logging is active.
///
/// # Errors
/// Returns error if the log directory or file cannot be created.
pub fn init(config: &LogConfig, config_dir: &Path, verbosity: u8) -> io::Result<Option<PathBuf>> {
    if !config.enabled || config.level == "off" {
        tracing_subscriber::registry()
            .with(stderr_layer(verbosity))
            .init();
        return Ok(None);
    }

    let log_dir = log_directory(config_dir);
    fs::create_dir_all(&log_dir)?;
    let deleted = cleanup_old_logs(&log_dir, config.retention_hours)?;

    // The resolver child process may share the same timestamp.
    let log_path = current_log_path(&log_dir);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer(verbosity))
        .init();

    tracing::debug!("Log file: {}", log_path.display());
    tracing::debug!("Log level: {}", config.level);
    if deleted > 0 {
        tracing::debug!("Cleaned up {} old log file(s)", deleted);
    }

    Ok(Some(log_path))
}
