use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Errors raised while installing the logger.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The log directory could not be created or scanned.
    #[error("I/O error occurred: {0}")]
    IoError(#[from] std::io::Error),
    /// A global subscriber was already installed, or the filter is invalid.
    #[error("Failed to initialise tracing: {0}")]
    InitError(String),
}

/// # Logger Local Options
///
/// Controls where and how log lines are written.
#[derive(Debug, Clone)]
pub struct LoggerLocalOptions {
    /// Prefix of the log file names (`<app_name>-<timestamp>.log`).
    pub app_name: String,
    /// Directory for log files. `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// Default filter directive (`info`, `debug`, `warn,lib_common=debug`...).
    /// `RUST_LOG` overrides it when set.
    pub level: String,
    /// How many older log files survive a restart.
    pub keep_files: usize,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            app_name: "app".to_string(),
            log_dir: None,
            level: "info".to_string(),
            keep_files: 1,
        }
    }
}

/// Maps the level names accepted on the command line onto filter directives.
fn normalize_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "" => "info".to_string(),
        "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Keeps only the newest `keep` log files of `app_name` in `log_dir`.
///
/// File names embed a sortable timestamp, so name order is age order.
fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> Result<(), LoggerError> {
    let prefix = format!("{app_name}-");
    let mut log_files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect();

    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    for old_file in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(old_file) {
            eprintln!("Error deleting old log file {}: {}", old_file.display(), e);
        }
    }
    Ok(())
}

/// # Init Logging
///
/// Installs the global subscriber: human-readable lines on stdout and, when a
/// log directory is configured, JSON lines in a fresh timestamped file written
/// through a non-blocking appender.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init_logging(options: &LoggerLocalOptions) -> Result<Option<WorkerGuard>, LoggerError> {
    let level = normalize_level(&options.level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .map_err(|e| LoggerError::InitError(e.to_string()))?;

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            rotate_logs(&options.app_name, dir, options.keep_files)?;
            let file_name = format!("{}-{}.log", options.app_name, Utc::now().format("%Y%m%d_%H%M%S"));
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::InitError(e.to_string()))?;

    Ok(guard)
}
