use chrono::Local;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parses a level name case-insensitively. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
#[must_use = "dropping the guard stops the log writer"]
pub struct LogGuard {
    pub log_path: Option<PathBuf>,
    _worker: Option<WorkerGuard>,
}

/// `RUST_LOG` wins; otherwise the configured level, defaulting to `info`.
fn build_filter(level: Option<LogLevel>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(level.unwrap_or(LogLevel::Info).as_directive())
    })
}

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%dT%H%M%S").to_string();
    log_dir.join(format!("gatesync-{}.log", timestamp))
}

/// Installs the global tracing subscriber.
///
/// With `print` set, logs go to stderr. Otherwise they are written to a
/// timestamped file under `log_dir` (current directory when unset); if the
/// file cannot be created, logging falls back to stderr.
pub fn init_tracing(level: Option<LogLevel>, log_dir: Option<PathBuf>, print: bool) -> LogGuard {
    let filter = build_filter(level);

    if print {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return LogGuard {
            log_path: None,
            _worker: None,
        };
    }

    let log_dir = log_dir.unwrap_or_else(|| PathBuf::from("."));
    let log_path = log_file_path(&log_dir);
    let _ = std::fs::create_dir_all(&log_dir);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&log_path);

    match file {
        Ok(file) => {
            let (non_blocking, worker) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
            LogGuard {
                log_path: Some(log_path),
                _worker: Some(worker),
            }
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            tracing::warn!(path = %log_path.display(), %err, "failed to open log file, logging to stderr");
            LogGuard {
                log_path: None,
                _worker: None,
            }
        }
    }
}
