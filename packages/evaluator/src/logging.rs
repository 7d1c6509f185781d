use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where evaluator logs go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `mirt_algo=debug`
    pub level: String,
    /// Also write a daily-rolling `evaluator.log`
    pub file_logs: bool,
    pub log_dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logs: false,
            log_dir: PathBuf::from("./logs"),
        }
    }
}

/// Keeps the non-blocking file writer alive; drop it last
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

/// Installs the global subscriber. Console output goes to stderr so that
/// prediction lines on stdout stay machine readable.
pub fn init_tracing(config: &LoggingConfig) -> Option<FileLogGuard> {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file_writer(config) {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(FileLogGuard { _guard: guard }))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer)
        .init();

    guard
}

fn file_writer(config: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    if !config.file_logs {
        return None;
    }
    if let Err(err) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!(
            "failed to create log directory {}: {err}",
            config.log_dir.display()
        );
        return None;
    }

    let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, "evaluator.log");
    Some(tracing_appender::non_blocking(appender))
}
