use thiserror::Error;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const LOG_FILE_PREFIX: &str = "engagement-monitor";
const MAX_LOG_FILES: usize = 14;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub enable_file_logs: bool,
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            enable_file_logs: false,
            log_dir: "./logs".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("failed to create rolling log appender: {0}")]
    Appender(#[from] InitError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

/// Install the global subscriber: env filter + stdout, plus daily JSON files
/// when enabled. A subscriber that is already installed (tests, embedding
/// hosts) is left in place.
pub fn init_tracing(config: &LogConfig) -> Result<(), LogInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stdout_layer = fmt::layer().with_target(true).with_thread_ids(false);
    let registry = Registry::default().with(env_filter).with(stdout_layer);

    let result = if config.enable_file_logs {
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(&config.log_dir)?;
        let file_layer = fmt::layer()
            .with_writer(file_appender)
            .with_ansi(false)
            .json();
        registry.with(file_layer).try_init()
    } else {
        registry.try_init()
    };

    match result {
        Ok(()) => Ok(()),
        // A global subscriber already installed (tests, embedding hosts) is fine.
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(LogInitError::Subscriber(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let cfg = LogConfig::default();
        assert!(init_tracing(&cfg).is_ok());
        assert!(init_tracing(&cfg).is_ok());
    }
}
