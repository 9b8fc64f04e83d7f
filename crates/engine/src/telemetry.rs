//! Logging setup.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to emit JSON lines instead of human-readable output
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Application name to include in the startup line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            app_name: "rxdial".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level,
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }
}

/// Set up the global tracing subscriber. `RUST_LOG` directives take
/// precedence over the configured level.
pub fn setup_logging(config: LoggingConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let mut subscriber = fmt::Subscriber::builder().with_env_filter(filter);

    if config.file_info {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::info!("Starting {} v{}", config.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

/// Parse a log level from a string.
pub fn parse_log_level(level: &str) -> Result<Level, EngineError> {
    Level::from_str(level)
        .map_err(|_| EngineError::Config(format!("Invalid log level: {}", level)))
}
