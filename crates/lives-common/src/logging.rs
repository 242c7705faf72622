//! Logging configuration and initialization
//!
//! Centralized tracing setup for all LIVES export components. Supports:
//!
//! - Multiple output targets (console, file, both)
//! - Multiple log formats (text, JSON)
//! - Configurable log levels with per-module filter directives
//! - Daily log file rotation
//! - Environment-based configuration
//!
//! Use the structured logging macros (`trace!`, `debug!`, `info!`, `warn!`,
//! `error!`) with fields rather than `println!`:
//!
//! ```rust,ignore
//! use tracing::info;
//!
//! info!(locality = %locality, "Export build started");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lives_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log level for filtering messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow::anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Output target for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(anyhow::anyhow!("Invalid log output: {}", s)),
        }
    }
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,

    /// Output target (console, file, or both)
    pub output: LogOutput,

    /// Log format (text or JSON)
    pub format: LogFormat,

    /// Directory for log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// Log file name prefix (e.g. "lives-server" -> "lives-server.2024-01-18.log")
    pub log_file_prefix: String,

    /// Additional filter directives (e.g. "sqlx=warn,tower_http=debug")
    pub filter_directives: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "lives".to_string(),
            filter_directives: None,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LOG_LEVEL`: Log level (trace, debug, info, warn, error)
    /// - `LOG_OUTPUT`: Output target (console, file, both)
    /// - `LOG_FORMAT`: Log format (text, json)
    /// - `LOG_DIR`: Directory for log files
    /// - `LOG_FILE_PREFIX`: Prefix for log files
    /// - `LOG_FILTER`: Additional filter directives
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.level = level.parse()?;
        }

        if let Ok(output) = std::env::var("LOG_OUTPUT") {
            config.output = output.parse()?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            config.format = format.parse()?;
        }

        if let Ok(dir) = std::env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }

        if let Ok(prefix) = std::env::var("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }

        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.filter_directives = Some(filter);
        }

        Ok(config)
    }

    /// Override the log file prefix, builder-style.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_file_prefix = prefix.into();
        self
    }

    /// Override the filter directives, builder-style.
    pub fn with_filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.filter_directives = Some(directives.into());
        self
    }
}

/// Initialize the global tracing subscriber with the given configuration.
///
/// Should only be called once at application startup.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let mut filter =
        EnvFilter::from_default_env().add_directive(config.level.to_tracing_level().into());

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',') {
            filter = filter.add_directive(
                directive
                    .trim()
                    .parse()
                    .context("Failed to parse filter directive")?,
            );
        }
    }

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if matches!(config.output, LogOutput::Console | LogOutput::Both) {
        layers.push(console_layer(config.format));
    }

    if matches!(config.output, LogOutput::File | LogOutput::Both) {
        layers.push(file_layer(config)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;

    Ok(())
}

fn console_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer(config: &LogConfig) -> Result<Box<dyn Layer<Registry> + Send + Sync>> {
    std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The worker guard must stay alive for the lifetime of the process;
    // leaking it keeps the background writer running until exit.
    std::mem::forget(guard);

    let layer = fmt::layer()
        .with_writer(non_blocking)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false);

    Ok(match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    })
}
