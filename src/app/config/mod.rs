mod cli;
pub mod connection_string;
pub mod serde_helpers;
mod validation;

use crate::domain::{SeverityLevel, TelemetryError};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

impl From<ConfigError> for TelemetryError {
    fn from(err: ConfigError) -> Self {
        TelemetryError::Configuration(err.to_string())
    }
}

/// Verbosity of this crate's own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Lowest severity a logger or the tracing bridge forwards to ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Verbose,
    #[default]
    Information,
    Warning,
    Error,
    Critical,
}

impl From<TelemetryLevel> for SeverityLevel {
    fn from(level: TelemetryLevel) -> Self {
        match level {
            TelemetryLevel::Verbose => SeverityLevel::Verbose,
            TelemetryLevel::Information => SeverityLevel::Information,
            TelemetryLevel::Warning => SeverityLevel::Warning,
            TelemetryLevel::Error => SeverityLevel::Error,
            TelemetryLevel::Critical => SeverityLevel::Critical,
        }
    }
}

pub use cli::{CONNECTION_STRING_ENV_VAR, Config};
pub use connection_string::ConnectionString;
