use super::serde_helpers::{
    load_env_enum, load_env_path_opt, load_env_string, load_env_var, load_env_var_opt,
};
use super::{ConfigError, ConnectionString, LogLevel, TelemetryLevel};
use crate::buffer::OverflowPolicy;
use crate::reliability::RetryConfig;
use crate::sender::{CompressionPolicy, PublisherBuilder};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONNECTION_STRING_ENV_VAR: &str = "APPLICATIONINSIGHTS_CONNECTION_STRING";
const APP_NAME_ENV_VAR: &str = "TELEMETRY_APP_NAME";
const DEFAULT_APP_NAME: &str = "rask";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Application Insights connection string (or bare instrumentation key)
    #[arg(long, env = "APPLICATIONINSIGHTS_CONNECTION_STRING", default_value = "")]
    pub connection_string: String,

    /// Application name, reported as the `app` property. Also the prefix for
    /// app-specific environment variables (`MYAPP_APPLICATIONINSIGHTS_CONNECTION_STRING`)
    #[arg(long, env = "TELEMETRY_APP_NAME", default_value = DEFAULT_APP_NAME)]
    pub app_name: String,

    /// Envelopes held in memory between publishes
    #[arg(long, env = "TELEMETRY_QUEUE_MAX_SIZE", default_value = "1000")]
    pub queue_max_size: usize,

    /// Envelopes per HTTP request
    #[arg(long, env = "TELEMETRY_BATCH_MAX_SIZE", default_value = "100")]
    pub batch_max_size: usize,

    /// Interval of background publishing in milliseconds
    #[arg(long, env = "TELEMETRY_PUBLISH_INTERVAL_MS", default_value = "20000")]
    pub publish_interval_ms: u64,

    /// Upper bound for one publish (and for close) in milliseconds
    #[arg(long, env = "TELEMETRY_PUBLISH_TIMEOUT_MS", default_value = "10000")]
    pub publish_timeout_ms: u64,

    /// Concurrent batch sends (default: min(8, cpus + 1))
    #[arg(long, env = "TELEMETRY_MAX_PUBLISHING_WORKERS")]
    pub max_publishing_workers: Option<usize>,

    /// Sends per batch; 0 or 1 disables retries
    #[arg(long, env = "TELEMETRY_MAX_ATTEMPTS", default_value = "3")]
    pub max_attempts: u32,

    /// Delay between sends in milliseconds; 0 disables retries
    #[arg(long, env = "TELEMETRY_RETRY_DELAY_MS", default_value = "500")]
    pub retry_delay_ms: u64,

    /// Payload size in bytes from which requests are gzipped; -1 disables
    #[arg(
        long,
        env = "TELEMETRY_GZIP_THRESHOLD",
        default_value = "1000",
        allow_hyphen_values = true
    )]
    pub gzip_threshold: i64,

    /// What to do when the queue is full
    #[arg(long, env = "TELEMETRY_OVERFLOW_POLICY", default_value = "reject")]
    pub overflow_policy: OverflowPolicy,

    /// Lowest severity sent to ingestion
    #[arg(long, env = "TELEMETRY_MIN_LEVEL", default_value = "information")]
    pub min_level: TelemetryLevel,

    /// Log level of the client's own diagnostics
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Forward `tracing` events to ingestion
    #[arg(long, env = "TELEMETRY_TRACING_BRIDGE")]
    pub tracing_bridge: bool,

    /// Configuration file path (optional)
    #[arg(long, env = "TELEMETRY_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub publish_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub publish_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            app_name: DEFAULT_APP_NAME.to_string(),
            queue_max_size: 1000,
            batch_max_size: 100,
            publish_interval_ms: 20_000,
            publish_timeout_ms: 10_000,
            max_publishing_workers: None,
            max_attempts: 3,
            retry_delay_ms: 500,
            gzip_threshold: 1000,
            overflow_policy: OverflowPolicy::Reject,
            min_level: TelemetryLevel::Information,
            log_level: LogLevel::Info,
            tracing_bridge: false,
            config_file: None,
            publish_interval: Duration::from_millis(20_000),
            publish_timeout: Duration::from_millis(10_000),
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Config for `connection_string` with every other option at its default.
    pub fn with_connection_string(connection_string: impl Into<String>) -> Result<Self, ConfigError> {
        let mut config = Config {
            connection_string: connection_string.into(),
            ..Config::default()
        };
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses command-line arguments (falling back to the plain environment
    /// variables). A `--config-file` replaces everything else.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Config::parse_from(args).resolve()
    }

    /// Finishes a parsed config: a `config_file` replaces every other
    /// option, then durations are derived and the result validated.
    pub fn resolve(self) -> Result<Self, ConfigError> {
        let mut config = match self.config_file.clone() {
            Some(path) => Self::read_file(&path)?,
            None => self,
        };
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads every option from the environment. Each variable may be given
    /// with the upper-cased app name as prefix, which wins over the plain name.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("", APP_NAME_ENV_VAR, &mut config.app_name);
        let app = config.app_name.clone();

        load_env_string(&app, CONNECTION_STRING_ENV_VAR, &mut config.connection_string);
        load_env_var(&app, "TELEMETRY_QUEUE_MAX_SIZE", &mut config.queue_max_size)?;
        load_env_var(&app, "TELEMETRY_BATCH_MAX_SIZE", &mut config.batch_max_size)?;
        load_env_var(&app, "TELEMETRY_PUBLISH_INTERVAL_MS", &mut config.publish_interval_ms)?;
        load_env_var(&app, "TELEMETRY_PUBLISH_TIMEOUT_MS", &mut config.publish_timeout_ms)?;
        load_env_var_opt(
            &app,
            "TELEMETRY_MAX_PUBLISHING_WORKERS",
            &mut config.max_publishing_workers,
        )?;
        load_env_var(&app, "TELEMETRY_MAX_ATTEMPTS", &mut config.max_attempts)?;
        load_env_var(&app, "TELEMETRY_RETRY_DELAY_MS", &mut config.retry_delay_ms)?;
        load_env_var(&app, "TELEMETRY_GZIP_THRESHOLD", &mut config.gzip_threshold)?;
        load_env_enum(&app, "TELEMETRY_OVERFLOW_POLICY", &mut config.overflow_policy)?;
        load_env_enum(&app, "TELEMETRY_MIN_LEVEL", &mut config.min_level)?;
        load_env_enum(&app, "LOG_LEVEL", &mut config.log_level)?;
        load_env_var(&app, "TELEMETRY_TRACING_BRIDGE", &mut config.tracing_bridge)?;
        load_env_path_opt(&app, "TELEMETRY_CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        // Convert milliseconds to Duration
        self.publish_interval = Duration::from_millis(self.publish_interval_ms);
        self.publish_timeout = Duration::from_millis(self.publish_timeout_ms);
        self.retry_delay = Duration::from_millis(self.retry_delay_ms);

        self.connection_string = self.connection_string.trim().to_string();
        self.app_name = self.app_name.trim().to_string();
        Ok(())
    }

    pub fn connection(&self) -> Result<ConnectionString, ConfigError> {
        ConnectionString::parse(&self.connection_string)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            delay: self.retry_delay,
        }
    }

    pub fn compression(&self) -> CompressionPolicy {
        CompressionPolicy::from_threshold(self.gzip_threshold)
    }

    /// Publisher settings derived from this config. The error handler and
    /// pool sharing are left to the caller.
    pub fn publisher_builder(&self) -> Result<PublisherBuilder, ConfigError> {
        let connection = self.connection()?;
        let mut builder = PublisherBuilder::new(connection.instrumentation_key)
            .ingestion_url(connection.ingestion_url.as_str())
            .retry(self.retry_config())
            .compression(self.compression())
            .batch_max_size(self.batch_max_size)
            .publish_timeout(self.publish_timeout);
        if let Some(workers) = self.max_publishing_workers {
            builder = builder.pool_size(workers);
        }
        Ok(builder)
    }
}
