use super::bridge::TelemetryLayer;
use super::config::LogLevel;
use super::initialization::{FallbackStrategy, InitializationError, LogDirective};
use parking_lot::RwLock;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Builds the filter for the crate's own diagnostics and installs the global
/// subscriber, optionally with the telemetry bridge next to the fmt output.
pub struct LoggingSystem {
    directives: RwLock<Vec<LogDirective>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
            fallback_level: LogLevel::Info,
        }
    }

    /// Adds a `target=level` directive. A bad level falls back to the default
    /// level and a malformed directive is skipped.
    pub fn add_directive(&self, directive_str: &str) -> Result<(), InitializationError> {
        match LogDirective::parse(directive_str) {
            Ok(directive) => {
                self.directives.write().push(directive);
                Ok(())
            }
            Err(e) => match e.fallback_strategy() {
                FallbackStrategy::UseDefaultLevel => {
                    eprintln!("Warning: {e}, using default level");
                    let target = directive_str.split('=').next().unwrap_or("unknown").trim();
                    self.directives
                        .write()
                        .push(LogDirective::new(target, self.fallback_level));
                    Ok(())
                }
                FallbackStrategy::SkipDirective => {
                    eprintln!("Warning: {e}, skipping directive");
                    Ok(())
                }
                FallbackStrategy::Abort => Err(e),
            },
        }
    }

    /// Quiets the HTTP stack.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "hyper_util", "reqwest", "h2", "rustls"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    /// Adds the comma-separated directives of `RUST_LOG`, if set.
    pub fn add_directives_from_env(&self) -> Result<(), InitializationError> {
        if let Ok(value) = std::env::var("RUST_LOG") {
            for directive in value.split(',').filter(|d| !d.trim().is_empty()) {
                self.add_directive(directive)?;
            }
        }
        Ok(())
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();

        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(default_level.as_str().to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));

        filter_parts.join(",")
    }

    /// Installs the global subscriber. The filter applies to the fmt output
    /// only; the bridge applies its own minimum severity.
    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        bridge: Option<TelemetryLayer>,
    ) -> Result<(), InitializationError> {
        let filter_string = self.build_filter_string(default_level);

        let env_filter =
            EnvFilter::try_new(&filter_string).map_err(|e| InitializationError::LoggingInitFailed {
                details: format!("Failed to create EnvFilter with '{filter_string}'"),
                source: Box::new(e),
            })?;

        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .compact()
                    .with_filter(env_filter),
            )
            .with(bridge);

        tracing::subscriber::set_global_default(subscriber).map_err(|e| {
            InitializationError::LoggingInitFailed {
                details: "Failed to set global tracing subscriber".to_string(),
                source: Box::new(e),
            }
        })
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs logging once per process. Later calls report whether the first
/// one succeeded; their bridge layer is discarded.
pub fn setup_logging_safe(
    level: LogLevel,
    bridge: Option<TelemetryLayer>,
) -> Result<(), InitializationError> {
    static INIT: OnceLock<bool> = OnceLock::new();

    let initialized = *INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        let result = logging_system
            .add_directives_from_env()
            .and_then(|()| logging_system.initialize_tracing(level, bridge));
        if let Err(e) = &result {
            eprintln!("Failed to initialize logging: {e}");
        }
        result.is_ok()
    });

    if initialized {
        Ok(())
    } else {
        Err(InitializationError::LoggingInitFailed {
            details: "Logging system initialization failed".to_string(),
            source: Box::new(std::io::Error::other("Logging initialization error")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_directive_fallbacks() {
        let logging_system = LoggingSystem::new();

        let cases = [
            ("hyper=warn", 1),
            ("invalid_format", 1),
            ("target=invalid_level", 2),
            ("=empty", 2),
            ("", 2),
        ];
        for (directive, expected_count) in cases {
            assert!(logging_system.add_directive(directive).is_ok(), "{directive}");
            assert_eq!(logging_system.directive_count(), expected_count, "{directive}");
        }
        assert!(
            logging_system
                .build_filter_string(LogLevel::Info)
                .contains("target=info")
        );
    }

    #[test]
    fn test_default_directives_quiet_http_stack() {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();

        let filter = logging_system.build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("hyper=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_empty_filter_is_default_level() {
        assert_eq!(LoggingSystem::new().build_filter_string(LogLevel::Warn), "warn");
    }

    #[test]
    fn test_concurrent_directive_modification() {
        let logging_system = Arc::new(LoggingSystem::new());

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let logging_system = Arc::clone(&logging_system);
                thread::spawn(move || {
                    logging_system.add_directive(&format!("target{i}=info")).is_ok()
                        && !logging_system.build_filter_string(LogLevel::Info).is_empty()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(logging_system.directive_count(), 50);
    }

    #[test]
    fn test_setup_logging_safe_is_repeatable() {
        let first = setup_logging_safe(LogLevel::Info, None);
        let second = setup_logging_safe(LogLevel::Debug, None);
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
