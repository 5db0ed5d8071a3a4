use super::{Config, ConfigError};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection()?;

        if self.app_name.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "App name must not be empty".to_string(),
            ));
        }

        // Validate batch size
        if self.batch_max_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch max size must be greater than 0".to_string(),
            ));
        }

        // Validate queue capacity
        if self.queue_max_size < self.batch_max_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Queue max size ({}) must be at least as large as batch max size ({})",
                self.queue_max_size, self.batch_max_size
            )));
        }

        // Validate timeouts
        if self.publish_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Publish timeout must be greater than 0".to_string(),
            ));
        }
        if self.publish_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Publish interval must be greater than 0".to_string(),
            ));
        }

        if self.max_publishing_workers == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "Max publishing workers must be greater than 0".to_string(),
            ));
        }

        self.retry_config()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        Ok(())
    }
}
