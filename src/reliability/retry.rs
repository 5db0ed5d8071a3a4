use std::time::Duration;
use thiserror::Error;

/// Status 0 stands for a transport failure where no HTTP status was received.
pub const RETRYABLE_STATUS_CODES: [u16; 3] = [0, 500, 502];

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total sends per batch. 0 or 1 means a single send.
    pub max_attempts: u32,
    /// Fixed wait between sends. Zero turns retries off.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts > 100 {
            return Err(RetryError::InvalidConfig(format!(
                "max_attempts {} is unreasonably high",
                self.max_attempts
            )));
        }
        if self.delay > Duration::from_secs(300) {
            return Err(RetryError::InvalidConfig(format!(
                "delay {:?} exceeds 5 minutes",
                self.delay
            )));
        }
        Ok(())
    }
}

/// Decides how many sends a batch gets and which failures earn another one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn retries_enabled(&self) -> bool {
        self.config.max_attempts > 1 && !self.config.delay.is_zero()
    }

    /// Upper bound on sends for one batch.
    pub fn max_sends(&self) -> u32 {
        if self.retries_enabled() {
            self.config.max_attempts
        } else {
            1
        }
    }

    pub fn delay(&self) -> Duration {
        self.config.delay
    }

    pub fn is_retryable(status_code: u16) -> bool {
        RETRYABLE_STATUS_CODES.contains(&status_code)
    }

    /// Whether a failure with `status_code` after `attempt` sends gets another send.
    pub fn should_retry(&self, attempt: u32, status_code: u16) -> bool {
        attempt < self.max_sends() && Self::is_retryable(status_code)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
