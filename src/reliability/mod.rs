pub mod error_handler;
pub mod retry;

pub use error_handler::{ErrorHandler, SideChannelErrorHandler};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, RETRYABLE_STATUS_CODES, RetryConfig, RetryError,
    RetryPolicy,
};
