use thiserror::Error;

/// Top-level error type for the telemetry pipeline.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The event buffer is full; the producer decides whether to drop or escalate.
    #[error("Event buffer capacity exceeded ({capacity} envelopes)")]
    CapacityExceeded { capacity: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network failure or retryable status; retried by the publisher.
    #[error("Transient send failure for batch {batch_id}: status {status_code}")]
    TransientSendFailure { batch_id: String, status_code: u16 },

    /// Non-retryable status or attempts exhausted; the batch is dropped.
    #[error(
        "Batch {batch_id} failed after {attempts} attempt(s) with status {status_code} ({envelopes} envelopes): {message}"
    )]
    TerminalSendFailure {
        batch_id: String,
        status_code: u16,
        attempts: u32,
        envelopes: usize,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Publisher is closed")]
    Closed,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl TelemetryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TelemetryError::TransientSendFailure { .. })
    }
}
