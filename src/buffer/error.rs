use crate::domain::TelemetryError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer capacity exceeded: {capacity} envelopes queued")]
    CapacityExceeded { capacity: usize },

    #[error("Invalid buffer capacity: {capacity}")]
    InvalidCapacity { capacity: usize },

    #[error("Buffer is closed")]
    Closed,
}

impl From<BufferError> for TelemetryError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::CapacityExceeded { capacity } => {
                TelemetryError::CapacityExceeded { capacity }
            }
            BufferError::InvalidCapacity { .. } => TelemetryError::Configuration(err.to_string()),
            BufferError::Closed => TelemetryError::Closed,
        }
    }
}
