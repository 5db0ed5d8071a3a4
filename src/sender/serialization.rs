use crate::domain::{StampedEnvelope, TelemetryError};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use serde::Serialize;
use std::io::Write;
use thiserror::Error;

// Rough per-envelope size used to pre-size the output buffer
const ESTIMATED_ENVELOPE_SIZE: usize = 512;
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error during serialization: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
    #[error("All {count} envelopes failed to serialize; first error: {first_error}")]
    AllRejected { count: usize, first_error: String },
}

impl From<SerializationError> for TelemetryError {
    fn from(err: SerializationError) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

/// An envelope left out of a batch body because it could not be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEnvelope {
    pub index: usize,
    pub error: String,
}

/// JSON array body for one batch.
#[derive(Debug, Clone)]
pub struct SerializedBatch {
    pub body: Bytes,
    pub accepted: usize,
    pub rejected: Vec<RejectedEnvelope>,
}

/// Serializes a single envelope or a slice of envelopes as-is. Fails on the
/// first unrepresentable value.
pub fn serialize<T>(value: &T) -> Result<Vec<u8>, SerializationError>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(value)?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeSerializer;

impl EnvelopeSerializer {
    pub fn new() -> Self {
        Self
    }

    pub fn serialize_envelope(
        &self,
        envelope: &StampedEnvelope,
    ) -> Result<Vec<u8>, SerializationError> {
        serialize(envelope)
    }

    /// Encodes the batch as a JSON array, skipping envelopes that fail to
    /// encode so one bad record does not sink the rest.
    pub fn serialize_batch(
        &self,
        envelopes: &[StampedEnvelope],
    ) -> Result<SerializedBatch, SerializationError> {
        if envelopes.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        let capacity = envelopes
            .len()
            .saturating_mul(ESTIMATED_ENVELOPE_SIZE)
            .min(MAX_PREALLOCATION);
        let mut body = Vec::with_capacity(capacity);
        let mut rejected = Vec::new();
        let mut accepted = 0;

        body.push(b'[');
        for (index, envelope) in envelopes.iter().enumerate() {
            match self.serialize_envelope(envelope) {
                Ok(encoded) => {
                    if accepted > 0 {
                        body.push(b',');
                    }
                    body.extend_from_slice(&encoded);
                    accepted += 1;
                }
                Err(e) => rejected.push(RejectedEnvelope {
                    index,
                    error: e.to_string(),
                }),
            }
        }
        body.push(b']');

        if accepted == 0 {
            return Err(SerializationError::AllRejected {
                count: rejected.len(),
                first_error: rejected
                    .first()
                    .map(|r| r.error.clone())
                    .unwrap_or_default(),
            });
        }

        Ok(SerializedBatch {
            body: Bytes::from(body),
            accepted,
            rejected,
        })
    }

    pub fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>, SerializationError> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(level));
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }
}
