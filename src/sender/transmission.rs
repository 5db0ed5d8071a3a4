use super::client::{ClientError, HttpClient};
use super::response::{ResponseBody, deserialize_response};
use super::serialization::{EnvelopeSerializer, RejectedEnvelope, SerializationError};
use crate::buffer::StampedBatch;
use crate::domain::TelemetryError;
use bytes::Bytes;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_GZIP_THRESHOLD: i64 = 1000;
pub const GZIP_COMPRESSION_LEVEL: u32 = 6;

#[derive(Error, Debug)]
pub enum TransmissionError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] SerializationError),
    #[error("Client error: {0}")]
    ClientError(#[from] ClientError),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

/// When a payload gets gzipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    threshold: Option<usize>,
    level: u32,
}

impl CompressionPolicy {
    /// A negative threshold disables compression.
    pub fn from_threshold(threshold: i64) -> Self {
        Self {
            threshold: usize::try_from(threshold).ok(),
            level: GZIP_COMPRESSION_LEVEL,
        }
    }

    pub fn disabled() -> Self {
        Self {
            threshold: None,
            level: GZIP_COMPRESSION_LEVEL,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    pub fn threshold(&self) -> Option<usize> {
        self.threshold
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn should_compress(&self, payload_len: usize) -> bool {
        self.threshold.is_some_and(|t| payload_len >= t)
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::from_threshold(DEFAULT_GZIP_THRESHOLD)
    }
}

/// A batch encoded (and possibly compressed) once, ready to be sent any number of times.
#[derive(Debug, Clone)]
pub struct PreparedPayload {
    pub body: Bytes,
    pub compressed: bool,
    pub uncompressed_len: usize,
    pub accepted: usize,
    pub rejected: Vec<RejectedEnvelope>,
}

/// Outcome of a single POST.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// HTTP status, or 0 when the request never got one.
    pub status_code: u16,
    pub response_body: ResponseBody,
    pub error: Option<String>,
    pub latency: Duration,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Final outcome of publishing one batch, after any retries.
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub batch_id: String,
    pub success: bool,
    /// Sends performed. 0 when nothing reached the wire.
    pub attempt: u32,
    pub status_code: u16,
    pub response_body: ResponseBody,
    pub error: Option<String>,
    pub envelope_count: usize,
    pub rejected: Vec<RejectedEnvelope>,
    pub compressed: bool,
    pub bytes_sent: usize,
    pub latency: Duration,
}

impl PublishResult {
    /// A failure that happened before anything was sent.
    pub fn not_sent(batch_id: impl Into<String>, envelope_count: usize, error: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            success: false,
            attempt: 0,
            status_code: 0,
            response_body: ResponseBody::Empty,
            error: Some(error.into()),
            envelope_count,
            rejected: Vec::new(),
            compressed: false,
            bytes_sent: 0,
            latency: Duration::ZERO,
        }
    }

    pub(crate) fn from_outcome(
        batch_id: &str,
        envelope_count: usize,
        payload: &PreparedPayload,
        outcome: SendOutcome,
        attempt: u32,
        started: Instant,
    ) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            success: outcome.is_success(),
            attempt,
            status_code: outcome.status_code,
            response_body: outcome.response_body,
            error: outcome.error,
            envelope_count,
            rejected: payload.rejected.clone(),
            compressed: payload.compressed,
            bytes_sent: payload.body.len(),
            latency: started.elapsed(),
        }
    }

    /// `TerminalSendFailure` for a failed result; `None` on success.
    pub fn to_error(&self) -> Option<TelemetryError> {
        if self.success {
            return None;
        }
        let message = match &self.error {
            Some(error) => error.clone(),
            None => self.response_body.to_string(),
        };
        Some(TelemetryError::TerminalSendFailure {
            batch_id: self.batch_id.clone(),
            status_code: self.status_code,
            attempts: self.attempt,
            envelopes: self.envelope_count,
            message,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchTransmitter {
    pub client: HttpClient,
    serializer: EnvelopeSerializer,
    compression: CompressionPolicy,
}

impl BatchTransmitter {
    pub fn new(client: HttpClient, compression: CompressionPolicy) -> Self {
        Self {
            client,
            serializer: EnvelopeSerializer::new(),
            compression,
        }
    }

    pub fn compression(&self) -> CompressionPolicy {
        self.compression
    }

    pub fn prepare_payload(&self, batch: &StampedBatch) -> Result<PreparedPayload, SerializationError> {
        let serialized = self.serializer.serialize_batch(batch.envelopes())?;
        if !serialized.rejected.is_empty() {
            warn!(
                "Batch {}: {} envelope(s) could not be serialized and were dropped",
                batch.id(),
                serialized.rejected.len()
            );
        }

        let uncompressed_len = serialized.body.len();
        let compressed = self.compression.should_compress(uncompressed_len);
        let body = if compressed {
            Bytes::from(
                self.serializer
                    .compress(&serialized.body, self.compression.level())?,
            )
        } else {
            serialized.body
        };

        Ok(PreparedPayload {
            body,
            compressed,
            uncompressed_len,
            accepted: serialized.accepted,
            rejected: serialized.rejected,
        })
    }

    pub fn build_headers(&self, compressed: bool) -> Result<HeaderMap, TransmissionError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.client.config.user_agent).map_err(|e| {
                TransmissionError::InvalidHeaderValue(format!("Invalid user agent: {e}"))
            })?,
        );

        Ok(headers)
    }

    /// One POST of an already prepared payload. Transport failures come back
    /// as status 0 rather than an error.
    pub async fn send_once(
        &self,
        batch_id: &str,
        payload: &PreparedPayload,
        attempt: u32,
    ) -> SendOutcome {
        let start = Instant::now();

        let headers = match self.build_headers(payload.compressed) {
            Ok(headers) => headers,
            Err(e) => {
                return SendOutcome {
                    status_code: 0,
                    response_body: ResponseBody::Empty,
                    error: Some(e.to_string()),
                    latency: start.elapsed(),
                };
            }
        };

        debug!(
            "Sending batch {} ({} envelopes, {} bytes, gzip={}) attempt {}",
            batch_id,
            payload.accepted,
            payload.body.len(),
            payload.compressed,
            attempt
        );

        match self.client.post(payload.body.clone(), headers).await {
            Ok(response) if response.status == 200 => SendOutcome {
                status_code: 200,
                response_body: deserialize_response(&response.body),
                error: None,
                latency: start.elapsed(),
            },
            Ok(response) => {
                let body = deserialize_response(&response.body);
                warn!(
                    "Batch {} attempt {} rejected: HTTP {} ({})",
                    batch_id, attempt, response.status, body
                );
                SendOutcome {
                    status_code: response.status,
                    response_body: body,
                    error: None,
                    latency: start.elapsed(),
                }
            }
            Err(e) => {
                warn!("Batch {} attempt {} failed: {}", batch_id, attempt, e);
                SendOutcome {
                    status_code: 0,
                    response_body: ResponseBody::Empty,
                    error: Some(e.to_string()),
                    latency: start.elapsed(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Batch;
    use crate::domain::{DraftEnvelope, MessageData, SeverityLevel};
    use crate::sender::client::ClientConfig;

    fn transmitter(compression: CompressionPolicy) -> BatchTransmitter {
        let client = HttpClient::new(ClientConfig::default()).unwrap();
        BatchTransmitter::new(client, compression)
    }

    fn batch_of(n: usize, text_len: usize) -> StampedBatch {
        let envelopes = (0..n)
            .map(|_| DraftEnvelope::new(MessageData::new("x".repeat(text_len), SeverityLevel::Information)))
            .collect();
        let mut seq = 0u64;
        Batch::new(envelopes).stamp("key", || {
            seq += 1;
            seq.to_string()
        })
    }

    #[test]
    fn test_threshold_semantics() {
        let policy = CompressionPolicy::from_threshold(1000);
        assert!(!policy.should_compress(999));
        assert!(policy.should_compress(1000));
        assert!(policy.should_compress(5000));

        let disabled = CompressionPolicy::from_threshold(-1);
        assert_eq!(disabled.threshold(), None);
        assert!(!disabled.should_compress(usize::MAX));

        assert!(CompressionPolicy::from_threshold(0).should_compress(0));
        assert_eq!(CompressionPolicy::default().level(), 6);
    }

    #[test]
    fn test_small_payload_not_compressed() {
        let t = transmitter(CompressionPolicy::default());
        let payload = t.prepare_payload(&batch_of(1, 10)).unwrap();
        assert!(!payload.compressed);
        assert_eq!(payload.body.len(), payload.uncompressed_len);
    }

    #[test]
    fn test_large_payload_compressed() {
        let t = transmitter(CompressionPolicy::default());
        let payload = t.prepare_payload(&batch_of(20, 200)).unwrap();
        assert!(payload.compressed);
        assert!(payload.body.len() < payload.uncompressed_len);
        assert_eq!(payload.accepted, 20);
    }

    #[test]
    fn test_headers() {
        let t = transmitter(CompressionPolicy::default());

        let plain = t.build_headers(false).unwrap();
        assert_eq!(plain[CONTENT_TYPE], "application/json");
        assert!(plain.get(CONTENT_ENCODING).is_none());
        assert!(plain[USER_AGENT].to_str().unwrap().starts_with("rask-telemetry/"));

        let gzip = t.build_headers(true).unwrap();
        assert_eq!(gzip[CONTENT_ENCODING], "gzip");
    }

    #[test]
    fn test_failed_result_converts_to_terminal_error() {
        let result = PublishResult::not_sent("b-1", 4, "worker pool closed");
        match result.to_error() {
            Some(TelemetryError::TerminalSendFailure {
                batch_id,
                attempts,
                envelopes,
                ..
            }) => {
                assert_eq!(batch_id, "b-1");
                assert_eq!(attempts, 0);
                assert_eq!(envelopes, 4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
