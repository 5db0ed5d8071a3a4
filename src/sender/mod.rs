pub mod client;
pub mod pool;
pub mod publisher;
pub mod response;
pub mod serialization;
pub mod transmission;

pub use client::{ClientConfig, ClientError, ConnectionStats, HttpClient};
pub use pool::WorkerPool;
pub use publisher::{DEFAULT_PUBLISH_TIMEOUT, PublishHandle, Publisher, PublisherBuilder};
pub use response::{ApiResponse, ApiResponseError, ResponseBody, deserialize_response};
pub use serialization::{EnvelopeSerializer, RejectedEnvelope, SerializationError, serialize};
pub use transmission::{
    BatchTransmitter, CompressionPolicy, DEFAULT_GZIP_THRESHOLD, PublishResult, TransmissionError,
};
