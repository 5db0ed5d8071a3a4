pub mod batch;
pub mod error;
pub mod metrics;
pub mod queue;

pub use batch::{Batch, Batcher, DEFAULT_BATCH_MAX_SIZE, StampedBatch, to_batches};
pub use error::BufferError;
pub use metrics::BufferMetrics;
pub use queue::{Drain, EventBuffer, OverflowPolicy, PushOutcome};
