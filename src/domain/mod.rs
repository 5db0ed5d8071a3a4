//! Domain layer for rask-telemetry.
//!
//! Contains the canonical types shared across all modules:
//! - `DraftEnvelope` / `StampedEnvelope`: the transport unit before and after publish-time stamping
//! - `Data`: the tagged union over the six payload kinds
//! - `ExceptionData`: exception chains with parsed stacks and a stable `problemId`
//! - `TagKey`: the closed vocabulary of envelope context tags
//! - `TelemetryError`: Top-level error type

pub mod data;
pub mod envelope;
pub mod error;
pub mod exception;
pub mod sanitize;
pub mod serde_helpers;
pub mod tags;

pub use data::{
    Data, DataPoint, DataPointKind, EventData, Measurements, MessageData, MetricData, Properties,
    RemoteDependencyData, RequestData, SeverityLevel,
};
pub use envelope::{DraftEnvelope, StampedEnvelope};
pub use error::TelemetryError;
pub use exception::{ExceptionData, ExceptionDetails, StackFrame};
pub use tags::{TagKey, Tags};
