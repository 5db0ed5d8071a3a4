use crate::buffer::EventBuffer;
use crate::domain::sanitize::is_safe_key;
use crate::domain::{DraftEnvelope, MessageData, Properties, SeverityLevel, Tags};
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Events from these targets are never forwarded: they are emitted while
/// publishing and would otherwise feed back into the queue.
const IGNORED_TARGETS: [&str; 6] = [
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
];

/// Forwards `tracing` events as message telemetry.
///
/// Events at or above `min_level` become `MessageData` envelopes: the
/// `message` field is the text, the event target goes to the `logger`
/// property and every other field with a safe key becomes a property. A full
/// buffer drops the event (see `BufferMetrics::rejected`).
pub struct TelemetryLayer {
    buffer: Arc<EventBuffer>,
    min_level: SeverityLevel,
    properties: Properties,
    tags: Tags,
}

impl TelemetryLayer {
    pub fn new(buffer: Arc<EventBuffer>, min_level: SeverityLevel) -> Self {
        Self {
            buffer,
            min_level,
            properties: Properties::new(),
            tags: Tags::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn min_level(&self) -> SeverityLevel {
        self.min_level
    }

    fn is_ignored(target: &str) -> bool {
        IGNORED_TARGETS.iter().any(|ignored| {
            target == *ignored
                || target
                    .strip_prefix(ignored)
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }
}

impl fmt::Debug for TelemetryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryLayer")
            .field("min_level", &self.min_level)
            .field("buffer_len", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl EventVisitor {
    fn record(&mut self, field: &Field, value: String) {
        let name = field.name();
        if name == "message" {
            self.message = Some(value);
        } else if is_safe_key(name) {
            self.fields.push((name.to_string(), value));
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }
}

impl<S> Layer<S> for TelemetryLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let severity = SeverityLevel::from(*metadata.level());
        if severity < self.min_level || Self::is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut data = MessageData::new(visitor.message.unwrap_or_default(), severity);
        data.properties = self.properties.clone();
        data.properties.insert("logger", metadata.target());
        for (key, value) in visitor.fields {
            data.properties.insert(key, value);
        }

        let envelope = DraftEnvelope::new(data).with_tags(self.tags.clone());
        // Dropped events show up in the buffer metrics.
        let _ = self.buffer.push(envelope);
    }
}
