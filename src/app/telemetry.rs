use super::bridge::TelemetryLayer;
use super::config::Config;
use super::config::serde_helpers::{env_prefix, env_var};
use crate::buffer::{EventBuffer, PushOutcome};
use crate::domain::{
    Data, DraftEnvelope, EventData, ExceptionData, MessageData, MetricData, Properties,
    RemoteDependencyData, RequestData, SeverityLevel, TagKey, Tags, TelemetryError,
};
use crate::sender::{PublishResult, Publisher};
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_APP_VERSION: &str = "0.0.0.0";
const UNKNOWN_HOST: &str = "unknown";
const ROOT_LOGGER: &str = "_root";

/// Maps the many spellings of a deployment environment onto
/// `prod`/`stage`/`test`/`dev`. Anything unrecognised is `prod`.
pub fn normalize_environment_name(name: Option<&str>) -> &'static str {
    match name.map(|n| n.trim().to_lowercase()).as_deref() {
        Some("stage" | "staging") => "stage",
        Some("test" | "testing") => "test",
        Some("dev" | "development") => "dev",
        _ => "prod",
    }
}

/// Environment of the running application, read from
/// `AZURE_FUNCTIONS_ENVIRONMENT`, `{APP}_ENVIRONMENT` or `ENVIRONMENT`.
pub fn environment_name(app_name: &str) -> &'static str {
    let prefixed = format!("{}_ENVIRONMENT", env_prefix(app_name));
    let raw = ["AZURE_FUNCTIONS_ENVIRONMENT", prefixed.as_str(), "ENVIRONMENT"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));
    normalize_environment_name(raw.as_deref())
}

fn app_version(app_name: &str) -> String {
    env_var(app_name, "APP_VERSION").unwrap_or_else(|| DEFAULT_APP_VERSION.to_string())
}

fn host_name() -> String {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| hostname::get().ok().and_then(|name| name.into_string().ok()))
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

/// Outcome of one `flush`.
#[derive(Debug, Default)]
pub struct FlushResult {
    pub success: bool,
    pub batches: usize,
    pub results: Vec<PublishResult>,
    pub errors: Vec<TelemetryError>,
}

impl FlushResult {
    fn from_results(results: Vec<PublishResult>) -> Self {
        let mut errors: Vec<TelemetryError> = results.iter().filter_map(PublishResult::to_error).collect();
        // Delivered batches can still have left envelopes out.
        errors.extend(
            results
                .iter()
                .filter(|r| r.success && !r.rejected.is_empty())
                .map(|r| {
                    TelemetryError::Serialization(format!(
                        "Batch {}: {} envelope(s) could not be serialized",
                        r.batch_id,
                        r.rejected.len()
                    ))
                }),
        );
        Self {
            success: errors.is_empty(),
            batches: results.len(),
            results,
            errors,
        }
    }

    /// Nothing was queued.
    pub fn empty() -> Self {
        Self::from_results(Vec::new())
    }

    pub fn envelopes_sent(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.envelope_count.saturating_sub(r.rejected.len()))
            .sum()
    }

    pub fn envelopes_rejected(&self) -> usize {
        self.results.iter().map(|r| r.rejected.len()).sum()
    }
}

impl fmt::Display for FlushResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batch(es), {} envelope(s) accepted, {} failure(s)",
            self.batches,
            self.envelopes_sent(),
            self.errors.len()
        )
    }
}

struct PublishingTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ClientInner {
    app_name: String,
    buffer: Arc<EventBuffer>,
    publisher: Publisher,
    properties: Properties,
    tags: Tags,
    min_level: SeverityLevel,
    publishing: Mutex<Option<PublishingTask>>,
    closed: AtomicBool,
}

/// Entry point for producers: owns the event buffer and the publisher and
/// stamps every item with the application's global properties and tags.
#[derive(Clone)]
pub struct TelemetryClient {
    inner: Arc<ClientInner>,
}

impl TelemetryClient {
    /// Builds the buffer and a publisher from `config`. Must run inside a
    /// tokio runtime.
    pub fn new(config: &Config) -> Result<Self, TelemetryError> {
        let publisher = config.publisher_builder()?.build()?;
        Self::with_publisher(config, publisher)
    }

    /// Uses an already configured publisher, e.g. one with a custom error
    /// handler.
    pub fn with_publisher(config: &Config, publisher: Publisher) -> Result<Self, TelemetryError> {
        let buffer = EventBuffer::with_policy(config.queue_max_size, config.overflow_policy)?;
        let app_name = config.app_name.clone();

        let mut properties = Properties::new();
        properties.insert("app", app_name.as_str());
        properties.insert("env", environment_name(&app_name));

        let mut tags = Tags::new();
        tags.insert(TagKey::CloudRole, app_name.clone());
        tags.insert(TagKey::CloudRoleInstance, host_name());
        tags.insert(TagKey::ApplicationVersion, app_version(&app_name));

        info!(
            "Telemetry client for '{}' ready (queue={}, policy={:?}, min_level={:?})",
            app_name,
            config.queue_max_size,
            config.overflow_policy,
            SeverityLevel::from(config.min_level)
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                app_name,
                buffer: Arc::new(buffer),
                publisher,
                properties,
                tags,
                min_level: config.min_level.into(),
                publishing: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.inner.buffer
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }

    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    pub fn min_level(&self) -> SeverityLevel {
        self.inner.min_level
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_publishing(&self) -> bool {
        self.inner.publishing.lock().is_some()
    }

    /// Queues `data` with the global properties (per-item values win) and
    /// the default tags.
    pub fn track(&self, data: impl Into<Data>) -> Result<PushOutcome, TelemetryError> {
        let mut data = data.into();
        let properties = data.properties_mut();
        for (key, value) in self.inner.properties.iter() {
            properties.insert_default(key, value);
        }
        let envelope = DraftEnvelope::new(data).with_tags(self.inner.tags.clone());
        Ok(self.inner.buffer.push(envelope)?)
    }

    pub fn track_metric(
        &self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<PushOutcome, TelemetryError> {
        self.track(MetricData::single(name, value))
    }

    pub fn track_event(
        &self,
        name: impl Into<String>,
        properties: Properties,
    ) -> Result<PushOutcome, TelemetryError> {
        let mut event = EventData::new(name);
        event.properties = properties;
        self.track(event)
    }

    pub fn track_dependency(
        &self,
        dependency: RemoteDependencyData,
    ) -> Result<PushOutcome, TelemetryError> {
        self.track(dependency)
    }

    pub fn track_request(&self, request: RequestData) -> Result<PushOutcome, TelemetryError> {
        self.track(request)
    }

    pub fn logger(&self, name: impl Into<String>) -> Logger {
        Logger::new(self.clone(), name.into(), self.inner.min_level)
    }

    /// Logger without a `logger` property.
    pub fn root_logger(&self) -> Logger {
        self.logger(ROOT_LOGGER)
    }

    pub fn activity(&self, name: impl Into<String>) -> Activity {
        Activity::new(self.clone(), name.into())
    }

    /// Bridge layer feeding `tracing` events into this client's buffer.
    pub fn tracing_layer(&self) -> TelemetryLayer {
        TelemetryLayer::new(Arc::clone(&self.inner.buffer), self.inner.min_level)
            .with_properties(self.inner.properties.clone())
            .with_tags(self.inner.tags.clone())
    }

    /// Publishes everything queued right now.
    pub async fn flush(&self) -> FlushResult {
        if self.inner.buffer.is_empty() {
            return FlushResult::empty();
        }
        let result = FlushResult::from_results(self.inner.publisher.publish(&self.inner.buffer).await);
        debug!("Flush finished: {}", result);
        result
    }

    /// Flushes every `interval` on a background task. Returns `false` when
    /// publishing already runs or the client is closed.
    pub fn start_publishing(&self, interval: Duration) -> Result<bool, TelemetryError> {
        if interval.is_zero() {
            return Err(TelemetryError::Configuration(
                "Publish interval must be greater than 0".to_string(),
            ));
        }
        if self.is_closed() {
            return Ok(false);
        }
        let runtime = Handle::try_current().map_err(|e| {
            TelemetryError::Configuration(format!("Periodic publishing needs a tokio runtime: {e}"))
        })?;

        let mut publishing = self.inner.publishing.lock();
        if publishing.is_some() {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        let result = TelemetryClient { inner }.flush().await;
                        if !result.success {
                            warn!("Periodic flush had failures: {}", result);
                        }
                    }
                }
            }
            debug!("Periodic publishing stopped");
        });

        *publishing = Some(PublishingTask { cancel, handle });
        info!("Periodic publishing started (interval={:?})", interval);
        Ok(true)
    }

    /// Stops periodic publishing (waiting for a flush in progress) and
    /// publishes what is left.
    pub async fn stop_publishing(&self) -> FlushResult {
        let task = self.inner.publishing.lock().take();
        if let Some(PublishingTask { cancel, handle }) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Periodic publishing task ended abnormally: {}", e);
            }
        }
        self.flush().await
    }

    /// Stops publishing, sends the remaining envelopes and closes the
    /// publisher. Later calls do nothing and return an empty result.
    pub async fn close(&self) -> FlushResult {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return FlushResult::empty();
        }
        self.inner.buffer.close();
        let result = self.stop_publishing().await;
        self.inner.publisher.close().await;
        info!("Telemetry client for '{}' closed ({})", self.inner.app_name, result);
        result
    }
}

impl fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("app_name", &self.inner.app_name)
            .field("queued", &self.inner.buffer.len())
            .field("min_level", &self.inner.min_level)
            .field("publishing", &self.is_publishing())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Named message and exception producer.
#[derive(Clone, Debug)]
pub struct Logger {
    client: TelemetryClient,
    name: String,
    min_level: SeverityLevel,
    properties: Properties,
}

impl Logger {
    fn new(client: TelemetryClient, name: String, min_level: SeverityLevel) -> Self {
        let mut properties = Properties::new();
        if name != ROOT_LOGGER {
            properties.insert("logger", name.as_str());
        }
        Self {
            client,
            name,
            min_level,
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_level(&self) -> SeverityLevel {
        self.min_level
    }

    pub fn with_min_level(mut self, level: SeverityLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn is_enabled(&self, level: SeverityLevel) -> bool {
        level == SeverityLevel::Critical || level >= self.min_level
    }

    /// Queues a message. Filtered messages are `Ok(None)`.
    pub fn log_with(
        &self,
        level: SeverityLevel,
        message: impl Into<String>,
        properties: Properties,
    ) -> Result<Option<PushOutcome>, TelemetryError> {
        if !self.is_enabled(level) {
            return Ok(None);
        }
        let mut data = MessageData::new(message, level);
        data.properties = properties;
        self.emit(data.into()).map(Some)
    }

    pub fn log(
        &self,
        level: SeverityLevel,
        message: impl Into<String>,
    ) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log_with(level, message, Properties::new())
    }

    pub fn debug(&self, message: impl Into<String>) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log(SeverityLevel::Verbose, message)
    }

    pub fn info(&self, message: impl Into<String>) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log(SeverityLevel::Information, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log(SeverityLevel::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log(SeverityLevel::Error, message)
    }

    pub fn critical(
        &self,
        message: impl Into<String>,
    ) -> Result<Option<PushOutcome>, TelemetryError> {
        self.log(SeverityLevel::Critical, message)
    }

    /// Queues exception telemetry for `err` and its source chain. The
    /// `problemId` groups by the line this is called from.
    #[track_caller]
    pub fn exception<E>(
        &self,
        err: &E,
        level: SeverityLevel,
    ) -> Result<Option<PushOutcome>, TelemetryError>
    where
        E: Error + ?Sized,
    {
        if !self.is_enabled(level) {
            return Ok(None);
        }
        let exception = ExceptionData::from_error_at_caller(err, level);
        self.emit(exception.into()).map(Some)
    }

    fn emit(&self, mut data: Data) -> Result<PushOutcome, TelemetryError> {
        let properties = data.properties_mut();
        for (key, value) in self.properties.iter() {
            properties.insert_default(key, value);
        }
        self.client.track(data)
    }
}

/// Times a unit of work. Finishing it queues `{name}_ms` plus `{name}_ok`
/// or `{name}_err`; dropping an unfinished activity counts as success
/// unless the thread is panicking.
#[derive(Debug)]
pub struct Activity {
    client: TelemetryClient,
    name: String,
    id: String,
    properties: Properties,
    started: Instant,
    finished: bool,
}

impl Activity {
    fn new(client: TelemetryClient, name: String) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let mut properties = Properties::new();
        properties.insert("activity", name.as_str());
        properties.insert("activity_id", id.as_str());
        Self {
            client,
            name,
            id,
            properties,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Adds a property to every metric this activity emits.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn success(mut self) -> Result<Duration, TelemetryError> {
        self.finish(true)
    }

    /// Marks the activity failed and queues `err` as exception telemetry.
    #[track_caller]
    pub fn failure<E>(mut self, err: &E) -> Result<Duration, TelemetryError>
    where
        E: Error + ?Sized,
    {
        let mut exception = ExceptionData::from_error_at_caller(err, SeverityLevel::Error);
        exception.properties = self.properties.clone();
        self.client.track(exception)?;
        self.finish(false)
    }

    fn finish(&mut self, ok: bool) -> Result<Duration, TelemetryError> {
        self.finished = true;
        let elapsed = self.started.elapsed();
        let outcome = if ok { "ok" } else { "err" };

        let mut timing = MetricData::single(
            format!("{}_ms", self.name),
            elapsed.as_secs_f64() * 1000.0,
        );
        timing.properties = self.properties.clone();
        self.client.track(timing)?;

        let mut counter = MetricData::single(format!("{}_{outcome}", self.name), 1.0);
        counter.properties = self.properties.clone();
        self.client.track(counter)?;
        Ok(elapsed)
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        if !self.finished {
            // Nothing to report a full buffer to from here.
            let _ = self.finish(!std::thread::panicking());
        }
    }
}
