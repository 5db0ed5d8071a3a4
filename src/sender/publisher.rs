use super::client::{ClientConfig, ConnectionStats, HttpClient};
use super::pool::{WorkerPool, default_size};
use super::serialization::RejectedEnvelope;
use super::transmission::{BatchTransmitter, CompressionPolicy, PublishResult};
use crate::buffer::{Batch, DEFAULT_BATCH_MAX_SIZE, EventBuffer, StampedBatch, to_batches};
use crate::domain::{StampedEnvelope, TelemetryError};
use crate::reliability::{ErrorHandler, RetryConfig, RetryPolicy, SideChannelErrorHandler};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, info, warn};

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a batch running on the worker pool. Resolves to `None` when the
/// pool closed before the batch got a worker.
pub type PublishHandle = JoinHandle<Option<PublishResult>>;

/// Source of envelope `seq` values, seeded from the wall clock so that
/// sequences from successive processes do not collide.
#[derive(Debug)]
struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    fn seeded_from_clock() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self {
            next: AtomicU64::new(millis),
        }
    }

    fn next(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}

pub struct PublisherBuilder {
    client_config: ClientConfig,
    instrumentation_key: String,
    retry: RetryConfig,
    compression: CompressionPolicy,
    batch_max_size: usize,
    publish_timeout: Duration,
    pool: Option<WorkerPool>,
    pool_size: Option<usize>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl PublisherBuilder {
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        Self {
            client_config: ClientConfig::default(),
            instrumentation_key: instrumentation_key.into(),
            retry: RetryConfig::default(),
            compression: CompressionPolicy::default(),
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            pool: None,
            pool_size: None,
            error_handler: None,
        }
    }

    pub fn ingestion_url(mut self, url: impl Into<String>) -> Self {
        self.client_config.ingestion_url = url.into();
        self
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn compression(mut self, compression: CompressionPolicy) -> Self {
        self.compression = compression;
        self
    }

    /// Shorthand for `compression(CompressionPolicy::from_threshold(..))`.
    pub fn gzip_threshold(self, threshold: i64) -> Self {
        self.compression(CompressionPolicy::from_threshold(threshold))
    }

    pub fn batch_max_size(mut self, size: usize) -> Self {
        self.batch_max_size = size;
        self
    }

    pub fn publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Runs sends on a pool owned by the caller. `close` leaves it open.
    pub fn shared_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Size of the pool the publisher creates for itself.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn error_handler<H>(mut self, handler: H) -> Self
    where
        H: ErrorHandler + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Builds the publisher. Without a shared pool this has to run inside a
    /// tokio runtime.
    pub fn build(self) -> Result<Publisher, TelemetryError> {
        if self.instrumentation_key.trim().is_empty() {
            return Err(TelemetryError::Configuration(
                "Instrumentation key must not be empty".to_string(),
            ));
        }
        if self.batch_max_size == 0 {
            return Err(TelemetryError::Configuration(
                "Batch max size must be greater than 0".to_string(),
            ));
        }
        if self.publish_timeout.is_zero() {
            return Err(TelemetryError::Configuration(
                "Publish timeout must be greater than 0".to_string(),
            ));
        }
        self.retry
            .validate()
            .map_err(|e| TelemetryError::Configuration(e.to_string()))?;

        let client = HttpClient::new(self.client_config)?;
        let (pool, owns_pool) = match self.pool {
            Some(pool) => (pool, false),
            None => (
                WorkerPool::new(self.pool_size.unwrap_or_else(default_size))?,
                true,
            ),
        };
        let error_handler = self
            .error_handler
            .unwrap_or_else(|| Arc::new(SideChannelErrorHandler::new()));

        info!(
            "Publisher ready: endpoint={}, workers={}, max_attempts={}, gzip_threshold={:?}",
            client.ingestion_url(),
            pool.size(),
            self.retry.max_attempts,
            self.compression.threshold()
        );

        Ok(Publisher {
            inner: Arc::new(PublisherInner {
                transmitter: BatchTransmitter::new(client, self.compression),
                retry: RetryPolicy::new(self.retry),
                error_handler,
                instrumentation_key: self.instrumentation_key,
                sequence: SequenceGenerator::seeded_from_clock(),
                batch_max_size: self.batch_max_size,
                publish_timeout: self.publish_timeout,
                pool,
                owns_pool,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }
}

struct PublisherInner {
    transmitter: BatchTransmitter,
    retry: RetryPolicy,
    error_handler: Arc<dyn ErrorHandler>,
    instrumentation_key: String,
    sequence: SequenceGenerator,
    batch_max_size: usize,
    publish_timeout: Duration,
    pool: WorkerPool,
    owns_pool: bool,
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

/// Counts one dispatched batch until dropped.
struct InFlightGuard {
    inner: Arc<PublisherInner>,
}

impl InFlightGuard {
    fn new(inner: &Arc<PublisherInner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::clone(inner),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

enum Dispatched {
    Running {
        batch: Arc<StampedBatch>,
        handle: PublishHandle,
    },
    Finished(PublishResult),
}

/// Stamps batches and sends them to ingestion with retries.
///
/// Cloning is cheap; clones share the pool, the sequence counter and the
/// in-flight count.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    pub fn builder(instrumentation_key: impl Into<String>) -> PublisherBuilder {
        PublisherBuilder::new(instrumentation_key)
    }

    pub fn instrumentation_key(&self) -> &str {
        &self.inner.instrumentation_key
    }

    pub fn ingestion_url(&self) -> &url::Url {
        self.inner.transmitter.client.ingestion_url()
    }

    pub fn batch_max_size(&self) -> usize {
        self.inner.batch_max_size
    }

    pub fn publish_timeout(&self) -> Duration {
        self.inner.publish_timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.inner.transmitter.client.connection_stats()
    }

    /// Assigns `iKey` and `seq` to every envelope of the batch.
    pub fn stamp(&self, batch: Batch) -> StampedBatch {
        let sequence = &self.inner.sequence;
        batch.stamp(&self.inner.instrumentation_key, || sequence.next())
    }

    /// Drains everything currently in `buffer`, sends it in batches on the
    /// worker pool and waits for the results, at most `publish_timeout` in
    /// total. Batches still running at the deadline are reported as failed
    /// but keep running. A closed publisher leaves the buffer untouched.
    pub async fn publish(&self, buffer: &EventBuffer) -> Vec<PublishResult> {
        if self.is_closed() {
            debug!("Publisher is closed; leaving {} envelopes queued", buffer.len());
            return Vec::new();
        }

        let deadline = Instant::now() + self.inner.publish_timeout;
        let dispatched = self.dispatch_available(buffer);
        if dispatched.is_empty() {
            return Vec::new();
        }
        debug!("Dispatched {} batch(es)", dispatched.len());

        let publish_timeout = self.inner.publish_timeout;
        join_all(dispatched.into_iter().map(|entry| async move {
            match entry {
                Dispatched::Finished(result) => result,
                Dispatched::Running { batch, handle } => {
                    let lost = match timeout_at(deadline, handle).await {
                        Ok(Ok(Some(result))) => return result,
                        Ok(Ok(None)) => "Worker pool closed before the batch was sent".to_string(),
                        Ok(Err(e)) => format!("Send task failed: {e}"),
                        Err(_) => {
                            // Still running; it reports its own failure.
                            warn!("Batch {} did not finish within {:?}", batch.id(), publish_timeout);
                            return PublishResult::not_sent(
                                batch.id(),
                                batch.size(),
                                TelemetryError::Timeout(publish_timeout).to_string(),
                            );
                        }
                    };
                    let result = PublishResult::not_sent(batch.id(), batch.size(), lost);
                    self.report_failure(&batch, &result);
                    result
                }
            }
        }))
        .await
    }

    // Kept synchronous: the drain guard must not live across an await.
    fn dispatch_available(&self, buffer: &EventBuffer) -> Vec<Dispatched> {
        to_batches(buffer, self.inner.batch_max_size)
            .map(|batch| self.dispatch(batch))
            .collect()
    }

    fn dispatch(&self, batch: Batch) -> Dispatched {
        let stamped = Arc::new(self.stamp(batch));

        let guard = InFlightGuard::new(&self.inner);
        let publisher = self.clone();
        let task_batch = Arc::clone(&stamped);
        let spawned = self.inner.pool.spawn(async move {
            let _guard = guard;
            publisher.send_batch(&task_batch).await
        });

        match spawned {
            Some(handle) => Dispatched::Running {
                batch: stamped,
                handle,
            },
            None => {
                let result =
                    PublishResult::not_sent(stamped.id(), stamped.size(), "Worker pool is closed");
                self.report_failure(&stamped, &result);
                Dispatched::Finished(result)
            }
        }
    }

    /// Stamps and dispatches one batch without waiting for it.
    pub fn submit(&self, batch: Batch) -> Result<PublishHandle, TelemetryError> {
        if self.is_closed() {
            return Err(TelemetryError::Closed);
        }
        match self.dispatch(batch) {
            Dispatched::Running { handle, .. } => Ok(handle),
            Dispatched::Finished(_) => Err(TelemetryError::Closed),
        }
    }

    /// Sends one stamped batch on the current task, retrying per the policy.
    /// Terminal failures are passed to the error handler before returning.
    pub async fn send_batch(&self, batch: &StampedBatch) -> PublishResult {
        let transmitter = &self.inner.transmitter;
        let retry = &self.inner.retry;
        let started = std::time::Instant::now();

        let payload = match transmitter.prepare_payload(batch) {
            Ok(payload) => payload,
            Err(e) => {
                let result = PublishResult::not_sent(batch.id(), batch.size(), e.to_string());
                self.report_failure(batch, &result);
                return result;
            }
        };
        if !payload.rejected.is_empty() {
            self.report_rejected(batch, &payload.rejected);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = transmitter.send_once(batch.id(), &payload, attempt).await;
            let status_code = outcome.status_code;
            let success = outcome.is_success();
            let result =
                PublishResult::from_outcome(batch.id(), batch.size(), &payload, outcome, attempt, started);

            if success {
                debug!(
                    "Batch {} delivered on attempt {} ({} envelopes)",
                    batch.id(),
                    attempt,
                    payload.accepted
                );
                return result;
            }

            if retry.should_retry(attempt, status_code) {
                debug!(
                    "Retrying batch {} in {:?} (attempt {} of {})",
                    batch.id(),
                    retry.delay(),
                    attempt + 1,
                    retry.max_sends()
                );
                sleep(retry.delay()).await;
                continue;
            }

            warn!(
                "Giving up on batch {} after {} attempt(s): status {}",
                batch.id(),
                attempt,
                status_code
            );
            self.report_failure(batch, &result);
            return result;
        }
    }

    fn report_failure(&self, batch: &StampedBatch, result: &PublishResult) {
        self.inner.error_handler.on_failure(batch.envelopes(), result);
    }

    // The rest of the batch is still sent; only the unencodable envelopes go
    // to the handler here.
    fn report_rejected(&self, batch: &StampedBatch, rejected: &[RejectedEnvelope]) {
        let envelopes: Vec<StampedEnvelope> = rejected
            .iter()
            .filter_map(|r| batch.envelopes().get(r.index).cloned())
            .collect();
        let mut result = PublishResult::not_sent(
            batch.id(),
            envelopes.len(),
            format!(
                "{} envelope(s) could not be serialized: {}",
                rejected.len(),
                rejected.first().map(|r| r.error.as_str()).unwrap_or_default()
            ),
        );
        result.rejected = rejected.to_vec();
        self.inner.error_handler.on_failure(&envelopes, &result);
    }

    /// Stops accepting batches, waits up to `publish_timeout` for in-flight
    /// sends, then closes the pool if this publisher created it. Later calls
    /// return immediately.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let pending = self.in_flight();
        if pending > 0 {
            info!("Closing publisher; waiting for {} in-flight batch(es)", pending);
        }

        let drained = timeout(self.inner.publish_timeout, self.wait_idle()).await;
        if drained.is_err() {
            warn!(
                "Publisher closed with {} batch(es) still in flight after {:?}",
                self.in_flight(),
                self.inner.publish_timeout
            );
        }

        if self.inner.owns_pool {
            self.inner.pool.close();
        }
        debug!("Publisher closed");
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("ingestion_url", &self.ingestion_url().as_str())
            .field("batch_max_size", &self.inner.batch_max_size)
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
