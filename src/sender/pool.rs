use crate::domain::TelemetryError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const MAX_DEFAULT_WORKERS: usize = 8;

/// `min(8, cpus + 1)`.
pub fn default_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    MAX_DEFAULT_WORKERS.min(cpus + 1)
}

#[derive(Debug)]
struct PoolInner {
    permits: Arc<Semaphore>,
    size: usize,
    closed: AtomicBool,
    handle: Handle,
}

/// Bounded set of concurrent send tasks on the current tokio runtime.
/// Clones share the same permits, so one pool can serve several publishers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize) -> Result<Self, TelemetryError> {
        let handle = Handle::try_current().map_err(|e| {
            TelemetryError::Configuration(format!("Worker pool needs a tokio runtime: {e}"))
        })?;
        let size = size.max(1);

        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(size)),
                size,
                closed: AtomicBool::new(false),
                handle,
            }),
        })
    }

    pub fn with_default_size() -> Result<Self, TelemetryError> {
        Self::new(default_size())
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Runs `task` once a worker slot is free. Returns `None` when the pool is
    /// already closed; the task itself yields `None` if the pool closes while
    /// it is still waiting for a slot.
    pub fn spawn<F, T>(&self, task: F) -> Option<JoinHandle<Option<T>>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return None;
        }

        let permits = Arc::clone(&self.inner.permits);
        Some(self.inner.handle.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            Some(task.await)
        }))
    }

    /// Stops accepting work. Tasks already holding a slot run to completion.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.permits.close();
        }
    }
}
