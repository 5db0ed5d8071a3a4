use super::error::BufferError;
use super::metrics::BufferMetrics;
use crate::domain::DraftEnvelope;
use clap::ValueEnum;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

const MAX_CAPACITY: usize = 10_000_000;

/// What `push` does when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the envelope with `CapacityExceeded`.
    #[default]
    Reject,
    /// Discard the incoming envelope.
    DropNewest,
    /// Evict the oldest queued envelope to make room.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedNewest,
    EvictedOldest,
}

/// Bounded FIFO between producers and the publisher.
///
/// `push` never blocks on capacity. Any number of threads may push; one
/// consumer drains at a time.
pub struct EventBuffer {
    queue: Mutex<VecDeque<DraftEnvelope>>,
    drain_lock: Mutex<()>,
    capacity: usize,
    policy: OverflowPolicy,
    closed: AtomicBool,
    pushed: AtomicU64,
    drained: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    current_len: AtomicUsize,
    peak_len: AtomicUsize,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Self::with_policy(capacity, OverflowPolicy::default())
    }

    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Result<Self, BufferError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(BufferError::InvalidCapacity { capacity });
        }

        Ok(Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            drain_lock: Mutex::new(()),
            capacity,
            policy,
            closed: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            current_len: AtomicUsize::new(0),
            peak_len: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.current_len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuses further pushes. Queued envelopes stay drainable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn push(&self, envelope: DraftEnvelope) -> Result<PushOutcome, BufferError> {
        if self.is_closed() {
            return Err(BufferError::Closed);
        }

        let mut queue = self.queue.lock();
        let outcome = if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::Reject => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(BufferError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropNewest => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(PushOutcome::DroppedNewest);
                }
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::EvictedOldest
                }
            }
        } else {
            PushOutcome::Queued
        };

        queue.push_back(envelope);
        let len = queue.len();
        self.current_len.store(len, Ordering::Release);
        drop(queue);

        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.update_peak_len(len);
        Ok(outcome)
    }

    /// Everything queued right now, oldest first. Never waits for new
    /// arrivals; envelopes pushed after the drain starts are left for the next one.
    pub fn drain_available(&self) -> Drain<'_> {
        let guard = self.drain_lock.lock();
        Drain {
            buffer: self,
            remaining: self.len(),
            _guard: guard,
        }
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            capacity: self.capacity,
            len: self.len(),
            peak_len: self.peak_len.load(Ordering::Relaxed),
            pushed: self.pushed.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn pop(&self) -> Option<DraftEnvelope> {
        let mut queue = self.queue.lock();
        let envelope = queue.pop_front()?;
        self.current_len.store(queue.len(), Ordering::Release);
        drop(queue);

        self.drained.fetch_add(1, Ordering::Relaxed);
        Some(envelope)
    }

    fn update_peak_len(&self, current: usize) {
        let mut peak = self.peak_len.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_len.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => peak = x,
            }
        }
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &self.len())
            .field("pushed", &self.pushed.load(Ordering::Relaxed))
            .field("drained", &self.drained.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Lazy, finite drain over an `EventBuffer`; see `EventBuffer::drain_available`.
pub struct Drain<'a> {
    buffer: &'a EventBuffer,
    remaining: usize,
    _guard: MutexGuard<'a, ()>,
}

impl Iterator for Drain<'_> {
    type Item = DraftEnvelope;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.buffer.pop() {
            Some(envelope) => {
                self.remaining -= 1;
                Some(envelope)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventData, MessageData, SeverityLevel};
    use std::sync::Arc;
    use std::thread;

    fn envelope(n: usize) -> DraftEnvelope {
        DraftEnvelope::new(MessageData::new(format!("msg-{n}"), SeverityLevel::Information))
    }

    fn message_of(envelope: &DraftEnvelope) -> String {
        match &envelope.data {
            crate::domain::Data::Message(m) => m.message.clone(),
            other => panic!("unexpected payload {}", other.base_type()),
        }
    }

    #[test]
    fn test_invalid_capacity() {
        assert_eq!(
            EventBuffer::new(0).unwrap_err(),
            BufferError::InvalidCapacity { capacity: 0 }
        );
        assert!(EventBuffer::new(MAX_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_push_and_drain_preserves_order() {
        let buffer = EventBuffer::new(10).unwrap();
        for i in 0..5 {
            assert_eq!(buffer.push(envelope(i)).unwrap(), PushOutcome::Queued);
        }
        assert_eq!(buffer.len(), 5);

        let drained: Vec<_> = buffer.drain_available().map(|e| message_of(&e)).collect();
        assert_eq!(drained, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_on_empty_terminates() {
        let buffer = EventBuffer::new(4).unwrap();
        assert_eq!(buffer.drain_available().count(), 0);
    }

    #[test]
    fn test_reject_policy_raises_capacity_exceeded() {
        let buffer = EventBuffer::new(2).unwrap();
        buffer.push(envelope(0)).unwrap();
        buffer.push(envelope(1)).unwrap();

        let err = buffer.push(envelope(2)).unwrap_err();
        assert_eq!(err, BufferError::CapacityExceeded { capacity: 2 });
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.metrics().rejected, 1);
    }

    #[test]
    fn test_drop_newest_policy() {
        let buffer = EventBuffer::with_policy(2, OverflowPolicy::DropNewest).unwrap();
        buffer.push(envelope(0)).unwrap();
        buffer.push(envelope(1)).unwrap();
        assert_eq!(buffer.push(envelope(2)).unwrap(), PushOutcome::DroppedNewest);

        let drained: Vec<_> = buffer.drain_available().map(|e| message_of(&e)).collect();
        assert_eq!(drained, vec!["msg-0", "msg-1"]);
        assert_eq!(buffer.metrics().dropped, 1);
    }

    #[test]
    fn test_drop_oldest_policy() {
        let buffer = EventBuffer::with_policy(2, OverflowPolicy::DropOldest).unwrap();
        buffer.push(envelope(0)).unwrap();
        buffer.push(envelope(1)).unwrap();
        assert_eq!(buffer.push(envelope(2)).unwrap(), PushOutcome::EvictedOldest);

        let drained: Vec<_> = buffer.drain_available().map(|e| message_of(&e)).collect();
        assert_eq!(drained, vec!["msg-1", "msg-2"]);
    }

    #[test]
    fn test_closed_buffer_refuses_push_but_drains() {
        let buffer = EventBuffer::new(4).unwrap();
        buffer.push(envelope(0)).unwrap();
        buffer.close();

        assert_eq!(buffer.push(envelope(1)).unwrap_err(), BufferError::Closed);
        assert_eq!(buffer.drain_available().count(), 1);
    }

    #[test]
    fn test_drain_ignores_late_arrivals() {
        let buffer = EventBuffer::new(10).unwrap();
        buffer.push(envelope(0)).unwrap();
        buffer.push(envelope(1)).unwrap();

        let mut drain = buffer.drain_available();
        assert!(drain.next().is_some());
        // Producers are not blocked by an active drain.
        buffer.push(DraftEnvelope::new(EventData::new("late"))).unwrap();
        assert!(drain.next().is_some());
        assert!(drain.next().is_none());
        drop(drain);

        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let buffer = Arc::new(EventBuffer::new(10_000).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..500 {
                        buffer.push(envelope(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = buffer.metrics();
        assert_eq!(metrics.pushed, 4000);
        assert_eq!(metrics.len, 4000);
        assert_eq!(metrics.peak_len, 4000);
        assert_eq!(buffer.drain_available().count(), 4000);
        assert_eq!(buffer.metrics().drained, 4000);
    }
}
