use super::queue::{Drain, EventBuffer};
use crate::domain::{DraftEnvelope, StampedEnvelope};
use std::time::Instant;
use uuid::Uuid;

pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;

/// Envelopes drained together for one publish.
#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    envelopes: Vec<DraftEnvelope>,
    created_at: Instant,
}

impl Batch {
    pub fn new(envelopes: Vec<DraftEnvelope>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            envelopes,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn envelopes(&self) -> &[DraftEnvelope] {
        &self.envelopes
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Assigns `iKey` and a fresh `seq` to every envelope, in order.
    pub fn stamp<F>(self, ikey: &str, mut next_seq: F) -> StampedBatch
    where
        F: FnMut() -> String,
    {
        let envelopes = self
            .envelopes
            .into_iter()
            .map(|envelope| envelope.stamp(ikey, next_seq()))
            .collect();

        StampedBatch {
            id: self.id,
            envelopes,
            created_at: self.created_at,
        }
    }
}

/// A batch ready for the wire.
#[derive(Debug, Clone)]
pub struct StampedBatch {
    id: String,
    envelopes: Vec<StampedEnvelope>,
    created_at: Instant,
}

impl StampedBatch {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.envelopes.len()
    }

    pub fn envelopes(&self) -> &[StampedEnvelope] {
        &self.envelopes
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Splits one drain of the buffer into batches of at most `max_size`.
pub struct Batcher<'a> {
    drain: Drain<'a>,
    max_size: usize,
}

impl Iterator for Batcher<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let envelopes: Vec<DraftEnvelope> = self.drain.by_ref().take(self.max_size).collect();
        if envelopes.is_empty() {
            None
        } else {
            Some(Batch::new(envelopes))
        }
    }
}

/// Drains everything currently queued in `buffer` into batches. The last
/// batch may be partial; an empty buffer yields no batches. A `max_size` of
/// zero is treated as one.
pub fn to_batches(buffer: &EventBuffer, max_size: usize) -> Batcher<'_> {
    Batcher {
        drain: buffer.drain_available(),
        max_size: max_size.max(1),
    }
}
