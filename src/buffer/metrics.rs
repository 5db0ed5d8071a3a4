/// Point-in-time counters for an `EventBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferMetrics {
    pub capacity: usize,
    pub len: usize,
    pub peak_len: usize,
    pub pushed: u64,
    pub drained: u64,
    /// Envelopes discarded by a drop policy.
    pub dropped: u64,
    /// Pushes refused with `CapacityExceeded`.
    pub rejected: u64,
}

impl BufferMetrics {
    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.len as f64 / self.capacity as f64
    }
}
