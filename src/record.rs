use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Identity and rank of a pending record.
///
/// Ordered by priority descending, then sequence ascending. Because
/// sequences are unique per block this is a strict total order, so two
/// distinct records never collapse into one slot of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub priority: i32,
    pub sequence: u64,
}

impl RecordKey {
    /// Key for a record of `priority` accepted as number `sequence`
    pub fn new(priority: i32, sequence: u64) -> Self {
        Self { priority, sequence }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A payload waiting in the ordering store
#[derive(Debug, Clone)]
pub struct PendingRecord<T> {
    pub key: RecordKey,
    pub payload: T,
    /// When the block accepted the record, for queueing latency
    pub accepted_at: Instant,
}

impl<T> PendingRecord<T> {
    /// Wrap a payload, stamping the acceptance time
    pub fn new(priority: i32, sequence: u64, payload: T) -> Self {
        Self {
            key: RecordKey::new(priority, sequence),
            payload,
            accepted_at: Instant::now(),
        }
    }

    /// Priority the producer supplied
    pub fn priority(&self) -> i32 {
        self.key.priority
    }

    /// Acceptance sequence number
    pub fn sequence(&self) -> u64 {
        self.key.sequence
    }
}

/// Monotonic insertion counter, one per block
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number. Never returns the same value twice.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
