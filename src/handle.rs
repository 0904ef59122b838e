use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Correlation identifier for a single offer attempt.
///
/// Handles only correlate the two-phase consume negotiation; they never
/// order anything. Id `0` is the malformed handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageHandle(u64);

impl MessageHandle {
    /// The handle used by one-shot posts that carry no negotiation state
    pub const SINGLE: MessageHandle = MessageHandle(1);

    /// Wrap a raw id. Zero produces an invalid handle.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub const fn id(&self) -> u64 {
        self.0
    }

    /// Whether the handle is well-formed
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mints a fresh handle for every delivery attempt.
///
/// Owned by one block; never shared process-wide.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    /// Create an allocator whose first handle is `#1`
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next handle. Safe under concurrent calls.
    pub fn allocate(&self) -> MessageHandle {
        MessageHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Number of handles minted so far
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
