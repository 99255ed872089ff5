//! Message ID Allocation
//!
//! Hands out the sequence numbers that order the replicated log. The
//! allocator is an ordinary value owned by the log rather than process-wide
//! state, so each primary (and each test) gets its own sequence.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a logged message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<MessageId> for u64 {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Monotonic message ID allocator
///
/// Lock-free and safe to share between connection tasks. The first ID
/// handed out is 1.
#[derive(Debug, Default)]
pub struct MessageIdAllocator {
    last: AtomicU64,
}

impl MessageIdAllocator {
    /// Create an allocator whose first ID is 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next ID
    pub fn next_id(&self) -> MessageId {
        MessageId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last ID handed out (0 if none)
    pub fn last_id(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }

    /// Restart the sequence so the next ID is 1
    pub fn reset(&self) {
        self.last.store(0, Ordering::SeqCst);
    }
}
