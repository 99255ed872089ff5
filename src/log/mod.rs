//! Replicated Log Module
//!
//! Ordered, append-only storage of client messages, shared by the primary
//! (which allocates ids) and the secondaries (which store what they receive).

pub mod entry;
mod store;

pub use entry::{ClientId, LogEntry, Message, WriteConcern};
pub use store::{
    LogCursor, LogDump, LogRead, ReplicatedLog, EMPTY_LOG, LAST_MESSAGE_MARKER, MISSING_MESSAGES,
};
