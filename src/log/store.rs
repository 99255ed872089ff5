//! Replicated Log Store
//!
//! Append-only, id-ordered message store. The primary allocates ids through
//! the log so append order and id order always agree; secondaries append the
//! ids they receive from the primary.

use std::collections::BTreeMap;

use super::entry::{ClientId, LogEntry, Message, WriteConcern};
use crate::error::{Error, Result};
use crate::id::{MessageId, MessageIdAllocator};

/// Appended to the final entry of a dump or sequential read
pub const LAST_MESSAGE_MARKER: &str = ". This is the last recorded message!";
/// Returned instead of a dump when the log holds nothing
pub const EMPTY_LOG: &str = "Message log is empty";
/// Returned instead of a dump when an id in `1..=max` is absent
pub const MISSING_MESSAGES: &str = "Missing messages, log cannot be retrieved";

/// Result of a full-range read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDump {
    Empty,
    /// First id absent from the expected contiguous range
    Missing { first_missing: u64 },
    Entries(Vec<Message>),
}

impl LogDump {
    /// Render the dump as served by the log endpoint
    pub fn render(&self) -> String {
        match self {
            LogDump::Empty => EMPTY_LOG.to_string(),
            LogDump::Missing { .. } => MISSING_MESSAGES.to_string(),
            LogDump::Entries(messages) => {
                let last = messages.len().saturating_sub(1);
                messages
                    .iter()
                    .enumerate()
                    .map(|(i, m)| {
                        if i == last {
                            format!("#{}: {}{}", m.id, m.text, LAST_MESSAGE_MARKER)
                        } else {
                            format!("#{}: {}", m.id, m.text)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
    }
}

/// Position of a sequential reader
#[derive(Debug, Clone)]
pub struct LogCursor {
    next: u64,
    /// Log length at the previous read; any append restarts the cursor
    seen_len: usize,
}

impl Default for LogCursor {
    fn default() -> Self {
        Self { next: 1, seen_len: 0 }
    }
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next read will look at
    pub fn position(&self) -> u64 {
        self.next
    }
}

/// Result of a sequential read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRead {
    Empty,
    Entry { id: MessageId, text: String, last: bool },
    Missing { id: u64 },
}

impl std::fmt::Display for LogRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogRead::Empty => write!(f, "{}", EMPTY_LOG),
            LogRead::Entry { id, text, last: true } => {
                write!(f, "Message #{} is: {}{}", id, text, LAST_MESSAGE_MARKER)
            }
            LogRead::Entry { id, text, last: false } => write!(f, "Message #{} is: {}", id, text),
            LogRead::Missing { id } => write!(f, "Message #{} was not recorded!", id),
        }
    }
}

/// Append-only message log
#[derive(Debug, Default)]
pub struct ReplicatedLog {
    allocator: MessageIdAllocator,
    entries: BTreeMap<MessageId, LogEntry>,
}

impl ReplicatedLog {
    /// Create a log that allocates ids from `allocator`
    pub fn new(allocator: MessageIdAllocator) -> Self {
        Self {
            allocator,
            entries: BTreeMap::new(),
        }
    }

    /// Allocate the next id and append a new message under it
    pub fn append_next(
        &mut self,
        text: impl Into<String>,
        write_concern: WriteConcern,
        source: Option<ClientId>,
    ) -> Result<Message> {
        let id = self.allocator.next_id();
        let message = Message::new(id, text, write_concern, source);
        self.append(message.clone())?;
        Ok(message)
    }

    /// Append a message under its own id
    pub fn append(&mut self, message: Message) -> Result<()> {
        if self.entries.contains_key(&message.id) {
            return Err(Error::DuplicateEntry(message.id.as_u64()));
        }
        self.entries.insert(message.id, LogEntry::new(message));
        Ok(())
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.entries.get(&id).map(|e| &e.message)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest id stored (0 if empty)
    pub fn last_id(&self) -> u64 {
        self.entries.keys().next_back().map(|id| id.as_u64()).unwrap_or(0)
    }

    /// All messages in ascending id order
    pub fn messages(&self) -> Vec<Message> {
        self.entries.values().map(|e| e.message.clone()).collect()
    }

    /// Read the whole log, refusing partial output when ids are missing
    pub fn read_all(&self) -> LogDump {
        if self.entries.is_empty() {
            return LogDump::Empty;
        }

        // ids are unique and sorted, so the range 1..=max is complete
        // exactly when the count matches max
        let max = self.last_id();
        if self.entries.len() as u64 != max {
            let first_missing = (1..=max)
                .find(|id| !self.entries.contains_key(&MessageId(*id)))
                .unwrap_or(max);
            return LogDump::Missing { first_missing };
        }

        LogDump::Entries(self.messages())
    }

    /// Read one entry at the cursor and advance it
    ///
    /// The cursor stays on the last entry once it gets there, and restarts
    /// from the first entry whenever the log has grown since the last read.
    pub fn read_next(&self, cursor: &mut LogCursor) -> LogRead {
        if self.entries.is_empty() {
            return LogRead::Empty;
        }

        if cursor.seen_len != self.entries.len() {
            cursor.next = 1;
            cursor.seen_len = self.entries.len();
        }

        let id = cursor.next;
        match self.entries.get(&MessageId(id)) {
            Some(entry) => {
                let last = id == self.last_id();
                if !last {
                    cursor.next += 1;
                }
                LogRead::Entry {
                    id: entry.id(),
                    text: entry.message.text.clone(),
                    last,
                }
            }
            None => {
                if id < self.last_id() {
                    cursor.next += 1;
                }
                LogRead::Missing { id }
            }
        }
    }
}
