//! Log Entry Types
//!
//! Defines the messages stored in the replicated log and the write
//! concern a client attaches to each of them.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::MessageId;

/// Identifier of a writer connection
pub type ClientId = String;

/// Durability a client requests for a single write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WriteConcern {
    /// Answer as soon as the write is accepted
    Unacknowledged = 0,
    /// Answer once the primary's own log holds the write
    Primary = 1,
    /// Answer once at least one secondary acknowledged
    AtLeastOne = 2,
    /// Answer once the full quorum of the membership snapshot acknowledged
    Quorum = 3,
}

impl WriteConcern {
    /// Whether the answer depends on secondary acknowledgements
    pub fn awaits_acks(&self) -> bool {
        matches!(self, WriteConcern::AtLeastOne | WriteConcern::Quorum)
    }

    /// Numeric level as used on the wire
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for WriteConcern {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WriteConcern::Unacknowledged),
            1 => Ok(WriteConcern::Primary),
            2 => Ok(WriteConcern::AtLeastOne),
            3 => Ok(WriteConcern::Quorum),
            other => Err(Error::InvalidWriteConcern(other)),
        }
    }
}

impl From<WriteConcern> for u8 {
    fn from(wc: WriteConcern) -> Self {
        wc.level()
    }
}

impl std::fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wc={}", self.level())
    }
}

/// A logged message. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub write_concern: WriteConcern,
    /// Writer connection that receives the response
    pub source: Option<ClientId>,
}

impl Message {
    pub fn new(
        id: MessageId,
        text: impl Into<String>,
        write_concern: WriteConcern,
        source: Option<ClientId>,
    ) -> Self {
        Self {
            id,
            text: text.into(),
            write_concern,
            source,
        }
    }
}

/// Log record: a message plus local bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub message: Message,
    /// When this node appended the entry
    pub appended_at: chrono::DateTime<chrono::Utc>,
}

impl LogEntry {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            appended_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }
}
