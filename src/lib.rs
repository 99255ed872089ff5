//! replog - Primary-Backup Replicated Message Log
//!
//! A master node accepts writes from clients, appends them to an ordered
//! log, replicates them to a dynamic set of secondaries, and answers each
//! writer once the write concern it asked for is met.
//!
//! # Write concerns
//!
//! - `0`: answered as soon as the write is accepted
//! - `1`: answered once the master's log holds it
//! - `2`: answered once at least one secondary acknowledged
//! - `3`: answered once every secondary of the membership snapshot
//!   acknowledged (or the configured quorum of them)
//!
//! # Features
//!
//! - Retries with exponential backoff and seedable jitter
//! - Catch-up of the whole log for late-joining secondaries
//! - Exactly one response per message
//! - HTTP log dump and WebSocket writer channel

pub mod config;
pub mod error;
pub mod id;
pub mod log;
pub mod state;
pub mod replication;
pub mod network;
pub mod api;

pub use config::ReplogConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NodeRole, ReplogConfig};
    pub use crate::error::{Error, Result};
    pub use crate::id::{MessageId, MessageIdAllocator};
    pub use crate::log::{Message, ReplicatedLog, WriteConcern};
    pub use crate::replication::{PrimaryNode, ReplicationNode, SecondaryNode, WireMessage};
    pub use crate::state::{AckTracker, MembershipRegistry};
}
