//! Replication Module
//!
//! Primary-to-secondary replication: the wire protocol, the delivery
//! engine, write concern evaluation, and the two node roles.

pub mod protocol;
mod engine;
mod concern;
mod primary;
mod secondary;

pub use protocol::{ClientFrame, FrameHeader, WireMessage};
pub use engine::{Backoff, Delivery, ReplicationEngine, ReplicationReport};
pub use concern::{ConcernState, WriteConcernEvaluator};
pub use primary::PrimaryNode;
pub use secondary::SecondaryNode;
pub use crate::config::ReplicationConfig;

use serde::Serialize;

use crate::config::NodeRole;
use crate::log::{LogCursor, LogDump, LogRead};
use crate::state::SecondaryState;

/// Node summary served by the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub role: NodeRole,
    pub log_length: usize,
    pub last_id: u64,
    /// Registered secondaries (master only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secondaries: Vec<SecondaryState>,
    pub connected_clients: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_address: Option<String>,
}

/// Common trait for replication nodes
#[async_trait::async_trait]
pub trait ReplicationNode: Send + Sync {
    /// Get the node ID
    fn node_id(&self) -> &str;

    fn role(&self) -> NodeRole;

    /// Handle a frame received on the cluster channel
    async fn handle_message(&self, from: &str, message: WireMessage) -> crate::Result<()>;

    /// Full log dump
    async fn read_all(&self) -> LogDump;

    /// Sequential log read
    async fn read_next(&self, cursor: &mut LogCursor) -> LogRead;

    async fn status(&self) -> NodeStatus;
}
