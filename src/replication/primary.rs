//! Primary Node Implementation
//!
//! Handles master responsibilities: accepting writes, answering writers per
//! their write concern, fanning messages out to secondaries, and bringing
//! newly registered secondaries up to date.

use std::sync::Arc;
use tokio::sync::RwLock;

use super::protocol::WireMessage;
use super::{
    Delivery, NodeStatus, ReplicationConfig, ReplicationEngine, ReplicationNode,
    WriteConcernEvaluator,
};
use crate::config::NodeRole;
use crate::error::{Error, Result};
use crate::id::{MessageId, MessageIdAllocator};
use crate::log::{ClientId, LogCursor, LogDump, LogRead, Message, ReplicatedLog, WriteConcern};
use crate::state::{AckOutcome, AckRecord, AckTracker, MembershipRegistry, Registration};

/// Primary (master) node state
pub struct PrimaryNode {
    /// Node ID
    node_id: String,
    /// The authoritative log
    log: Arc<RwLock<ReplicatedLog>>,
    /// Secondaries and writer connections
    membership: Arc<MembershipRegistry>,
    /// Per-message acknowledgement state
    acks: Arc<AckTracker>,
    /// Fan-out with retries
    engine: Arc<ReplicationEngine>,
    /// Write concern verdicts and responses
    evaluator: Arc<WriteConcernEvaluator>,
}

impl PrimaryNode {
    /// Create a new primary node
    pub fn new(node_id: String, config: &ReplicationConfig, delivery: Arc<dyn Delivery>) -> Self {
        Self::with_allocator(node_id, config, delivery, MessageIdAllocator::new())
    }

    /// Create a primary whose ids come from `allocator`
    pub fn with_allocator(
        node_id: String,
        config: &ReplicationConfig,
        delivery: Arc<dyn Delivery>,
        allocator: MessageIdAllocator,
    ) -> Self {
        let membership = Arc::new(MembershipRegistry::new());
        let acks = Arc::new(AckTracker::new());
        let engine = Arc::new(ReplicationEngine::new(
            delivery,
            Arc::clone(&acks),
            Arc::clone(&membership),
            config,
        ));
        let evaluator = Arc::new(WriteConcernEvaluator::new(
            Arc::clone(&acks),
            Arc::clone(&membership),
            config,
        ));

        Self {
            node_id,
            log: Arc::new(RwLock::new(ReplicatedLog::new(allocator))),
            membership,
            acks,
            engine,
            evaluator,
        }
    }

    /// Accept a write from `client`
    ///
    /// Levels 0 and 1 are answered before this returns. For levels 2 and 3
    /// a watcher answers once enough secondaries acknowledged. Every level
    /// is replicated in the background.
    pub async fn write(
        &self,
        client: Option<ClientId>,
        text: impl Into<String>,
        wc: WriteConcern,
    ) -> Result<Message> {
        let message = self.log.write().await.append_next(text, wc, client)?;
        let snapshot = self.membership.snapshot_secondaries().await;
        self.acks.begin(message.id, &snapshot).await;

        tracing::debug!(
            "Logged message {} ({}) for {} secondaries",
            message.id,
            wc,
            snapshot.len()
        );

        if !wc.awaits_acks() {
            self.evaluator.respond_immediately(&message).await;
        }

        let engine = Arc::clone(&self.engine);
        let outgoing = message.clone();
        tokio::spawn(async move {
            engine.replicate(&outgoing, snapshot).await;
        });

        if wc.awaits_acks() {
            let evaluator = Arc::clone(&self.evaluator);
            let watched = message.clone();
            tokio::spawn(async move {
                evaluator.watch(watched).await;
            });
        }

        Ok(message)
    }

    /// Handle an acknowledgement from a secondary
    pub async fn handle_ack(&self, message_id: MessageId, endpoint: &str) -> Result<AckOutcome> {
        let message = self.log.read().await.get(message_id).cloned();
        let Some(message) = message else {
            tracing::warn!("Ack from {} for unknown message {}", endpoint, message_id);
            return Err(Error::UnknownMessage(message_id.as_u64()));
        };

        let outcome = self.acks.record_ack(message_id, endpoint).await?;
        self.membership.record_ack(endpoint).await;

        match outcome {
            AckOutcome::Counted => {
                tracing::debug!("Message {} acknowledged by {}", message_id, endpoint);
                self.evaluator.try_resolve(&message).await;
            }
            AckOutcome::Duplicate => {
                tracing::trace!("Duplicate ack for message {} from {}", message_id, endpoint);
            }
            AckOutcome::Late => {
                tracing::debug!(
                    "Ack for message {} from {} outside its snapshot, not counted",
                    message_id,
                    endpoint
                );
            }
        }
        Ok(outcome)
    }

    /// Register a secondary and replay the log to it
    ///
    /// Returns false for an endpoint that was already registered.
    pub async fn register_secondary(&self, endpoint: &str) -> bool {
        // holding the log while joining: every message is either in the
        // backlog or has the new endpoint in its snapshot
        let (lane, backlog) = {
            let log = self.log.read().await;
            match self.membership.register_secondary(endpoint).await {
                Registration::Joined { lane } => (lane, log.messages()),
                Registration::AlreadyKnown => {
                    tracing::debug!("Secondary {} is already registered", endpoint);
                    return false;
                }
            }
        };

        tracing::info!("Secondary {} registered", endpoint);

        let engine = Arc::clone(&self.engine);
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            engine.catch_up(&endpoint, lane, backlog).await;
        });
        true
    }

    /// Replication state of one message
    pub async fn ack_record(&self, id: MessageId) -> Option<AckRecord> {
        self.acks.record(id).await
    }

    pub fn membership(&self) -> &Arc<MembershipRegistry> {
        &self.membership
    }
}

#[async_trait::async_trait]
impl ReplicationNode for PrimaryNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn role(&self) -> NodeRole {
        NodeRole::Master
    }

    async fn handle_message(&self, from: &str, message: WireMessage) -> Result<()> {
        match message {
            WireMessage::Register { endpoint } => {
                self.register_secondary(&endpoint).await;
                Ok(())
            }
            WireMessage::Ack {
                message_id,
                endpoint,
            } => {
                self.handle_ack(message_id, &endpoint).await?;
                Ok(())
            }
            WireMessage::Replicate { id, .. } => {
                tracing::warn!("Master got a replication frame for message {} from {}", id, from);
                Ok(())
            }
        }
    }

    async fn read_all(&self) -> LogDump {
        self.log.read().await.read_all()
    }

    async fn read_next(&self, cursor: &mut LogCursor) -> LogRead {
        self.log.read().await.read_next(cursor)
    }

    async fn status(&self) -> NodeStatus {
        let (log_length, last_id) = {
            let log = self.log.read().await;
            (log.len(), log.last_id())
        };
        NodeStatus {
            node_id: self.node_id.clone(),
            role: NodeRole::Master,
            log_length,
            last_id,
            secondaries: self.membership.secondaries().await,
            connected_clients: self.membership.client_count().await,
            master_address: None,
        }
    }
}
