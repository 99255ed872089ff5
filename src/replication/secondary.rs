//! Secondary Node Implementation
//!
//! Handles secondary responsibilities: registering with the master,
//! storing replicated messages, and acknowledging them.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::protocol::WireMessage;
use super::{Delivery, NodeStatus, ReplicationNode};
use crate::config::{NodeRole, SecondaryConfig};
use crate::error::{Error, Result};
use crate::id::MessageId;
use crate::log::{LogCursor, LogDump, LogRead, Message, ReplicatedLog};
use crate::state::Endpoint;

/// Secondary node state
pub struct SecondaryNode {
    /// Node ID
    node_id: String,
    /// Endpoint the master delivers to
    endpoint: Endpoint,
    /// Master's cluster address
    master_address: String,
    /// Local copy of the replicated log
    log: RwLock<ReplicatedLog>,
    /// Outbound frames to the master
    delivery: Arc<dyn Delivery>,
    /// Delay before acknowledging
    apply_delay: Duration,
    /// Wait between registration attempts
    register_retry: Duration,
    /// Set once the master accepted our registration
    registered: RwLock<bool>,
}

impl SecondaryNode {
    /// Create a new secondary node
    pub fn new(
        node_id: String,
        endpoint: Endpoint,
        master_address: String,
        config: &SecondaryConfig,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        Self {
            node_id,
            endpoint,
            master_address,
            log: RwLock::new(ReplicatedLog::default()),
            delivery,
            apply_delay: config.apply_delay(),
            register_retry: config.register_retry(),
            registered: RwLock::new(false),
        }
    }

    /// Announce this secondary to the master, retrying until it is reachable
    pub async fn register(&self) {
        let frame = WireMessage::Register {
            endpoint: self.endpoint.clone(),
        };
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            match self.delivery.deliver(&self.master_address, &frame).await {
                Ok(()) => {
                    *self.registered.write().await = true;
                    tracing::info!(
                        "Registered with master {} as {} (attempt {})",
                        self.master_address,
                        self.endpoint,
                        attempts
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "Registration with master {} failed: {}, retrying in {:?}",
                        self.master_address,
                        e,
                        self.register_retry
                    );
                    tokio::time::sleep(self.register_retry).await;
                }
            }
        }
    }

    pub async fn is_registered(&self) -> bool {
        *self.registered.read().await
    }

    /// Store a replicated message and schedule its acknowledgement
    ///
    /// Messages already held (catch-up overlapping live delivery) are
    /// acknowledged again without being stored twice.
    pub async fn handle_replicate(&self, message: Message) -> Result<()> {
        let id = message.id;
        match self.log.write().await.append(message) {
            Ok(()) => tracing::info!("Stored replicated message {}", id),
            Err(Error::DuplicateEntry(_)) => tracing::debug!("Message {} already stored", id),
            Err(e) => return Err(e),
        }

        let delivery = Arc::clone(&self.delivery);
        let master = self.master_address.clone();
        let endpoint = self.endpoint.clone();
        let delay = self.apply_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            send_ack(delivery.as_ref(), &master, id, endpoint).await;
        });
        Ok(())
    }

    pub async fn contains(&self, id: MessageId) -> bool {
        self.log.read().await.contains(id)
    }

    /// Messages held locally, in id order
    pub async fn messages(&self) -> Vec<Message> {
        self.log.read().await.messages()
    }
}

async fn send_ack(delivery: &dyn Delivery, master: &str, id: MessageId, endpoint: Endpoint) {
    let frame = WireMessage::Ack {
        message_id: id,
        endpoint,
    };
    match delivery.deliver(master, &frame).await {
        Ok(()) => tracing::debug!("Acknowledged message {}", id),
        Err(e) => tracing::warn!("Failed to acknowledge message {} to {}: {}", id, master, e),
    }
}

#[async_trait::async_trait]
impl ReplicationNode for SecondaryNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn role(&self) -> NodeRole {
        NodeRole::Secondary
    }

    async fn handle_message(&self, from: &str, message: WireMessage) -> Result<()> {
        match message {
            WireMessage::Replicate {
                id,
                message,
                wc,
                source,
            } => self.handle_replicate(Message::new(id, message, wc, source)).await,
            other => {
                tracing::warn!("Secondary ignoring {} frame from {}", other.type_name(), from);
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
        let log = self.log.read().await;
        NodeStatus {
            node_id: self.node_id.clone(),
            role: NodeRole::Secondary,
            log_length: log.len(),
            last_id: log.last_id(),
            secondaries: Vec::new(),
            connected_clients: 0,
            master_address: Some(self.master_address.clone()),
        }
    }
}
