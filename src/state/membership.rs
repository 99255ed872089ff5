//! Membership Registry
//!
//! Tracks the secondaries that registered with the primary and the writer
//! connections responses are routed to.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};

use crate::log::ClientId;
use crate::error::{Error, Result};

/// Endpoint (host:port) a secondary listens on
pub type Endpoint = String;

/// Immutable set of secondaries captured when a fan-out starts
pub type MembershipSnapshot = BTreeSet<Endpoint>;

/// Secondary status as seen by the primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryStatus {
    /// Registered, backlog replay in progress
    CatchingUp,
    /// Backlog replayed, receiving live messages
    Active,
}

impl std::fmt::Display for SecondaryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecondaryStatus::CatchingUp => write!(f, "CATCHING_UP"),
            SecondaryStatus::Active => write!(f, "ACTIVE"),
        }
    }
}

/// State of a single secondary
#[derive(Debug, Clone, Serialize)]
pub struct SecondaryState {
    pub endpoint: Endpoint,
    pub status: SecondaryStatus,
    pub registered_at: chrono::DateTime<chrono::Utc>,
    pub acks_received: u64,
    /// Last ack time (not serialized)
    #[serde(skip)]
    pub last_ack: Option<Instant>,
    /// Serializes deliveries to this secondary (not serialized)
    #[serde(skip)]
    lane: Arc<Mutex<()>>,
}

impl SecondaryState {
    fn new(endpoint: Endpoint, lane: Arc<Mutex<()>>) -> Self {
        Self {
            endpoint,
            status: SecondaryStatus::CatchingUp,
            registered_at: chrono::Utc::now(),
            acks_received: 0,
            last_ack: None,
            lane,
        }
    }
}

/// Outcome of a secondary registration
pub enum Registration {
    /// First registration. The guard holds the secondary's delivery lane so
    /// the backlog replay runs before any live delivery reaches it.
    Joined { lane: OwnedMutexGuard<()> },
    /// Endpoint was already registered
    AlreadyKnown,
}

/// Connection handle of a writer client
///
/// Frames pushed here are written to the client's socket by its connection
/// task, in order.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    /// Create a handle and the receiver the connection task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a text frame for the client
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(text.into())
            .map_err(|_| Error::Network("client connection closed".into()))
    }

    /// Whether the connection task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn same_connection(&self, other: &ClientHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Registry of secondaries and writer connections
#[derive(Default)]
pub struct MembershipRegistry {
    secondaries: RwLock<BTreeMap<Endpoint, SecondaryState>>,
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secondary. Repeated registrations are no-ops.
    pub async fn register_secondary(&self, endpoint: &str) -> Registration {
        let mut secondaries = self.secondaries.write().await;
        if secondaries.contains_key(endpoint) {
            return Registration::AlreadyKnown;
        }

        let lane = Arc::new(Mutex::new(()));
        // a fresh lane is never contended
        let guard = match Arc::clone(&lane).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => Arc::clone(&lane).lock_owned().await,
        };
        secondaries.insert(endpoint.to_string(), SecondaryState::new(endpoint.to_string(), lane));
        Registration::Joined { lane: guard }
    }

    /// Copy of the current secondary set
    pub async fn snapshot_secondaries(&self) -> MembershipSnapshot {
        self.secondaries.read().await.keys().cloned().collect()
    }

    /// Number of registered secondaries
    pub async fn secondary_count(&self) -> usize {
        self.secondaries.read().await.len()
    }

    pub async fn get_secondary(&self, endpoint: &str) -> Option<SecondaryState> {
        self.secondaries.read().await.get(endpoint).cloned()
    }

    pub async fn secondaries(&self) -> Vec<SecondaryState> {
        self.secondaries.read().await.values().cloned().collect()
    }

    /// Delivery lane of a secondary
    pub async fn lane(&self, endpoint: &str) -> Option<Arc<Mutex<()>>> {
        self.secondaries
            .read()
            .await
            .get(endpoint)
            .map(|s| Arc::clone(&s.lane))
    }

    pub async fn set_status(&self, endpoint: &str, status: SecondaryStatus) {
        let mut secondaries = self.secondaries.write().await;
        if let Some(secondary) = secondaries.get_mut(endpoint) {
            secondary.status = status;
        }
    }

    /// Note an acknowledgement from a secondary
    pub async fn record_ack(&self, endpoint: &str) {
        let mut secondaries = self.secondaries.write().await;
        match secondaries.get_mut(endpoint) {
            Some(secondary) => {
                secondary.acks_received += 1;
                secondary.last_ack = Some(Instant::now());
            }
            None => tracing::warn!("record_ack: secondary '{}' is not registered", endpoint),
        }
    }

    /// Register (or replace) a writer connection
    pub async fn register_client(&self, id: ClientId, handle: ClientHandle) {
        let mut clients = self.clients.write().await;
        if clients.insert(id.clone(), handle).is_some() {
            tracing::info!("Client {} reconnected, replacing previous connection", id);
        }
    }

    /// Drop a writer connection, unless it was already replaced by a newer one
    pub async fn unregister_client(&self, id: &str, handle: &ClientHandle) {
        let mut clients = self.clients.write().await;
        if clients.get(id).is_some_and(|h| h.same_connection(handle)) {
            clients.remove(id);
        }
    }

    pub async fn client(&self, id: &str) -> Option<ClientHandle> {
        self.clients.read().await.get(id).cloned()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = MembershipRegistry::new();

        assert!(matches!(
            registry.register_secondary("10.0.0.2:7654").await,
            Registration::Joined { .. }
        ));
        assert!(matches!(
            registry.register_secondary("10.0.0.2:7654").await,
            Registration::AlreadyKnown
        ));
        assert_eq!(registry.secondary_count().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_not_affected_by_later_joins() {
        let registry = MembershipRegistry::new();
        registry.register_secondary("a:1").await;

        let snapshot = registry.snapshot_secondaries().await;
        registry.register_secondary("b:1").await;

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("a:1"));
        assert_eq!(registry.snapshot_secondaries().await.len(), 2);
    }

    #[tokio::test]
    async fn test_join_holds_lane_until_dropped() {
        let registry = MembershipRegistry::new();
        let guard = match registry.register_secondary("a:1").await {
            Registration::Joined { lane } => lane,
            Registration::AlreadyKnown => panic!("expected a fresh join"),
        };

        let lane = registry.lane("a:1").await.unwrap();
        assert!(lane.try_lock().is_err());
        drop(guard);
        assert!(lane.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_record_ack_updates_secondary() {
        let registry = MembershipRegistry::new();
        registry.register_secondary("a:1").await;
        registry.record_ack("a:1").await;
        registry.record_ack("unknown:1").await;

        let state = registry.get_secondary("a:1").await.unwrap();
        assert_eq!(state.acks_received, 1);
        assert!(state.last_ack.is_some());
    }

    #[tokio::test]
    async fn test_client_table() {
        let registry = MembershipRegistry::new();
        let (first, _rx1) = ClientHandle::channel();
        let (second, mut rx2) = ClientHandle::channel();

        registry.register_client("7".into(), first.clone()).await;
        registry.register_client("7".into(), second.clone()).await;

        // the stale connection closing must not evict the new one
        registry.unregister_client("7", &first).await;
        let routed = registry.client("7").await.unwrap();
        routed.send_text("hello").unwrap();
        assert_eq!(rx2.recv().await.as_deref(), Some("hello"));

        registry.unregister_client("7", &second).await;
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_client_handle_closed() {
        let (handle, rx) = ClientHandle::channel();
        assert!(!handle.is_closed());
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.send_text("late").is_err());
    }
}
