//! Acknowledgement Tracking
//!
//! Per-message record of which snapshot secondaries acknowledged, whether a
//! response was already sent, and how many delivery attempts each endpoint
//! has consumed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use serde::Serialize;
use tokio::sync::RwLock;

use super::membership::{Endpoint, MembershipSnapshot};
use crate::error::{Error, Result};
use crate::id::MessageId;

/// Acknowledgement state of one message
#[derive(Debug, Clone, Default, Serialize)]
pub struct AckRecord {
    /// Snapshot endpoint -> acknowledged
    pub acks: BTreeMap<Endpoint, bool>,
    /// Acks from endpoints outside the snapshot (catch-up replays)
    pub late_acks: BTreeSet<Endpoint>,
    /// Snapshot endpoints whose delivery was given up
    pub abandoned: BTreeSet<Endpoint>,
    /// Set exactly once, by whoever sends the client response
    pub responded: bool,
    /// A required secondary was abandoned
    pub failed: bool,
}

impl AckRecord {
    fn new(snapshot: &MembershipSnapshot) -> Self {
        Self {
            acks: snapshot.iter().map(|e| (e.clone(), false)).collect(),
            ..Default::default()
        }
    }

    pub fn ack_count(&self) -> usize {
        self.acks.values().filter(|acked| **acked).count()
    }

    pub fn snapshot_size(&self) -> usize {
        self.acks.len()
    }

    /// Snapshot endpoints that may still acknowledge
    pub fn outstanding(&self) -> usize {
        self.acks
            .iter()
            .filter(|(endpoint, acked)| !**acked && !self.abandoned.contains(*endpoint))
            .count()
    }
}

/// How an acknowledgement was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// First ack from a snapshot endpoint
    Counted,
    /// Repeated ack from a snapshot endpoint
    Duplicate,
    /// Ack from an endpoint outside the snapshot
    Late,
}

/// Delivery attempts per endpoint for one message
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: BTreeMap<Endpoint, u32>,
}

impl RetryState {
    pub fn attempts(&self, endpoint: &str) -> u32 {
        self.attempts.get(endpoint).copied().unwrap_or(0)
    }
}

/// Tracks acknowledgements and retries of in-flight messages
#[derive(Default)]
pub struct AckTracker {
    records: RwLock<HashMap<MessageId, AckRecord>>,
    retries: RwLock<HashMap<MessageId, RetryState>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the record for a message, every snapshot endpoint unacknowledged
    pub async fn begin(&self, id: MessageId, snapshot: &MembershipSnapshot) {
        let mut records = self.records.write().await;
        records.insert(id, AckRecord::new(snapshot));
    }

    /// Apply an acknowledgement from `endpoint`
    pub async fn record_ack(&self, id: MessageId, endpoint: &str) -> Result<AckOutcome> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(Error::UnknownMessage(id.as_u64()))?;

        let outcome = match record.acks.get_mut(endpoint) {
            Some(acked) if *acked => AckOutcome::Duplicate,
            Some(acked) => {
                *acked = true;
                AckOutcome::Counted
            }
            None => {
                record.late_acks.insert(endpoint.to_string());
                AckOutcome::Late
            }
        };
        Ok(outcome)
    }

    pub async fn ack_count(&self, id: MessageId) -> usize {
        self.records
            .read()
            .await
            .get(&id)
            .map(AckRecord::ack_count)
            .unwrap_or(0)
    }

    /// Flip `responded` to true. Returns whether this call did the flip;
    /// only that caller may send the response.
    pub async fn mark_responded(&self, id: MessageId) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if !record.responded => {
                record.responded = true;
                true
            }
            _ => false,
        }
    }

    pub async fn mark_failed(&self, id: MessageId) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            record.failed = true;
        }
    }

    /// Give up on `endpoint` for this message. Returns true when the endpoint
    /// belonged to the message's snapshot, i.e. the write concern needed it.
    pub async fn abandon(&self, id: MessageId, endpoint: &str) -> bool {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.acks.contains_key(endpoint) => {
                record.abandoned.insert(endpoint.to_string());
                true
            }
            _ => false,
        }
    }

    pub async fn record(&self, id: MessageId) -> Option<AckRecord> {
        self.records.read().await.get(&id).cloned()
    }

    /// Reset the attempt counter as replication of `id` to `endpoint` starts
    pub async fn start_delivery(&self, id: MessageId, endpoint: &str) {
        let mut retries = self.retries.write().await;
        retries
            .entry(id)
            .or_default()
            .attempts
            .insert(endpoint.to_string(), 0);
    }

    /// Count a failed attempt, returning the attempts made so far
    pub async fn record_failure(&self, id: MessageId, endpoint: &str) -> u32 {
        let mut retries = self.retries.write().await;
        let attempts = retries
            .entry(id)
            .or_default()
            .attempts
            .entry(endpoint.to_string())
            .or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub async fn attempts(&self, id: MessageId, endpoint: &str) -> u32 {
        self.retries
            .read()
            .await
            .get(&id)
            .map(|r| r.attempts(endpoint))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(endpoints: &[&str]) -> MembershipSnapshot {
        endpoints.iter().map(|e| e.to_string()).collect()
    }

    #[tokio::test]
    async fn test_acks_are_idempotent() {
        let tracker = AckTracker::new();
        let id = MessageId(1);
        tracker.begin(id, &snapshot(&["a:1", "b:1"])).await;

        assert_eq!(tracker.ack_count(id).await, 0);
        assert_eq!(tracker.record_ack(id, "a:1").await.unwrap(), AckOutcome::Counted);
        assert_eq!(tracker.record_ack(id, "a:1").await.unwrap(), AckOutcome::Duplicate);
        assert_eq!(tracker.ack_count(id).await, 1);
    }

    #[tokio::test]
    async fn test_late_acks_do_not_count() {
        let tracker = AckTracker::new();
        let id = MessageId(1);
        tracker.begin(id, &snapshot(&["a:1"])).await;

        assert_eq!(tracker.record_ack(id, "c:1").await.unwrap(), AckOutcome::Late);
        assert_eq!(tracker.ack_count(id).await, 0);
        assert!(tracker.record(id).await.unwrap().late_acks.contains("c:1"));
    }

    #[tokio::test]
    async fn test_unknown_message() {
        let tracker = AckTracker::new();
        assert!(matches!(
            tracker.record_ack(MessageId(42), "a:1").await,
            Err(Error::UnknownMessage(42))
        ));
    }

    #[tokio::test]
    async fn test_mark_responded_flips_once() {
        let tracker = AckTracker::new();
        let id = MessageId(5);
        tracker.begin(id, &snapshot(&[])).await;

        assert!(tracker.mark_responded(id).await);
        assert!(!tracker.mark_responded(id).await);
        assert!(!tracker.mark_responded(MessageId(6)).await);
    }

    #[tokio::test]
    async fn test_concurrent_mark_responded_single_winner() {
        let tracker = std::sync::Arc::new(AckTracker::new());
        let id = MessageId(1);
        tracker.begin(id, &snapshot(&["a:1"])).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = std::sync::Arc::clone(&tracker);
            handles.push(tokio::spawn(async move { tracker.mark_responded(id).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_abandon_and_mark_failed() {
        let tracker = AckTracker::new();
        let id = MessageId(1);
        tracker.begin(id, &snapshot(&["a:1", "b:1"])).await;

        assert!(!tracker.abandon(id, "late:1").await);
        assert!(tracker.abandon(id, "b:1").await);
        let record = tracker.record(id).await.unwrap();
        assert!(!record.failed);
        assert_eq!(record.outstanding(), 1);

        tracker.mark_failed(id).await;
        assert!(tracker.record(id).await.unwrap().failed);
    }

    #[tokio::test]
    async fn test_retry_counters() {
        let tracker = AckTracker::new();
        let id = MessageId(3);

        tracker.start_delivery(id, "a:1").await;
        assert_eq!(tracker.record_failure(id, "a:1").await, 1);
        assert_eq!(tracker.record_failure(id, "a:1").await, 2);
        assert_eq!(tracker.attempts(id, "b:1").await, 0);

        tracker.start_delivery(id, "a:1").await;
        assert_eq!(tracker.attempts(id, "a:1").await, 0);
    }
}
