//! End-to-end write concern behavior against an in-memory transport.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use replog::config::ReplicationConfig;
use replog::error::{Error, Result};
use replog::id::MessageId;
use replog::log::{LogDump, WriteConcern};
use replog::replication::{Delivery, PrimaryNode, ReplicationNode, WireMessage};
use replog::state::ClientHandle;

/// Delivers to in-process secondaries that acknowledge right away.
/// Endpoints can be scripted to fail a number of times (u32::MAX = forever).
#[derive(Default)]
struct LoopbackDelivery {
    primary: OnceLock<Weak<PrimaryNode>>,
    failures: Mutex<HashMap<String, u32>>,
}

impl LoopbackDelivery {
    fn fail(&self, endpoint: &str, times: u32) {
        self.failures.lock().unwrap().insert(endpoint.to_string(), times);
    }
}

#[async_trait::async_trait]
impl Delivery for LoopbackDelivery {
    async fn deliver(&self, endpoint: &str, message: &WireMessage) -> Result<()> {
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(endpoint) {
                if *left > 0 {
                    if *left != u32::MAX {
                        *left -= 1;
                    }
                    return Err(Error::ConnectionFailed {
                        address: endpoint.to_string(),
                        reason: "connection refused".into(),
                    });
                }
            }
        }

        if let WireMessage::Replicate { id, .. } = message {
            if let Some(primary) = self.primary.get().and_then(Weak::upgrade) {
                let id = *id;
                let endpoint = endpoint.to_string();
                tokio::spawn(async move {
                    let _ = primary.handle_ack(id, &endpoint).await;
                });
            }
        }
        Ok(())
    }
}

fn cluster(config: ReplicationConfig) -> (Arc<PrimaryNode>, Arc<LoopbackDelivery>) {
    let delivery = Arc::new(LoopbackDelivery::default());
    let primary = Arc::new(PrimaryNode::new("master".into(), &config, delivery.clone()));
    let _ = delivery.primary.set(Arc::downgrade(&primary));
    (primary, delivery)
}

fn config(max_retries: u32) -> ReplicationConfig {
    ReplicationConfig {
        max_retries,
        jitter_seed: Some(11),
        ..Default::default()
    }
}

async fn connect(primary: &PrimaryNode, id: &str) -> UnboundedReceiver<String> {
    let (handle, rx) = ClientHandle::channel();
    primary.membership().register_client(id.into(), handle).await;
    rx
}

/// Let spawned tasks and timers run for `secs` of (paused) time
async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_write_with_no_secondaries() {
    let (primary, _delivery) = cluster(config(1));
    let mut rx = connect(&primary, "c1").await;

    primary
        .write(Some("c1".into()), "fast", WriteConcern::Unacknowledged)
        .await
        .unwrap();

    assert_eq!(rx.try_recv().unwrap(), "OK! your message \"fast\" was received!");
    settle(5).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_hello_answered_once_while_second_secondary_retries() {
    let (primary, delivery) = cluster(config(5));
    primary.register_secondary("a:7000").await;
    primary.register_secondary("b:7000").await;
    delivery.fail("b:7000", 1);
    let mut rx = connect(&primary, "c1").await;
    settle(1).await;

    let msg = primary
        .write(Some("c1".into()), "hello", WriteConcern::AtLeastOne)
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        "OK! your message \"hello\" was replicated on at least 1 secondaries out of 2 connected"
    );

    // b recovers and acks later; no second answer
    settle(30).await;
    let record = primary.ack_record(msg.id).await.unwrap();
    assert_eq!(record.ack_count(), 2);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_quorum_fails_with_finite_retries() {
    let (primary, delivery) = cluster(config(2));
    primary.register_secondary("a:7000").await;
    primary.register_secondary("b:7000").await;
    delivery.fail("b:7000", u32::MAX);
    let mut rx = connect(&primary, "c1").await;
    settle(1).await;

    let msg = primary
        .write(Some("c1".into()), "strict", WriteConcern::Quorum)
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        "FAIL! message \"strict\" was not replicated with the required write concern!"
    );

    let record = primary.ack_record(msg.id).await.unwrap();
    assert!(record.failed);
    assert!(record.abandoned.contains("b:7000"));
    settle(60).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_quorum_with_unlimited_retries_never_answers() {
    let (primary, delivery) = cluster(config(0));
    primary.register_secondary("a:7000").await;
    primary.register_secondary("b:7000").await;
    delivery.fail("b:7000", u32::MAX);
    let mut rx = connect(&primary, "c1").await;
    settle(1).await;

    let msg = primary
        .write(Some("c1".into()), "stuck", WriteConcern::Quorum)
        .await
        .unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(3600), rx.recv()).await;
    assert!(waited.is_err(), "a response arrived: {:?}", waited);

    let record = primary.ack_record(msg.id).await.unwrap();
    assert_eq!(record.ack_count(), 1);
    assert!(!record.responded);
    assert!(!record.failed);
}

#[tokio::test(start_paused = true)]
async fn test_response_deadline_bounds_unlimited_retries() {
    let (primary, delivery) = cluster(ReplicationConfig {
        response_deadline_ms: Some(30_000),
        ..config(0)
    });
    primary.register_secondary("a:7000").await;
    delivery.fail("a:7000", u32::MAX);
    let mut rx = connect(&primary, "c1").await;
    settle(1).await;

    primary
        .write(Some("c1".into()), "bounded", WriteConcern::Quorum)
        .await
        .unwrap();

    let response = tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(response.starts_with("FAIL!"));
}

#[tokio::test(start_paused = true)]
async fn test_exactly_one_response_per_message() {
    let (primary, delivery) = cluster(config(3));
    primary.register_secondary("a:7000").await;
    primary.register_secondary("b:7000").await;
    delivery.fail("b:7000", 2);
    let mut rx = connect(&primary, "c1").await;
    settle(1).await;

    let levels = [
        WriteConcern::Unacknowledged,
        WriteConcern::Primary,
        WriteConcern::AtLeastOne,
        WriteConcern::Quorum,
    ];
    let mut ids = Vec::new();
    for round in 0..3 {
        for wc in levels {
            let msg = primary
                .write(Some("c1".into()), format!("m{}-{}", round, wc.level()), wc)
                .await
                .unwrap();
            ids.push(msg.id);
        }
    }

    settle(120).await;

    let mut responses = Vec::new();
    while let Ok(text) = rx.try_recv() {
        responses.push(text);
    }
    assert_eq!(responses.len(), ids.len(), "{:#?}", responses);
    for id in ids {
        assert!(primary.ack_record(id).await.unwrap().responded);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ids_unique_with_concurrent_writers() {
    let (primary, _delivery) = cluster(config(1));

    let mut handles = Vec::new();
    for writer in 0..8 {
        let primary = Arc::clone(&primary);
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..50 {
                let msg = primary
                    .write(None, format!("w{}-{}", writer, i), WriteConcern::Primary)
                    .await
                    .unwrap();
                ids.push(msg.id.as_u64());
            }
            ids
        }));
    }

    let mut all = HashSet::new();
    for handle in handles {
        let ids = handle.await.unwrap();
        // each writer sees its own ids strictly increasing
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all.extend(ids);
    }
    assert_eq!(all.len(), 400);
    assert_eq!(all.iter().max(), Some(&400));
    assert!(matches!(primary.read_all().await, LogDump::Entries(ref m) if m.len() == 400));
}

#[tokio::test]
async fn test_ack_for_unknown_message_is_rejected() {
    let (primary, _delivery) = cluster(config(1));
    let err = primary
        .handle_message(
            "10.0.0.9:4000",
            WireMessage::Ack {
                message_id: MessageId(77),
                endpoint: "a:7000".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownMessage(77)));
}
