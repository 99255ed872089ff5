//! Write Concern Evaluation
//!
//! Decides when the writer of a message gets its answer. Levels 0 and 1
//! are answered right after the append; levels 2 and 3 wait for secondary
//! acknowledgements, re-checked on every ack and by a polling loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

use super::ReplicationConfig;
use crate::log::{Message, WriteConcern};
use crate::state::{AckRecord, AckTracker, MembershipRegistry};

/// Where a message stands with respect to its write concern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcernState {
    /// Not enough acknowledgements yet
    AwaitingAcks,
    /// Requirement met with this many acknowledgements
    Satisfied { acks: usize },
    /// Requirement can no longer be met
    Failed,
    /// The writer already got its answer
    Responded,
}

/// Evaluates write concerns and sends the single response per message
pub struct WriteConcernEvaluator {
    acks: Arc<AckTracker>,
    membership: Arc<MembershipRegistry>,
    poll_interval: Duration,
    deadline: Option<Duration>,
    /// Acks required for level 3 (0 = the whole snapshot)
    full_quorum: usize,
}

impl WriteConcernEvaluator {
    pub fn new(
        acks: Arc<AckTracker>,
        membership: Arc<MembershipRegistry>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            acks,
            membership,
            poll_interval: config.ack_poll_interval(),
            deadline: config.response_deadline(),
            full_quorum: config.full_quorum,
        }
    }

    /// Acknowledgements level 3 needs from a snapshot of `snapshot_size`
    pub fn quorum(&self, snapshot_size: usize) -> usize {
        match self.full_quorum {
            0 => snapshot_size,
            n => n.min(snapshot_size),
        }
    }

    fn judge(&self, wc: WriteConcern, record: &AckRecord) -> ConcernState {
        if record.responded {
            return ConcernState::Responded;
        }
        let acks = record.ack_count();

        match wc {
            WriteConcern::Unacknowledged | WriteConcern::Primary => ConcernState::Satisfied { acks },
            WriteConcern::AtLeastOne => {
                if acks >= 1 {
                    ConcernState::Satisfied { acks }
                } else if record.outstanding() == 0 {
                    // empty snapshot, or every secondary abandoned
                    ConcernState::Failed
                } else {
                    ConcernState::AwaitingAcks
                }
            }
            WriteConcern::Quorum => {
                let quorum = self.quorum(record.snapshot_size());
                if acks >= quorum {
                    ConcernState::Satisfied { acks }
                } else if record.failed && acks + record.outstanding() < quorum {
                    ConcernState::Failed
                } else {
                    ConcernState::AwaitingAcks
                }
            }
        }
    }

    /// Current state of `message`; `None` if it has no ack record
    pub async fn evaluate(&self, message: &Message) -> Option<ConcernState> {
        let record = self.acks.record(message.id).await?;
        Some(self.judge(message.write_concern, &record))
    }

    /// Answer a level 0 or 1 write right after its append
    pub async fn respond_immediately(&self, message: &Message) -> bool {
        let text = match message.write_concern {
            WriteConcern::Unacknowledged => format!("OK! your message \"{}\" was received!", message.text),
            WriteConcern::Primary => format!("OK! your message \"{}\" was recorded on master", message.text),
            other => {
                tracing::warn!("Message {} with {} cannot be answered before replication", message.id, other);
                return false;
            }
        };
        self.respond(message, text).await
    }

    /// Check `message` once and respond if its outcome is decided.
    /// Returns true once the message needs no further checks.
    pub async fn try_resolve(&self, message: &Message) -> bool {
        match self.evaluate(message).await {
            None | Some(ConcernState::Responded) => true,
            Some(ConcernState::AwaitingAcks) => false,
            Some(ConcernState::Satisfied { acks }) => {
                let connected = self.membership.secondary_count().await;
                let text = format!(
                    "OK! your message \"{}\" was replicated on at least {} secondaries out of {} connected",
                    message.text, acks, connected
                );
                self.respond(message, text).await;
                true
            }
            Some(ConcernState::Failed) => {
                self.respond(message, failure_text(message)).await;
                true
            }
        }
    }

    /// Poll until `message` is answered, its writer disconnects, or the
    /// response deadline passes
    pub async fn watch(&self, message: Message) {
        let started = Instant::now();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.try_resolve(&message).await {
                return;
            }

            if let Some(source) = &message.source {
                let connected = match self.membership.client(source).await {
                    Some(handle) => !handle.is_closed(),
                    None => false,
                };
                if !connected {
                    tracing::debug!(
                        "Client {} disconnected, no longer waiting on message {}",
                        source,
                        message.id
                    );
                    return;
                }
            }

            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    tracing::warn!(
                        "Message {} missed its response deadline of {:?}",
                        message.id,
                        deadline
                    );
                    self.respond(&message, failure_text(&message)).await;
                    return;
                }
            }
        }
    }

    /// Send `text` to the writer of `message` if no one has answered yet
    async fn respond(&self, message: &Message, text: String) -> bool {
        if !self.acks.mark_responded(message.id).await {
            return false;
        }

        let Some(source) = &message.source else {
            tracing::debug!("Message {} has no writer to answer: {}", message.id, text);
            return true;
        };

        match self.membership.client(source).await {
            Some(handle) => {
                if let Err(e) = handle.send_text(text) {
                    tracing::warn!("Response for message {} to client {} lost: {}", message.id, source, e);
                }
            }
            None => tracing::warn!(
                "Client {} is gone, response for message {} dropped",
                source,
                message.id
            ),
        }
        true
    }
}

fn failure_text(message: &Message) -> String {
    format!(
        "FAIL! message \"{}\" was not replicated with the required write concern!",
        message.text
    )
}
