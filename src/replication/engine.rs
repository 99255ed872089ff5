//! Replication Engine
//!
//! Fans one logged message out to the secondaries of its membership
//! snapshot. Failed deliveries are retried with exponential backoff and
//! jitter until they succeed or the endpoint's retry budget runs out.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::OwnedMutexGuard;
use tokio::time::{sleep_until, Instant};

use super::protocol::WireMessage;
use super::ReplicationConfig;
use crate::error::Result;
use crate::log::Message;
use crate::state::{AckTracker, Endpoint, MembershipRegistry, MembershipSnapshot, SecondaryStatus};

/// Sends one frame to one secondary
///
/// An implementation opens a connection, writes the frame and closes it.
/// The secondary's ack arrives separately on the cluster channel.
#[async_trait::async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, endpoint: &str, message: &WireMessage) -> Result<()>;
}

/// Retry delay generator: `base * 2^attempts + base * uniform(0, 1)`
pub struct Backoff {
    base: Duration,
    max: Duration,
    rng: StdMutex<StdRng>,
}

impl Backoff {
    /// Seeded generators give reproducible delays
    pub fn new(base: Duration, max: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            base,
            max,
            rng: StdMutex::new(rng),
        }
    }

    /// Delay before the next attempt, given the failed attempts so far
    pub fn delay(&self, attempts: u32) -> Duration {
        let jitter: f64 = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0.0..1.0)
        };
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        let exponential = self.base.saturating_mul(factor);
        let delay = exponential.saturating_add(self.base.mul_f64(jitter));
        delay.min(self.max)
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationReport {
    pub delivered: Vec<Endpoint>,
    pub abandoned: Vec<Endpoint>,
}

/// Whether the caller already owns the delivery lanes it targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneMode {
    Acquire,
    Held,
}

/// Permission to deliver to one endpoint; holds its lane while alive
struct LanePass(#[allow(dead_code)] Option<OwnedMutexGuard<()>>);

struct PendingDelivery {
    endpoint: Endpoint,
    eligible_at: Instant,
}

/// Delivers messages to secondaries with retries
pub struct ReplicationEngine {
    delivery: Arc<dyn Delivery>,
    acks: Arc<AckTracker>,
    membership: Arc<MembershipRegistry>,
    /// Failed attempts tolerated per endpoint (0 = unlimited)
    max_retries: u32,
    backoff: Backoff,
}

impl ReplicationEngine {
    pub fn new(
        delivery: Arc<dyn Delivery>,
        acks: Arc<AckTracker>,
        membership: Arc<MembershipRegistry>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            delivery,
            acks,
            membership,
            max_retries: config.max_retries,
            backoff: Backoff::new(config.backoff_base(), config.max_backoff(), config.jitter_seed),
        }
    }

    /// Deliver `message` to every endpoint of `targets`
    pub async fn replicate(&self, message: &Message, targets: MembershipSnapshot) -> ReplicationReport {
        self.run(message, targets, LaneMode::Acquire).await
    }

    /// Replay `backlog` to a newly registered secondary, one message at a
    /// time, while holding its delivery lane
    pub async fn catch_up(
        &self,
        endpoint: &str,
        lane: OwnedMutexGuard<()>,
        backlog: Vec<Message>,
    ) -> ReplicationReport {
        tracing::info!("Catching up {} with {} logged messages", endpoint, backlog.len());
        let mut report = ReplicationReport::default();

        for message in &backlog {
            let targets = MembershipSnapshot::from([endpoint.to_string()]);
            let outcome = self.run(message, targets, LaneMode::Held).await;
            report.delivered.extend(outcome.delivered);
            report.abandoned.extend(outcome.abandoned);
        }

        self.membership.set_status(endpoint, SecondaryStatus::Active).await;
        drop(lane);

        tracing::info!(
            "Catch-up of {} finished: {} delivered, {} abandoned",
            endpoint,
            report.delivered.len(),
            report.abandoned.len()
        );
        report
    }

    async fn run(&self, message: &Message, targets: MembershipSnapshot, mode: LaneMode) -> ReplicationReport {
        let id = message.id;
        let frame = WireMessage::replicate(message);
        let mut report = ReplicationReport::default();

        tracing::debug!("Replicating message {} to {} secondaries", id, targets.len());

        let now = Instant::now();
        let mut work: VecDeque<PendingDelivery> = VecDeque::with_capacity(targets.len());
        for endpoint in targets {
            self.acks.start_delivery(id, &endpoint).await;
            work.push_back(PendingDelivery {
                endpoint,
                eligible_at: now,
            });
        }

        while !work.is_empty() {
            let now = Instant::now();
            let eligible: Vec<usize> = work
                .iter()
                .enumerate()
                .filter(|(_, p)| p.eligible_at <= now)
                .map(|(i, _)| i)
                .collect();

            if eligible.is_empty() {
                if let Some(next) = work.iter().map(|p| p.eligible_at).min() {
                    sleep_until(next).await;
                }
                continue;
            }

            // prefer an endpoint whose lane is free
            let mut chosen = None;
            for &i in &eligible {
                if let Some(pass) = self.try_lane(&work[i].endpoint, mode).await {
                    chosen = Some((i, pass));
                    break;
                }
            }

            let (index, _pass) = match chosen {
                Some(chosen) => chosen,
                None => {
                    let first = eligible[0];
                    let next_backoff = work
                        .iter()
                        .map(|p| p.eligible_at)
                        .filter(|at| *at > now)
                        .min();
                    match self.wait_lane(&work[first].endpoint, next_backoff).await {
                        Some(pass) => (first, pass),
                        None => continue,
                    }
                }
            };

            let Some(pending) = work.remove(index) else {
                continue;
            };

            match self.delivery.deliver(&pending.endpoint, &frame).await {
                Ok(()) => {
                    tracing::debug!("Message {} delivered to {}", id, pending.endpoint);
                    report.delivered.push(pending.endpoint);
                }
                Err(e) => {
                    let attempts = self.acks.record_failure(id, &pending.endpoint).await;
                    if !e.is_retryable() {
                        tracing::warn!("Unexpected delivery error for {}: {}", pending.endpoint, e);
                    }

                    if self.max_retries != 0 && attempts >= self.max_retries {
                        tracing::error!(
                            "Message {} was not replicated to {}: giving up after {} attempts ({})",
                            id,
                            pending.endpoint,
                            attempts,
                            e
                        );
                        if self.acks.abandon(id, &pending.endpoint).await {
                            self.acks.mark_failed(id).await;
                        }
                        report.abandoned.push(pending.endpoint);
                    } else {
                        let delay = self.backoff.delay(attempts);
                        tracing::info!(
                            "Delivery of message {} to {} failed ({}), retry {} in {:.2?}",
                            id,
                            pending.endpoint,
                            e,
                            attempts,
                            delay
                        );
                        work.push_back(PendingDelivery {
                            endpoint: pending.endpoint,
                            eligible_at: Instant::now() + delay,
                        });
                    }
                }
            }
        }

        report
    }

    /// Take the endpoint's lane if it is free
    async fn try_lane(&self, endpoint: &str, mode: LaneMode) -> Option<LanePass> {
        if mode == LaneMode::Held {
            return Some(LanePass(None));
        }
        match self.membership.lane(endpoint).await {
            Some(lane) => lane.try_lock_owned().ok().map(|g| LanePass(Some(g))),
            None => Some(LanePass(None)),
        }
    }

    /// Wait for the endpoint's lane, giving up when another endpoint's
    /// backoff expires first
    async fn wait_lane(&self, endpoint: &str, until: Option<Instant>) -> Option<LanePass> {
        let Some(lane) = self.membership.lane(endpoint).await else {
            return Some(LanePass(None));
        };
        match until {
            Some(deadline) => tokio::select! {
                guard = lane.lock_owned() => Some(LanePass(Some(guard))),
                _ = sleep_until(deadline) => None,
            },
            None => Some(LanePass(Some(lane.lock_owned().await))),
        }
    }
}
