//! Simulated network with seeded delay, loss, duplication and partitions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::common::config::NetworkConfig;
use crate::consensus::Message;
use crate::error::ConfigError;

/// A message in flight, stamped with the sending validator's index.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub from: usize,
    pub message: Message,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    /// Deliveries lost because the receiver's inbox was full.
    pub inbox_full: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    duplicated: AtomicU64,
    inbox_full: AtomicU64,
}

/// Point-to-point links between validators. Every send is independently
/// delayed, dropped or duplicated by a seeded RNG; delivery order between
/// two messages is whatever their sampled delays make it.
///
/// Supports:
/// - Uniform delay in `[min_delay_ms, max_delay_ms]`
/// - Probabilistic drops and duplicates
/// - Directional partitions between validator pairs
pub struct NetworkSimulator {
    config: NetworkConfig,
    inboxes: Vec<mpsc::Sender<Envelope>>,
    /// If (a, b) is present, messages from a to b are dropped.
    partitions: RwLock<HashSet<(usize, usize)>>,
    rng: Mutex<ChaCha8Rng>,
    counters: Arc<Counters>,
}

impl NetworkSimulator {
    /// Builds the network and one bounded inbox per validator. Receivers are
    /// handed to the nodes; the simulator keeps the senders.
    pub fn new(
        config: NetworkConfig,
        validators: usize,
    ) -> Result<(Arc<Self>, Vec<mpsc::Receiver<Envelope>>), ConfigError> {
        config.validate()?;

        let capacity = config.inbox_capacity.max(1);
        let (inboxes, receivers): (Vec<mpsc::Sender<Envelope>>, Vec<_>) =
            (0..validators).map(|_| mpsc::channel(capacity)).unzip();

        let network = NetworkSimulator {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            config,
            inboxes,
            partitions: RwLock::new(HashSet::new()),
            counters: Arc::new(Counters::default()),
        };
        Ok((Arc::new(network), receivers))
    }

    // ─── Partition Management ───

    pub fn is_partitioned(&self, from: usize, to: usize) -> bool {
        self.partitions.read().contains(&(from, to))
    }

    pub fn partition_unidirectional(&self, from: usize, to: usize) {
        self.partitions.write().insert((from, to));
    }

    /// Cuts `node` off from everyone else, both directions.
    pub fn isolate(&self, node: usize) {
        let mut partitions = self.partitions.write();
        for other in (0..self.inboxes.len()).filter(|other| *other != node) {
            partitions.insert((node, other));
            partitions.insert((other, node));
        }
    }

    pub fn heal_all(&self) {
        self.partitions.write().clear();
    }

    // ─── Delivery ───

    /// Decides the fate of one send from `from` to `to`: no entries means the
    /// message is lost, two means it arrives twice. Consumes randomness even
    /// for partitioned links so a partition does not reshuffle later draws.
    pub fn plan(&self, from: usize, to: usize) -> Vec<Duration> {
        let mut rng = self.rng.lock();
        let dropped = rng.gen::<f64>() < self.config.drop_probability;
        let duplicated = rng.gen::<f64>() < self.config.duplicate_probability;
        let first = self.sample_delay(&mut rng);
        let second = self.sample_delay(&mut rng);
        drop(rng);

        if self.is_partitioned(from, to) || dropped {
            return Vec::new();
        }
        if duplicated {
            vec![first, second]
        } else {
            vec![first]
        }
    }

    fn sample_delay(&self, rng: &mut ChaCha8Rng) -> Duration {
        let ms = rng.gen_range(self.config.min_delay_ms..=self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Schedules `message` for delivery to `to`. Returns immediately; the
    /// message lands in the inbox after its sampled delay, if at all.
    pub fn deliver(&self, from: usize, to: usize, message: Message) {
        let Some(inbox) = self.inboxes.get(to) else {
            debug!(from, to, "send to unknown validator");
            return;
        };
        self.counters.sent.fetch_add(1, Ordering::Relaxed);

        let plan = self.plan(from, to);
        if plan.is_empty() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(from, to, kind = message.kind(), "message dropped");
            return;
        }
        if plan.len() > 1 {
            self.counters.duplicated.fetch_add(1, Ordering::Relaxed);
        }

        for delay in plan {
            let inbox = inbox.clone();
            let counters = self.counters.clone();
            let envelope = Envelope {
                from,
                message: message.clone(),
            };
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                match inbox.try_send(envelope) {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        counters.inbox_full.fetch_add(1, Ordering::Relaxed);
                        counters.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(from, to, "inbox full, message dropped");
                    }
                    // Receiver has shut down.
                    Err(TrySendError::Closed(_)) => {}
                }
            });
        }
    }

    /// Sends `message` to every validator except `from`.
    pub fn broadcast(&self, from: usize, message: Message) {
        for to in (0..self.inboxes.len()).filter(|to| *to != from) {
            self.deliver(from, to, message.clone());
        }
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            duplicated: self.counters.duplicated.load(Ordering::Relaxed),
            inbox_full: self.counters.inbox_full.load(Ordering::Relaxed),
        }
    }
}
