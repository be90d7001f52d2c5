//! Spot fan-out to connected WebSocket subscribers.
//!
//! The registry owns the set of live subscriber queues. The listener
//! side inserts and removes entries as clients come and go; the
//! broadcast side iterates a snapshot and defers removals until after
//! the delivery pass, so a subscriber dropped mid-pass can never cause
//! an entry to be skipped or visited twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::spot::Spot;
use crate::stats::BridgeStats;

/// Per-subscriber delivery timeout. A subscriber that cannot take a
/// payload within this window is evicted.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(1500);

/// Outbound queue depth per subscriber.
const SUBSCRIBER_QUEUE: usize = 16;

/// Registry of connected subscribers and the broadcast fan-out.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Arc<String>>>>,
    next_id: AtomicU64,
    stats: Arc<BridgeStats>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new(stats: Arc<BridgeStats>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            stats,
        }
    }

    /// Register a new subscriber, returning its id and the queue its
    /// socket task drains.
    pub async fn add(&self) -> (u64, mpsc::Receiver<Arc<String>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let count = {
            let mut subs = self.subscribers.write().await;
            subs.insert(id, tx);
            subs.len()
        };
        self.stats.set_subscribers(count);
        info!("subscriber {} connected ({} total)", id, count);
        (id, rx)
    }

    /// Deregister a subscriber. Safe to call for an id that is already
    /// gone; disconnect paths and eviction paths both end up here.
    pub async fn remove(&self, id: u64) {
        let (removed, count) = {
            let mut subs = self.subscribers.write().await;
            (subs.remove(&id).is_some(), subs.len())
        };
        if removed {
            self.stats.set_subscribers(count);
            info!("subscriber {} disconnected ({} total)", id, count);
        }
    }

    /// Number of connected subscribers.
    pub async fn count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Serialize a spot once and deliver it to every subscriber.
    ///
    /// Delivery is sequential with an independent [`SEND_TIMEOUT`] per
    /// subscriber; a timeout or closed queue marks that subscriber for
    /// removal without affecting the others. With no subscribers this
    /// returns before doing any serialization work.
    pub async fn broadcast(&self, spot: &Spot) {
        let targets: Vec<(u64, mpsc::Sender<Arc<String>>)> = {
            let subs = self.subscribers.read().await;
            if subs.is_empty() {
                return;
            }
            subs.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let message = match serde_json::to_string(spot) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!("failed to serialize spot: {}", e);
                return;
            }
        };
        self.stats.record_broadcast(message.len());

        let mut stale = Vec::new();
        for (id, tx) in targets {
            match timeout(SEND_TIMEOUT, tx.send(Arc::clone(&message))).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Queue closed: the socket task is already gone.
                    stale.push(id);
                }
                Err(_) => {
                    warn!("subscriber {} send timed out, evicting", id);
                    stale.push(id);
                }
            }
        }
        debug!("broadcast spot to subscribers: {}", spot);

        for id in stale {
            self.stats.record_drop();
            self.remove(id).await;
        }
    }

    /// Drop every subscriber queue. Each socket task observes its queue
    /// closing, sends a close frame, and exits.
    pub async fn close_all(&self) {
        let count = {
            let mut subs = self.subscribers.write().await;
            let count = subs.len();
            subs.clear();
            count
        };
        self.stats.set_subscribers(0);
        if count > 0 {
            info!("closed {} subscriber(s)", count);
        }
    }
}
