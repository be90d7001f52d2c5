//! Statistics tracking for the bridge.
//!
//! Counters cover the whole pipeline: raw feed lines in, spots parsed,
//! broadcasts out, and subscriber churn. A payload-size histogram feeds
//! the Prometheus summary served by the HTTP endpoint.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crate::spot::{Mode, Spot};

/// Thread-safe statistics collector shared across bridge components.
#[derive(Debug)]
pub struct BridgeStats {
    /// Feed lines received from the cluster (after sanitization)
    pub lines_received: AtomicU64,

    /// Lines the pre-filter discarded as chatter
    pub non_spot_lines: AtomicU64,

    /// Lines that looked like spots but failed the grammar
    pub parse_failures: AtomicU64,

    /// Spots parsed successfully
    pub spots_parsed: AtomicU64,

    /// Broadcast passes performed (spots with at least one subscriber)
    pub broadcasts: AtomicU64,

    /// Subscribers evicted for failed or timed-out delivery
    pub subscriber_drops: AtomicU64,

    /// Cluster sessions that ended in a connection failure
    pub reconnects: AtomicU64,

    /// Currently connected subscribers
    subscribers: AtomicUsize,

    /// Histogram of serialized spot payload sizes in bytes
    payload_sizes: RwLock<Histogram<u64>>,

    /// Spots per band
    spots_by_band: RwLock<HashMap<&'static str, u64>>,

    /// Spots per mode
    spots_by_mode: RwLock<HashMap<Mode, u64>>,

    /// When stats collection started
    start_time: Instant,
}

impl BridgeStats {
    /// Create a new statistics collector.
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            non_spot_lines: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            spots_parsed: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            subscriber_drops: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            subscribers: AtomicUsize::new(0),
            // Payload sizes: 1 byte to 10KB, 3 significant figures
            payload_sizes: RwLock::new(
                Histogram::new_with_bounds(1, 10_000, 3)
                    .expect("Failed to create payload histogram"),
            ),
            spots_by_band: RwLock::new(HashMap::new()),
            spots_by_mode: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record one sanitized feed line.
    pub fn record_line(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line discarded by the pre-filter.
    pub fn record_non_spot(&self) {
        self.non_spot_lines.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line that looked like a spot but did not parse.
    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully parsed spot.
    pub fn record_spot(&self, spot: &Spot) {
        self.spots_parsed.fetch_add(1, Ordering::Relaxed);

        if !spot.band.is_empty()
            && let Ok(mut map) = self.spots_by_band.write()
        {
            *map.entry(spot.band).or_insert(0) += 1;
        }

        if let Ok(mut map) = self.spots_by_mode.write() {
            *map.entry(spot.mode).or_insert(0) += 1;
        }
    }

    /// Record a broadcast pass and the size of its serialized payload.
    pub fn record_broadcast(&self, payload_bytes: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut hist) = self.payload_sizes.write() {
            let _ = hist.record((payload_bytes as u64).max(1));
        }
    }

    /// Record a subscriber evicted during a broadcast pass.
    pub fn record_drop(&self) {
        self.subscriber_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed cluster session.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Update the connected-subscriber gauge.
    pub fn set_subscribers(&self, count: usize) {
        self.subscribers.store(count, Ordering::Relaxed);
    }

    /// Current value of the connected-subscriber gauge.
    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }

    /// Snapshot all counters for rendering.
    pub fn summary(&self) -> StatsSummary {
        let elapsed_secs = self.start_time.elapsed().as_secs_f64();
        let spots_parsed = self.spots_parsed.load(Ordering::Relaxed);

        let mut spots_by_band: Vec<(String, u64)> = self
            .spots_by_band
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();
        spots_by_band.sort();

        let mut spots_by_mode: Vec<(String, u64)> = self
            .spots_by_mode
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();
        spots_by_mode.sort();

        let payload_percentiles = self.payload_sizes.read().ok().and_then(|hist| {
            if hist.is_empty() {
                None
            } else {
                Some(Percentiles {
                    p50: hist.value_at_quantile(0.50),
                    p90: hist.value_at_quantile(0.90),
                    p99: hist.value_at_quantile(0.99),
                })
            }
        });

        StatsSummary {
            elapsed_secs,
            lines_received: self.lines_received.load(Ordering::Relaxed),
            non_spot_lines: self.non_spot_lines.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            spots_parsed,
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            subscribers: self.subscribers(),
            spots_per_second: if elapsed_secs > 0.0 {
                spots_parsed as f64 / elapsed_secs
            } else {
                0.0
            },
            spots_by_band,
            spots_by_mode,
            payload_percentiles,
        }
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload size distribution percentiles in bytes.
#[derive(Debug, Clone, Serialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
}

/// Point-in-time snapshot of all bridge statistics.
#[derive(Debug, Serialize)]
pub struct StatsSummary {
    pub elapsed_secs: f64,
    pub lines_received: u64,
    pub non_spot_lines: u64,
    pub parse_failures: u64,
    pub spots_parsed: u64,
    pub broadcasts: u64,
    pub subscriber_drops: u64,
    pub reconnects: u64,
    pub subscribers: usize,
    pub spots_per_second: f64,
    pub spots_by_band: Vec<(String, u64)>,
    pub spots_by_mode: Vec<(String, u64)>,
    pub payload_percentiles: Option<Percentiles>,
}
