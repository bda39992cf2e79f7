//! Hub counters and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Point-in-time view of the hub, suitable for logging or a stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubStats {
    /// Viewers currently attached.
    pub viewers: usize,

    /// Units currently held in the resume cache.
    pub cached_units: usize,

    /// IDRs published to the resume cache since start.
    pub cache_generation: u64,

    /// Raw bytes fed to the hub.
    pub bytes_ingested: u64,

    /// Complete units cut from the stream.
    pub units_produced: u64,

    /// IDR units seen.
    pub key_units: u64,

    /// Successful unit deliveries across all viewers, replay included.
    pub deliveries: u64,

    /// Viewers dropped because a delivery failed.
    pub sinks_dropped: u64,

    /// Times the pending buffer was dropped for exceeding its cap.
    pub pending_overflows: u64,

    /// Viewers attached since start.
    pub attaches: u64,

    /// Viewers explicitly detached since start.
    pub detaches: u64,

    /// Seconds since the hub was created.
    pub uptime_seconds: u64,
}

/// Lock-free counters updated by the hub.
pub struct HubMetrics {
    start_time: Instant,
    bytes_ingested: AtomicU64,
    units_produced: AtomicU64,
    key_units: AtomicU64,
    deliveries: AtomicU64,
    sinks_dropped: AtomicU64,
    pending_overflows: AtomicU64,
    attaches: AtomicU64,
    detaches: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bytes_ingested: AtomicU64::new(0),
            units_produced: AtomicU64::new(0),
            key_units: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            sinks_dropped: AtomicU64::new(0),
            pending_overflows: AtomicU64::new(0),
            attaches: AtomicU64::new(0),
            detaches: AtomicU64::new(0),
        }
    }

    pub fn record_ingest(&self, bytes: u64) {
        self.bytes_ingested.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_unit(&self, is_key: bool) {
        self.units_produced.fetch_add(1, Ordering::Relaxed);
        if is_key {
            self.key_units.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_deliveries(&self, count: u64) {
        self.deliveries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sink_dropped(&self) {
        self.sinks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflows(&self, count: u64) {
        self.pending_overflows.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_attach(&self) {
        self.attaches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detach(&self) {
        self.detaches.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a snapshot; the caller supplies the values guarded by the hub lock.
    pub fn snapshot(&self, viewers: usize, cached_units: usize, cache_generation: u64) -> HubStats {
        HubStats {
            viewers,
            cached_units,
            cache_generation,
            bytes_ingested: self.bytes_ingested.load(Ordering::Relaxed),
            units_produced: self.units_produced.load(Ordering::Relaxed),
            key_units: self.key_units.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            sinks_dropped: self.sinks_dropped.load(Ordering::Relaxed),
            pending_overflows: self.pending_overflows.load(Ordering::Relaxed),
            attaches: self.attaches.load(Ordering::Relaxed),
            detaches: self.detaches.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for HubMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = HubMetrics::new();
        metrics.record_ingest(100);
        metrics.record_ingest(28);
        metrics.record_unit(false);
        metrics.record_unit(true);
        metrics.record_deliveries(4);
        metrics.record_sink_dropped();
        metrics.record_attach();
        metrics.record_attach();
        metrics.record_detach();

        let stats = metrics.snapshot(1, 3, 1);
        assert_eq!(stats.viewers, 1);
        assert_eq!(stats.cached_units, 3);
        assert_eq!(stats.bytes_ingested, 128);
        assert_eq!(stats.units_produced, 2);
        assert_eq!(stats.key_units, 1);
        assert_eq!(stats.deliveries, 4);
        assert_eq!(stats.sinks_dropped, 1);
        assert_eq!(stats.attaches, 2);
        assert_eq!(stats.detaches, 1);
        assert_eq!(stats.pending_overflows, 0);
    }

    #[test]
    fn test_stats_serialize_to_json() {
        let stats = HubMetrics::new().snapshot(2, 0, 0);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["viewers"], 2);
        assert_eq!(json["units_produced"], 0);
    }
}
