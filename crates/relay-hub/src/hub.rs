//! The broadcast hub.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use relay_bitstream::{CodedUnit, UnitScanner};

use crate::cache::ResumeCache;
use crate::config::HubConfig;
use crate::metrics::{HubMetrics, HubStats};
use crate::sink::Sink;

/// Identity of an attached viewer sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Everything guarded by the hub lock.
struct HubState {
    scanner: UnitScanner,
    cache: ResumeCache,
    viewers: HashMap<SinkId, Box<dyn Sink>>,
}

/// Fans a single Annex B byte stream out to any number of viewers.
///
/// One lock covers the scanner, the resume cache, and the viewer set, and
/// is held across a whole `ingest` fan-out and a whole `attach` replay. A
/// viewer therefore sees the cached SPS/PPS/IDR and then every live unit
/// produced after it joined, in stream order, with nothing missed or doubled.
///
/// `ingest` must be driven by a single producer. `attach` and `detach` may be
/// called from any thread.
pub struct Hub {
    state: Mutex<HubState>,
    metrics: HubMetrics,
    next_id: AtomicU64,
}

impl Hub {
    /// Create a hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            state: Mutex::new(HubState {
                scanner: UnitScanner::with_max_pending(config.max_pending_bytes),
                cache: ResumeCache::new(),
                viewers: HashMap::new(),
            }),
            metrics: HubMetrics::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a viewer sink, replaying the resume cache to it first.
    ///
    /// If the replay fails the sink is never registered; the returned id is
    /// then already detached.
    #[instrument(name = "hub_attach", skip(self, sink))]
    pub fn attach<S: Sink + 'static>(&self, sink: S) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sink: Box<dyn Sink> = Box::new(sink);

        let mut state = self.state.lock();

        let replay = state.cache.snapshot();
        for unit in &replay {
            if let Err(e) = sink.deliver(unit) {
                warn!(%id, error = %e, "Cache replay failed, not attaching viewer");
                self.metrics.record_sink_dropped();
                return id;
            }
        }
        self.metrics.record_deliveries(replay.len() as u64);

        state.viewers.insert(id, sink);
        self.metrics.record_attach();
        info!(
            %id,
            replayed = replay.len(),
            viewers = state.viewers.len(),
            "Viewer attached"
        );
        id
    }

    /// Detach a viewer. Returns false if it was not attached.
    pub fn detach(&self, id: SinkId) -> bool {
        let mut state = self.state.lock();
        let removed = state.viewers.remove(&id).is_some();
        if removed {
            self.metrics.record_detach();
            info!(%id, viewers = state.viewers.len(), "Viewer detached");
        }
        removed
    }

    /// Detach every viewer. Returns how many were attached.
    pub fn detach_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.viewers.len();
        for _ in state.viewers.drain() {
            self.metrics.record_detach();
        }
        if count > 0 {
            info!(count, "Detached all viewers");
        }
        count
    }

    /// Feed raw bytes from the capture source.
    ///
    /// Every unit the bytes complete is classified, folded into the resume
    /// cache, and delivered to every attached viewer in stream order. A
    /// viewer whose delivery fails is detached on the spot; the others are
    /// unaffected.
    pub fn ingest(&self, bytes: &[u8]) {
        self.metrics.record_ingest(bytes.len() as u64);

        let mut state = self.state.lock();
        let HubState {
            scanner,
            cache,
            viewers,
        } = &mut *state;

        let overflows_before = scanner.overflows();
        let units = scanner.push(bytes);
        let overflows = scanner.overflows() - overflows_before;
        if overflows > 0 {
            self.metrics.record_overflows(overflows);
        }

        for unit in &units {
            let kind = unit.kind();
            trace!(?kind, len = unit.len(), "Unit produced");
            self.metrics.record_unit(kind.is_keyframe());
            cache.observe(unit);
            self.fan_out(viewers, unit);
        }
    }

    fn fan_out(&self, viewers: &mut HashMap<SinkId, Box<dyn Sink>>, unit: &CodedUnit) {
        let mut delivered = 0u64;
        viewers.retain(|id, sink| match sink.deliver(unit) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(e) => {
                warn!(%id, error = %e, "Dropping viewer");
                self.metrics.record_sink_dropped();
                false
            }
        });
        self.metrics.record_deliveries(delivered);
    }

    /// Discard any partial unit, e.g. when the capture source restarts.
    ///
    /// The resume cache is kept.
    pub fn reset_pending(&self) {
        let mut state = self.state.lock();
        let discarded = state.scanner.pending().len();
        state.scanner.reset();
        debug!(discarded, "Pending buffer reset");
    }

    /// Whether `id` is currently attached.
    pub fn is_attached(&self, id: SinkId) -> bool {
        self.state.lock().viewers.contains_key(&id)
    }

    /// Number of attached viewers.
    pub fn viewer_count(&self) -> usize {
        self.state.lock().viewers.len()
    }

    /// The units a viewer attaching now would be replayed.
    pub fn cached_units(&self) -> Vec<CodedUnit> {
        self.state.lock().cache.snapshot()
    }

    /// Current counters.
    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        self.metrics.snapshot(
            state.viewers.len(),
            state.cache.len(),
            state.cache.generation(),
        )
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
