//! Late-joiner resume cache.

use tracing::debug;

use relay_bitstream::{CodedUnit, UnitKind};

/// The smallest set of units a decoder needs to start cold: the most recent
/// SPS and PPS followed by the most recent IDR.
///
/// Parameter sets are held aside when they arrive and only published together
/// with the next IDR. The published set is replaced whole on every IDR.
/// Parameter sets seen before an earlier IDR stay eligible: an encoder that
/// emits SPS/PPS only once still yields a decodable cache on later IDRs.
#[derive(Debug, Default, Clone)]
pub struct ResumeCache {
    sps: Option<CodedUnit>,
    pps: Option<CodedUnit>,
    published: Vec<CodedUnit>,
    generation: u64,
}

impl ResumeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a unit through the cache. Returns true if it published a new set.
    pub fn observe(&mut self, unit: &CodedUnit) -> bool {
        match unit.kind() {
            UnitKind::Sps => self.sps = Some(unit.clone()),
            UnitKind::Pps => self.pps = Some(unit.clone()),
            UnitKind::Idr => {
                let published: Vec<CodedUnit> = self
                    .sps
                    .iter()
                    .chain(self.pps.iter())
                    .cloned()
                    .chain(std::iter::once(unit.clone()))
                    .collect();

                self.published = published;
                self.generation += 1;

                debug!(
                    generation = self.generation,
                    units = self.published.len(),
                    "Resume cache updated"
                );
                return true;
            }
            UnitKind::Other => {}
        }
        false
    }

    /// The published set, in decode order. Empty until the first IDR.
    pub fn snapshot(&self) -> Vec<CodedUnit> {
        self.published.clone()
    }

    /// Number of published units.
    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    /// How many IDRs have been published so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
