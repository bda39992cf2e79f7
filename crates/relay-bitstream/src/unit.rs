//! Coded units and their classification.

use bytes::Bytes;

/// The kinds of NAL unit the relay distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitKind {
    /// Sequence Parameter Set (type 7).
    Sps = 7,
    /// Picture Parameter Set (type 8).
    Pps = 8,
    /// IDR slice, the entry point for a decoder starting cold (type 5).
    Idr = 5,
    /// Anything else, including truncated units.
    Other = 0,
}

impl From<u8> for UnitKind {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            5 => UnitKind::Idr,
            7 => UnitKind::Sps,
            8 => UnitKind::Pps,
            _ => UnitKind::Other,
        }
    }
}

impl UnitKind {
    /// Whether this unit is one of the two parameter sets.
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, UnitKind::Sps | UnitKind::Pps)
    }

    /// Whether this unit starts a new decodable sequence.
    pub fn is_keyframe(&self) -> bool {
        matches!(self, UnitKind::Idr)
    }
}

/// Length of the start code a unit begins with.
///
/// Returns 4 for `00 00 00 01` and 3 otherwise; units produced by the
/// scanner always start with one of the two forms.
pub fn start_code_len(unit: &[u8]) -> usize {
    if unit.starts_with(&[0, 0, 0, 1]) {
        4
    } else {
        3
    }
}

/// Classify a unit that still carries its start code.
///
/// Never fails: a unit too short to have a header byte is [`UnitKind::Other`].
pub fn classify(unit: &[u8]) -> UnitKind {
    unit.get(start_code_len(unit))
        .map_or(UnitKind::Other, |&header| UnitKind::from(header))
}

/// One complete NAL unit, start code included.
///
/// Cloning is cheap: the payload is reference counted, so every viewer
/// queue shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedUnit {
    kind: UnitKind,
    data: Bytes,
}

impl CodedUnit {
    /// Wrap raw unit bytes, classifying them once.
    pub fn new(data: Bytes) -> Self {
        Self {
            kind: classify(&data),
            data,
        }
    }

    /// The unit kind.
    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// The raw bytes, start code included.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Consume the unit, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for CodedUnit {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
