//! Annex B bitstream handling for the relay.
//!
//! Raw H.264 from the capture process arrives as an Annex B byte stream:
//! NAL units separated by start codes (`00 00 01` or `00 00 00 01`). This
//! crate cuts that stream into complete units and tags each one with the
//! kind the relay cares about.

mod scanner;
mod unit;

pub use scanner::{find_start_code, split_units, Scan, UnitScanner};
pub use unit::{classify, start_code_len, CodedUnit, UnitKind};

/// Default cap on bytes held while waiting for the end of a unit.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;
