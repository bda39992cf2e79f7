//! Start-code scanning.
//!
//! A unit begins at a start code and runs up to, but not including, the next
//! one. The last unit in a buffer is never emitted because its end is not
//! known yet; it stays in the remainder until the following start code
//! arrives.

use std::ops::Range;

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::unit::CodedUnit;
use crate::DEFAULT_MAX_PENDING_BYTES;

/// Length of the start code beginning exactly at `pos`, if any.
fn start_code_at(buf: &[u8], pos: usize) -> Option<usize> {
    match buf.get(pos..)? {
        [0, 0, 0, 1, ..] => Some(4),
        [0, 0, 1, ..] => Some(3),
        _ => None,
    }
}

/// Find the first start code at or after `from`.
///
/// `00 00 00 01` is reported at its first zero, so it wins over the
/// `00 00 01` it contains.
pub fn find_start_code(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= buf.len() {
        // No start code can begin at i, i+1 or i+2 unless buf[i+2] is 0 or 1
        if buf[i + 2] > 1 {
            i += 3;
            continue;
        }
        if start_code_at(buf, i).is_some() {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Result of scanning a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scan {
    /// Complete units, in stream order, as byte ranges of the scanned buffer.
    pub units: Vec<Range<usize>>,
    /// Offset where the unconsumed remainder starts.
    pub remainder: usize,
}

impl Scan {
    /// The remainder of `buf` that did not form a complete unit.
    pub fn remainder<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.remainder..]
    }
}

/// Split a buffer into complete units plus a remainder.
///
/// Bytes before the first start code are dropped. If the buffer holds no
/// start code at all, the whole buffer is the remainder.
pub fn split_units(buf: &[u8]) -> Scan {
    scan(buf, 0)
}

/// Scan `buf`, resuming the start-code search at `resume_at`.
///
/// Everything before `resume_at` has already been searched, apart from a
/// start code sitting at offset 0, which is always honoured.
fn scan(buf: &[u8], resume_at: usize) -> Scan {
    let first = if start_code_at(buf, 0).is_some() {
        Some(0)
    } else {
        find_start_code(buf, resume_at)
    };

    let Some(mut start) = first else {
        return Scan::default();
    };

    let mut units = Vec::new();
    loop {
        let code_len = start_code_at(buf, start).unwrap_or(3);
        match find_start_code(buf, (start + code_len).max(resume_at)) {
            Some(next) => {
                units.push(start..next);
                start = next;
            }
            None => break,
        }
    }

    Scan {
        units,
        remainder: start,
    }
}

/// Incremental scanner owning the pending buffer between chunks.
///
/// Produces exactly the units [`split_units`] would produce over the
/// concatenation of every chunk pushed, regardless of how the stream was cut.
#[derive(Debug)]
pub struct UnitScanner {
    pending: BytesMut,
    /// Offset in `pending` where the next start-code search may resume.
    resume_at: usize,
    max_pending: usize,
    overflows: u64,
}

impl UnitScanner {
    /// Create a scanner with the default pending cap.
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_BYTES)
    }

    /// Create a scanner that drops its pending bytes once they exceed `max_pending`.
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            resume_at: 0,
            max_pending,
            overflows: 0,
        }
    }

    /// Append a chunk and return every unit it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<CodedUnit> {
        self.pending.extend_from_slice(chunk);

        let scan = scan(&self.pending, self.resume_at);

        let mut units = Vec::with_capacity(scan.units.len());
        let mut consumed = 0;
        for range in scan.units {
            // Only the first range can leave a gap (leading garbage)
            self.pending.advance(range.start - consumed);
            let data = self.pending.split_to(range.len()).freeze();
            consumed = range.end;
            trace!(len = data.len(), "Unit complete");
            units.push(CodedUnit::new(data));
        }
        self.pending.advance(scan.remainder - consumed);

        // Nothing before the last 3 bytes can still turn into a start code
        self.resume_at = self.pending.len().saturating_sub(3);

        if self.pending.len() > self.max_pending {
            warn!(
                pending = self.pending.len(),
                max = self.max_pending,
                "Pending buffer over cap, dropping it and resyncing on the next start code"
            );
            self.overflows += 1;
            self.reset();
        }

        units
    }

    /// Discard any partial unit.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resume_at = 0;
    }

    /// Bytes waiting for the end of their unit.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Number of times the pending buffer was dropped for exceeding its cap.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

impl Default for UnitScanner {
    fn default() -> Self {
        Self::new()
    }
}
