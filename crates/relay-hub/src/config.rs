//! Hub configuration.

use serde::{Deserialize, Serialize};

use relay_bitstream::DEFAULT_MAX_PENDING_BYTES;

/// Configuration for a [`Hub`](crate::Hub).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Pending bytes allowed before the partial unit is dropped and the
    /// scanner resyncs on the next start code.
    pub max_pending_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}
