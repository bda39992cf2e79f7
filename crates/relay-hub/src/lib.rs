//! Broadcast hub for a live H.264 stream.
//!
//! The hub cuts the incoming byte stream into NAL units, keeps the last
//! SPS/PPS/IDR set so a viewer joining mid-stream can start decoding at
//! once, and pushes every unit to each attached viewer sink.

mod cache;
mod config;
mod error;
mod hub;
mod metrics;
mod sink;

pub use cache::ResumeCache;
pub use config::HubConfig;
pub use error::DeliveryError;
pub use hub::{Hub, SinkId};
pub use metrics::{HubMetrics, HubStats};
pub use sink::{from_fn, FnSink, Sink};

pub use relay_bitstream::{CodedUnit, UnitKind};

/// Default capacity of a viewer's outbound queue.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;
