//! Supervised capture source.
//!
//! Runs the external capture process (by default `adb exec-out screenrecord`),
//! feeds its stdout into the hub, and restarts it when it exits or stalls.

mod config;
mod device;
mod error;
mod policy;
mod supervisor;

pub use config::CaptureConfig;
pub use device::{is_adb, parse_devices, Adb};
pub use error::CaptureError;
pub use policy::{RestartPolicy, SupervisorState};
pub use supervisor::{CaptureSupervisor, SupervisorHandle, SupervisorStatus};

/// Channel capacity for chunks read from the capture process.
pub const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Default restart attempts (`None` restarts forever).
pub const MAX_RESTART_ATTEMPTS: Option<u32> = None;

/// Base restart delay in milliseconds.
pub const BASE_RESTART_DELAY_MS: u64 = 500;
