//! Error types for the capture module.

use std::time::Duration;

use thiserror::Error;

/// Errors from device checks and capture sessions.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture process could not be started.
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The capture process was started without a stdout pipe.
    #[error("Capture process has no stdout")]
    NoStdout,

    /// Reading from the capture process failed.
    #[error("Read error: {0}")]
    Read(#[source] std::io::Error),

    /// No bytes arrived within the stall timeout.
    #[error("Capture stalled: no data for {0:?}")]
    Stalled(Duration),

    /// The reader thread went away without reporting why.
    #[error("Reader thread disconnected")]
    ReaderDisconnected,

    /// adb is missing or does not run.
    #[error("`{program}` is not available (install adb and add it to PATH): {reason}")]
    AdbUnavailable { program: String, reason: String },

    /// An adb subcommand failed.
    #[error("adb {command} failed: {detail}")]
    AdbCommand { command: String, detail: String },

    /// `adb wait-for-any-device` did not return in time.
    #[error("No device connected within {0:?}")]
    DeviceWaitTimeout(Duration),

    /// adb reports no online device.
    #[error("No online device found; connect one over USB or wireless adb (see `adb devices`)")]
    NoDevice,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
