//! Capture process configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::is_adb;
use crate::policy::RestartPolicy;

/// How to run the capture process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Program to execute.
    pub program: String,

    /// Arguments; the program must write raw Annex B H.264 to stdout.
    pub args: Vec<String>,

    /// Size of each read from the capture process.
    pub read_chunk_size: usize,

    /// Restart the process if it produces nothing for this long.
    pub stall_timeout_ms: u64,

    /// Backoff between restarts.
    pub restart: RestartPolicy,

    /// Verify adb and a connected device before starting (adb only).
    pub check_device: bool,

    /// How long to wait for a device during that check.
    pub device_wait_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "adb".to_string(),
            args: [
                "exec-out",
                "screenrecord",
                "--output-format=h264",
                "--size",
                "720x1280",
                "--bit-rate",
                "2000000",
                "-",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            read_chunk_size: 64 * 1024,
            stall_timeout_ms: 10_000,
            restart: RestartPolicy::default(),
            check_device: true,
            device_wait_ms: 8_000,
        }
    }
}

impl CaptureConfig {
    /// Configuration for an arbitrary command line.
    pub fn command(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn device_wait(&self) -> Duration {
        Duration::from_millis(self.device_wait_ms)
    }

    /// Whether the adb device check applies to this command.
    pub fn needs_device_check(&self) -> bool {
        self.check_device && is_adb(&self.program)
    }

    /// The command line as a single string, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
