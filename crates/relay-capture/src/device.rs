//! Android device checks run before capture starts.

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::error::CaptureError;
use crate::CaptureResult;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Whether `program` names the adb binary.
pub fn is_adb(program: &str) -> bool {
    Path::new(program)
        .file_stem()
        .is_some_and(|stem| stem.eq_ignore_ascii_case("adb"))
}

/// Serials of devices in the `device` state from `adb devices` output.
///
/// Offline and unauthorized devices are skipped.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let (serial, state) = line.trim_end().split_once('\t')?;
            (state.trim() == "device").then(|| serial.trim().to_string())
        })
        .collect()
}

/// Runs adb subcommands.
#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    /// Placed before every subcommand, e.g. `-s <serial>`.
    global_args: Vec<String>,
}

impl Adb {
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_args(program, std::iter::empty::<String>())
    }

    pub fn with_args(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            global_args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.global_args).arg(subcommand).stdin(Stdio::null());
        cmd
    }

    /// Run `adb version`; returns its first output line.
    pub fn check_available(&self) -> CaptureResult<String> {
        let output = self
            .command("version")
            .output()
            .map_err(|e| CaptureError::AdbUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(CaptureError::AdbUnavailable {
                program: self.program.clone(),
                reason: format!("`version` exited with {}", output.status),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    /// Block until a device is connected, or fail after `timeout`.
    pub fn wait_for_device(&self, timeout: Duration) -> CaptureResult<()> {
        let mut child = self
            .command("wait-for-any-device")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CaptureError::AdbUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return if status.success() {
                    Ok(())
                } else {
                    Err(CaptureError::AdbCommand {
                        command: "wait-for-any-device".into(),
                        detail: format!("exited with {}", status),
                    })
                };
            }

            let now = Instant::now();
            if now >= deadline {
                // Fails only if the process already exited
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::DeviceWaitTimeout(timeout));
            }
            thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Serials of connected, authorized devices.
    pub fn devices(&self) -> CaptureResult<Vec<String>> {
        let output = self
            .command("devices")
            .output()
            .map_err(|e| CaptureError::AdbUnavailable {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(CaptureError::AdbCommand {
                command: "devices".into(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Check adb is installed and at least one device is online.
    ///
    /// A device that does not show up within `wait` is not fatal by itself;
    /// only an empty device list is.
    #[instrument(name = "adb_preflight", skip(self), fields(program = %self.program))]
    pub fn preflight(&self, wait: Duration) -> CaptureResult<Vec<String>> {
        let version = self.check_available()?;
        debug!(%version, "adb available");

        if let Err(e) = self.wait_for_device(wait) {
            warn!(error = %e, "No device reported ready");
        }

        let devices = self.devices()?;
        if devices.is_empty() {
            return Err(CaptureError::NoDevice);
        }
        info!(?devices, "Found devices");
        Ok(devices)
    }
}
