//! Relay configuration: JSON file plus command-line overrides.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use relay_capture::CaptureConfig;
use relay_hub::{HubConfig, VIEWER_QUEUE_CAPACITY};

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`RelayConfig`].
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-viewer delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Units buffered for a viewer before it is dropped as too slow.
    pub queue_capacity: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: VIEWER_QUEUE_CAPACITY,
        }
    }
}

/// Full relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the HTTP server listens on.
    pub listen_addr: SocketAddr,

    /// WebSocket endpoint path.
    pub ws_path: String,

    /// Seconds between stats log lines (0 disables them).
    pub stats_interval_secs: u64,

    /// Directory served at `/` instead of the built-in viewer page.
    pub static_dir: Option<PathBuf>,

    pub hub: HubConfig,

    pub capture: CaptureConfig,

    pub viewer: ViewerConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            stats_interval_secs: 30,
            static_dir: None,
            hub: HubConfig::default(),
            capture: CaptureConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load from a JSON file; missing fields keep their defaults.
    pub fn load(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }

    /// Check values the rest of the relay relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        if matches!(self.ws_path.as_str(), "/" | "/stats" | "/viewer.js") {
            return Err(ConfigError::Invalid(format!(
                "ws_path conflicts with a built-in route: {}",
                self.ws_path
            )));
        }
        if self.viewer.queue_capacity == 0 {
            return Err(ConfigError::Invalid("viewer queue_capacity must be > 0".into()));
        }
        if self.hub.max_pending_bytes == 0 {
            return Err(ConfigError::Invalid("max_pending_bytes must be > 0".into()));
        }
        if self.capture.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stall_timeout_ms must be > 0".into()));
        }
        if let Some(dir) = &self.static_dir {
            if !dir.is_dir() {
                return Err(ConfigError::Invalid(format!(
                    "static_dir is not a directory: {}",
                    dir.display()
                )));
            }
        }
        if self.capture.program.is_empty() {
            return Err(ConfigError::Invalid("capture program is empty".into()));
        }
        Ok(())
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Relay a live H.264 capture stream to WebSocket viewers.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// WebSocket endpoint path
    #[arg(long)]
    pub ws_path: Option<String>,

    /// Units buffered per viewer before it is dropped
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Cap on bytes held for an unfinished unit
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,

    /// Restart capture after this many milliseconds without data
    #[arg(long)]
    pub stall_timeout_ms: Option<u64>,

    /// Serve this directory at / instead of the built-in viewer page
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Skip the adb and connected-device check at startup
    #[arg(long)]
    pub skip_device_check: bool,

    /// Capture program (default: adb)
    #[arg(long)]
    pub capture_cmd: Option<String>,

    /// Capture program arguments, after `--`
    #[arg(last = true)]
    pub capture_args: Vec<String>,
}

impl Cli {
    /// Resolve the final configuration.
    pub fn into_config(self) -> Result<RelayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(ws_path) = self.ws_path {
            config.ws_path = ws_path;
        }
        if let Some(capacity) = self.queue_capacity {
            config.viewer.queue_capacity = capacity;
        }
        if let Some(max) = self.max_pending_bytes {
            config.hub.max_pending_bytes = max;
        }
        if let Some(dir) = self.static_dir {
            config.static_dir = Some(dir);
        }
        if self.skip_device_check {
            config.capture.check_device = false;
        }
        if let Some(timeout) = self.stall_timeout_ms {
            config.capture.stall_timeout_ms = timeout;
        }
        if let Some(program) = self.capture_cmd {
            config.capture.program = program;
            config.capture.args = self.capture_args;
        } else if !self.capture_args.is_empty() {
            config.capture.args = self.capture_args;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("h264-relay").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.viewer.queue_capacity, VIEWER_QUEUE_CAPACITY);
        assert_eq!(config.capture.program, "adb");
        assert!(config.static_dir.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let config = parse(&[
            "--listen",
            "127.0.0.1:9000",
            "--ws-path",
            "/live",
            "--queue-capacity",
            "8",
            "--capture-cmd",
            "cat",
            "--",
            "capture.h264",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.ws_path, "/live");
        assert_eq!(config.viewer.queue_capacity, 8);
        assert_eq!(config.capture.command_line(), "cat capture.h264");
    }

    #[test]
    fn test_capture_args_without_program_keep_adb() {
        let config = parse(&["--", "exec-out", "screenrecord", "-"]).into_config().unwrap();
        assert_eq!(config.capture.command_line(), "adb exec-out screenrecord -");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse(&["--ws-path", "ws"]).into_config(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse(&["--queue-capacity", "0"]).into_config(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse(&["--ws-path", "/"]).into_config(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse(&["--static-dir", "/nonexistent/h264-relay-web"]).into_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_stall_timeout_rejected() {
        let err = parse(&["--stall-timeout-ms", "0"]).into_config().unwrap_err();
        assert!(err.to_string().contains("stall_timeout_ms"), "{}", err);

        let config = parse(&["--stall-timeout-ms", "1500"]).into_config().unwrap();
        assert_eq!(config.capture.stall_timeout_ms, 1500);
    }

    #[test]
    fn test_device_check_flags() {
        let config = parse(&[]).into_config().unwrap();
        assert!(config.capture.needs_device_check());

        let config = parse(&["--skip-device-check"]).into_config().unwrap();
        assert!(!config.capture.needs_device_check());

        let config = parse(&["--capture-cmd", "cat", "--", "capture.h264"]).into_config().unwrap();
        assert!(!config.capture.needs_device_check());
    }

    #[test]
    fn test_load_partial_json_file() {
        let path = std::env::temp_dir().join(format!("h264-relay-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"ws_path": "/video", "viewer": {"queue_capacity": 32}, "hub": {"max_pending_bytes": 1024}}"#,
        )
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--queue-capacity", "64"]);
        let config = cli.into_config().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.ws_path, "/video");
        assert_eq!(config.hub.max_pending_bytes, 1024);
        // Command line wins over the file
        assert_eq!(config.viewer.queue_capacity, 64);
        assert_eq!(config.stats_interval_secs, 30);
    }

    #[test]
    fn test_missing_config_file() {
        let err = parse(&["--config", "/nonexistent/h264-relay.json"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
