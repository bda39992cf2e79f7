//! Supervisor state and restart policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BASE_RESTART_DELAY_MS, MAX_RESTART_ATTEMPTS};

/// Lifecycle of the capture supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    /// Spawning the first capture process.
    Starting,

    /// Capture process running and feeding the hub.
    Streaming,

    /// Waiting to start the capture process again.
    Restarting { attempt: u32 },

    /// Stopped on request.
    Stopped,

    /// Gave up after exhausting restart attempts.
    Failed { reason: String },
}

impl SupervisorState {
    /// Check if capture is running.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Check if the supervisor has finished for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed { .. })
    }

    /// Human-readable status.
    pub fn message(&self) -> String {
        match self {
            Self::Starting => "Starting capture".to_string(),
            Self::Streaming => "Streaming".to_string(),
            Self::Restarting { attempt } => format!("Restarting capture (attempt {})", attempt),
            Self::Stopped => "Stopped".to_string(),
            Self::Failed { reason } => format!("Failed: {}", reason),
        }
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::Starting
    }
}

/// Restart policy for the capture process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Consecutive failed sessions allowed before giving up (`None` = forever).
    pub max_attempts: Option<u32>,

    /// Base delay between attempts in milliseconds (doubled per attempt).
    pub base_delay_ms: u64,

    /// Upper bound on the delay in milliseconds.
    pub max_delay_ms: u64,

    /// A session that ran at least this long resets the attempt count.
    pub stable_after_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RESTART_ATTEMPTS,
            base_delay_ms: BASE_RESTART_DELAY_MS,
            max_delay_ms: 10_000,
            stable_after_ms: 30_000,
        }
    }
}

impl RestartPolicy {
    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let delay = Duration::from_millis(self.base_delay_ms).saturating_mul(multiplier);
        delay.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Check if more attempts are allowed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Whether a session that lasted `uptime` counts as healthy.
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= Duration::from_millis(self.stable_after_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_delays() {
        let policy = RestartPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[test]
    fn test_restart_policy_should_retry() {
        let policy = RestartPolicy {
            max_attempts: Some(3),
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(RestartPolicy::default().should_retry(u32::MAX));
    }

    #[test]
    fn test_restart_policy_stability() {
        let policy = RestartPolicy::default();
        assert!(!policy.is_stable(Duration::from_secs(5)));
        assert!(policy.is_stable(Duration::from_secs(30)));
    }

    #[test]
    fn test_state_messages() {
        assert_eq!(
            SupervisorState::Restarting { attempt: 2 }.message(),
            "Restarting capture (attempt 2)"
        );
        assert!(SupervisorState::Failed {
            reason: "x".into()
        }
        .is_terminal());
        assert!(!SupervisorState::Streaming.is_terminal());
    }
}
