//! Watchdog and recovery configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host checksum watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Interval between checksum broadcasts in milliseconds
    pub checksum_interval_ms: u64,
    /// Time `stop` waits for an in-flight cycle in milliseconds
    pub shutdown_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            checksum_interval_ms: 10_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl WatchdogConfig {
    /// Interval between checksum broadcasts
    pub fn checksum_interval(&self) -> Duration {
        Duration::from_millis(self.checksum_interval_ms.max(1))
    }

    /// Time `stop` waits for an in-flight cycle
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Client recovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Poll interval of the files-remaining counter in milliseconds
    pub poll_interval_ms: u64,
    /// Give up after this many milliseconds; `None` waits forever
    pub timeout_ms: Option<u64>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            timeout_ms: Some(300_000), // 5 minutes
        }
    }
}

impl RecoveryConfig {
    /// Poll interval of the files-remaining counter
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Recovery timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let watchdog = WatchdogConfig::default();
        assert_eq!(watchdog.checksum_interval(), Duration::from_secs(10));
        assert_eq!(watchdog.shutdown_timeout(), Duration::from_secs(5));

        let recovery = RecoveryConfig::default();
        assert_eq!(recovery.poll_interval(), Duration::from_millis(100));
        assert_eq!(recovery.timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WatchdogConfig =
            serde_json::from_str(r#"{"checksum_interval_ms": 250}"#).unwrap();
        assert_eq!(config.checksum_interval_ms, 250);
        assert_eq!(config.shutdown_timeout_ms, 5_000);

        let config: RecoveryConfig = serde_json::from_str(r#"{"timeout_ms": null}"#).unwrap();
        assert_eq!(config.timeout(), None);
    }
}
