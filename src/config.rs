//! Session configuration
//!
//! Settings come from a JSON document, from the environment, or from
//! defaults. Environment variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TANDEM_CHECKSUM_INTERVAL_MS` | 10000 |
//! | `TANDEM_SHUTDOWN_TIMEOUT_MS` | 5000 |
//! | `TANDEM_RECOVERY_POLL_MS` | 100 |
//! | `TANDEM_RECOVERY_TIMEOUT_MS` | 300000 (0 waits forever) |
//! | `TANDEM_LOG` | `info` |
//! | `TANDEM_LOG_FORMAT` | `compact` |

use crate::{LogConfig, LogFormat, TandemResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tandem_consistency::{RecoveryConfig, WatchdogConfig};
use tracing::warn;

/// Complete session configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TandemConfig {
    /// Host checksum watchdog
    pub watchdog: WatchdogConfig,
    /// Client recovery
    pub recovery: RecoveryConfig,
    /// Logging
    pub log: LogConfig,
}

impl TandemConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parsed(&lookup, "TANDEM_CHECKSUM_INTERVAL_MS") {
            config.watchdog.checksum_interval_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "TANDEM_SHUTDOWN_TIMEOUT_MS") {
            config.watchdog.shutdown_timeout_ms = ms;
        }
        if let Some(ms) = parsed(&lookup, "TANDEM_RECOVERY_POLL_MS") {
            config.recovery.poll_interval_ms = ms;
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "TANDEM_RECOVERY_TIMEOUT_MS") {
            config.recovery.timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(filter) = lookup("TANDEM_LOG") {
            config.log.filter = filter;
        }
        if let Some(format) = parsed::<LogFormat, _>(&lookup, "TANDEM_LOG_FORMAT") {
            config.log.format = format;
        }
        config
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> TandemResult<Self> {
        serde_json::from_str(json).map_err(|err| crate::TandemError::Config(err.to_string()))
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
