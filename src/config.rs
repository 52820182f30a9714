use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Overrides `payment_retry_time_secs`, in whole seconds.
pub const PAYMENT_RETRY_TIME_ENV: &str = "PAYMENT_RETRY_TIME";

/// Timings and bounds of the swap engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Pause between two claim payment attempts.
    pub payment_retry_interval_secs: u64,
    /// Total time the claim payment is retried before the swap gives up.
    pub payment_retry_time_secs: u64,
    /// How long a swap waits for the peer's next protocol message.
    pub peer_response_timeout_secs: u64,
    /// Interval of the redundant resend of the opening broadcast message.
    pub resend_interval_secs: u64,
    /// Consecutive `OnRetry` loops allowed per delivered event.
    pub max_retries: u32,
    pub fee_invoice_expiry_secs: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            payment_retry_interval_secs: 10,
            payment_retry_time_secs: 120,
            peer_response_timeout_secs: 10 * 60,
            resend_interval_secs: 10,
            max_retries: 20,
            fee_invoice_expiry_secs: 600,
        }
    }
}

impl SwapConfig {
    /// Reads the config from a JSON file, falling back to defaults when the
    /// file does not exist, then applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parse config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env();
        Ok(cfg)
    }

    pub fn apply_env(&mut self) {
        let Ok(raw) = std::env::var(PAYMENT_RETRY_TIME_ENV) else {
            return;
        };
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => self.payment_retry_time_secs = secs,
            _ => tracing::warn!(
                value = %raw,
                "{PAYMENT_RETRY_TIME_ENV} must be a positive number of seconds, ignoring"
            ),
        }
    }

    /// Compressed timings for tests.
    pub fn for_testing() -> Self {
        Self {
            payment_retry_interval_secs: 1,
            payment_retry_time_secs: 3,
            resend_interval_secs: 1,
            ..Self::default()
        }
    }

    pub fn payment_retry_interval(&self) -> Duration {
        Duration::from_secs(self.payment_retry_interval_secs)
    }

    pub fn payment_retry_time(&self) -> Duration {
        Duration::from_secs(self.payment_retry_time_secs)
    }

    pub fn peer_response_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_response_timeout_secs)
    }

    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() -> Result<()> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let path = dir.path().join("swap.json");
        std::fs::write(&path, r#"{"max_retries": 5}"#).context("write config")?;

        let cfg: SwapConfig = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.payment_retry_interval(), Duration::from_secs(10));
        assert_eq!(cfg.peer_response_timeout(), Duration::from_secs(600));
        Ok(())
    }

    #[test]
    fn missing_file_is_default() -> Result<()> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let cfg = SwapConfig::load(&dir.path().join("absent.json"))?;
        assert_eq!(cfg.max_retries, SwapConfig::default().max_retries);
        Ok(())
    }
}
