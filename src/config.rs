//! Orchestrator configuration, loadable from TOML.

use crate::domain::loan::TokenAmount;
use crate::error::{LoanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub tracker: TrackerConfig,
    pub refresh_backoff: BackoffConfig,
    pub limits: LoanLimits,
    pub simulation: SimulationConfig,
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.refresh_backoff.validate()?;
        self.limits.validate()
    }
}

/// Confirmation polling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    /// Upper bound on the wait for a terminal outcome.
    #[serde(with = "duration_ms")]
    pub max_wait: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl TrackerConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(LoanError::Config("tracker.poll_interval must be > 0".into()));
        }
        if self.max_wait < self.poll_interval {
            return Err(LoanError::Config(
                "tracker.max_wait must be at least one poll_interval".into(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff for ledger reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_ms")]
    pub initial: Duration,
    #[serde(with = "duration_ms")]
    pub max: Duration,
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
    /// Total tries, the first one included.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: 0.25,
            max_attempts: 4,
        }
    }
}

impl BackoffConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(LoanError::Config(
                "refresh_backoff.max_attempts must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(LoanError::Config(
                "refresh_backoff.jitter must be within [0, 1]".into(),
            ));
        }
        if self.multiplier < 1.0 {
            return Err(LoanError::Config(
                "refresh_backoff.multiplier must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Bounds checked locally before a loan request reaches the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanLimits {
    pub min_duration_days: u32,
    pub max_duration_days: u32,
    pub max_principal: Option<TokenAmount>,
}

impl Default for LoanLimits {
    fn default() -> Self {
        Self {
            min_duration_days: 1,
            max_duration_days: 3650,
            max_principal: None,
        }
    }
}

impl LoanLimits {
    fn validate(&self) -> Result<()> {
        if self.min_duration_days == 0 || self.min_duration_days > self.max_duration_days {
            return Err(LoanError::Config(
                "limits require 0 < min_duration_days <= max_duration_days".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the in-memory ledger driven by the command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub identity: String,
    pub initial_balance: TokenAmount,
    /// Inclusion lookup on which a broadcast transaction lands (1 = first).
    pub confirm_after_polls: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            identity: "0x00000000000000000000000000000000000000b0".to_string(),
            initial_balance: TokenAmount::new(1_000_000),
            confirm_after_polls: 1,
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        return Err(LoanError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: OrchestratorConfig =
        toml::from_str(&content).map_err(|e| LoanError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Serializes a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
