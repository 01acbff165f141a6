use serde::{Deserialize, Serialize};

use crate::core::errors::VaultError;

/// PIN lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    /// Failed attempts before the account locks
    #[serde(default = "LockoutConfig::default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    /// Lockout window length (seconds)
    #[serde(default = "LockoutConfig::default_lockout_duration_secs")]
    pub lockout_duration_secs: u64,
}

impl LockoutConfig {
    fn default_max_failed_attempts() -> u32 {
        5
    }
    fn default_lockout_duration_secs() -> u64 {
        900
    }

    /// Both bounds must be at least 1; a zero threshold would lock every
    /// account permanently and a zero window would never lock at all.
    pub fn validate(&self) -> Result<(), VaultError> {
        if self.max_failed_attempts < 1 {
            return Err(VaultError::Configuration(
                "max_failed_attempts must be >= 1".to_string(),
            ));
        }
        if self.lockout_duration_secs < 1 {
            return Err(VaultError::Configuration(
                "lockout_duration_secs must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: Self::default_max_failed_attempts(),
            lockout_duration_secs: Self::default_lockout_duration_secs(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_database_url")]
    pub database_url: String,
    pub max_connections: Option<u32>,
    pub connection_timeout_seconds: Option<u64>,
}

impl StorageConfig {
    fn default_database_url() -> String {
        "sqlite://./data/custody.db?mode=rwc".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: Self::default_database_url(),
            max_connections: None,
            connection_timeout_seconds: None,
        }
    }
}

/// Advisory risk scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Transaction history window considered (hours)
    #[serde(default = "RiskConfig::default_lookback_hours")]
    pub lookback_hours: i64,

    /// Score returned when the window holds no history
    #[serde(default = "RiskConfig::default_baseline")]
    pub baseline: f64,

    /// Score returned when history cannot be read
    #[serde(default = "RiskConfig::default_neutral")]
    pub neutral: f64,

    /// Hard upper bound; the score never expresses certainty
    #[serde(default = "RiskConfig::default_cap")]
    pub cap: f64,

    /// Aggregate amount at which the amount signal saturates
    #[serde(default = "RiskConfig::default_amount_saturation")]
    pub amount_saturation: f64,

    /// Transaction count at which the count signal saturates
    #[serde(default = "RiskConfig::default_count_saturation")]
    pub count_saturation: u32,
}

impl RiskConfig {
    fn default_lookback_hours() -> i64 {
        24
    }
    fn default_baseline() -> f64 {
        0.1
    }
    fn default_neutral() -> f64 {
        0.5
    }
    fn default_cap() -> f64 {
        0.95
    }
    fn default_amount_saturation() -> f64 {
        10_000.0
    }
    fn default_count_saturation() -> u32 {
        50
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            lookback_hours: Self::default_lookback_hours(),
            baseline: Self::default_baseline(),
            neutral: Self::default_neutral(),
            cap: Self::default_cap(),
            amount_saturation: Self::default_amount_saturation(),
            count_saturation: Self::default_count_saturation(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

impl VaultConfig {
    pub fn validate(&self) -> Result<(), VaultError> {
        self.lockout.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lockout_config() {
        let cfg = LockoutConfig::default();
        assert_eq!(cfg.max_failed_attempts, 5);
        assert_eq!(cfg.lockout_duration_secs, 900);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cfg = LockoutConfig { max_failed_attempts: 0, lockout_duration_secs: 60 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let cfg = LockoutConfig { max_failed_attempts: 3, lockout_duration_secs: 0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_partial_fields() {
        let cfg: VaultConfig =
            serde_json::from_str(r#"{"lockout": {"max_failed_attempts": 3}}"#).unwrap();
        assert_eq!(cfg.lockout.max_failed_attempts, 3);
        assert_eq!(cfg.lockout.lockout_duration_secs, 900);
        assert_eq!(cfg.risk.baseline, 0.1);
    }
}
