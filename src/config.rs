//! Configuration for the sensor relay.

use crate::anonymization::{Anonymizer, RuleConfig, RuleSet};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Main configuration for a relay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Stable protocol identifier; also the anonymization salt
    pub protocol_id: Uuid,

    pub protocol_name: String,

    /// How often pending data is drained and committed
    #[serde(with = "duration_serde")]
    pub commit_interval: Duration,

    /// How often failed probes and the remote sink are restarted
    #[serde(with = "duration_serde")]
    pub health_check_interval: Duration,

    /// Upper bound on the final commit during shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum records per commit batch
    pub max_batch_size: usize,

    /// Path for the pending log and transparency stats
    pub data_path: PathBuf,

    /// Sync the pending log to disk after every write
    pub fsync: bool,

    /// Which probes to run
    pub probes: ProbeSelection,

    /// Remote sink; data is only buffered locally when absent
    pub remote: Option<RemoteConfig>,

    /// Per-field anonymization rules
    pub anonymization: Vec<RuleConfig>,

    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-relay");

        Self {
            protocol_id: Uuid::new_v4(),
            protocol_name: "default".to_string(),
            commit_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            max_batch_size: 500,
            data_path: data_dir,
            fsync: false,
            probes: ProbeSelection::default(),
            remote: None,
            anonymization: default_rules(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_rules() -> Vec<RuleConfig> {
    ["latitude", "longitude"]
        .into_iter()
        .map(|field| RuleConfig {
            probe_type: "location".to_string(),
            field: field.to_string(),
            anonymizer: Anonymizer::Round { granularity: 0.01 },
        })
        .collect()
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensor-relay")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    pub fn pending_log_path(&self) -> PathBuf {
        self.data_path.join("pending.log")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Salt for keyed hashing of anonymized fields.
    pub fn anonymization_salt(&self) -> String {
        self.protocol_id.to_string()
    }

    /// Build the rule set described by `anonymization`.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::from_config(&self.anonymization_salt(), &self.anonymization)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check values that would stall or break the protocol loops.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commit_interval.is_zero() {
            return Err(ConfigError::Invalid("commit_interval must be non-zero".into()));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health_check_interval must be non-zero".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be non-zero".into()));
        }
        self.probes.validate()?;
        self.backoff.validate()?;
        if let Some(remote) = &self.remote {
            if remote.bucket.trim_matches('/').is_empty() {
                return Err(ConfigError::Invalid("remote bucket must not be empty".into()));
            }
        }
        self.rule_set()?;
        Ok(())
    }
}

/// Which probes to run and how often polled probes are read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSelection {
    pub accelerometer: bool,
    pub location: bool,
    pub compass: bool,

    #[serde(with = "duration_serde")]
    pub accelerometer_interval: Duration,

    #[serde(with = "duration_serde")]
    pub location_interval: Duration,

    /// Event rate of the simulated compass
    #[serde(with = "duration_serde")]
    pub compass_interval: Duration,
}

impl Default for ProbeSelection {
    fn default() -> Self {
        Self {
            accelerometer: true,
            location: true,
            compass: true,
            accelerometer_interval: Duration::from_secs(1),
            location_interval: Duration::from_secs(10),
            compass_interval: Duration::from_secs(1),
        }
    }
}

impl ProbeSelection {
    /// Parse probe selection from a comma-separated string.
    pub fn from_csv(s: &str) -> Self {
        let probes: Vec<String> = s.split(',').map(|s| s.trim().to_lowercase()).collect();
        let wants = |name: &str| probes.iter().any(|p| p == name || p == "all");

        Self {
            accelerometer: wants("accelerometer"),
            location: wants("location"),
            compass: wants("compass"),
            ..Self::default()
        }
    }

    /// Check if at least one probe is enabled.
    pub fn any_enabled(&self) -> bool {
        self.accelerometer || self.location || self.compass
    }

    pub fn enabled_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.accelerometer {
            names.push("accelerometer");
        }
        if self.location {
            names.push("location");
        }
        if self.compass {
            names.push("compass");
        }
        names
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("accelerometer_interval", self.accelerometer_interval),
            ("location_interval", self.location_interval),
            ("compass_interval", self.compass_interval),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Remote sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Top-level bucket; objects land under `{bucket}/{protocol_id}/{device_id}`
    pub bucket: String,

    #[serde(flatten)]
    pub target: RemoteTarget,
}

/// Where the remote sink's object store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteTarget {
    /// A directory standing in for an object store (shared mount, sync folder)
    Directory { path: PathBuf },
    /// An HTTP object store (requires the `http` feature)
    Http {
        endpoint: String,
        #[serde(default)]
        token: String,
    },
}

/// Backoff applied when whole commit cycles fail.
///
/// After `n` consecutive cycles that committed nothing, the next
/// `initial_skip_cycles * multiplier^(n-1)` cycles are skipped, capped at
/// `max_skip_cycles`. Records are never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Cycles skipped after the first failed cycle (0 disables backoff)
    pub initial_skip_cycles: u32,
    pub multiplier: f64,
    pub max_skip_cycles: u32,
    /// Commit attempts after which a record is reported as suspect (0 disables)
    pub suspect_after_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_skip_cycles: 1,
            multiplier: 2.0,
            max_skip_cycles: 8,
            suspect_after_attempts: 20,
        }
    }
}

impl BackoffConfig {
    /// No skipped cycles: retry on every commit interval.
    pub fn fixed_interval() -> Self {
        Self {
            initial_skip_cycles: 0,
            ..Self::default()
        }
    }

    /// Cycles to skip after `consecutive_failures` fully failed cycles.
    pub fn skip_cycles(&self, consecutive_failures: u32) -> u32 {
        if consecutive_failures == 0 || self.initial_skip_cycles == 0 {
            return 0;
        }
        let exponent = (consecutive_failures - 1).min(31) as i32;
        let skips = self.initial_skip_cycles as f64 * self.multiplier.powi(exponent);
        skips.min(self.max_skip_cycles as f64) as u32
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_selection_parsing() {
        let probes = ProbeSelection::from_csv("accelerometer, Compass");
        assert!(probes.accelerometer);
        assert!(probes.compass);
        assert!(!probes.location);
        assert_eq!(probes.enabled_names(), vec!["accelerometer", "compass"]);

        let probes = ProbeSelection::from_csv("all");
        assert!(probes.accelerometer && probes.location && probes.compass);

        let probes = ProbeSelection::from_csv("gyroscope");
        assert!(!probes.any_enabled());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.commit_interval, Duration::from_secs(30));
        assert_eq!(config.max_batch_size, 500);
        assert!(config.remote.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = Config {
            commit_interval: Duration::from_millis(1500),
            ..Config::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["commit_interval"], 1500);

        let back: Config = serde_json::from_value(json).unwrap();
        assert_eq!(back.commit_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_remote_config_json_shape() {
        let json = r#"{"bucket":"study","kind":"http","endpoint":"https://objects.example"}"#;
        let remote: RemoteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(remote.bucket, "study");
        match remote.target {
            RemoteTarget::Http { endpoint, token } => {
                assert_eq!(endpoint, "https://objects.example");
                assert!(token.is_empty());
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = Config {
            commit_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            max_batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_forbidden_rule() {
        let mut config = Config::default();
        config.anonymization.push(RuleConfig {
            probe_type: "weight".to_string(),
            field: "weight_lbs".to_string(),
            anonymizer: Anonymizer::Hash,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_backoff_skip_cycles() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.skip_cycles(0), 0);
        assert_eq!(backoff.skip_cycles(1), 1);
        assert_eq!(backoff.skip_cycles(2), 2);
        assert_eq!(backoff.skip_cycles(4), 8);
        assert_eq!(backoff.skip_cycles(40), 8);

        assert_eq!(BackoffConfig::fixed_interval().skip_cycles(5), 0);
    }
}
