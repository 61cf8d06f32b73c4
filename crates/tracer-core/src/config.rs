//! Configuration surface for the tracing core
//!
//! Values come from built-in defaults, an optional TOML file, and `TRACER_*`
//! environment variables, applied in that order. The core only reads this;
//! nothing in the runtime writes configuration back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TRACER_";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration loading and validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The file is not valid TOML for this schema
    #[error("invalid config: {message}")]
    Parse {
        /// Parser message
        message: String,
    },

    /// A field holds an unusable value
    #[error("invalid configuration: {field} - {reason}")]
    Invalid {
        /// Offending field
        field: String,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Radio scan cadence handed to the broadcast layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSchedule {
    /// Seconds between scan starts
    pub interval_secs: u64,
    /// Seconds each scan runs
    pub duration_secs: u64,
}

impl ScanSchedule {
    /// Update the interval; zero is ignored. Returns whether it changed.
    pub fn set_interval(&mut self, secs: u64) -> bool {
        if secs == 0 {
            return false;
        }
        self.interval_secs = secs;
        true
    }

    /// Update the duration; zero is ignored. Returns whether it changed.
    pub fn set_duration(&mut self, secs: u64) -> bool {
        if secs == 0 {
            return false;
        }
        self.duration_secs = secs;
        true
    }
}

impl Default for ScanSchedule {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            duration_secs: 10,
        }
    }
}

/// Tracing core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Device uid sent with fetches and uploads
    pub device_uid: String,
    /// Local device model string
    pub device_model: String,
    /// Organization tag attached to exports and advertisements
    pub organization_id: String,
    /// Protocol version attached to exports and advertisements
    pub protocol_version: u32,
    /// Days a record is kept before mandatory deletion
    pub retention_days: u64,
    /// Scan cadence
    pub scan: ScanSchedule,
    /// Directory for the filesystem stores; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            device_uid: String::new(),
            device_model: "unknown".to_string(),
            organization_id: "hyperjump".to_string(),
            protocol_version: 2,
            retention_days: 21,
            scan: ScanSchedule::default(),
            data_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl TracerConfig {
    /// Load a TOML file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML on top of the defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Apply `TRACER_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_env_vars(std::env::vars())
    }

    /// Apply `TRACER_*` overrides from an explicit variable list.
    ///
    /// `TRACER_SCAN_INTERVAL_SECS` maps to `scan.interval_secs`; every other
    /// variable maps to the lower-cased field name after the prefix.
    pub fn merge_env_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            if let Some(field) = key.as_ref().strip_prefix(ENV_PREFIX) {
                let field = field.to_ascii_lowercase();
                let field = match field.strip_prefix("scan_") {
                    Some(rest) => format!("scan.{rest}"),
                    None => field,
                };
                self.set_from_string(&field, value.as_ref())?;
            }
        }
        Ok(())
    }

    /// Set one field from its string form
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "base_url" => self.base_url = value.trim_end_matches('/').to_string(),
            "device_uid" => self.device_uid = value.to_string(),
            "device_model" => self.device_model = value.to_string(),
            "organization_id" => self.organization_id = value.to_string(),
            "protocol_version" => self.protocol_version = parse_number(key, value)?,
            "retention_days" => self.retention_days = parse_number(key, value)?,
            "scan.interval_secs" => self.scan.interval_secs = parse_number(key, value)?,
            "scan.duration_secs" => self.scan.duration_secs = parse_number(key, value)?,
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "log_level" => self.log_level = value.to_string(),
            other => {
                tracing::debug!(key = other, "ignoring unknown configuration key");
            }
        }
        Ok(())
    }

    /// Reject values the core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_days == 0 {
            return Err(ConfigError::invalid("retention_days", "must be at least 1"));
        }
        if self.scan.interval_secs == 0 {
            return Err(ConfigError::invalid("scan.interval_secs", "must be positive"));
        }
        if self.scan.duration_secs == 0 {
            return Err(ConfigError::invalid("scan.duration_secs", "must be positive"));
        }
        if self.organization_id.trim().is_empty() {
            return Err(ConfigError::invalid("organization_id", "must not be empty"));
        }
        Ok(())
    }

    /// Retention TTL as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(SECS_PER_DAY))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("expected a number, got {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_deployed_values() {
        let config = TracerConfig::default();
        assert_eq!(config.retention_days, 21);
        assert_eq!(config.retention(), Duration::from_secs(21 * SECS_PER_DAY));
        assert_eq!(config.protocol_version, 2);
        assert_eq!(config.organization_id, "hyperjump");
        assert_eq!(config.scan, ScanSchedule { interval_secs: 60, duration_secs: 10 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "base_url = \"https://trace.example\"\nretention_days = 14\n\n[scan]\ninterval_secs = 30"
        )
        .unwrap();

        let config = TracerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "https://trace.example");
        assert_eq!(config.retention_days, 14);
        assert_eq!(config.scan.interval_secs, 30);
        assert_eq!(config.scan.duration_secs, 10);
        assert_eq!(config.organization_id, "hyperjump");
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = TracerConfig::default();
        config
            .merge_env_vars([
                ("TRACER_RETENTION_DAYS", "7"),
                ("TRACER_SCAN_DURATION_SECS", "5"),
                ("TRACER_BASE_URL", "https://trace.example/"),
                ("HOME", "/root"),
            ])
            .unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.scan.duration_secs, 5);
        assert_eq!(config.base_url, "https://trace.example");

        let err = config
            .merge_env_vars([("TRACER_PROTOCOL_VERSION", "two")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn validation_rejects_zero_windows() {
        let mut config = TracerConfig::default();
        config.retention_days = 0;
        assert!(config.validate().is_err());

        let mut config = TracerConfig::default();
        config.organization_id = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn scan_schedule_ignores_zero() {
        let mut schedule = ScanSchedule::default();
        assert!(!schedule.set_interval(0));
        assert!(!schedule.set_duration(0));
        assert_eq!(schedule, ScanSchedule::default());
        assert!(schedule.set_interval(120));
        assert_eq!(schedule.interval_secs, 120);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            TracerConfig::from_toml_str("retention_days = \"many\""),
            Err(ConfigError::Parse { .. })
        ));
    }
}
