//! Runtime settings for the monitoring loop.
//!
//! ```text
//! { "tick_ms": 100, "infrequent_ms": 1000, "grace_polls": 20,
//!   "grace_interval_ms": 50, "convergence": { "attempts": 50, "backoff_us": 10 } }
//! ```
//!
//! Every field is optional and falls back to the value shown.

use std::{fs::File, io::BufReader, io::Read, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{device::ConvergencePolicy, error::ConfigError};

/// Retry budget as stored in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub attempts: u32,
    pub backoff_us: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        let policy = ConvergencePolicy::default();
        Self {
            attempts: policy.attempts,
            backoff_us: policy.backoff.as_micros() as u64,
        }
    }
}

impl From<ConvergenceConfig> for ConvergencePolicy {
    fn from(config: ConvergenceConfig) -> Self {
        Self {
            attempts: config.attempts,
            backoff: Duration::from_micros(config.backoff_us),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
    pub infrequent_ms: u64,
    pub grace_polls: u32,
    pub grace_interval_ms: u64,
    pub convergence: ConvergenceConfig,
}

impl MonitorConfig {
    pub const DEFAULT_TICK_MS: u64 = 100;
    pub const DEFAULT_INFREQUENT_MS: u64 = 1000;
    pub const DEFAULT_GRACE_POLLS: u32 = 20;
    pub const DEFAULT_GRACE_INTERVAL_MS: u64 = 50;

    pub fn from_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn infrequent_period(&self) -> Duration {
        Duration::from_millis(self.infrequent_ms)
    }

    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_interval_ms)
    }

    pub fn convergence_policy(&self) -> ConvergencePolicy {
        self.convergence.into()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::DEFAULT_TICK_MS,
            infrequent_ms: Self::DEFAULT_INFREQUENT_MS,
            grace_polls: Self::DEFAULT_GRACE_POLLS,
            grace_interval_ms: Self::DEFAULT_GRACE_INTERVAL_MS,
            convergence: ConvergenceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_takes_defaults() {
        let config = MonitorConfig::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.convergence_policy(), ConvergencePolicy::default());
    }

    #[test]
    fn partial_override() {
        let json = r#"{ "tick_ms": 20, "convergence": { "attempts": 5 } }"#;
        let config = MonitorConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.tick_period(), Duration::from_millis(20));
        assert_eq!(config.infrequent_period(), Duration::from_secs(1));
        assert_eq!(
            config.convergence_policy(),
            ConvergencePolicy {
                attempts: 5,
                backoff: Duration::from_micros(10),
            }
        );
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = MonitorConfig::from_reader(r#"{ "tick_ms": "fast" }"#.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = MonitorConfig::from_path("/nonexistent/regwatch.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
