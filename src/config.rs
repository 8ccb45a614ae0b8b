//! JSON configuration file (`--config`).
//!
//! Every field has a default, so a file only needs the keys it changes:
//!
//! ```json
//! { "scanning": { "max_parallel_targets": 10 }, "stealth": { "decoy_count": 5 } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Longest stealth delay accepted from a config file, in seconds.
pub const MAX_DELAY_SECS: f64 = 60.0;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scanning: ScanningConfig,
    pub stealth: StealthConfig,
    pub wordlists: WordlistConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanningConfig {
    /// Targets scanned at once by the scheduler.
    pub max_parallel_targets: usize,
    pub connect_timeout_ms: u64,
    pub banner_timeout_ms: u64,
    pub http_timeout_secs: u64,
    /// CIDR targets expanding to more hosts than this are rejected.
    pub max_hosts_per_range: usize,
    pub max_directory_words: usize,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            max_parallel_targets: 5,
            connect_timeout_ms: 400,
            banner_timeout_ms: 3000,
            http_timeout_secs: 10,
            max_hosts_per_range: 4096,
            max_directory_words: 100,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StealthConfig {
    pub normal_concurrency: usize,
    pub stealth_concurrency: usize,
    /// Seconds, `[min, max]`.
    pub delay_range: [f64; 2],
    pub use_decoys: bool,
    pub decoy_count: usize,
    pub randomize_user_agents: bool,
}

impl Default for StealthConfig {
    fn default() -> Self {
        Self {
            normal_concurrency: 20,
            stealth_concurrency: 5,
            delay_range: [0.1, 0.5],
            use_decoys: true,
            decoy_count: 3,
            randomize_user_agents: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct WordlistConfig {
    /// Directory brute-force wordlist, one path per line.
    pub directories: Option<PathBuf>,
}

impl AppConfig {
    /// Built-in defaults when `path` is `None`, otherwise the parsed file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("no configuration file given, using defaults");
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(s).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scanning;
        if s.max_parallel_targets == 0 {
            return Err(ConfigError::Invalid(
                "scanning.max_parallel_targets must be greater than 0".into(),
            ));
        }
        if s.connect_timeout_ms == 0 || s.banner_timeout_ms == 0 || s.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".into()));
        }
        if s.max_hosts_per_range == 0 {
            return Err(ConfigError::Invalid(
                "scanning.max_hosts_per_range must be greater than 0".into(),
            ));
        }
        let st = &self.stealth;
        if st.normal_concurrency == 0 || st.stealth_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "stealth concurrency caps must be greater than 0".into(),
            ));
        }
        let [lo, hi] = st.delay_range;
        if !(lo >= 0.0 && hi >= lo && hi <= MAX_DELAY_SECS) {
            return Err(ConfigError::Invalid(format!(
                "stealth.delay_range [{lo}, {hi}] must satisfy 0 <= min <= max <= {MAX_DELAY_SECS}"
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.scanning.connect_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.scanning.banner_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.scanning.http_timeout_secs)
    }
}
