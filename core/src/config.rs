//! Harness configuration.
//!
//! Values come from `Default`, from serde (for embedding in a larger config
//! file), or from `TASKCHECK_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_WAIT_TIMEOUT_MS: &str = "TASKCHECK_WAIT_TIMEOUT_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TASKCHECK_REQUEST_TIMEOUT_MS";
pub const ENV_CHUNK_SIZE: &str = "TASKCHECK_CHUNK_SIZE";
pub const ENV_DOWNLOAD_DIR: &str = "TASKCHECK_DOWNLOAD_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How long a driver blocks on a completion signal.
    pub wait_timeout_ms: u64,
    /// Upper bound for a single transport round-trip, so worker threads of
    /// abandoned tasks eventually exit.
    pub request_timeout_ms: u64,
    /// Largest body piece a transport delivers per progress event.
    pub chunk_size: usize,
    /// Where downloads are materialized.
    pub download_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            chunk_size: 16 * 1024,
            download_dir: std::env::temp_dir().join("taskcheck"),
        }
    }
}

impl HarnessConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overridden by whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_WAIT_TIMEOUT_MS) {
            config.wait_timeout_ms = parse_positive(ENV_WAIT_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout_ms = parse_positive(ENV_REQUEST_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_positive(ENV_CHUNK_SIZE, &v)? as usize;
        }
        if let Some(v) = lookup(ENV_DOWNLOAD_DIR) {
            if v.trim().is_empty() {
                return Err(ConfigError {
                    key: ENV_DOWNLOAD_DIR.to_string(),
                    value: v,
                    reason: "must not be empty".to_string(),
                });
            }
            config.download_dir = PathBuf::from(v);
        }
        Ok(config)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    let err = |reason: &str| ConfigError {
        key: key.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(err("must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(err(&e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_wait_five_seconds() {
        let config = HarnessConfig::default();
        assert_eq!(config.wait_timeout(), Duration::from_secs(5));
        assert_eq!(config.chunk_size, 16 * 1024);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = HarnessConfig::from_lookup(lookup(&[
            (ENV_WAIT_TIMEOUT_MS, "250"),
            (ENV_CHUNK_SIZE, "64"),
            (ENV_DOWNLOAD_DIR, "/var/tmp/dl"),
        ]))
        .unwrap();
        assert_eq!(config.wait_timeout_ms, 250);
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.download_dir, PathBuf::from("/var/tmp/dl"));
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = HarnessConfig::from_lookup(lookup(&[(ENV_WAIT_TIMEOUT_MS, "0")])).unwrap_err();
        assert_eq!(err.key, ENV_WAIT_TIMEOUT_MS);
    }

    #[test]
    fn garbage_chunk_size_is_rejected() {
        let err = HarnessConfig::from_lookup(lookup(&[(ENV_CHUNK_SIZE, "big")])).unwrap_err();
        assert_eq!(err.value, "big");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: HarnessConfig = serde_json::from_str(r#"{"wait_timeout_ms": 1000}"#).unwrap();
        assert_eq!(config.wait_timeout_ms, 1000);
        assert_eq!(config.chunk_size, HarnessConfig::default().chunk_size);
    }
}
