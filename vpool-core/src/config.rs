//! Configuration management.

use crate::error::{Result, VpoolError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Persistent configuration for vpool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub data_dir: String,
    pub db_path: String,
    pub staging_dir: String,
    /// Background tasks executing at the same time.
    pub max_concurrent_tasks: usize,
    /// Running plus queued tasks admitted before `submit` is refused.
    pub max_pending_tasks: usize,
    /// How long a finished scan pool stays visible before teardown.
    pub scan_ttl_secs: u64,
    /// Upper bound for a single filesystem walk.
    pub scan_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            data_dir: paths::data_dir().to_string_lossy().to_string(),
            db_path: paths::db_path().to_string_lossy().to_string(),
            staging_dir: paths::staging_dir().to_string_lossy().to_string(),
            max_concurrent_tasks: 4,
            max_pending_tasks: 64,
            scan_ttl_secs: 300,
            scan_timeout_secs: 3600,
        }
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from disk, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| VpoolError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            VpoolError::InvalidConfig { reason: format!("Failed to parse config: {}", e) }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VpoolError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            VpoolError::InvalidConfig { reason: format!("Failed to serialize config: {}", e) }
        })?;
        std::fs::write(&path, content).map_err(|e| VpoolError::IoError { path, source: e })
    }

    /// Reject limits the task registry cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(VpoolError::InvalidConfig {
                reason: "max_concurrent_tasks must be at least 1".to_string(),
            });
        }
        if self.max_pending_tasks < self.max_concurrent_tasks {
            return Err(VpoolError::InvalidConfig {
                reason: format!(
                    "max_pending_tasks ({}) must not be below max_concurrent_tasks ({})",
                    self.max_pending_tasks, self.max_concurrent_tasks
                ),
            });
        }
        Ok(())
    }

    pub fn scan_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_ttl_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_concurrent_tasks": 2}"#).unwrap();
        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.max_pending_tasks, 64);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = Config { max_concurrent_tasks: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(VpoolError::InvalidConfig { .. })));

        let config = Config { max_concurrent_tasks: 8, max_pending_tasks: 4, ..Config::default() };
        assert!(config.validate().is_err());
    }
}
