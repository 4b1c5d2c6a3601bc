//! Configuration for synchronization.

use serde::{Deserialize, Serialize};
use std::env;

/// Default number of documents per push window.
pub const DEFAULT_PUSH_DIVIDE_NUMBER: usize = 50;

/// Default maximum number of documents fetched per pull.
pub const DEFAULT_PULL_LIMIT: usize = 1000;

/// Sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Documents per batch request during push
    pub push_divide_number: usize,
    /// Soft-delete (mark) instead of removing on the server
    pub delete_mark: bool,
    /// Maximum documents fetched per pull
    pub pull_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            push_divide_number: DEFAULT_PUSH_DIVIDE_NUMBER,
            delete_mark: false,
            pull_limit: DEFAULT_PULL_LIMIT,
        }
    }
}

impl SyncConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the push window size. Zero is treated as one.
    pub fn with_push_divide_number(mut self, size: usize) -> Self {
        self.push_divide_number = size.max(1);
        self
    }

    /// Choose soft (true) or hard (false) deletes.
    pub fn with_delete_mark(mut self, delete_mark: bool) -> Self {
        self.delete_mark = delete_mark;
        self
    }

    /// Set the pull limit. Zero is treated as one.
    pub fn with_pull_limit(mut self, limit: usize) -> Self {
        self.pull_limit = limit.max(1);
        self
    }

    /// The push window size, never zero.
    pub fn window_size(&self) -> usize {
        self.push_divide_number.max(1)
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(value) = env::var("TETHER_PUSH_DIVIDE_NUMBER") {
            let size: usize = value
                .parse()
                .map_err(|_| ConfigError::InvalidPushDivideNumber(value.clone()))?;
            if size == 0 {
                return Err(ConfigError::InvalidPushDivideNumber(value));
            }
            config.push_divide_number = size;
        }

        if let Ok(value) = env::var("TETHER_DELETE_MARK") {
            config.delete_mark = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::InvalidDeleteMark(value)),
            };
        }

        if let Ok(value) = env::var("TETHER_PULL_LIMIT") {
            config.pull_limit = value
                .parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or(ConfigError::InvalidPullLimit(value))?;
        }

        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid TETHER_PUSH_DIVIDE_NUMBER value: {0}")]
    InvalidPushDivideNumber(String),

    #[error("invalid TETHER_DELETE_MARK value: {0}")]
    InvalidDeleteMark(String),

    #[error("invalid TETHER_PULL_LIMIT value: {0}")]
    InvalidPullLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_push_divide_number(10)
            .with_delete_mark(true)
            .with_pull_limit(25);

        assert_eq!(config.push_divide_number, 10);
        assert!(config.delete_mark);
        assert_eq!(config.pull_limit, 25);
    }

    #[test]
    fn zero_window_is_clamped() {
        let config = SyncConfig::new().with_push_divide_number(0);
        assert_eq!(config.window_size(), 1);

        let config = SyncConfig {
            push_divide_number: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.window_size(), 1);
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"pushDivideNumber": 5}"#).unwrap();
        assert_eq!(config.push_divide_number, 5);
        assert!(!config.delete_mark);
        assert_eq!(config.pull_limit, DEFAULT_PULL_LIMIT);
    }

    // Single test touching the environment to avoid races between tests
    #[test]
    fn from_env() {
        env::remove_var("TETHER_PUSH_DIVIDE_NUMBER");
        env::remove_var("TETHER_DELETE_MARK");
        env::remove_var("TETHER_PULL_LIMIT");
        assert_eq!(SyncConfig::from_env().unwrap(), SyncConfig::default());

        env::set_var("TETHER_PUSH_DIVIDE_NUMBER", "20");
        env::set_var("TETHER_DELETE_MARK", "true");
        let config = SyncConfig::from_env().unwrap();
        assert_eq!(config.push_divide_number, 20);
        assert!(config.delete_mark);

        env::set_var("TETHER_PUSH_DIVIDE_NUMBER", "0");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::InvalidPushDivideNumber(_))
        ));

        env::set_var("TETHER_PUSH_DIVIDE_NUMBER", "20");
        env::set_var("TETHER_DELETE_MARK", "maybe");
        assert!(matches!(
            SyncConfig::from_env(),
            Err(ConfigError::InvalidDeleteMark(_))
        ));

        env::remove_var("TETHER_PUSH_DIVIDE_NUMBER");
        env::remove_var("TETHER_DELETE_MARK");
    }
}
