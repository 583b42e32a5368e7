//! Queue configuration
//!
//! A [`QueueConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! workers = 4
//! max_queued = 1000
//! overflow = "block"
//! collect_stats = false
//! spew = false
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What `submit` does when the queue is at `max_queued`
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Block the submitting thread until a worker frees up space
    #[default]
    Block,
    /// Fail immediately with [`QueueError::Full`](crate::QueueError::Full)
    Reject,
}

/// Task queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Number of worker threads started with the queue (0 = one per CPU)
    pub workers: usize,

    /// Maximum number of items waiting to be dispatched (None = unbounded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queued: Option<usize>,

    /// Behavior when `max_queued` is reached
    pub overflow: OverflowPolicy,

    /// Record the execution time of every call
    pub collect_stats: bool,

    /// Log every call and its outcome at info level
    pub spew: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_queued: None,
            overflow: OverflowPolicy::Block,
            collect_stats: false,
            spew: false,
        }
    }
}

impl QueueConfig {
    /// Configuration with a fixed number of workers and defaults otherwise
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: QueueConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queued == Some(0) {
            return Err(ConfigError::Invalid(
                "max_queued must be at least 1 (omit it for an unbounded queue)".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of workers to actually start
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = QueueConfig::from_toml_str("").unwrap();
        assert_eq!(config, QueueConfig::default());
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_parse_full_config() {
        let config = QueueConfig::from_toml_str(
            r#"
workers = 4
max_queued = 1000
overflow = "reject"
collect_stats = true
spew = true
"#,
        )
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.effective_workers(), 4);
        assert_eq!(config.max_queued, Some(1000));
        assert_eq!(config.overflow, OverflowPolicy::Reject);
        assert!(config.collect_stats);
        assert!(config.spew);
    }

    #[test]
    fn test_zero_max_queued_is_invalid() {
        let err = QueueConfig::from_toml_str("max_queued = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_overflow_policy() {
        let err = QueueConfig::from_toml_str(r#"overflow = "drop""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_unknown_field() {
        let err = QueueConfig::from_toml_str("threads = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = QueueConfig {
            workers: 2,
            max_queued: Some(8),
            overflow: OverflowPolicy::Reject,
            collect_stats: true,
            spew: false,
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(QueueConfig::from_toml_str(&text).unwrap(), config);
    }
}
