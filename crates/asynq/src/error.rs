//! Error types for the task queue

use thiserror::Error;

/// Errors raised synchronously by [`TaskQueue`](crate::TaskQueue) operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue is at its `max_queued` limit and the overflow policy is `reject`
    #[error("Queue is full ({limit} items waiting)")]
    Full {
        /// Configured limit
        limit: usize,
    },

    /// The queue no longer accepts work
    #[error("Queue has been shut down")]
    ShutDown,

    /// Niceness outside -20..=20
    #[error("Niceness must be an integer between -20 and +20, got {0}")]
    InvalidNiceness(i32),

    /// A worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The queue configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors that can occur while loading a queue configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    Invalid(String),
}
