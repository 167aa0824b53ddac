//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::trigger::TriggerError;

/// Errors that can occur when building or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a specific file with context.
    #[error("failed to read file '{path}': {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The worker pool needs at least one slot.
    #[error("pool size must be at least 1, got {0}")]
    InvalidPoolSize(usize),

    /// The dispatch loop needs a positive poll interval.
    #[error("max poll interval must be at least 1ms, got {0}ms")]
    InvalidPollInterval(u64),

    /// A named schedule does not describe a valid trigger.
    #[error("invalid schedule '{name}': {source}")]
    InvalidSchedule {
        name: String,
        #[source]
        source: TriggerError,
    },
}
