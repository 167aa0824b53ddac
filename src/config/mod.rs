//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for the scheduler: pool
//! size, dispatch timing, and a table of named schedules.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{DEFAULT_MAX_POLL_INTERVAL_MS, SchedulerConfig};
pub use yaml::YamlLoader;
