//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::trigger::{Trigger, TriggerSpec};

/// Default upper bound on how long the dispatch loop sleeps.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Scheduler configuration (cadence.yaml).
///
/// ```yaml
/// pool_size: 4
/// max_poll_interval_ms: 500
/// shutdown_timeout_ms: 30000
/// schedules:
///   nightly_report:
///     kind: cron
///     expression: "0 0 2 * * *"
///   heartbeat:
///     kind: fixed_rate
///     period_ms: 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker slots. Defaults to the host's available parallelism.
    pub pool_size: usize,
    /// Longest the dispatch loop sleeps before re-checking the registry.
    pub max_poll_interval_ms: u64,
    /// Grace period for shutdown when the caller gives none. Unset waits
    /// for every in-flight execution.
    pub shutdown_timeout_ms: Option<u64>,
    /// Trigger specs addressable by name.
    pub schedules: BTreeMap<String, TriggerSpec>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            shutdown_timeout_ms: None,
            schedules: BTreeMap::new(),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

impl SchedulerConfig {
    /// Check every value, including each named schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize(self.pool_size));
        }
        if self.max_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(self.max_poll_interval_ms));
        }
        for (name, spec) in &self.schedules {
            Trigger::from_spec(spec).map_err(|source| ConfigError::InvalidSchedule {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }

    /// Look up a named schedule.
    pub fn schedule(&self, name: &str) -> Option<&TriggerSpec> {
        self.schedules.get(name)
    }
}
