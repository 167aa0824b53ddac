//! Scheduler type definitions.
//!
//! This module contains error types, state enums, and command types for the scheduler.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::ConfigError;
use crate::core::trigger::TriggerError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The trigger spec was rejected.
    #[error("invalid trigger: {0}")]
    Trigger(#[from] TriggerError),

    /// Invalid scheduler configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),

    /// The scheduler has been shut down.
    #[error("scheduler has been shut down")]
    ShutDown,
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running.
    Running,
    /// Scheduler is paused.
    Paused,
}

/// Commands that can be sent to the scheduler.
pub(crate) enum SchedulerCommand {
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler, reporting whether all executions drained.
    Shutdown {
        grace: Option<Duration>,
        response: oneshot::Sender<bool>,
    },
}
