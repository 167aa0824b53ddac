//! Lifecycle events and error reporting.
//!
//! Two observation channels exist. The [`EventBus`] carries every lifecycle
//! event (fires, completions, skips, removals) to async handlers. The
//! [`ErrorObserver`] is the single-method collaborator told about task
//! failures and unsatisfiable cron expressions. When none is supplied,
//! [`LoggingErrorObserver`] writes them to `tracing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::cron::CronError;
use crate::core::task::TaskError;
use crate::core::types::{RunId, TaskId};

/// Why a task left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Cancelled by a caller.
    Cancelled,
    /// The trigger will never fire again.
    Exhausted,
    /// The cron search bound was exceeded.
    Unsatisfiable,
}

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// A task was submitted to the worker pool.
    TaskFired {
        task_id: TaskId,
        run_id: RunId,
        scheduled_at: DateTime<Utc>,
        timestamp: Instant,
    },

    /// An execution finished successfully.
    TaskCompleted {
        task_id: TaskId,
        run_id: RunId,
        duration: Duration,
        timestamp: Instant,
    },

    /// An execution returned an error or panicked.
    TaskFailed {
        task_id: TaskId,
        run_id: RunId,
        error: String,
        duration: Duration,
        timestamp: Instant,
    },

    /// Scheduled fires were dropped because they overlapped an execution.
    TaskSkipped {
        task_id: TaskId,
        skipped: u64,
        next_fire_at: DateTime<Utc>,
        timestamp: Instant,
    },

    /// A task was removed from the registry.
    TaskRemoved {
        task_id: TaskId,
        reason: RemovalReason,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TaskFired { timestamp, .. } => *timestamp,
            Event::TaskCompleted { timestamp, .. } => *timestamp,
            Event::TaskFailed { timestamp, .. } => *timestamp,
            Event::TaskSkipped { timestamp, .. } => *timestamp,
            Event::TaskRemoved { timestamp, .. } => *timestamp,
        }
    }

    /// Get the task this event is about.
    pub fn task_id(&self) -> &TaskId {
        match self {
            Event::TaskFired { task_id, .. } => task_id,
            Event::TaskCompleted { task_id, .. } => task_id,
            Event::TaskFailed { task_id, .. } => task_id,
            Event::TaskSkipped { task_id, .. } => task_id,
            Event::TaskRemoved { task_id, .. } => task_id,
        }
    }

    /// Create a TaskFired event.
    pub fn task_fired(task_id: TaskId, run_id: RunId, scheduled_at: DateTime<Utc>) -> Self {
        Event::TaskFired {
            task_id,
            run_id,
            scheduled_at,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: TaskId, run_id: RunId, duration: Duration) -> Self {
        Event::TaskCompleted {
            task_id,
            run_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, run_id: RunId, error: String, duration: Duration) -> Self {
        Event::TaskFailed {
            task_id,
            run_id,
            error,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(task_id: TaskId, skipped: u64, next_fire_at: DateTime<Utc>) -> Self {
        Event::TaskSkipped {
            task_id,
            skipped,
            next_fire_at,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRemoved event.
    pub fn task_removed(task_id: TaskId, reason: RemovalReason) -> Self {
        Event::TaskRemoved {
            task_id,
            reason,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A failure reported to the [`ErrorObserver`].
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The task body returned an error or panicked.
    #[error("task execution failed: {0}")]
    Execution(#[from] TaskError),

    /// The cron expression could not be satisfied within the search bound.
    /// The task has been removed.
    #[error("schedule evaluation failed: {0}")]
    EvaluationBound(#[source] CronError),
}

/// Collaborator notified of asynchronous task failures.
///
/// Called from worker tasks and from the dispatch loop, so implementations
/// must be cheap and must not block.
pub trait ErrorObserver: Send + Sync {
    fn on_task_error(&self, task_id: &TaskId, failure: &TaskFailure);
}

impl<F> ErrorObserver for F
where
    F: Fn(&TaskId, &TaskFailure) + Send + Sync,
{
    fn on_task_error(&self, task_id: &TaskId, failure: &TaskFailure) {
        self(task_id, failure)
    }
}

/// Default observer: logs every failure at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorObserver;

impl ErrorObserver for LoggingErrorObserver {
    fn on_task_error(&self, task_id: &TaskId, failure: &TaskFailure) {
        tracing::error!(task_id = %task_id, error = %failure, "Task error");
    }
}
