//! Scheduler handle for controlling a running scheduler.
//!
//! This module provides the `SchedulerHandle` type that registers and cancels
//! tasks while the dispatch loop runs, and controls the loop through commands
//! like pause, resume, and shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock, mpsc, oneshot};

use crate::core::task::{Task, TaskError, task_fn};
use crate::core::trigger::TriggerSpec;
use crate::core::types::TaskId;
use crate::events::{ErrorObserver, Event, EventBus, RemovalReason};

use super::engine::admit;
use super::registry::{Cancellation, Registration, Registry, TaskSnapshot};
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the scheduler.
///
/// Cheap to clone; every clone talks to the same scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) error_observer: Arc<dyn ErrorObserver>,
    pub(crate) wakeup: Arc<Notify>,
}

impl SchedulerHandle {
    /// Helper to send a command and wait for its response.
    async fn send_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<T>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    /// Register a task while the scheduler runs.
    ///
    /// Invalid triggers fail here and nothing is registered. A cron
    /// expression with no fire time in the search window is reported to the
    /// error observer instead, and the returned id is already removed.
    pub async fn register(
        &self,
        spec: TriggerSpec,
        task: Arc<dyn Task>,
    ) -> Result<TaskId, SchedulerError> {
        if self.state().await == SchedulerState::Stopped {
            return Err(SchedulerError::ShutDown);
        }

        let registration = admit(
            &self.registry,
            &self.event_bus,
            self.error_observer.as_ref(),
            spec,
            task,
        )
        .await?;
        if matches!(registration, Registration::Scheduled { .. }) {
            self.wakeup.notify_one();
        }

        Ok(registration.id().clone())
    }

    /// Register a closure as a task.
    pub async fn register_fn<F, Fut>(&self, spec: TriggerSpec, f: F) -> Result<TaskId, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.register(spec, Arc::new(task_fn(f))).await
    }

    /// Cancel a task. Returns whether the id was known.
    ///
    /// An execution already in flight runs to completion; no later fire happens.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        match self.registry.cancel(task_id) {
            Cancellation::Removed => {
                tracing::info!(task_id = %task_id, "Task cancelled");
                self.event_bus
                    .emit(Event::task_removed(task_id.clone(), RemovalReason::Cancelled))
                    .await;
                true
            }
            Cancellation::Deferred => {
                tracing::info!(task_id = %task_id, "Task cancelled while running, removing after completion");
                true
            }
            Cancellation::Unknown => false,
        }
    }

    /// Snapshot of every registered task.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.registry.snapshot()
    }

    /// Snapshot of one task.
    pub fn task(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        self.registry.get(task_id)
    }

    /// Pause the scheduler.
    ///
    /// While paused nothing is dispatched. Running executions continue.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the scheduler after being paused.
    ///
    /// Tasks that came due while paused fire once.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Shut the scheduler down.
    ///
    /// Stops dispatching, then waits for in-flight executions for at most
    /// `grace` (or the configured shutdown timeout). Returns whether every
    /// execution finished in time. Fails with `SchedulerError::ShutDown` if
    /// the scheduler is already stopped or another shutdown got there first.
    pub async fn shutdown(&self, grace: Option<Duration>) -> Result<bool, SchedulerError> {
        if self.state().await == SchedulerState::Stopped {
            return Err(SchedulerError::ShutDown);
        }
        let result = self
            .send_command(
                |response| SchedulerCommand::Shutdown { grace, response },
                "shutdown",
            )
            .await;

        // A concurrent shutdown won the race and the loop exited without replying
        if matches!(result, Err(SchedulerError::ChannelError(_)))
            && self.state().await == SchedulerState::Stopped
        {
            return Err(SchedulerError::ShutDown);
        }
        result
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }
}
