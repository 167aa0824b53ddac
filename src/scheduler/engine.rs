//! Scheduler engine implementation.
//!
//! The scheduler is responsible for:
//! - Dispatching due tasks to the worker pool
//! - Rescheduling each task when its execution completes
//! - Dropping fires that would overlap a running execution
//! - Pause and resume functionality
//! - Graceful shutdown
//! - Event emission
//!
//! The dispatch loop never waits on a task body. It sleeps until the earliest
//! next fire, a bounded poll interval, a wakeup from registration or
//! completion, or a command, whichever comes first.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::config::{DEFAULT_MAX_POLL_INTERVAL_MS, SchedulerConfig};
use crate::core::task::Task;
use crate::core::trigger::{Trigger, TriggerSpec};
use crate::core::types::{RunId, TaskId};
use crate::events::{ErrorObserver, Event, EventBus, LoggingErrorObserver, RemovalReason, TaskFailure};
use crate::execution::{ExecutionResult, WorkerPool};

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::registry::{Completion, Dispatch, Registration, Registry, TaskSnapshot};
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Main scheduler for task execution.
pub struct Scheduler {
    /// Registered tasks and their scheduling state.
    registry: Arc<Registry>,
    /// Pool that runs task bodies.
    pool: Arc<WorkerPool>,
    /// Event bus for emitting events.
    event_bus: Arc<EventBus>,
    /// Sink for task failures.
    error_observer: Arc<dyn ErrorObserver>,
    /// Wakes the dispatch loop after registration or completion.
    wakeup: Arc<Notify>,
    /// Longest the loop sleeps without looking at the registry.
    max_poll_interval: Duration,
    /// Grace period used when shutdown is called without one.
    shutdown_timeout: Option<Duration>,
}

impl Scheduler {
    /// Create a new scheduler running bodies on `pool`.
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            pool: Arc::new(pool),
            event_bus: Arc::new(EventBus::new()),
            error_observer: Arc::new(LoggingErrorObserver),
            wakeup: Arc::new(Notify::new()),
            max_poll_interval: Duration::from_millis(DEFAULT_MAX_POLL_INTERVAL_MS),
            shutdown_timeout: None,
        }
    }

    /// Create a scheduler from validated configuration.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool_size)?;

        let mut scheduler = Self::new(pool).with_max_poll_interval(config.max_poll_interval());
        scheduler.shutdown_timeout = config.shutdown_timeout();
        Ok(scheduler)
    }

    /// Set the event bus.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Arc::new(event_bus);
        self
    }

    /// Set the error observer.
    pub fn with_error_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.error_observer = observer;
        self
    }

    /// Set the maximum time the dispatch loop sleeps between registry checks.
    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the default graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Register a task before the scheduler starts.
    pub async fn register(
        &self,
        spec: TriggerSpec,
        task: Arc<dyn Task>,
    ) -> Result<TaskId, SchedulerError> {
        let registration = admit(
            &self.registry,
            &self.event_bus,
            self.error_observer.as_ref(),
            spec,
            task,
        )
        .await?;
        Ok(registration.id().clone())
    }

    /// List all registered tasks.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.registry.snapshot()
    }

    /// Get the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Start the scheduler and return a handle for controlling it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
            registry: Arc::clone(&self.registry),
            event_bus: Arc::clone(&self.event_bus),
            error_observer: Arc::clone(&self.error_observer),
            wakeup: Arc::clone(&self.wakeup),
        };

        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main dispatch loop.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        tracing::info!(
            tasks = self.registry.len(),
            pool_size = self.pool.size(),
            "Scheduler started"
        );

        loop {
            let paused = *state.read().await == SchedulerState::Paused;
            let wait = if paused {
                self.max_poll_interval
            } else {
                self.dispatch_due().await;
                self.time_until_next_fire()
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}

                _ = self.wakeup.notified() => {}

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Pause { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Paused;
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Running;
                            tracing::info!("Scheduler resumed, overdue tasks fire once");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { grace, response } => {
                            let mut s = state.write().await;
                            *s = SchedulerState::Stopped;
                            drop(s); // Release the lock before waiting

                            tracing::info!("Scheduler stopping, no further tasks will be dispatched");
                            let drained = self.pool.await_idle(grace.or(self.shutdown_timeout)).await;

                            let _ = response.send(drained);
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(
            remaining_tasks = self.registry.len(),
            "Scheduler stopped"
        );
    }

    /// Time until the earliest waiting task is due, capped at the poll interval.
    fn time_until_next_fire(&self) -> Duration {
        match self.registry.next_fire_at() {
            Some(at) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_poll_interval),
            None => self.max_poll_interval,
        }
    }

    /// Claim every due task and submit it to the pool.
    async fn dispatch_due(&self) {
        let due = self.registry.take_due(Utc::now());
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "Dispatching due tasks");
        }

        for Dispatch {
            task_id,
            task,
            scheduled_at,
            skipped,
        } in due
        {
            if skipped > 0 {
                tracing::warn!(task_id = %task_id, skipped, "Dropped overdue fires");
                self.event_bus
                    .emit(Event::task_skipped(task_id.clone(), skipped, scheduled_at))
                    .await;
            }

            let run_id = RunId::new();
            tracing::debug!(
                task_id = %task_id,
                run_id = %run_id,
                scheduled_at = %scheduled_at,
                "Firing task"
            );
            self.event_bus
                .emit(Event::task_fired(task_id.clone(), run_id.clone(), scheduled_at))
                .await;

            let completer = Completer {
                registry: Arc::clone(&self.registry),
                event_bus: Arc::clone(&self.event_bus),
                error_observer: Arc::clone(&self.error_observer),
                wakeup: Arc::clone(&self.wakeup),
            };
            self.pool.submit_with_id(run_id, task_id, task, move |result| async move {
                completer.finish(result).await
            });
        }
    }
}

/// Validate a spec and insert it into the registry.
///
/// A trigger with no first fire is discarded with a `TaskRemoved` event.
/// Unsatisfiable cron expressions also go to the error observer.
pub(crate) async fn admit(
    registry: &Registry,
    event_bus: &EventBus,
    observer: &dyn ErrorObserver,
    spec: TriggerSpec,
    task: Arc<dyn Task>,
) -> Result<Registration, SchedulerError> {
    let trigger = Trigger::try_from(spec)?;
    let kind = trigger.kind();
    let registration = registry.insert(trigger, task, Utc::now());

    match &registration {
        Registration::Scheduled { id, next_fire_at } => {
            tracing::info!(task_id = %id, trigger = kind, next_fire_at = %next_fire_at, "Task registered");
        }
        Registration::Exhausted { id } => {
            tracing::warn!(task_id = %id, trigger = kind, "Trigger has no fire time, task discarded");
            event_bus
                .emit(Event::task_removed(id.clone(), RemovalReason::Exhausted))
                .await;
        }
        Registration::Unsatisfiable { id, error } => {
            observer.on_task_error(id, &TaskFailure::EvaluationBound(error.clone()));
            event_bus
                .emit(Event::task_removed(id.clone(), RemovalReason::Unsatisfiable))
                .await;
        }
    }

    Ok(registration)
}

/// Runs on the worker after each execution: reports the outcome and
/// reschedules the task.
struct Completer {
    registry: Arc<Registry>,
    event_bus: Arc<EventBus>,
    error_observer: Arc<dyn ErrorObserver>,
    wakeup: Arc<Notify>,
}

impl Completer {
    async fn finish(self, result: ExecutionResult) {
        let ExecutionResult {
            task_id,
            run_id,
            completed_at,
            duration,
            outcome,
            ..
        } = result;

        match outcome {
            Ok(()) => {
                tracing::debug!(task_id = %task_id, run_id = %run_id, ?duration, "Task completed");
                self.event_bus
                    .emit(Event::task_completed(task_id.clone(), run_id, duration))
                    .await;
            }
            Err(error) => {
                tracing::debug!(task_id = %task_id, run_id = %run_id, error = %error, "Task failed");
                self.event_bus
                    .emit(Event::task_failed(
                        task_id.clone(),
                        run_id,
                        error.to_string(),
                        duration,
                    ))
                    .await;
                self.error_observer
                    .on_task_error(&task_id, &TaskFailure::Execution(error));
            }
        }

        match self.registry.mark_completed(&task_id, completed_at) {
            Completion::Rescheduled {
                next_fire_at,
                skipped,
            } => {
                if skipped > 0 {
                    tracing::warn!(task_id = %task_id, skipped, "Execution overran, dropped overlapping fires");
                    self.event_bus
                        .emit(Event::task_skipped(task_id.clone(), skipped, next_fire_at))
                        .await;
                }
                tracing::debug!(task_id = %task_id, next_fire_at = %next_fire_at, "Task rescheduled");
            }
            Completion::Exhausted => {
                tracing::info!(task_id = %task_id, "Trigger exhausted, task removed");
                self.event_bus
                    .emit(Event::task_removed(task_id, RemovalReason::Exhausted))
                    .await;
            }
            Completion::Cancelled => {
                tracing::info!(task_id = %task_id, "Cancelled task finished, task removed");
                self.event_bus
                    .emit(Event::task_removed(task_id, RemovalReason::Cancelled))
                    .await;
            }
            Completion::Unsatisfiable(error) => {
                self.error_observer
                    .on_task_error(&task_id, &TaskFailure::EvaluationBound(error));
                self.event_bus
                    .emit(Event::task_removed(task_id, RemovalReason::Unsatisfiable))
                    .await;
            }
            Completion::NotInFlight | Completion::Unknown => {
                tracing::debug!(task_id = %task_id, "Completion for idle or unknown task ignored");
            }
        }

        self.wakeup.notify_one();
    }
}
