//! Bounded worker pool.
//!
//! The `WorkerPool` runs task bodies with:
//! - A fixed number of execution slots (semaphore permits)
//! - An unbounded queue of submissions waiting for a slot
//! - Panic isolation, so a failing body only ends its own execution

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

use crate::config::ConfigError;
use crate::core::task::{Task, TaskError};
use crate::core::types::{RunId, TaskId};

/// How often `await_idle` checks for outstanding executions.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one execution.
#[derive(Debug)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub run_id: RunId,
    /// When the body acquired a slot and started running.
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Result<(), TaskError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Executor for task bodies with a fixed concurrency limit.
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    /// Submissions not yet finished, including their completion callback.
    running: Arc<Mutex<HashMap<RunId, JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Create a pool with `size` execution slots.
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidPoolSize(size));
        }
        Ok(Self::with_slots(size))
    }

    fn with_slots(size: usize) -> Self {
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of execution slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently running a body.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Submissions that are queued or running.
    pub fn active_count(&self) -> usize {
        let mut running = self.lock_running();
        running.retain(|_, handle| !handle.is_finished());
        running.len()
    }

    fn lock_running(&self) -> MutexGuard<'_, HashMap<RunId, JoinHandle<()>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `task` for execution and return immediately.
    ///
    /// The body runs once a slot is free. `on_complete` receives the result
    /// on the same worker, whether the body succeeded, failed or panicked.
    /// Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(&self, task_id: TaskId, task: Arc<dyn Task>, on_complete: F) -> RunId
    where
        F: FnOnce(ExecutionResult) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.submit_with_id(RunId::new(), task_id, task, on_complete)
    }

    /// Like [`submit`](Self::submit), with a run id chosen by the caller.
    pub fn submit_with_id<F, Fut>(
        &self,
        run_id: RunId,
        task_id: TaskId,
        task: Arc<dyn Task>,
        on_complete: F,
    ) -> RunId
    where
        F: FnOnce(ExecutionResult) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let result_run_id = run_id.clone();

        let handle = tokio::spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let started_at = Utc::now();
            let start = Instant::now();

            let outcome = match permit {
                Ok(_permit) => {
                    tracing::debug!(task_id = %task_id, run_id = %result_run_id, "Executing task");
                    // The body gets its own tokio task so a panic surfaces as a JoinError
                    let body = tokio::spawn(async move { task.run().await });
                    match body.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(panic_error(e)),
                    }
                }
                Err(_) => Err(TaskError::ExecutionFailed("worker pool closed".to_string())),
            };

            on_complete(ExecutionResult {
                task_id,
                run_id: result_run_id,
                started_at,
                completed_at: Utc::now(),
                duration: start.elapsed(),
                outcome,
            })
            .await;
        });

        let mut running = self.lock_running();
        running.retain(|_, handle| !handle.is_finished());
        running.insert(run_id.clone(), handle);

        run_id
    }

    /// Wait for every submitted execution to finish.
    ///
    /// With a grace period, gives up once it has elapsed. Returns whether the
    /// pool drained completely.
    pub async fn await_idle(&self, grace: Option<Duration>) -> bool {
        let outstanding = self.active_count();
        if outstanding == 0 {
            tracing::info!("No running tasks to wait for");
            return true;
        }

        tracing::info!(
            "Waiting for {} running task(s) to complete (grace period: {:?})",
            outstanding,
            grace
        );

        let start = tokio::time::Instant::now();
        let deadline = grace.map(|grace| start + grace);

        loop {
            let remaining = self.active_count();
            if remaining == 0 {
                tracing::info!("All running tasks completed in {:?}", start.elapsed());
                return true;
            }

            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                tracing::warn!(
                    "Grace period ({:?}) exceeded with {} task(s) still running",
                    grace,
                    remaining
                );
                return false;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

impl Default for WorkerPool {
    /// One slot per available core.
    fn default() -> Self {
        let size = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_slots(size)
    }
}

fn panic_error(err: JoinError) -> TaskError {
    if !err.is_panic() {
        return TaskError::Panicked("task body was cancelled".to_string());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    TaskError::Panicked(message)
}
