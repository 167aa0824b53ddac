//! Testing utilities for users of the cadence library.
//!
//! This module provides helpers for testing scheduled work:
//!
//! - [`CountingTask`]: Counts executions and records when each one started
//! - [`SlowTask`]: Sleeps for a fixed time and detects overlapping executions
//! - [`FailingTask`]: Fails N times then succeeds
//! - [`RecordingHandler`]: Captures every lifecycle event
//! - [`RecordingObserver`]: Captures every reported task error

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;
use crate::events::{ErrorObserver, Event, EventHandler, RemovalReason, TaskFailure};

/// A task that succeeds immediately and counts its executions.
///
/// # Example
///
/// ```
/// use cadence::testing::CountingTask;
/// use cadence::Task;
///
/// let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// rt.block_on(async {
///     let task = CountingTask::new();
///     task.run().await.unwrap();
///     assert_eq!(task.count(), 1);
/// });
/// ```
#[derive(Default)]
pub struct CountingTask {
    runs: AtomicU32,
    starts: Mutex<Vec<DateTime<Utc>>>,
}

impl CountingTask {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of executions so far.
    pub fn count(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Wall-clock start time of every execution, in order.
    pub async fn started_at(&self) -> Vec<DateTime<Utc>> {
        self.starts.lock().await.clone()
    }
}

#[async_trait]
impl Task for CountingTask {
    async fn run(&self) -> Result<(), TaskError> {
        self.starts.lock().await.push(Utc::now());
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn description(&self) -> Option<&str> {
        Some("counting task")
    }
}

/// A task that sleeps for a fixed duration.
///
/// Tracks whether it is currently running and whether two executions
/// ever overlapped.
pub struct SlowTask {
    duration: Duration,
    running: AtomicBool,
    overlapped: AtomicBool,
    started: AtomicU32,
    completed: AtomicU32,
}

impl SlowTask {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            running: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            started: AtomicU32::new(0),
            completed: AtomicU32::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True if an execution started while another was still running.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> u32 {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for SlowTask {
    async fn run(&self) -> Result<(), TaskError> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.started.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.duration).await;

        self.completed.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A task that fails a configurable number of times before succeeding.
pub struct FailingTask {
    message: String,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl FailingTask {
    /// Fail the first `fail_count` executions, then succeed.
    pub fn new(message: impl Into<String>, fail_count: u32) -> Arc<Self> {
        Arc::new(Self {
            message: message.into(),
            failures_remaining: AtomicU32::new(fail_count),
            calls: AtomicU32::new(0),
        })
    }

    /// Fail every execution.
    pub fn always(message: impl Into<String>) -> Arc<Self> {
        Self::new(message, u32::MAX)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for FailingTask {
    async fn run(&self) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            Err(TaskError::ExecutionFailed(self.message.clone()))
        } else {
            Ok(())
        }
    }
}

/// Event handler that records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Events about one task, in emission order.
    pub async fn events_for(&self, task_id: &TaskId) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id() == task_id)
            .cloned()
            .collect()
    }

    pub async fn fired_count(&self, task_id: &TaskId) -> usize {
        self.events_for(task_id)
            .await
            .iter()
            .filter(|e| matches!(e, Event::TaskFired { .. }))
            .count()
    }

    /// Completions, successful or failed.
    pub async fn finished_count(&self, task_id: &TaskId) -> usize {
        self.events_for(task_id)
            .await
            .iter()
            .filter(|e| matches!(e, Event::TaskCompleted { .. } | Event::TaskFailed { .. }))
            .count()
    }

    pub async fn removal_reason(&self, task_id: &TaskId) -> Option<RemovalReason> {
        self.events_for(task_id).await.iter().find_map(|e| match e {
            Event::TaskRemoved { reason, .. } => Some(*reason),
            _ => None,
        })
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Error observer that records every failure it is told about.
#[derive(Default)]
pub struct RecordingObserver {
    failures: std::sync::Mutex<Vec<(TaskId, String)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Recorded `(task, rendered failure)` pairs.
    pub fn failures(&self) -> Vec<(TaskId, String)> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ErrorObserver for RecordingObserver {
    fn on_task_error(&self, task_id: &TaskId, failure: &TaskFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((task_id.clone(), failure.to_string()));
    }
}
