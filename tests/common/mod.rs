//! Common test utilities shared across integration tests.

use cadence::testing::{RecordingHandler, RecordingObserver};
use cadence::{Event, EventBus, Scheduler, TaskId, WorkerPool};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Install a tracing subscriber once, honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A scheduler with a recording event handler and error observer attached.
pub async fn recorded_scheduler(
    pool_size: usize,
) -> (Scheduler, Arc<RecordingHandler>, Arc<RecordingObserver>) {
    init_tracing();

    let handler = RecordingHandler::new();
    let observer = RecordingObserver::new();
    let event_bus = EventBus::new();
    event_bus.register(handler.clone()).await;

    let scheduler = Scheduler::new(WorkerPool::new(pool_size).unwrap())
        .with_event_bus(event_bus)
        .with_error_observer(observer.clone())
        .with_max_poll_interval(Duration::from_millis(20));

    (scheduler, handler, observer)
}

/// Wait until `condition` holds, polling every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_until<F>(timeout: Duration, description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("Timeout after {:?} waiting for {}", timeout, description);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the recorded events satisfy `predicate`, polling every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_events<F>(
    handler: &RecordingHandler,
    timeout: Duration,
    description: &str,
    mut predicate: F,
) where
    F: FnMut(&[Event]) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if predicate(&handler.events().await) {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout after {:?} waiting for {}", timeout, description);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scheduled instants of every fire of `task_id`, in dispatch order.
pub fn fire_times(events: &[Event], task_id: &TaskId) -> Vec<DateTime<Utc>> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::TaskFired {
                task_id: id,
                scheduled_at,
                ..
            } if id == task_id => Some(*scheduled_at),
            _ => None,
        })
        .collect()
}

/// Completions (successful or failed) of `task_id`.
pub fn finished(events: &[Event], task_id: &TaskId) -> usize {
    events
        .iter()
        .filter(|e| {
            e.task_id() == task_id
                && matches!(e, Event::TaskCompleted { .. } | Event::TaskFailed { .. })
        })
        .count()
}
