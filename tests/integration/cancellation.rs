//! Integration tests for cancelling tasks while the scheduler runs.

use crate::common::{fire_times, recorded_scheduler, wait_for_events, wait_until};
use cadence::testing::{CountingTask, SlowTask};
use cadence::{Event, RemovalReason, TaskId, TriggerSpec};
use std::sync::Arc;
use std::time::Duration;

/// Test: Cancelling a waiting task removes it before it ever fires.
#[tokio::test]
async fn test_cancel_waiting_task() {
    let (scheduler, handler, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let task = CountingTask::new();
    let id = handle
        .register(TriggerSpec::fixed_rate(100).with_initial_delay(200), task.clone())
        .await
        .unwrap();

    assert!(handle.cancel(&id).await);
    assert!(handle.task(&id).is_none());
    assert_eq!(handler.removal_reason(&id).await, Some(RemovalReason::Cancelled));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(task.count(), 0);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Cancelling a running task lets it finish and prevents later fires.
#[tokio::test]
async fn test_cancel_in_flight_task() {
    let (scheduler, handler, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let task = SlowTask::new(Duration::from_millis(200));
    let id = handle
        .register(TriggerSpec::fixed_rate(50), task.clone())
        .await
        .unwrap();

    let probe = task.clone();
    wait_until(Duration::from_secs(1), "task running", move || probe.is_running()).await;

    assert!(handle.cancel(&id).await);
    let snapshot = handle.task(&id).unwrap();
    assert!(snapshot.in_flight);
    assert!(snapshot.cancelled);

    wait_for_events(&handler, Duration::from_secs(2), "removal", |events| {
        events.iter().any(|e| {
            matches!(e, Event::TaskRemoved { task_id, .. } if *task_id == id)
        })
    })
    .await;
    assert!(handle.task(&id).is_none());
    assert_eq!(task.completed(), 1);
    assert_eq!(handler.removal_reason(&id).await, Some(RemovalReason::Cancelled));

    // No fire after the cancelled run
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(task.started(), 1);
    assert_eq!(fire_times(&handler.events().await, &id).len(), 1);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Cancelling an unknown or already removed id reports false.
#[tokio::test]
async fn test_cancel_unknown_id() {
    let (scheduler, _, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    assert!(!handle.cancel(&TaskId::new()).await);

    let id = handle
        .register(TriggerSpec::fixed_rate(60_000).with_initial_delay(60_000), CountingTask::new())
        .await
        .unwrap();
    assert!(handle.cancel(&id).await);
    assert!(!handle.cancel(&id).await);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Registering and cancelling from many tasks at once is safe.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_and_cancel() {
    let (scheduler, _, _) = recorded_scheduler(4).await;
    let (handle, join) = scheduler.start();
    let task = CountingTask::new();

    let mut workers = Vec::new();
    for i in 0..16 {
        let handle = handle.clone();
        let task = task.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let id = handle
                    .register(TriggerSpec::fixed_rate(10 + i), task.clone())
                    .await
                    .unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
                assert!(handle.cancel(&id).await);
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let probe = handle.clone();
    wait_until(Duration::from_secs(2), "registry to empty", move || {
        probe.tasks().is_empty()
    })
    .await;

    let settled = task.count();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(task.count(), settled);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Cancelling one task leaves others on schedule.
#[tokio::test]
async fn test_cancel_leaves_other_tasks_alone() {
    let (scheduler, _, _) = recorded_scheduler(2).await;
    let (handle, join) = scheduler.start();

    let cancelled = CountingTask::new();
    let kept = CountingTask::new();
    let cancelled_id = handle
        .register(TriggerSpec::fixed_rate(40), cancelled.clone())
        .await
        .unwrap();
    handle
        .register(TriggerSpec::fixed_rate(40), kept.clone())
        .await
        .unwrap();

    let probe = Arc::clone(&cancelled);
    wait_until(Duration::from_secs(1), "first fire", move || probe.count() >= 1).await;
    handle.cancel(&cancelled_id).await;

    let wait_from = cancelled.count();
    let probe = kept.clone();
    let target = probe.count() + 3;
    wait_until(Duration::from_secs(2), "kept task fires", move || {
        probe.count() >= target
    })
    .await;

    // At most the run that was in flight when cancel arrived
    assert!(cancelled.count() <= wait_from + 1);
    assert_eq!(handle.tasks().len(), 1);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}
