//! Integration tests for dispatch timing of each trigger kind.

use crate::common::{fire_times, finished, recorded_scheduler, wait_for_events, wait_until};
use cadence::testing::{CountingTask, FailingTask};
use cadence::{Event, RemovalReason, TaskError, TriggerSpec};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Test: Fixed-rate fires land exactly one period apart.
#[tokio::test]
async fn test_fixed_rate_fires_on_cadence() {
    let (scheduler, handler, _) = recorded_scheduler(2).await;
    let (handle, join) = scheduler.start();

    let task = CountingTask::new();
    let id = handle
        .register(TriggerSpec::fixed_rate(100), task.clone())
        .await
        .unwrap();

    wait_for_events(&handler, Duration::from_secs(3), "four fires", |events| {
        fire_times(events, &id).len() >= 4
    })
    .await;

    let times = fire_times(&handler.events().await, &id);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], ChronoDuration::milliseconds(100));
    }

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
    assert!(task.count() >= 4);
}

/// Test: Fixed-delay fires start at least one delay after the previous run.
#[tokio::test]
async fn test_fixed_delay_waits_after_completion() {
    let (scheduler, _, _) = recorded_scheduler(2).await;
    let (handle, join) = scheduler.start();

    let task = CountingTask::new();
    handle
        .register(TriggerSpec::fixed_delay(80), task.clone())
        .await
        .unwrap();

    let probe = task.clone();
    wait_until(Duration::from_secs(3), "three runs", move || probe.count() >= 3).await;

    let starts = task.started_at().await;
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= ChronoDuration::milliseconds(80));
    }

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: An initial delay postpones only the first fire.
#[tokio::test]
async fn test_initial_delay_then_fixed_rate() {
    let (scheduler, handler, _) = recorded_scheduler(2).await;
    let (handle, join) = scheduler.start();

    let id = handle
        .register(
            TriggerSpec::fixed_rate(100).with_initial_delay(200),
            CountingTask::new(),
        )
        .await
        .unwrap();
    let registered_at = handle.task(&id).unwrap().registered_at;

    wait_for_events(&handler, Duration::from_secs(3), "three fires", |events| {
        fire_times(events, &id).len() >= 3
    })
    .await;

    let times = fire_times(&handler.events().await, &id);
    assert_eq!(times[0], registered_at + ChronoDuration::milliseconds(200));
    assert_eq!(times[1], registered_at + ChronoDuration::milliseconds(300));
    assert_eq!(times[2], registered_at + ChronoDuration::milliseconds(400));

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: A one-shot task fires once and is then removed.
#[tokio::test]
async fn test_one_shot_fires_once_and_is_removed() {
    let (scheduler, handler, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let task = CountingTask::new();
    let at = Utc::now() + ChronoDuration::milliseconds(100);
    let id = handle
        .register(TriggerSpec::one_shot_at(at), task.clone())
        .await
        .unwrap();

    wait_for_events(&handler, Duration::from_secs(2), "removal", |events| {
        events
            .iter()
            .any(|e| matches!(e, Event::TaskRemoved { task_id, .. } if *task_id == id))
    })
    .await;

    assert_eq!(task.count(), 1);
    assert_eq!(fire_times(&handler.events().await, &id), vec![at]);
    assert_eq!(handler.removal_reason(&id).await, Some(RemovalReason::Exhausted));
    assert!(handle.task(&id).is_none());

    // Nothing else happens
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(task.count(), 1);

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: A one-shot instant already in the past fires immediately.
#[tokio::test]
async fn test_past_one_shot_fires_immediately() {
    let (scheduler, _, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let task = CountingTask::new();
    handle
        .register(
            TriggerSpec::one_shot_at(Utc::now() - ChronoDuration::seconds(30)),
            task.clone(),
        )
        .await
        .unwrap();

    let probe = task.clone();
    wait_until(Duration::from_millis(500), "immediate fire", move || probe.count() == 1).await;

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: A per-second cron fires on whole seconds, one second apart.
#[tokio::test]
async fn test_cron_fires_on_whole_seconds() {
    let (scheduler, handler, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let id = handle
        .register(TriggerSpec::cron("* * * * * *"), CountingTask::new())
        .await
        .unwrap();

    wait_for_events(&handler, Duration::from_secs(4), "two cron fires", |events| {
        fire_times(events, &id).len() >= 2
    })
    .await;

    let times = fire_times(&handler.events().await, &id);
    assert!(times.iter().all(|t| t.nanosecond() == 0));
    assert_eq!(times[1] - times[0], ChronoDuration::seconds(1));

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Failures reach the error observer and the schedule carries on.
#[tokio::test]
async fn test_failures_are_observed_and_schedule_continues() {
    let (scheduler, handler, observer) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let task = FailingTask::always("upstream unavailable");
    let id = handle
        .register(TriggerSpec::fixed_rate(50), task.clone())
        .await
        .unwrap();

    wait_for_events(&handler, Duration::from_secs(3), "three finished runs", |events| {
        finished(events, &id) >= 3
    })
    .await;

    assert!(observer.count() >= 3);
    let (failed_id, message) = &observer.failures()[0];
    assert_eq!(failed_id, &id);
    assert!(message.contains("upstream unavailable"));
    assert!(handle.task(&id).is_some());

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: A panicking task does not disturb other tasks.
#[tokio::test]
async fn test_panicking_task_is_isolated() {
    let (scheduler, _, observer) = recorded_scheduler(2).await;
    let (handle, join) = scheduler.start();

    let panics = Arc::new(AtomicU32::new(0));
    let counter = panics.clone();
    let panicking = handle
        .register_fn(TriggerSpec::fixed_rate(50), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < u32::MAX {
                    panic!("corrupt state");
                }
                Ok::<(), TaskError>(())
            }
        })
        .await
        .unwrap();

    let healthy = CountingTask::new();
    handle
        .register(TriggerSpec::fixed_rate(50), healthy.clone())
        .await
        .unwrap();

    let probe = healthy.clone();
    wait_until(Duration::from_secs(3), "healthy runs", move || probe.count() >= 3).await;

    assert!(panics.load(Ordering::SeqCst) >= 2);
    assert!(observer.failures().iter().any(|(id, message)| {
        *id == panicking && message.contains("corrupt state")
    }));

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Tasks registered before start are dispatched once it runs.
#[tokio::test]
async fn test_registration_before_start() {
    let (scheduler, _, _) = recorded_scheduler(1).await;

    let task = CountingTask::new();
    scheduler
        .register(TriggerSpec::fixed_rate(60_000), task.clone())
        .await
        .unwrap();
    assert_eq!(scheduler.tasks().len(), 1);

    let (handle, join) = scheduler.start();
    let probe = task.clone();
    wait_until(Duration::from_millis(500), "first fire", move || probe.count() == 1).await;

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: Invalid triggers are rejected and nothing is registered.
#[tokio::test]
async fn test_invalid_triggers_are_rejected() {
    let (scheduler, _, _) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    assert!(handle
        .register(TriggerSpec::fixed_rate(-5), CountingTask::new())
        .await
        .is_err());
    assert!(handle
        .register(TriggerSpec::cron("0 0 12 * *"), CountingTask::new())
        .await
        .is_err());
    assert!(handle.tasks().is_empty());

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}

/// Test: A cron that can never fire is reported and not retained.
#[tokio::test]
async fn test_unsatisfiable_cron_is_reported() {
    let (scheduler, handler, observer) = recorded_scheduler(1).await;
    let (handle, join) = scheduler.start();

    let id = handle
        .register(TriggerSpec::cron("0 0 0 31 2 *"), CountingTask::new())
        .await
        .unwrap();

    assert!(handle.task(&id).is_none());
    assert_eq!(observer.count(), 1);
    assert_eq!(
        handler.removal_reason(&id).await,
        Some(RemovalReason::Unsatisfiable)
    );

    handle.shutdown(None).await.unwrap();
    join.await.unwrap();
}
