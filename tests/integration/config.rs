//! Integration tests for building a scheduler from a YAML file.

use crate::common::{init_tracing, wait_until};
use cadence::testing::CountingTask;
use cadence::{ConfigError, Scheduler, SchedulerError, TriggerSpec, YamlLoader};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

/// Test: Named schedules from a config file drive registered tasks.
#[tokio::test]
async fn test_scheduler_from_config_file() {
    init_tracing();
    let file = write_config(
        r#"
pool_size: 2
max_poll_interval_ms: 25
shutdown_timeout_ms: 1000
schedules:
  heartbeat:
    kind: fixed_rate
    period_ms: 40
  warmup:
    kind: initial_delay
    delay_ms: 50
    inner:
      kind: fixed_delay
      delay_ms: 40
"#,
    );

    let config = YamlLoader::load_config(file.path()).unwrap();
    assert_eq!(config.schedules.len(), 2);

    let scheduler = Scheduler::from_config(&config).unwrap();
    assert_eq!(scheduler.pool().size(), 2);
    let (handle, join) = scheduler.start();

    let heartbeat = CountingTask::new();
    let warmup = CountingTask::new();
    handle
        .register(config.schedule("heartbeat").unwrap().clone(), heartbeat.clone())
        .await
        .unwrap();
    handle
        .register(config.schedule("warmup").unwrap().clone(), warmup.clone())
        .await
        .unwrap();

    let (a, b) = (heartbeat.clone(), warmup.clone());
    wait_until(Duration::from_secs(2), "both schedules firing", move || {
        a.count() >= 3 && b.count() >= 2
    })
    .await;

    assert!(handle.shutdown(None).await.unwrap());
    join.await.unwrap();
}

/// Test: An invalid schedule in the file is reported by name.
#[test]
fn test_invalid_schedule_in_file() {
    let file = write_config(
        r#"
schedules:
  broken:
    kind: cron
    expression: "0 61 * * * *"
"#,
    );

    match YamlLoader::load_config(file.path()) {
        Err(ConfigError::InvalidSchedule { name, .. }) => assert_eq!(name, "broken"),
        other => panic!("expected invalid schedule, got {:?}", other),
    }
}

/// Test: A zero-sized pool cannot be configured.
#[test]
fn test_zero_pool_size_is_rejected() {
    let config = cadence::SchedulerConfig {
        pool_size: 0,
        ..Default::default()
    };

    assert!(matches!(
        Scheduler::from_config(&config),
        Err(SchedulerError::Config(ConfigError::InvalidPoolSize(0)))
    ));
}

/// Test: Trigger specs written in code match their YAML form.
#[test]
fn test_trigger_spec_yaml_form() {
    let yaml = serde_yaml::to_string(&TriggerSpec::fixed_rate(250).with_initial_delay(1000)).unwrap();
    let parsed: TriggerSpec = serde_yaml::from_str(&yaml).unwrap();

    assert_eq!(parsed, TriggerSpec::fixed_rate(250).with_initial_delay(1000));
    assert!(yaml.contains("kind: initial_delay"));
}
