//! cadence - an embeddable, in-process task scheduler.
//!
//! Tasks are registered with a trigger (fixed rate, fixed delay, initial
//! delay, six-field cron, or a single instant) and run on a bounded worker
//! pool. Registration and cancellation are safe while the scheduler runs.
//!
//! ```no_run
//! use cadence::{Scheduler, TaskError, TriggerSpec, WorkerPool};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(WorkerPool::new(4)?);
//! let (handle, join) = scheduler.start();
//!
//! let id = handle
//!     .register_fn(TriggerSpec::cron("0 0 8 * * MON"), || async {
//!         // Send the weekly digest
//!         Ok::<(), TaskError>(())
//!     })
//!     .await?;
//!
//! handle.cancel(&id).await;
//! handle.shutdown(None).await?;
//! join.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod scheduler;
pub mod testing;

pub use config::{ConfigError, SchedulerConfig, YamlLoader};
pub use core::cron::{CronError, CronExpression, CronField};
pub use core::task::{Task, TaskError, TaskFn, task_fn};
pub use core::trigger::{Trigger, TriggerContext, TriggerError, TriggerSpec};
pub use core::types::{RunId, TaskId};
pub use events::{
    ErrorObserver, Event, EventBus, EventHandler, LoggingErrorObserver, RemovalReason, TaskFailure,
};
pub use execution::{ExecutionResult, WorkerPool};
pub use scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerState, TaskSnapshot};
