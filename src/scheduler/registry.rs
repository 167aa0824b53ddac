//! Task registry.
//!
//! The registry is the sole owner of scheduling state. Every operation takes
//! one mutex, so register, cancel, dispatch and completion are linearizable
//! with respect to each other. Waiting tasks are also kept in an index
//! ordered by next fire time so that finding due work and the next deadline
//! does not scan every task.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::cron::CronError;
use crate::core::task::Task;
use crate::core::trigger::{Trigger, TriggerContext};
use crate::core::types::TaskId;

/// Mutable scheduling state for one registered task.
struct ScheduledTask {
    trigger: Trigger,
    task: Arc<dyn Task>,
    registered_at: DateTime<Utc>,
    /// Next instant to fire. `None` while in flight.
    next_fire_at: Option<DateTime<Utc>>,
    in_flight: bool,
    cancelled: bool,
    last_scheduled_at: Option<DateTime<Utc>>,
    last_completed_at: Option<DateTime<Utc>>,
    fire_count: u64,
    skipped_count: u64,
}

/// A task claimed for execution by [`Registry::mark_in_flight`].
pub struct Dispatch {
    pub task_id: TaskId,
    pub task: Arc<dyn Task>,
    /// The scheduled instant this execution stands for.
    pub scheduled_at: DateTime<Utc>,
    /// Overdue instants dropped in favour of `scheduled_at`.
    pub skipped: u64,
}

/// Outcome of [`Registry::mark_completed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The task is waiting for its next fire.
    Rescheduled {
        next_fire_at: DateTime<Utc>,
        skipped: u64,
    },
    /// The trigger will never fire again. The task was removed.
    Exhausted,
    /// The task was cancelled while in flight. It was removed.
    Cancelled,
    /// The cron search bound was exceeded. The task was removed.
    Unsatisfiable(CronError),
    /// No execution of the task is outstanding. Nothing changed.
    NotInFlight,
    /// No such task is registered.
    Unknown,
}

/// Outcome of [`Registry::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Stored and waiting for its first fire.
    Scheduled {
        id: TaskId,
        next_fire_at: DateTime<Utc>,
    },
    /// The trigger has no first fire time. Nothing was stored.
    Exhausted { id: TaskId },
    /// The cron search bound was exceeded. Nothing was stored.
    Unsatisfiable { id: TaskId, error: CronError },
}

impl Registration {
    pub fn id(&self) -> &TaskId {
        match self {
            Registration::Scheduled { id, .. } => id,
            Registration::Exhausted { id } => id,
            Registration::Unsatisfiable { id, .. } => id,
        }
    }
}

/// Outcome of [`Registry::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    /// The task was waiting and has been removed.
    Removed,
    /// The task is in flight. It will be removed when the execution completes.
    Deferred,
    /// No such task is registered.
    Unknown,
}

impl Cancellation {
    /// Whether the id referred to a registered task.
    pub fn is_known(self) -> bool {
        !matches!(self, Cancellation::Unknown)
    }
}

/// Read-only view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub trigger: Trigger,
    pub description: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
    pub cancelled: bool,
    pub last_scheduled_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub fire_count: u64,
    pub skipped_count: u64,
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<TaskId, ScheduledTask>,
    /// Waiting tasks keyed by next fire time. In-flight tasks are absent.
    queue: BTreeSet<(DateTime<Utc>, TaskId)>,
}

impl RegistryState {
    fn claim(&mut self, id: &TaskId, now: DateTime<Utc>) -> Option<Dispatch> {
        let entry = self.tasks.get_mut(id)?;
        if entry.cancelled || entry.in_flight {
            return None;
        }
        let due = entry.next_fire_at.filter(|at| *at <= now)?;
        self.queue.remove(&(due, id.clone()));

        let (scheduled_at, skipped) = entry.trigger.collapse_overdue(due, now);
        entry.next_fire_at = None;
        entry.in_flight = true;
        entry.last_scheduled_at = Some(scheduled_at);
        entry.fire_count += 1;
        entry.skipped_count += skipped;

        Some(Dispatch {
            task_id: id.clone(),
            task: Arc::clone(&entry.task),
            scheduled_at,
            skipped,
        })
    }
}

/// Concurrency-safe map from task id to scheduling state.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // Every mutation leaves the state consistent before any call that could
    // panic, so a poisoned lock is safe to keep using.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task and compute its first fire time from `now`.
    ///
    /// Only `Registration::Scheduled` tasks are stored.
    pub fn insert(&self, trigger: Trigger, task: Arc<dyn Task>, now: DateTime<Utc>) -> Registration {
        let id = TaskId::new();
        let next_fire_at = match trigger.next_fire(&TriggerContext::initial(now)) {
            Ok(Some(at)) => at,
            Ok(None) => return Registration::Exhausted { id },
            Err(error) => return Registration::Unsatisfiable { id, error },
        };

        let mut state = self.lock();
        state.queue.insert((next_fire_at, id.clone()));
        state.tasks.insert(
            id.clone(),
            ScheduledTask {
                trigger,
                task,
                registered_at: now,
                next_fire_at: Some(next_fire_at),
                in_flight: false,
                cancelled: false,
                last_scheduled_at: None,
                last_completed_at: None,
                fire_count: 0,
                skipped_count: 0,
            },
        );

        Registration::Scheduled { id, next_fire_at }
    }

    /// Cancel a task.
    ///
    /// A waiting task is removed at once. An in-flight task keeps running;
    /// it is removed when its execution completes and never fires again.
    pub fn cancel(&self, id: &TaskId) -> Cancellation {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(entry) = state.tasks.get_mut(id) else {
            return Cancellation::Unknown;
        };
        entry.cancelled = true;

        if entry.in_flight {
            return Cancellation::Deferred;
        }
        if let Some(at) = entry.next_fire_at {
            state.queue.remove(&(at, id.clone()));
        }
        state.tasks.remove(id);
        Cancellation::Removed
    }

    /// Ids of waiting, uncancelled tasks whose fire time is at or before `now`.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        let state = self.lock();
        state
            .queue
            .iter()
            .take_while(|(at, _)| *at <= now)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Claim a due task for execution.
    ///
    /// Returns `None` if the task is unknown, cancelled, already in flight or
    /// not yet due. Overdue rate fires are collapsed to the latest instant at
    /// or before `now`.
    pub fn mark_in_flight(&self, id: &TaskId, now: DateTime<Utc>) -> Option<Dispatch> {
        self.lock().claim(id, now)
    }

    /// Claim every task due at `now` under a single lock.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<Dispatch> {
        let mut state = self.lock();
        let due: Vec<TaskId> = state
            .queue
            .iter()
            .take_while(|(at, _)| *at <= now)
            .map(|(_, id)| id.clone())
            .collect();

        due.iter().filter_map(|id| state.claim(id, now)).collect()
    }

    /// Record the end of an execution and compute the next fire.
    ///
    /// Success and failure both count as completion. A task that is not in
    /// flight is left untouched.
    pub fn mark_completed(&self, id: &TaskId, completed_at: DateTime<Utc>) -> Completion {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(entry) = state.tasks.get_mut(id) else {
            return Completion::Unknown;
        };
        if !entry.in_flight {
            return Completion::NotInFlight;
        }
        entry.in_flight = false;
        entry.last_completed_at = Some(completed_at);

        if entry.cancelled {
            state.tasks.remove(id);
            return Completion::Cancelled;
        }

        let ctx = TriggerContext {
            now: completed_at,
            last_scheduled: entry.last_scheduled_at,
            last_completed: entry.last_completed_at,
        };

        match entry.trigger.next_fire(&ctx) {
            Ok(Some(next)) => {
                let (next_fire_at, skipped) = entry.trigger.collapse_overdue(next, completed_at);
                entry.next_fire_at = Some(next_fire_at);
                entry.skipped_count += skipped;
                state.queue.insert((next_fire_at, id.clone()));
                Completion::Rescheduled {
                    next_fire_at,
                    skipped,
                }
            }
            Ok(None) => {
                state.tasks.remove(id);
                Completion::Exhausted
            }
            Err(e) => {
                state.tasks.remove(id);
                Completion::Unsatisfiable(e)
            }
        }
    }

    /// Earliest fire time across waiting tasks.
    pub fn next_fire_at(&self) -> Option<DateTime<Utc>> {
        self.lock().queue.first().map(|(at, _)| *at)
    }

    /// Snapshot of one task.
    pub fn get(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.lock().tasks.get(id).map(|entry| snapshot_of(id, entry))
    }

    /// Snapshot of every task, in registration order.
    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        let state = self.lock();
        let mut tasks: Vec<TaskSnapshot> = state
            .tasks
            .iter()
            .map(|(id, entry)| snapshot_of(id, entry))
            .collect();
        tasks.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.lock().tasks.contains_key(id)
    }

    /// Number of registered tasks, including cancelled ones still in flight.
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().tasks.values().filter(|t| t.in_flight).count()
    }
}

fn snapshot_of(id: &TaskId, entry: &ScheduledTask) -> TaskSnapshot {
    TaskSnapshot {
        id: id.clone(),
        trigger: entry.trigger.clone(),
        description: entry.task.description().map(str::to_string),
        registered_at: entry.registered_at,
        next_fire_at: entry.next_fire_at,
        in_flight: entry.in_flight,
        cancelled: entry.cancelled,
        last_scheduled_at: entry.last_scheduled_at,
        last_completed_at: entry.last_completed_at,
        fire_count: entry.fire_count,
        skipped_count: entry.skipped_count,
    }
}
