//! Scheduler engine for task dispatch.
//!
//! This module provides the registry of scheduled tasks, the dispatch loop
//! that fires them on time, and the handle used to control a running loop.

mod engine;
mod handle;
pub mod registry;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use registry::{Cancellation, Completion, Dispatch, Registration, Registry, TaskSnapshot};
pub use types::{SchedulerError, SchedulerState};
