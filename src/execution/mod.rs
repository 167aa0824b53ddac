//! Task execution.
//!
//! This module provides the bounded worker pool that runs task bodies
//! and reports each execution's outcome.

mod pool;

pub use pool::{ExecutionResult, WorkerPool};
