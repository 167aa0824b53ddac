//! Task trait and error types.
//!
//! A `Task` is the opaque body the scheduler runs each time a trigger fires.
//! Implement the trait directly, or wrap a closure with [`task_fn`].

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// Errors that can occur while a task body runs.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Check if this error came from a panic rather than a returned error.
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked(_))
    }
}

/// The unit of work the scheduler executes.
///
/// # Example
///
/// ```ignore
/// use cadence::{Task, TaskError};
/// use async_trait::async_trait;
///
/// struct SendDigest;
///
/// #[async_trait]
/// impl Task for SendDigest {
///     async fn run(&self) -> Result<(), TaskError> {
///         // Do work
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task body once.
    ///
    /// Returning `Err` (or panicking) ends only this execution; the task
    /// keeps its schedule and the error is reported to the error observer.
    async fn run(&self) -> Result<(), TaskError>;

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// A [`Task`] backed by a closure returning a future.
pub struct TaskFn<F> {
    f: F,
    description: Option<String>,
}

/// Wrap a closure as a [`Task`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    TaskFn {
        f,
        description: None,
    }
}

impl<F> TaskFn<F> {
    /// Attach a description used in logs.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TaskError>> + Send,
{
    async fn run(&self) -> Result<(), TaskError> {
        (self.f)().await
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
