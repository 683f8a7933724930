//! Error taxonomy shared by every pool in the crate.
//!
//! All errors are `Clone` so that a single stored failure can be handed to any
//! number of joiners and getters.

use std::any::Any;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::runtime::scheduler::TaskId;

/// A panic captured while a task payload was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    task: TaskId,
    message: String,
}

impl TaskFailure {
    /// Create a failure originating in `task`.
    pub fn new(
        task: TaskId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task,
            message: message.into(),
        }
    }

    /// The task in which the panic was raised.
    #[inline]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The panic message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert a panic payload into a task error.
    ///
    /// A payload that is itself a `TaskError` (a failure re-raised by `join`)
    /// is passed through untouched so that the originating task is kept.
    pub(crate) fn from_panic(
        task: TaskId,
        payload: Box<dyn Any + Send>,
    ) -> TaskError {
        let payload = match payload.downcast::<TaskError>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked with a non-string payload".to_string()
        };
        TaskError::Failed(TaskFailure::new(task, message))
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} panicked: {}", self.task, self.message)
    }
}

/// Why a submission was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// The pool is shutting down or terminated.
    #[error("pool is shut down")]
    Shutdown,
    /// The bounded queue is full and no thread could be started.
    #[error("task queue is full")]
    QueueFull,
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(String),
}

/// Errors observed through task handles and submission APIs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task payload panicked.
    #[error("task failed: {0}")]
    Failed(TaskFailure),
    /// The pool did not accept the task.
    #[error("submission rejected: {0}")]
    Rejected(RejectReason),
    /// The task was cancelled before producing a result.
    #[error("task was cancelled")]
    Cancelled,
    /// A timed wait elapsed before the task finished.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The waiting thread was interrupted.
    #[error("interrupted while waiting for a task")]
    Interrupted,
    /// An argument was outside its accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl TaskError {
    /// The captured failure, if this is a `Failed` error.
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            TaskError::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether this error means the task was cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Whether this error is a rejection.
    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, TaskError::Rejected(_))
    }
}

impl From<RejectReason> for TaskError {
    fn from(reason: RejectReason) -> Self {
        TaskError::Rejected(reason)
    }
}

/// Result alias used by task handles.
pub type TaskResult<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_panic_str() {
        let err = TaskFailure::from_panic(TaskId(3), Box::new("boom"));
        let failure = err.failure().unwrap();
        assert_eq!(failure.task(), TaskId(3));
        assert_eq!(failure.message(), "boom");
    }

    #[test]
    fn test_from_panic_string() {
        let err = TaskFailure::from_panic(TaskId(4), Box::new(String::from("bad index")));
        assert_eq!(err.failure().unwrap().message(), "bad index");
    }

    #[test]
    fn test_from_panic_keeps_origin() {
        let original = TaskError::Failed(TaskFailure::new(TaskId(9), "leaf"));
        let err = TaskFailure::from_panic(TaskId(1), Box::new(original.clone()));
        assert_eq!(err, original);
    }

    #[test]
    fn test_display() {
        let err = TaskError::Failed(TaskFailure::new(TaskId(2), "oops"));
        assert_eq!(err.to_string(), "task failed: Task(2) panicked: oops");
        let err = TaskError::from(RejectReason::QueueFull);
        assert!(err.is_rejected());
        assert_eq!(err.to_string(), "submission rejected: task queue is full");
    }
}
