//! Shared types and error taxonomy for the scheduling core

use thiserror::Error;

/// Result type alias for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors raised while parsing a frequency specification or computing
/// the next occurrence of a parsed frequency.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrequencyError {
    /// The specification did not contain exactly five space-separated fields
    #[error("invalid frequency, should be 5 fields separated by a space (got {0})")]
    InvalidFieldCount(usize),

    /// A field token did not match the supported grammar
    #[error("invalid frequency part '{part}' in {field} field")]
    InvalidPart { field: &'static str, part: String },

    /// A numeric token fell outside the field's natural bounds
    #[error("value {value} out of range ({min}-{max}) in {field} field")]
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// The next-occurrence search ran past the maximum supported year
    #[error("no valid next date available before year {max_year}")]
    NoValidNextDate { max_year: i32 },
}

/// Errors surfaced by a [`TaskStore`](crate::TaskStore) collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    /// No task with this id is known to the store
    #[error("task not found: {0}")]
    TaskNotFound(i64),

    /// The operation requires a task that has already been persisted
    #[error("task has not been persisted yet")]
    UnsavedTask,

    /// Backend-specific failure (database, file system, ...)
    #[error("store backend error: {0}")]
    Backend(String),

    /// A frequency computation failed while concluding or rescheduling
    #[error(transparent)]
    Frequency(#[from] FrequencyError),
}

/// Errors raised by [`Scheduler`](crate::Scheduler) registration and dispatch
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Another executor already handles this task type
    #[error("an executor is already registered for task type '{0}'")]
    TaskTypeAlreadyRegistered(String),

    /// The executor is already bound to a different scheduler
    #[error("the executor for task type '{0}' is already registered with another scheduler")]
    ExecutorAlreadyRegistered(String),

    /// A due task's type has no registered executor
    #[error("no executor is registered for task type '{0}'")]
    NoExecutorForTaskType(String),

    /// The store failed while a scheduling step was in progress
    #[error("unable to retrieve the tasks to process")]
    UnableToRetrieveTasksToProcess(#[source] StoreError),

    /// Store failure outside a scheduling step
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a single task execution, reported by an
/// [`Executor`](crate::Executor).
///
/// This replaces a bare success boolean so the retry contract is explicit:
/// `Retry` asks the store to reschedule the task after the executor's
/// reschedule delay, `Failed` retires the occurrence permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The task ran to completion; the occurrence is concluded
    Completed,
    /// The task should run again after the executor's reschedule delay
    Retry,
    /// The task failed permanently; the occurrence is concluded and logged
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_error_messages_embed_the_offender() {
        let err = FrequencyError::InvalidPart {
            field: "minute",
            part: "x7".into(),
        };
        assert_eq!(err.to_string(), "invalid frequency part 'x7' in minute field");

        let err = FrequencyError::ValueOutOfRange {
            field: "hour",
            value: 24,
            min: 0,
            max: 23,
        };
        assert!(err.to_string().contains("24"));
        assert!(err.to_string().contains("hour"));
    }

    #[test]
    fn scheduler_error_wraps_store_error() {
        let err = SchedulerError::UnableToRetrieveTasksToProcess(StoreError::Backend(
            "connection reset".into(),
        ));
        assert_eq!(err.to_string(), "unable to retrieve the tasks to process");
        assert!(std::error::Error::source(&err).is_some());
    }
}
