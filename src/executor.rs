//! Executor contract

use crate::task::Task;
use crate::types::ExecutionOutcome;
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_RESCHEDULE_DELAY: Duration = Duration::from_millis(1000);

/// Handles the execution of tasks of one task type.
///
/// An executor registers with a single [`Scheduler`](crate::Scheduler) under
/// its [`handled_task_type`](Executor::handled_task_type); every due task
/// carrying that type is handed to [`execute`](Executor::execute) on its own
/// spawned execution. The returned [`ExecutionOutcome`] drives the store
/// bookkeeping: completion and permanent failure conclude the occurrence,
/// [`ExecutionOutcome::Retry`] asks for a re-run after
/// [`reschedule_delay`](Executor::reschedule_delay).
///
/// ```
/// use async_trait::async_trait;
/// use taskwheel::{ExecutionOutcome, Executor, Task};
///
/// struct Backup;
///
/// #[async_trait]
/// impl Executor for Backup {
///     async fn execute(&self, _task: Task) -> ExecutionOutcome {
///         ExecutionOutcome::Completed
///     }
///
///     fn handled_task_type(&self) -> String {
///         "backup".to_string()
///     }
/// }
/// ```
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one due occurrence of a task.
    async fn execute(&self, task: Task) -> ExecutionOutcome;

    /// The task type this executor is responsible for.
    ///
    /// Defaults to the concrete type's name, which is unique enough for
    /// single-binary deployments; override it for stable wire-visible types.
    fn handled_task_type(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// How long to wait before re-running a task that asked for a retry.
    fn reschedule_delay(&self) -> Duration {
        DEFAULT_RESCHEDULE_DELAY
    }

    /// A fresh task pre-stamped with this executor's task type.
    fn create_task(&self) -> Task {
        Task::new().with_type(self.handled_task_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _task: Task) -> ExecutionOutcome {
            ExecutionOutcome::Completed
        }
    }

    struct Named;

    #[async_trait]
    impl Executor for Named {
        async fn execute(&self, _task: Task) -> ExecutionOutcome {
            ExecutionOutcome::Completed
        }

        fn handled_task_type(&self) -> String {
            "named".to_string()
        }

        fn reschedule_delay(&self) -> Duration {
            Duration::from_millis(250)
        }
    }

    #[test]
    fn handled_task_type_defaults_to_the_concrete_type_name() {
        let task_type = Noop.handled_task_type();
        assert!(task_type.ends_with("Noop"), "unexpected type: {task_type}");
    }

    #[test]
    fn created_tasks_carry_the_handled_type() {
        assert_eq!(Named.create_task().task_type(), "named");
        assert_eq!(Named.reschedule_delay(), Duration::from_millis(250));
        assert_eq!(Noop.reschedule_delay(), DEFAULT_RESCHEDULE_DELAY);
    }
}
