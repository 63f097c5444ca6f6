//! Crontab-style task scheduling with pluggable executors and task stores.
//!
//! The moving parts:
//!
//! - [`Frequency`] — a parsed crontab-like recurrence rule that can compute
//!   the next occurrence after any instant, including wrapping ranges that
//!   resolve against each month's actual length
//! - [`Task`] — a schedulable unit of work: a task type, an optional planned
//!   timestamp and an optional frequency
//! - [`Executor`] — user code handling the execution of one task type
//! - [`TaskStore`] — the persistence collaborator; [`MemoryTaskStore`] is
//!   the bundled in-memory implementation
//! - [`Scheduler`] — the dispatch loop fetching due tasks on a wall-clock
//!   aligned cadence and spawning their executions
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use taskwheel::{
//!     ExecutionOutcome, Executor, Frequency, MemoryTaskStore, Scheduler, Task, TaskStore,
//! };
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Executor for Heartbeat {
//!     async fn execute(&self, task: Task) -> ExecutionOutcome {
//!         println!("beat: {:?}", task.id());
//!         ExecutionOutcome::Completed
//!     }
//!
//!     fn handled_task_type(&self) -> String {
//!         "heartbeat".to_string()
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> taskwheel::Result<()> {
//! let store = Arc::new(MemoryTaskStore::new());
//! let executor = Arc::new(Heartbeat);
//! store
//!     .add_task(executor.create_task().with_frequency(Frequency::minutely()))
//!     .await?;
//!
//! let scheduler = Scheduler::new(store);
//! scheduler.add_executor(executor)?;
//! scheduler.start().await;
//! // ... the dispatch loop now runs in the background ...
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod executor;
pub mod frequency;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod types;

pub use executor::Executor;
pub use frequency::{Frequency, FrequencyBuilder, DEFAULT_MAX_YEAR};
pub use registry::{stop_all_active_schedulers, SchedulerRegistry};
pub use scheduler::{Scheduler, StopBehavior, DEFAULT_SLEEP_TIME};
pub use store::{MemoryTaskStore, TaskStore};
pub use task::{Task, TaskValidationError};
pub use types::{
    ExecutionOutcome, FrequencyError, Result, SchedulerError, StoreError,
};
