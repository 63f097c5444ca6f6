//! Task persistence collaborators

use crate::frequency::{truncate_to_minute, Frequency};
use crate::task::Task;
use crate::types::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence collaborator for the scheduling core.
///
/// The scheduler and the spawned executions talk to storage exclusively
/// through this trait, so backends can range from the bundled
/// [`MemoryTaskStore`] to a database. A task is *due* when it is not busy
/// and its planned timestamp lies in the past; a task without a planned
/// timestamp counts as due.
///
/// [`reschedule_task`](TaskStore::reschedule_task) and
/// [`conclude_task`](TaskStore::conclude_task) have default implementations
/// in terms of the other operations; backends that can do better (a single
/// SQL statement, say) may override them.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a task and hand out its store-assigned id.
    async fn add_task(&self, task: Task) -> Result<i64, StoreError>;

    /// Replace a persisted task wholesale. `false` when the id is unknown.
    async fn update_task(&self, task: Task) -> Result<bool, StoreError>;

    /// Look up a task by id.
    async fn task(&self, id: i64) -> Result<Option<Task>, StoreError>;

    /// Every persisted task, in no particular order.
    async fn all_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// The tasks that are due now: not busy, planned in the past or absent.
    async fn tasks_to_process(&self) -> Result<Vec<Task>, StoreError>;

    /// The tasks planned for the future and not currently executing.
    async fn scheduled_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Remove a task. `false` when the id is unknown.
    async fn remove_task(&self, id: i64) -> Result<bool, StoreError>;

    /// Mark a task as executing. `false` when the id is unknown.
    async fn activate_task(&self, id: i64) -> Result<bool, StoreError>;

    /// Clear a task's executing marker. `false` when the id is unknown.
    async fn deactivate_task(&self, id: i64) -> Result<bool, StoreError>;

    /// Resolve a named option attached to a task.
    async fn task_option(&self, task_id: i64, name: &str) -> Result<Option<String>, StoreError>;

    /// Move a persisted task to a new planned timestamp and frequency.
    async fn reschedule_task(
        &self,
        task: &Task,
        planned: DateTime<Utc>,
        frequency: Option<Frequency>,
    ) -> Result<bool, StoreError> {
        let id = task.id().ok_or(StoreError::UnsavedTask)?;
        let mut updated = Task::new()
            .with_id(id)
            .with_type(task.task_type())
            .with_planned(planned);
        if let Some(frequency) = frequency {
            updated = updated.with_frequency(frequency);
        }
        self.update_task(updated).await
    }

    /// Retire one due occurrence of a task.
    ///
    /// A one-shot task is removed; a recurring task is rescheduled to its
    /// next occurrence and deactivated. Tasks whose planned timestamp still
    /// lies in the future are left untouched and reported as `false`.
    async fn conclude_task(&self, task: &Task) -> Result<bool, StoreError> {
        let id = task.id().ok_or(StoreError::UnsavedTask)?;
        let now = truncate_to_minute(Utc::now());
        if task.planned().map_or(false, |planned| planned > now) {
            return Ok(false);
        }

        let Some(frequency) = task.frequency().cloned() else {
            return self.remove_task(id).await;
        };

        match task.next_timestamp()? {
            Some(next) => {
                if !self.reschedule_task(task, next, Some(frequency)).await? {
                    return Ok(false);
                }
                self.deactivate_task(id).await
            }
            None => Ok(false),
        }
    }
}

/// In-memory [`TaskStore`] backed by a [`HashMap`] and an id sequence.
///
/// Suited to tests and single-process deployments; everything is lost on
/// drop.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<i64, Task>,
    sequence: i64,
    options: HashMap<(i64, String), String>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a named option to a persisted task, replacing any previous
    /// value under the same name.
    pub async fn set_task_option(
        &self,
        task_id: i64,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::TaskNotFound(task_id));
        }
        inner.options.insert((task_id, name.into()), value.into());
        Ok(())
    }

    /// Detach a named option. `false` when it was not set.
    pub async fn remove_task_option(&self, task_id: i64, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.options.remove(&(task_id, name.to_string())).is_some()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn add_task(&self, task: Task) -> Result<i64, StoreError> {
        let mut inner = self.inner.write().await;
        inner.sequence += 1;
        let id = inner.sequence;
        inner.tasks.insert(id, task.with_id(id));
        Ok(id)
    }

    async fn update_task(&self, task: Task) -> Result<bool, StoreError> {
        let id = task.id().ok_or(StoreError::UnsavedTask)?;
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&id) {
            return Ok(false);
        }
        inner.tasks.insert(id, task);
        Ok(true)
    }

    async fn task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        Ok(self.inner.read().await.tasks.get(&id).cloned())
    }

    async fn all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.inner.read().await.tasks.values().cloned().collect())
    }

    async fn tasks_to_process(&self) -> Result<Vec<Task>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|task| !task.is_busy() && task.planned().map_or(true, |planned| planned < now))
            .cloned()
            .collect())
    }

    async fn scheduled_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .await
            .tasks
            .values()
            .filter(|task| !task.is_busy() && task.planned().map_or(false, |planned| planned >= now))
            .cloned()
            .collect())
    }

    async fn remove_task(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.tasks.remove(&id).is_some();
        if removed {
            inner.options.retain(|(task_id, _), _| *task_id != id);
        }
        Ok(removed)
    }

    async fn activate_task(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.set_busy(true);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_task(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.set_busy(false);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn task_option(&self, task_id: i64, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .options
            .get(&(task_id, name.to_string()))
            .cloned())
    }
}
