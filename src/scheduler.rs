//! The dispatch loop tying stores, tasks and executors together

use crate::executor::Executor;
use crate::registry::SchedulerRegistry;
use crate::store::TaskStore;
use crate::task::Task;
use crate::types::{ExecutionOutcome, Result, SchedulerError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

/// Default pause between dispatch steps.
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_millis(30_000);

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// What happens to in-flight executions when the scheduler stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBehavior {
    /// Leave them running to completion on the runtime.
    #[default]
    Detach,
    /// Await them before the loop task finishes.
    Wait,
    /// Cancel them.
    Abort,
}

/// Periodically fetches due tasks from a [`TaskStore`] and hands each one to
/// the [`Executor`] registered for its task type.
///
/// The dispatch loop runs on a spawned task: every wake-up it performs one
/// scheduling step and then sleeps until the next multiple of the sleep
/// interval, so wake-ups stay aligned to the wall clock regardless of how
/// long a step takes. Executions are spawned into a managed set and never
/// block the loop; [`StopBehavior`] decides their fate on shutdown.
///
/// ```no_run
/// use std::sync::Arc;
/// use taskwheel::{Frequency, MemoryTaskStore, Scheduler, TaskStore};
///
/// # async fn example(executor: Arc<dyn taskwheel::Executor>) -> taskwheel::Result<()> {
/// let store = Arc::new(MemoryTaskStore::new());
/// store.add_task(executor.create_task().with_frequency(Frequency::hourly())).await?;
///
/// let scheduler = Scheduler::new(store);
/// scheduler.add_executor(executor)?;
/// scheduler.start().await;
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    id: u64,
    shared: Arc<Shared>,
    sleep_time: Duration,
    stop_behavior: StopBehavior,
    registry: Arc<SchedulerRegistry>,
    lifecycle: Mutex<Lifecycle>,
}

struct Shared {
    store: Arc<dyn TaskStore>,
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl Shared {
    fn executors_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Executor>>> {
        self.executors.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn executors_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Executor>>> {
        self.executors.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct Lifecycle {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Scheduler {
    /// Create a scheduler over a store, registered with the global
    /// [`SchedulerRegistry`].
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            shared: Arc::new(Shared {
                store,
                executors: RwLock::new(HashMap::new()),
            }),
            sleep_time: DEFAULT_SLEEP_TIME,
            stop_behavior: StopBehavior::default(),
            registry: SchedulerRegistry::global(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Change the pause between dispatch steps.
    pub fn with_sleep_time(mut self, sleep_time: Duration) -> Self {
        self.sleep_time = sleep_time;
        self
    }

    /// Change what happens to in-flight executions on shutdown.
    pub fn with_stop_behavior(mut self, stop_behavior: StopBehavior) -> Self {
        self.stop_behavior = stop_behavior;
        self
    }

    /// Use a dedicated registry instead of the global one.
    pub fn with_registry(mut self, registry: Arc<SchedulerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sleep_time(&self) -> Duration {
        self.sleep_time
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.shared.store.clone()
    }

    /// Register an executor under its handled task type.
    ///
    /// Re-adding an executor already registered with this scheduler is a
    /// no-op; an executor registered with a different scheduler in the same
    /// registry, or a second executor for an occupied task type, is
    /// rejected without changing any state.
    pub fn add_executor(&self, executor: Arc<dyn Executor>) -> Result<()> {
        let task_type = executor.handled_task_type();
        match self.registry.executor_binding(&executor) {
            Some(scheduler_id) if scheduler_id == self.id => return Ok(()),
            Some(_) => return Err(SchedulerError::ExecutorAlreadyRegistered(task_type)),
            None => {}
        }

        let mut executors = self.shared.executors_write();
        if executors.contains_key(&task_type) {
            return Err(SchedulerError::TaskTypeAlreadyRegistered(task_type));
        }
        executors.insert(task_type, executor.clone());
        drop(executors);

        self.registry.bind_executor(&executor, self.id);
        Ok(())
    }

    /// Unregister an executor and release its binding. `false` when it was
    /// not registered with this scheduler.
    pub fn remove_executor(&self, executor: &Arc<dyn Executor>) -> bool {
        if self.registry.executor_binding(executor) != Some(self.id) {
            return false;
        }
        let removed = self
            .shared
            .executors_write()
            .remove(&executor.handled_task_type())
            .is_some();
        self.registry.unbind_executor(executor);
        removed
    }

    /// The executor registered for a task type.
    pub fn executor_for(&self, task_type: &str) -> Option<Arc<dyn Executor>> {
        self.shared.executors_read().get(task_type).cloned()
    }

    /// Every registered executor.
    pub fn executors(&self) -> Vec<Arc<dyn Executor>> {
        self.shared.executors_read().values().cloned().collect()
    }

    /// Spawn the dispatch loop. A no-op when the loop is already running.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.handle.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.registry.register(self.id, shutdown_tx.clone());

        let handle = tokio::spawn(run_loop(
            self.id,
            self.shared.clone(),
            self.sleep_time,
            self.stop_behavior,
            shutdown_rx,
        ));
        lifecycle.handle = Some(handle);
        lifecycle.shutdown = Some(shutdown_tx);
        info!(
            scheduler_id = self.id,
            sleep_ms = self.sleep_time.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Signal the dispatch loop to stop and wait for it to exit. A no-op
    /// when the scheduler was never started.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let shutdown = lifecycle.shutdown.take();
        let handle = lifecycle.handle.take();
        if shutdown.is_none() && handle.is_none() {
            return;
        }

        if let Some(shutdown) = shutdown {
            // receiver gone means the loop already exited
            let _ = shutdown.send(true);
        }
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(scheduler_id = self.id, error = %err, "scheduler loop task failed");
            }
        }
        self.registry.deregister(self.id);
        info!(scheduler_id = self.id, "scheduler stopped");
    }

    /// Whether the dispatch loop is currently alive.
    pub async fn is_running(&self) -> bool {
        self.lifecycle
            .lock()
            .await
            .handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Run one scheduling step immediately and await the executions it
    /// spawned, outside the dispatch loop. Useful for tests and for
    /// deployments that drive the cadence themselves.
    pub async fn step(&self) -> Result<()> {
        let mut executions = JoinSet::new();
        let result = schedule_step(self.id, &self.shared, &mut executions).await;
        while executions.join_next().await.is_some() {}
        result
    }
}

async fn run_loop(
    id: u64,
    shared: Arc<Shared>,
    sleep_time: Duration,
    stop_behavior: StopBehavior,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut executions = JoinSet::new();
    loop {
        if let Err(err) = schedule_step(id, &shared, &mut executions).await {
            error!(scheduler_id = id, error = %err, "scheduling step failed");
        }

        // reap finished executions so the set does not grow unbounded
        while executions.try_join_next().is_some() {}

        tokio::select! {
            _ = tokio::time::sleep(aligned_pause(sleep_time)) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    match stop_behavior {
        StopBehavior::Detach => {
            executions.detach_all();
        }
        StopBehavior::Wait => while executions.join_next().await.is_some() {},
        StopBehavior::Abort => {
            executions.abort_all();
            while executions.join_next().await.is_some() {}
        }
    }
    debug!(scheduler_id = id, "scheduler loop exited");
}

/// One scheduling step: fetch the due tasks and route each to its executor.
///
/// A recurring task that has no planned timestamp yet is a placeholder; it
/// is concluded without executing, which moves it onto its schedule. The
/// step is all-or-nothing: a due task whose type has no executor, or a
/// store failure while concluding a placeholder, fails the whole step and
/// leaves the remaining tasks for the next wake-up.
async fn schedule_step(
    id: u64,
    shared: &Arc<Shared>,
    executions: &mut JoinSet<()>,
) -> Result<()> {
    let tasks = shared
        .store
        .tasks_to_process()
        .await
        .map_err(SchedulerError::UnableToRetrieveTasksToProcess)?;

    for task in tasks {
        if task.planned().is_none() && task.frequency().is_some() {
            debug!(
                scheduler_id = id,
                task_id = ?task.id(),
                "scheduling recurring placeholder"
            );
            shared.store.conclude_task(&task).await?;
            continue;
        }

        let executor = shared
            .executors_read()
            .get(task.task_type())
            .cloned()
            .ok_or_else(|| SchedulerError::NoExecutorForTaskType(task.task_type().to_string()))?;

        debug!(
            scheduler_id = id,
            task_id = ?task.id(),
            task_type = %task.task_type(),
            "dispatching task"
        );
        executions.spawn(process_task(shared.store.clone(), executor, task));
    }

    Ok(())
}

/// One task execution: activate, execute, then apply the outcome to the
/// store.
async fn process_task(store: Arc<dyn TaskStore>, executor: Arc<dyn Executor>, task: Task) {
    let task_id = task.id();
    let task_type = task.task_type().to_string();

    if let Some(id) = task_id {
        if let Err(err) = store.activate_task(id).await {
            error!(task_id = id, error = %err, "failed to activate task");
            return;
        }
    }

    match executor.execute(task.clone()).await {
        ExecutionOutcome::Completed => {
            if let Err(err) = store.conclude_task(&task).await {
                error!(task_id = ?task_id, task_type = %task_type, error = %err, "failed to conclude task");
            }
        }
        ExecutionOutcome::Retry => {
            let delay = chrono::Duration::milliseconds(
                executor.reschedule_delay().as_millis() as i64
            );
            let planned = Utc::now() + delay;
            let frequency = task.frequency().cloned();
            match store.reschedule_task(&task, planned, frequency).await {
                Ok(_) => {
                    if let Some(id) = task_id {
                        if let Err(err) = store.deactivate_task(id).await {
                            error!(task_id = id, error = %err, "failed to deactivate task");
                        }
                    }
                }
                Err(err) => {
                    error!(task_id = ?task_id, task_type = %task_type, error = %err, "failed to reschedule task for retry");
                }
            }
        }
        ExecutionOutcome::Failed(reason) => {
            error!(task_id = ?task_id, task_type = %task_type, reason = %reason, "task execution failed");
            if let Err(err) = store.conclude_task(&task).await {
                error!(task_id = ?task_id, task_type = %task_type, error = %err, "failed to conclude failed task");
            }
        }
    }
}

fn aligned_pause(sleep_time: Duration) -> Duration {
    aligned_pause_from(Utc::now().timestamp_millis(), sleep_time)
}

/// The pause until the smallest multiple of the sleep interval strictly
/// after `now_ms`.
fn aligned_pause_from(now_ms: i64, sleep_time: Duration) -> Duration {
    let sleep_ms = sleep_time.as_millis() as i64;
    if sleep_ms <= 0 {
        return Duration::ZERO;
    }
    let projected = ((now_ms + sleep_ms) / sleep_ms) * sleep_ms;
    Duration::from_millis((projected - now_ms) as u64)
}
