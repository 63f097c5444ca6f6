//! Scheduler integration tests
//!
//! End-to-end tests exercising the full scheduling lifecycle with the
//! in-memory task store. Covers the dispatch loop, recurring reschedules,
//! the retry flow, task options, and registry-wide shutdown.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskwheel::{
    stop_all_active_schedulers, ExecutionOutcome, Executor, Frequency, MemoryTaskStore,
    Scheduler, SchedulerError, SchedulerRegistry, StopBehavior, StoreError, Task, TaskStore,
};

struct Scripted {
    task_type: String,
    executions: AtomicUsize,
    script: Vec<ExecutionOutcome>,
}

impl Scripted {
    fn new(task_type: &str, script: Vec<ExecutionOutcome>) -> Arc<Self> {
        Arc::new(Self {
            task_type: task_type.to_string(),
            executions: AtomicUsize::new(0),
            script,
        })
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for Scripted {
    async fn execute(&self, _task: Task) -> ExecutionOutcome {
        let run = self.executions.fetch_add(1, Ordering::SeqCst);
        self.script
            .get(run)
            .cloned()
            .unwrap_or(ExecutionOutcome::Completed)
    }

    fn handled_task_type(&self) -> String {
        self.task_type.clone()
    }

    fn reschedule_delay(&self) -> Duration {
        // retry within the same minute so the next step picks the task up
        // right away; planned timestamps are truncated to the minute
        Duration::ZERO
    }
}

fn isolated(store: Arc<MemoryTaskStore>) -> Scheduler {
    Scheduler::new(store).with_registry(Arc::new(SchedulerRegistry::new()))
}

fn due_task(task_type: &str) -> Task {
    Task::new()
        .with_type(task_type)
        .with_planned(Utc::now() - ChronoDuration::minutes(5))
}

// ─── Retry flow ──────────────────────────────────────────────────

#[tokio::test]
async fn a_retried_task_runs_again_and_concludes() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = isolated(store.clone());
    let executor = Scripted::new(
        "flaky",
        vec![ExecutionOutcome::Retry, ExecutionOutcome::Completed],
    );
    scheduler.add_executor(executor.clone()).unwrap();
    store.add_task(due_task("flaky")).await.unwrap();

    // the first run asks for a retry, which reschedules the task after the
    // executor's delay; keep stepping until the re-run completes
    for _ in 0..50 {
        scheduler.step().await.unwrap();
        if executor.executions() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(executor.executions(), 2);
    // the one-shot task is retired after its successful re-run
    assert!(store.all_tasks().await.unwrap().is_empty());
}

// ─── Recurring tasks through the dispatch loop ───────────────────

#[tokio::test]
async fn a_recurring_task_survives_its_execution() {
    let store = Arc::new(MemoryTaskStore::new());
    let registry = Arc::new(SchedulerRegistry::new());
    let scheduler = Scheduler::new(store.clone() as Arc<dyn TaskStore>)
        .with_registry(registry)
        .with_sleep_time(Duration::from_millis(50))
        .with_stop_behavior(StopBehavior::Wait);
    let executor = Scripted::new("heartbeat", vec![]);
    scheduler.add_executor(executor.clone()).unwrap();

    let id = store
        .add_task(due_task("heartbeat").with_frequency(Frequency::minutely()))
        .await
        .unwrap();

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.stop().await;

    assert_eq!(executor.executions(), 1);
    let rescheduled = store.task(id).await.unwrap().unwrap();
    assert!(rescheduled.planned().unwrap() > Utc::now() - ChronoDuration::minutes(1));
    assert_eq!(rescheduled.frequency(), Some(&Frequency::minutely()));
    assert!(!rescheduled.is_busy());
}

// ─── Task options ────────────────────────────────────────────────

struct OptionReading {
    store: Arc<MemoryTaskStore>,
    seen: tokio::sync::Mutex<Option<String>>,
}

#[async_trait]
impl Executor for OptionReading {
    async fn execute(&self, task: Task) -> ExecutionOutcome {
        match task.option_value(self.store.as_ref(), "target").await {
            Ok(value) => {
                *self.seen.lock().await = value;
                ExecutionOutcome::Completed
            }
            Err(err) => ExecutionOutcome::Failed(err.to_string()),
        }
    }

    fn handled_task_type(&self) -> String {
        "export".to_string()
    }
}

#[tokio::test]
async fn executors_resolve_task_options_through_the_store() {
    let store = Arc::new(MemoryTaskStore::new());
    let scheduler = isolated(store.clone());
    let executor = Arc::new(OptionReading {
        store: store.clone(),
        seen: tokio::sync::Mutex::new(None),
    });
    scheduler.add_executor(executor.clone()).unwrap();

    let id = store.add_task(due_task("export")).await.unwrap();
    store.set_task_option(id, "target", "/srv/exports").await.unwrap();

    scheduler.step().await.unwrap();

    assert_eq!(executor.seen.lock().await.as_deref(), Some("/srv/exports"));
    assert!(store.all_tasks().await.unwrap().is_empty());
}

// ─── Store failures during a step ────────────────────────────────

struct ConcludeRejecting {
    inner: MemoryTaskStore,
}

#[async_trait]
impl TaskStore for ConcludeRejecting {
    async fn add_task(&self, task: Task) -> Result<i64, StoreError> {
        self.inner.add_task(task).await
    }

    async fn update_task(&self, task: Task) -> Result<bool, StoreError> {
        self.inner.update_task(task).await
    }

    async fn task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        self.inner.task(id).await
    }

    async fn all_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.all_tasks().await
    }

    async fn tasks_to_process(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.tasks_to_process().await
    }

    async fn scheduled_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.scheduled_tasks().await
    }

    async fn remove_task(&self, id: i64) -> Result<bool, StoreError> {
        self.inner.remove_task(id).await
    }

    async fn activate_task(&self, id: i64) -> Result<bool, StoreError> {
        self.inner.activate_task(id).await
    }

    async fn deactivate_task(&self, id: i64) -> Result<bool, StoreError> {
        self.inner.deactivate_task(id).await
    }

    async fn task_option(&self, task_id: i64, name: &str) -> Result<Option<String>, StoreError> {
        self.inner.task_option(task_id, name).await
    }

    async fn conclude_task(&self, _task: &Task) -> Result<bool, StoreError> {
        Err(StoreError::Backend("conclusions unavailable".into()))
    }
}

#[tokio::test]
async fn a_conclude_failure_fails_the_whole_step() {
    let store = Arc::new(ConcludeRejecting {
        inner: MemoryTaskStore::new(),
    });
    let scheduler = Scheduler::new(store.clone() as Arc<dyn TaskStore>)
        .with_registry(Arc::new(SchedulerRegistry::new()));

    // a recurring placeholder is concluded inside the step itself, so the
    // store failure must surface as the step's error
    store
        .add_task(Task::new().with_type("report").with_frequency(Frequency::daily()))
        .await
        .unwrap();

    assert!(matches!(
        scheduler.step().await,
        Err(SchedulerError::Store(StoreError::Backend(_)))
    ));
    // the placeholder is left for the next step
    assert_eq!(store.all_tasks().await.unwrap().len(), 1);
}

// ─── Registry-wide shutdown ──────────────────────────────────────

#[tokio::test]
async fn stop_all_active_schedulers_reaches_globally_registered_loops() {
    let scheduler = Scheduler::new(Arc::new(MemoryTaskStore::new()) as Arc<dyn TaskStore>)
        .with_sleep_time(Duration::from_millis(50));
    scheduler.start().await;
    assert!(scheduler.is_running().await);

    stop_all_active_schedulers();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!scheduler.is_running().await);

    // never-started schedulers are untouched by a global stop
    let idle = Scheduler::new(Arc::new(MemoryTaskStore::new()) as Arc<dyn TaskStore>);
    stop_all_active_schedulers();
    assert!(!idle.is_running().await);
}
