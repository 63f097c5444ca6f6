//! Process-wide bookkeeping of running schedulers and executor bindings

use crate::executor::Executor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::watch;

static GLOBAL: OnceLock<Arc<SchedulerRegistry>> = OnceLock::new();

/// Registry of live schedulers and executor-to-scheduler bindings.
///
/// Schedulers register their shutdown signal on start and deregister on
/// stop, so [`SchedulerRegistry::stop_all`] can wind down every scheduler
/// sharing a registry. The binding table enforces that an executor instance
/// is registered with at most one scheduler at a time; bindings key on the
/// executor's allocation, not its task type.
///
/// Schedulers use the [`global`](SchedulerRegistry::global) instance unless
/// one is injected via
/// [`Scheduler::with_registry`](crate::Scheduler::with_registry), which
/// keeps tests and embedded deployments isolated from each other.
#[derive(Debug, Default)]
pub struct SchedulerRegistry {
    active: Mutex<HashMap<u64, watch::Sender<bool>>>,
    bindings: Mutex<HashMap<usize, u64>>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    pub(crate) fn register(&self, scheduler_id: u64, shutdown: watch::Sender<bool>) {
        lock(&self.active).insert(scheduler_id, shutdown);
    }

    pub(crate) fn deregister(&self, scheduler_id: u64) {
        lock(&self.active).remove(&scheduler_id);
    }

    /// Whether a scheduler with this id is currently registered as running.
    pub fn is_active(&self, scheduler_id: u64) -> bool {
        lock(&self.active).contains_key(&scheduler_id)
    }

    /// The number of schedulers currently registered as running.
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Signal shutdown to every registered scheduler and clear the registry.
    ///
    /// The signalled loops exit at their next suspension point; this does
    /// not wait for them.
    pub fn stop_all(&self) {
        for (_, shutdown) in lock(&self.active).drain() {
            // receiver gone means the loop already exited
            let _ = shutdown.send(true);
        }
    }

    pub(crate) fn bind_executor(&self, executor: &Arc<dyn Executor>, scheduler_id: u64) {
        lock(&self.bindings).insert(executor_key(executor), scheduler_id);
    }

    pub(crate) fn unbind_executor(&self, executor: &Arc<dyn Executor>) {
        lock(&self.bindings).remove(&executor_key(executor));
    }

    /// The id of the scheduler this executor instance is registered with.
    pub fn executor_binding(&self, executor: &Arc<dyn Executor>) -> Option<u64> {
        lock(&self.bindings).get(&executor_key(executor)).copied()
    }
}

/// Signal shutdown to every scheduler registered with the global registry.
pub fn stop_all_active_schedulers() {
    SchedulerRegistry::global().stop_all();
}

// identity of the executor allocation; the vtable half of the fat pointer
// is irrelevant for identity and dropped by the cast
fn executor_key(executor: &Arc<dyn Executor>) -> usize {
    Arc::as_ptr(executor) as *const () as usize
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::types::ExecutionOutcome;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _task: Task) -> ExecutionOutcome {
            ExecutionOutcome::Completed
        }
    }

    #[test]
    fn registration_lifecycle() {
        let registry = SchedulerRegistry::new();
        assert_eq!(registry.active_count(), 0);

        let (tx, _rx) = watch::channel(false);
        registry.register(1, tx);
        assert!(registry.is_active(1));
        assert_eq!(registry.active_count(), 1);

        registry.deregister(1);
        assert!(!registry.is_active(1));
    }

    #[test]
    fn stop_all_signals_and_clears() {
        let registry = SchedulerRegistry::new();
        let (tx_a, rx_a) = watch::channel(false);
        let (tx_b, rx_b) = watch::channel(false);
        registry.register(1, tx_a);
        registry.register(2, tx_b);

        registry.stop_all();
        assert!(*rx_a.borrow());
        assert!(*rx_b.borrow());
        assert_eq!(registry.active_count(), 0);

        // signalling an empty registry is a no-op
        registry.stop_all();
    }

    #[test]
    fn bindings_key_on_the_executor_instance() {
        let registry = SchedulerRegistry::new();
        let first: Arc<dyn Executor> = Arc::new(Noop);
        let second: Arc<dyn Executor> = Arc::new(Noop);

        registry.bind_executor(&first, 1);
        assert_eq!(registry.executor_binding(&first), Some(1));
        // a distinct instance of the same type is unbound
        assert_eq!(registry.executor_binding(&second), None);

        registry.unbind_executor(&first);
        assert_eq!(registry.executor_binding(&first), None);
    }
}
