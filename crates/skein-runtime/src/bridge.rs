//! Binding between units of execution and the entities they run for.
//!
//! Every thread the runtime starts is a task. The scheduler asks the bridge
//! which task is calling so it can tell controlled code from threads the
//! program started behind its back.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use dashmap::DashMap;
use skein_core::{EntityId, TaskId};
use tracing::debug;

thread_local! {
    static CURRENT_TASK: Cell<Option<TaskId>> = const { Cell::new(None) };
}

#[derive(Debug, Default)]
pub struct TaskBridge {
    bindings: DashMap<TaskId, EntityId>,
    next_task: AtomicU64,
}

impl TaskBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_task_id(&self) -> TaskId {
        TaskId(self.next_task.fetch_add(1, Ordering::Relaxed))
    }

    pub fn bind(&self, task: TaskId, entity: EntityId) {
        self.bindings.insert(task, entity);
    }

    pub fn unbind(&self, task: TaskId) -> Option<EntityId> {
        self.bindings.remove(&task).map(|(_, entity)| entity)
    }

    pub fn entity_of(&self, task: TaskId) -> Option<EntityId> {
        self.bindings.get(&task).map(|entry| *entry.value())
    }

    /// Task of the calling thread, if it was started by the bridge.
    pub fn current_task() -> Option<TaskId> {
        CURRENT_TASK.with(Cell::get)
    }

    /// Start `work` as `task` on a new thread.
    ///
    /// An unbound `task` takes over the binding of the task that spawns it,
    /// so a nested unit keeps acting for the same entity.
    pub fn run<F, T>(&self, task: TaskId, name: &str, work: F) -> std::io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.entity_of(task).is_none() {
            if let Some(parent) = Self::current_task() {
                if let Some(entity) = self.unbind(parent) {
                    debug!(%parent, %task, %entity, "moved task binding");
                    self.bind(task, entity);
                }
            }
        }
        std::thread::Builder::new()
            .name(format!("skein-{name}-{task}"))
            .spawn(move || {
                CURRENT_TASK.with(|current| current.set(Some(task)));
                let result = work();
                CURRENT_TASK.with(|current| current.set(None));
                result
            })
    }
}
