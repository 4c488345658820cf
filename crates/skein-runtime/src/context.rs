use std::sync::Arc;

use skein_core::{ActionResult, EntityId, Event};

use crate::machine::Machine;
use crate::monitor::Monitor;
use crate::runtime::{RuntimeInner, Transition};

/// Handle through which harness and machine code talks to the runtime.
///
/// Every method that can interleave with other entities is a scheduling
/// point. Once the run is over they return `ExecutionCanceled`, which
/// actions should propagate with `?`.
#[derive(Clone)]
pub struct Context {
    inner: Arc<RuntimeInner>,
    id: EntityId,
}

impl Context {
    pub(crate) fn new(inner: Arc<RuntimeInner>, id: EntityId) -> Self {
        Self { inner, id }
    }

    /// The entity this context acts for.
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> String {
        self.inner.name_of(self.id)
    }

    /// Current state of the calling machine; `None` for the harness.
    pub fn current_state(&self) -> Option<String> {
        self.inner.state_of(self.id)
    }

    pub fn create_machine(&self, machine: impl Machine, initial_event: Option<Event>) -> ActionResult<EntityId> {
        self.inner
            .create_machine(self.id, Box::new(machine), initial_event)
    }

    /// Create a machine and wait until it has nothing left to do.
    pub fn create_machine_and_execute(
        &self,
        machine: impl Machine,
        initial_event: Option<Event>,
    ) -> ActionResult<EntityId> {
        let id = self.create_machine(machine, initial_event)?;
        self.inner.wait_for_quiescence(self.id, id)?;
        Ok(id)
    }

    pub fn send(&self, target: EntityId, event: Event) -> ActionResult {
        self.inner.send(self.id, target, event, false)
    }

    /// Send an event the target must dequeue before it halts.
    pub fn send_must_handle(&self, target: EntityId, event: Event) -> ActionResult {
        self.inner.send(self.id, target, event, true)
    }

    /// Send and wait until the target has nothing left to do.
    pub fn send_and_execute(&self, target: EntityId, event: Event) -> ActionResult {
        self.send(target, event)?;
        self.inner.wait_for_quiescence(self.id, target)
    }

    /// Block until one of `events` arrives and return it.
    pub fn receive(&self, events: &[&str]) -> ActionResult<Event> {
        self.inner.receive(self.id, events)
    }

    pub fn random_bool(&self) -> ActionResult<bool> {
        self.inner.random_bool(self.id, 2, None)
    }

    /// True with probability `1 / max_value` under the random strategy.
    pub fn random_bool_with(&self, max_value: u64) -> ActionResult<bool> {
        self.inner.random_bool(self.id, max_value, None)
    }

    /// A boolean choice that fair strategies alternate fairly; `id` names
    /// the call site.
    pub fn fair_random_bool(&self, id: &str) -> ActionResult<bool> {
        self.inner.random_bool(self.id, 2, Some(id))
    }

    /// A value in `0..max_value`.
    pub fn random_int(&self, max_value: u64) -> ActionResult<u64> {
        self.inner.random_int(self.id, max_value)
    }

    pub fn register_monitor(&self, monitor: impl Monitor) -> ActionResult<EntityId> {
        self.inner.register_monitor(Box::new(monitor))
    }

    /// Run the monitor called `name` on `event`, synchronously.
    pub fn monitor(&self, name: &str, event: Event) -> ActionResult {
        self.inner.invoke_monitor(self.id, name, event)
    }

    pub fn assert(&self, predicate: bool, message: impl Into<String>) -> ActionResult {
        self.inner.assert(predicate, message.into())
    }

    pub fn raise(&self, event: Event) -> ActionResult {
        self.inner
            .request_transition(self.id, "raise", Transition::Raise(event))
    }

    pub fn goto(&self, state: impl Into<String>) -> ActionResult {
        self.inner
            .request_transition(self.id, "goto", Transition::Goto(state.into()))
    }

    pub fn push(&self, state: impl Into<String>) -> ActionResult {
        self.inner
            .request_transition(self.id, "push", Transition::Push(state.into()))
    }

    pub fn pop(&self) -> ActionResult {
        self.inner.request_transition(self.id, "pop", Transition::Pop)
    }

    pub fn halt(&self) -> ActionResult {
        self.inner.request_transition(self.id, "halt", Transition::Halt)
    }

    /// Run `work` as a nested unit of this entity on its own thread and
    /// wait for it. The unit acts for this entity while it runs.
    pub fn run_nested<F, T>(&self, work: F) -> ActionResult<T>
    where
        F: FnOnce(&Context) -> ActionResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.run_nested(self.id, work)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}
