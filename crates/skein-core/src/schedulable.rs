//! Schedulable entity registry.
//!
//! One `SchedulableInfo` per harness, machine and monitor. The scheduler
//! owns the registry for the duration of a run; strategies only ever see
//! an id-ordered snapshot of it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{EntityId, TaskId};
use crate::operation::Operation;

/// What kind of actor an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Harness,
    Machine,
    Monitor,
}

/// Scheduling metadata for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulableInfo {
    pub id: EntityId,
    /// Display name, e.g. `Server(1)`.
    pub name: String,
    pub kind: EntityKind,
    /// Whether the entity can be selected at the next scheduling point.
    pub enabled: bool,
    /// Blocked inside a receive with no matching event queued.
    pub waiting_to_receive: bool,
    /// Blocked until another entity becomes quiescent.
    pub waiting_for_quiescence: Option<EntityId>,
    pub halted: bool,
    /// Operation the entity performs when it is next selected.
    pub next_operation: Operation,
    /// Scheduler step of the send a pending receive consumes (0 if none).
    pub next_matching_send_index: u64,
    /// Unit of execution currently bound to the entity.
    pub task: Option<TaskId>,
    /// Number of nondeterministic choices made so far.
    pub program_counter: u64,
    /// Set once raise, goto, push or pop was called in the current action.
    pub action_called_transition: bool,
    pub inside_on_exit: bool,

    // handshake flags, owned by the scheduler
    pub active: bool,
    pub has_started: bool,
    pub completed: bool,
    pub skip_next_receive: bool,
}

impl SchedulableInfo {
    pub fn new(id: EntityId, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            enabled: kind != EntityKind::Monitor,
            waiting_to_receive: false,
            waiting_for_quiescence: None,
            halted: false,
            next_operation: Operation::receive(id),
            next_matching_send_index: 0,
            task: None,
            program_counter: 0,
            action_called_transition: false,
            inside_on_exit: false,
            active: false,
            has_started: false,
            completed: false,
            skip_next_receive: false,
        }
    }

    /// Reset for a fresh handler activation.
    pub fn on_handler_created(&mut self, task: TaskId, send_step: u64) {
        self.task = Some(task);
        self.enabled = true;
        self.waiting_to_receive = false;
        self.active = false;
        self.has_started = false;
        self.completed = false;
        self.skip_next_receive = true;
        self.next_operation = Operation::receive(self.id);
        self.next_matching_send_index = send_step;
    }

    pub fn on_handler_completed(&mut self) {
        self.enabled = false;
        self.completed = true;
    }

    /// Blocked on something another entity has to do.
    pub fn is_blocked(&self) -> bool {
        self.waiting_to_receive || self.waiting_for_quiescence.is_some()
    }
}

/// Id-ordered table of all entities of one run.
#[derive(Debug, Clone, Default)]
pub struct SchedulableRegistry {
    entries: BTreeMap<EntityId, SchedulableInfo>,
}

impl SchedulableRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Insert the entity unless it is already registered. Returns true if
    /// it was inserted.
    pub fn register(&mut self, info: SchedulableInfo) -> bool {
        if self.entries.contains_key(&info.id) {
            return false;
        }
        self.entries.insert(info.id, info);
        true
    }

    pub fn get(&self, id: EntityId) -> Option<&SchedulableInfo> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut SchedulableInfo> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &SchedulableInfo> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SchedulableInfo> {
        self.entries.values_mut()
    }

    /// Cloned, id-ordered snapshot handed to strategies.
    pub fn choices(&self) -> Vec<SchedulableInfo> {
        self.entries.values().cloned().collect()
    }

    pub fn enabled_ids(&self) -> Vec<EntityId> {
        self.entries
            .values()
            .filter(|info| info.enabled)
            .map(|info| info.id)
            .collect()
    }

    pub fn has_enabled(&self) -> bool {
        self.entries.values().any(|info| info.enabled)
    }
}
