//! The operation scheduler.
//!
//! Entity code runs on real threads, but only one of them (the active
//! entity) is ever allowed to run. Every concurrency-relevant operation
//! calls into the scheduler first; the strategy picks who goes next and the
//! caller parks on the condvar until it is picked again. Stopping a run
//! activates and disables everybody, so every parked thread wakes up and
//! unwinds with `ExecutionCanceled`.

use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::{Condvar, Mutex, MutexGuard};
use skein_core::{
    ActionResult, EntityId, EntityKind, EntityState, ExecutionCanceled, Operation, ProgramSnapshot,
    ProgramStateSource, SchedulableInfo, SchedulableRegistry, TaskId,
};
use skein_explore::{LivenessViolation, SchedulingStrategy};
use skein_trace::ScheduleTrace;
use tracing::{debug, info};

use crate::bridge::TaskBridge;
use crate::report::BugKind;

/// The strategy outlives every run; each run's scheduler borrows it.
pub type SharedStrategy = Arc<Mutex<Box<dyn SchedulingStrategy>>>;

/// First bug found in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundBug {
    pub kind: BugKind,
    pub message: String,
    pub strategy: String,
    pub entities: Vec<EntityId>,
    pub witness: Option<ScheduleTrace>,
}

/// What the engine learns from a finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub bug: Option<FoundBug>,
    pub schedule: ScheduleTrace,
    /// The program ran until no entity was enabled and nobody was blocked.
    pub fully_explored: bool,
    pub hit_step_bound: bool,
    pub scheduled_steps: u64,
}

struct SchedulerState {
    registry: SchedulableRegistry,
    current: EntityId,
    running: bool,
    trace: ScheduleTrace,
    /// Scheduling choices taken so far; the 1-based index of the last one.
    scheduling_steps: u64,
    bug: Option<FoundBug>,
    fully_explored: bool,
    hit_step_bound: bool,
}

pub struct OperationScheduler {
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
    strategy: SharedStrategy,
    bridge: Arc<TaskBridge>,
    done: Sender<()>,
    consider_depth_bound_hit_as_bug: bool,
}

impl OperationScheduler {
    pub fn new(
        strategy: SharedStrategy,
        bridge: Arc<TaskBridge>,
        done: Sender<()>,
        consider_depth_bound_hit_as_bug: bool,
    ) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                registry: SchedulableRegistry::new(),
                current: EntityId::HARNESS,
                running: true,
                trace: ScheduleTrace::new(),
                scheduling_steps: 0,
                bug: None,
                fully_explored: false,
                hit_step_bound: false,
            }),
            wakeup: Condvar::new(),
            strategy,
            bridge,
            done,
            consider_depth_bound_hit_as_bug,
        }
    }

    /// Scheduling point for `op`, called by the active entity before the
    /// operation takes effect. Returns once the caller is picked again.
    pub fn schedule(&self, op: Operation, source: &dyn ProgramStateSource) -> ActionResult {
        let observed = if self.strategy.lock().observes_program_state() {
            Some(source.entity_states())
        } else {
            None
        };

        let mut state = self.state.lock();
        if !state.running {
            return Err(ExecutionCanceled);
        }
        let current = state.current;
        self.check_controlled_task(&mut state)?;

        if let Some(info) = state.registry.get_mut(current) {
            info.next_operation = op;
        }

        if let Some(entities) = observed {
            let snapshot = snapshot_with_pending(entities, &state.registry);
            let violation = self.strategy.lock().observe_program_state(&snapshot);
            if let Some(violation) = violation {
                self.report_liveness(&mut state, violation);
                self.stop_locked(&mut state);
                return Err(ExecutionCanceled);
            }
        }

        self.check_step_bound(&mut state)?;

        let choices = state.registry.choices();
        let next = self.strategy.lock().next(&choices, current);
        let Some(next) = next else {
            self.on_no_choice(&mut state);
            return Err(ExecutionCanceled);
        };

        let next_op = state
            .registry
            .get(next)
            .map(|info| info.next_operation)
            .unwrap_or(op);
        state.trace.add_scheduling_choice(next, next_op);
        state.scheduling_steps += 1;
        debug!(step = state.scheduling_steps, from = %current, to = %next, op = %next_op, "scheduled");

        if next == current {
            return Ok(());
        }
        state.current = next;
        if let Some(info) = state.registry.get_mut(current) {
            info.active = false;
        }
        if let Some(info) = state.registry.get_mut(next) {
            info.active = true;
        }
        self.wakeup.notify_all();

        if state.registry.get(current).is_some_and(|info| info.completed) {
            return Ok(());
        }
        self.wait_until_active(&mut state, current)
    }

    /// Receive point for an event sent at `send_step` (0 if none).
    pub fn schedule_receive(&self, send_step: u64, source: &dyn ProgramStateSource) -> ActionResult {
        let current = {
            let mut state = self.state.lock();
            let current = state.current;
            if let Some(info) = state.registry.get_mut(current) {
                info.next_matching_send_index = send_step;
            }
            current
        };
        self.schedule(Operation::receive(current), source)
    }

    /// Add an entity. The first one registered starts out active.
    pub fn register(&self, info: SchedulableInfo) {
        let mut state = self.state.lock();
        let first = state.registry.is_empty();
        let id = info.id;
        if state.registry.register(info) && first {
            state.current = id;
            if let Some(info) = state.registry.get_mut(id) {
                info.active = true;
            }
        }
    }

    pub fn notify_handler_created(&self, id: EntityId, task: TaskId, send_step: u64) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.on_handler_created(task, send_step);
        }
        debug!(entity = %id, %task, "handler created");
    }

    /// Called first thing on the handler's thread; blocks until the
    /// strategy picks the handler.
    pub fn notify_handler_started(&self, id: EntityId) -> ActionResult {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.has_started = true;
        }
        self.wakeup.notify_all();
        self.wait_until_active(&mut state, id)
    }

    /// Creator side of the start handshake.
    pub fn wait_for_handler_to_start(&self, id: EntityId) -> ActionResult {
        let mut state = self.state.lock();
        loop {
            if !state.running {
                return Err(ExecutionCanceled);
            }
            if state.registry.get(id).map_or(true, |info| info.has_started) {
                return Ok(());
            }
            self.wakeup.wait(&mut state);
        }
    }

    /// The handler of `id` ran out of work. Hands control to the next
    /// entity without waiting to be picked again.
    pub fn notify_handler_completed(&self, id: EntityId, source: &dyn ProgramStateSource) {
        let op = {
            let mut state = self.state.lock();
            if let Some(info) = state.registry.get_mut(id) {
                info.on_handler_completed();
            }
            release_quiescence_waiters(&mut state.registry, id);
            debug!(entity = %id, "handler completed");
            state
                .registry
                .get(id)
                .filter(|info| info.halted)
                .map_or(Operation::receive(id), |_| Operation::stop(id))
        };
        // the run may end right here, which is not an error for the caller
        let _ = self.schedule(op, source);
    }

    /// The first dequeue after a handler starts is not a scheduling point.
    pub fn take_skip_next_receive(&self, id: EntityId) -> bool {
        let mut state = self.state.lock();
        state
            .registry
            .get_mut(id)
            .map_or(false, |info| std::mem::take(&mut info.skip_next_receive))
    }

    pub fn notify_waiting_to_receive(&self, id: EntityId) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.waiting_to_receive = true;
            info.enabled = false;
        }
        release_quiescence_waiters(&mut state.registry, id);
    }

    /// An event matching a blocked receive arrived at `send_step`.
    pub fn notify_received(&self, id: EntityId, send_step: u64) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.waiting_to_receive = false;
            info.enabled = true;
            info.next_operation = Operation::receive(id);
            info.next_matching_send_index = send_step;
        }
    }

    /// Block `caller` until `target` has nothing left to do.
    pub fn wait_for_quiescence(
        &self,
        caller: EntityId,
        target: EntityId,
        source: &dyn ProgramStateSource,
    ) -> ActionResult {
        {
            let mut state = self.state.lock();
            let quiescent = state.registry.get(target).map_or(true, |info| {
                info.completed || info.halted || info.waiting_to_receive
            });
            if quiescent {
                return Ok(());
            }
            if let Some(info) = state.registry.get_mut(caller) {
                info.waiting_for_quiescence = Some(target);
                info.enabled = false;
            }
        }
        self.schedule(Operation::join(target), source)
    }

    pub fn set_halted(&self, id: EntityId) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.halted = true;
            info.next_operation = Operation::stop(id);
        }
        release_quiescence_waiters(&mut state.registry, id);
    }

    /// The entity now runs on `task` (nested units).
    pub fn update_task(&self, id: EntityId, task: TaskId) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.task = Some(task);
        }
    }

    /// Start of a user action; `inside_on_exit` marks exit handlers.
    pub fn begin_action(&self, id: EntityId, inside_on_exit: bool) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.action_called_transition = false;
            info.inside_on_exit = inside_on_exit;
        }
    }

    /// `(called a transition, inside on_exit)` for the current action.
    pub fn action_flags(&self, id: EntityId) -> (bool, bool) {
        let state = self.state.lock();
        state
            .registry
            .get(id)
            .map_or((false, false), |info| (info.action_called_transition, info.inside_on_exit))
    }

    pub fn mark_transition(&self, id: EntityId) {
        let mut state = self.state.lock();
        if let Some(info) = state.registry.get_mut(id) {
            info.action_called_transition = true;
        }
    }

    pub fn next_boolean_choice(&self, max_value: u64, fair_id: Option<&str>) -> ActionResult<bool> {
        let mut state = self.begin_choice()?;
        let choice = self.strategy.lock().next_boolean_choice(max_value);
        let Some(value) = choice else {
            self.on_choices_exhausted(&mut state);
            return Err(ExecutionCanceled);
        };
        match fair_id {
            Some(id) => state.trace.add_fair_boolean_choice(id, value),
            None => state.trace.add_boolean_choice(value),
        }
        Ok(value)
    }

    pub fn next_integer_choice(&self, max_value: u64) -> ActionResult<u64> {
        let mut state = self.begin_choice()?;
        let choice = self.strategy.lock().next_integer_choice(max_value);
        let Some(value) = choice else {
            self.on_choices_exhausted(&mut state);
            return Err(ExecutionCanceled);
        };
        state.trace.add_integer_choice(value);
        Ok(value)
    }

    /// Record a bug (only the first one of a run is kept) and, if `kill`,
    /// end the run.
    pub fn notify_assertion_failure(&self, kind: BugKind, message: impl Into<String>, kill: bool) {
        let mut state = self.state.lock();
        let current = state.current;
        self.record_bug(&mut state, kind, message.into(), vec![current], None);
        if kill {
            self.stop_locked(&mut state);
        }
    }

    /// Same as `notify_assertion_failure`, naming the entities involved.
    pub fn notify_bug(&self, kind: BugKind, message: impl Into<String>, entities: Vec<EntityId>) {
        let mut state = self.state.lock();
        self.record_bug(&mut state, kind, message.into(), entities, None);
        self.stop_locked(&mut state);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.stop_locked(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn active_entity(&self) -> EntityId {
        self.state.lock().current
    }

    /// 1-based index of the scheduling choice that let the caller run.
    pub fn scheduling_step(&self) -> u64 {
        self.state.lock().scheduling_steps
    }

    pub fn has_bug(&self) -> bool {
        self.state.lock().bug.is_some()
    }

    pub fn entity(&self, id: EntityId) -> Option<SchedulableInfo> {
        self.state.lock().registry.get(id).cloned()
    }

    pub fn outcome(&self) -> RunOutcome {
        let state = self.state.lock();
        RunOutcome {
            bug: state.bug.clone(),
            schedule: state.trace.clone(),
            fully_explored: state.fully_explored,
            hit_step_bound: state.hit_step_bound,
            scheduled_steps: self.strategy.lock().scheduled_steps(),
        }
    }

    fn wait_until_active(&self, state: &mut MutexGuard<'_, SchedulerState>, id: EntityId) -> ActionResult {
        loop {
            if !state.running {
                return Err(ExecutionCanceled);
            }
            if state.registry.get(id).is_some_and(|info| info.active) {
                return Ok(());
            }
            self.wakeup.wait(state);
        }
    }

    fn begin_choice(&self) -> ActionResult<MutexGuard<'_, SchedulerState>> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(ExecutionCanceled);
        }
        self.check_controlled_task(&mut state)?;
        self.check_step_bound(&mut state)?;
        let current = state.current;
        if let Some(info) = state.registry.get_mut(current) {
            info.program_counter += 1;
        }
        Ok(state)
    }

    fn check_controlled_task(&self, state: &mut SchedulerState) -> ActionResult {
        let task = TaskBridge::current_task();
        let expected = state.registry.get(state.current).and_then(|info| info.task);
        let bound = task.and_then(|t| self.bridge.entity_of(t));
        if task.is_some() && task == expected && bound == Some(state.current) {
            return Ok(());
        }
        let name = task.map_or_else(
            || {
                let thread = std::thread::current();
                thread
                    .name()
                    .map_or_else(|| format!("{:?}", thread.id()), str::to_string)
            },
            |t| t.to_string(),
        );
        let current = state.current;
        self.record_bug(
            state,
            BugKind::AssertionFailure,
            format!("Detected task '{name}' that is not controlled by the runtime."),
            vec![current],
            None,
        );
        self.stop_locked(state);
        Err(ExecutionCanceled)
    }

    /// Stops the run once the strategy is out of steps. A point where
    /// nothing is enabled is left to `on_no_choice`, so a deadlock or a
    /// finished program at the bound is still reported as such.
    fn check_step_bound(&self, state: &mut SchedulerState) -> ActionResult {
        if !state.registry.has_enabled() {
            return Ok(());
        }
        let (reached, steps) = {
            let strategy = self.strategy.lock();
            (strategy.has_reached_max_scheduling_steps(), strategy.scheduled_steps())
        };
        if !reached {
            return Ok(());
        }
        debug!(steps, "scheduling step bound reached");
        state.hit_step_bound = true;
        if self.consider_depth_bound_hit_as_bug {
            let current = state.current;
            self.record_bug(
                state,
                BugKind::StepBoundReached,
                format!("Scheduling steps bound of {steps} reached."),
                vec![current],
                None,
            );
        }
        self.stop_locked(state);
        Err(ExecutionCanceled)
    }

    fn on_no_choice(&self, state: &mut SchedulerState) {
        if !state.registry.has_enabled() {
            let blocked: Vec<&SchedulableInfo> = state
                .registry
                .iter()
                .filter(|info| info.is_blocked() && !info.halted)
                .collect();
            if blocked.is_empty() {
                state.fully_explored = true;
            } else {
                let ids = blocked.iter().map(|info| info.id).collect();
                let message = deadlock_message(&blocked);
                self.record_bug(state, BugKind::Deadlock, message, ids, None);
            }
        } else {
            self.on_choices_exhausted(state);
            return;
        }
        self.stop_locked(state);
    }

    fn on_choices_exhausted(&self, state: &mut SchedulerState) {
        let replay_error = self.strategy.lock().replay_error();
        if let Some(message) = replay_error {
            let current = state.current;
            self.record_bug(state, BugKind::ReplayDivergence, message, vec![current], None);
        } else {
            debug!("strategy has no choice left for this run");
        }
        self.stop_locked(state);
    }

    fn report_liveness(&self, state: &mut SchedulerState, violation: LivenessViolation) {
        self.record_bug(
            state,
            BugKind::LivenessViolation,
            violation.message,
            vec![violation.monitor],
            violation.witness,
        );
    }

    fn record_bug(
        &self,
        state: &mut SchedulerState,
        kind: BugKind,
        message: String,
        entities: Vec<EntityId>,
        witness: Option<ScheduleTrace>,
    ) {
        if state.bug.is_some() {
            return;
        }
        let strategy = self.strategy.lock().description();
        info!(%kind, %message, %strategy, "found bug");
        state.bug = Some(FoundBug {
            kind,
            message,
            strategy,
            entities,
            witness,
        });
    }

    fn stop_locked(&self, state: &mut SchedulerState) {
        if state.running {
            debug!(steps = state.scheduling_steps, "stopping run");
        }
        state.running = false;
        for info in state.registry.iter_mut() {
            info.enabled = false;
            info.active = true;
        }
        self.wakeup.notify_all();
        let _ = self.done.try_send(());
    }
}

fn release_quiescence_waiters(registry: &mut SchedulableRegistry, target: EntityId) {
    for info in registry.iter_mut() {
        if info.waiting_for_quiescence == Some(target) {
            info.waiting_for_quiescence = None;
            info.enabled = true;
        }
    }
}

fn snapshot_with_pending(mut entities: Vec<EntityState>, registry: &SchedulableRegistry) -> ProgramSnapshot {
    for entity in entities.iter_mut() {
        entity.pending = match registry.get(entity.id) {
            Some(info) if info.kind != EntityKind::Monitor => Some(info.next_operation.kind),
            _ => None,
        };
    }
    ProgramSnapshot::new(entities)
}

fn deadlock_message(blocked: &[&SchedulableInfo]) -> String {
    let names: Vec<String> = blocked.iter().map(|info| format!("'{}'", info.name)).collect();
    let subject = match names.as_slice() {
        [one] => format!("{one} is"),
        [init @ .., last] => format!("{} and {} are", init.join(", "), last),
        [] => "nobody is".to_string(),
    };
    format!(
        "Deadlock detected. {subject} waiting to receive an event, but no other schedulable choices are enabled."
    )
}
