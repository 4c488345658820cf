//! The testing runtime.
//!
//! Owns the machines and monitors of one run and gives meaning to every
//! `Context` call: each concurrency-relevant call goes through a
//! scheduling point first, then takes effect. Machine handlers run on
//! their own threads; the scheduler lets exactly one of them (or the
//! harness, or a nested unit) run at a time.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use skein_core::fingerprint::state_hash;
use skein_core::{
    ActionResult, Configuration, EntityId, EntityKind, EntityState, Event, EventInfo,
    ExecutionCanceled, Operation, ProgramStateSource, SchedulableInfo, Temperature,
};
use skein_trace::{Actor, RandomValue, RuntimeEvent, RuntimeObserver};
use tracing::{debug, warn};

use crate::bridge::TaskBridge;
use crate::context::Context;
use crate::machine::{Handling, Machine};
use crate::monitor::{Monitor, MonitorContext, MonitorStep};
use crate::report::{BugKind, EngineError};
use crate::scheduler::{OperationScheduler, RunOutcome, SharedStrategy};

/// Entry point of a test; runs as the harness entity.
pub type TestEntry = Arc<dyn Fn(&Context) -> ActionResult + Send + Sync>;

const HARNESS_NAME: &str = "Harness";

/// Transition requested by an action; applied when the action returns.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Transition {
    Raise(Event),
    Goto(String),
    Push(String),
    Pop,
    Halt,
}

struct MachineSlot {
    name: String,
    /// Checked out by the handler thread while it runs.
    instance: Option<Box<dyn Machine>>,
    states: Vec<String>,
    inbox: VecDeque<EventInfo>,
    handler_running: bool,
    initialized: bool,
    halted: bool,
    /// Event names a blocked receive is waiting for.
    receive_wait: Option<Vec<String>>,
    received: Option<EventInfo>,
    pending: Option<Transition>,
    /// Last `Machine::state_hash`, refreshed after every action.
    user_hash: u64,
}

impl MachineSlot {
    fn new(name: String, instance: Box<dyn Machine>) -> Self {
        let start = instance.start_state().to_string();
        let user_hash = instance.state_hash();
        Self {
            name,
            instance: Some(instance),
            states: vec![start],
            inbox: VecDeque::new(),
            handler_running: false,
            initialized: false,
            halted: false,
            receive_wait: None,
            received: None,
            pending: None,
            user_hash,
        }
    }

    fn state(&self) -> &str {
        self.states.last().map_or("", String::as_str)
    }

    fn structural_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for state in &self.states {
            state.hash(&mut hasher);
        }
        self.user_hash.hash(&mut hasher);
        for info in &self.inbox {
            info.name().hash(&mut hasher);
        }
        self.halted.hash(&mut hasher);
        hasher.finish()
    }
}

struct MonitorSlot {
    id: EntityId,
    name: String,
    instance: Box<dyn Monitor>,
    state: String,
    temperature: Temperature,
    user_hash: u64,
}

impl MonitorSlot {
    fn actor(&self) -> Actor {
        Actor::new(self.id, self.name.clone(), Some(self.state.clone()))
    }
}

enum MonitorInput {
    Enter,
    Event(Event),
}

enum Delivery {
    Dropped,
    MustHandleDropped(String),
    Received,
    Queued,
    StartHandler,
}

pub(crate) struct RuntimeInner {
    scheduler: OperationScheduler,
    bridge: Arc<TaskBridge>,
    machines: Mutex<BTreeMap<EntityId, MachineSlot>>,
    monitors: Mutex<Vec<MonitorSlot>>,
    observers: Mutex<Vec<Box<dyn RuntimeObserver>>>,
    next_id: AtomicU64,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProgramStateSource for RuntimeInner {
    fn entity_states(&self) -> Vec<EntityState> {
        let mut states = vec![EntityState {
            id: EntityId::HARNESS,
            kind: EntityKind::Harness,
            name: HARNESS_NAME.to_string(),
            state: String::new(),
            state_hash: 0,
            pending: None,
            temperature: Temperature::Neutral,
        }];
        for (id, slot) in self.machines.lock().iter() {
            states.push(EntityState {
                id: *id,
                kind: EntityKind::Machine,
                name: slot.name.clone(),
                state: slot.state().to_string(),
                state_hash: slot.structural_hash(),
                pending: None,
                temperature: Temperature::Neutral,
            });
        }
        for slot in self.monitors.lock().iter() {
            states.push(EntityState {
                id: slot.id,
                kind: EntityKind::Monitor,
                name: slot.name.clone(),
                state: slot.state.clone(),
                state_hash: state_hash(&slot.state, slot.user_hash),
                pending: None,
                temperature: slot.temperature,
            });
        }
        states
    }
}

impl RuntimeInner {
    fn source(&self) -> &dyn ProgramStateSource {
        self
    }

    fn emit(&self, event: RuntimeEvent) {
        for observer in self.observers.lock().iter_mut() {
            observer.on_event(&event);
        }
    }

    /// Record an assertion failure and end the run.
    fn fail(&self, message: String) -> ExecutionCanceled {
        self.scheduler
            .notify_assertion_failure(BugKind::AssertionFailure, message, true);
        ExecutionCanceled
    }

    pub(crate) fn name_of(&self, id: EntityId) -> String {
        if id == EntityId::HARNESS {
            return HARNESS_NAME.to_string();
        }
        self.machines
            .lock()
            .get(&id)
            .map_or_else(|| id.to_string(), |slot| slot.name.clone())
    }

    pub(crate) fn state_of(&self, id: EntityId) -> Option<String> {
        self.machines
            .lock()
            .get(&id)
            .map(|slot| slot.state().to_string())
    }

    fn actor(&self, id: EntityId) -> Actor {
        if id == EntityId::HARNESS {
            return Actor::environment();
        }
        self.machines.lock().get(&id).map_or_else(Actor::environment, |slot| {
            Actor::new(id, slot.name.clone(), Some(slot.state().to_string()))
        })
    }

    fn sender_of(id: EntityId) -> Option<EntityId> {
        (id != EntityId::HARNESS).then_some(id)
    }

    fn check_no_transition(&self, id: EntityId, api: &str) -> ActionResult {
        if id == EntityId::HARNESS || !self.scheduler.action_flags(id).0 {
            return Ok(());
        }
        let name = self.name_of(id);
        Err(self.fail(format!(
            "Machine '{name}' cannot call '{api}' after calling raise, goto, push or pop in the same action."
        )))
    }

    pub(crate) fn request_transition(&self, id: EntityId, api: &str, transition: Transition) -> ActionResult {
        if id == EntityId::HARNESS {
            return Err(self.fail(format!("The test harness cannot call '{api}'.")));
        }
        let (called, inside_on_exit) = self.scheduler.action_flags(id);
        let name = self.name_of(id);
        if inside_on_exit {
            return Err(self.fail(format!(
                "Machine '{name}' has called raise, goto, push or pop inside an OnExit method."
            )));
        }
        if called {
            return Err(self.fail(format!(
                "Machine '{name}' has called multiple raise, goto, push or pop in the same action."
            )));
        }
        self.scheduler.mark_transition(id);
        if let Some(slot) = self.machines.lock().get_mut(&id) {
            slot.pending = Some(transition);
        }
        Ok(())
    }

    pub(crate) fn assert(&self, predicate: bool, message: String) -> ActionResult {
        if predicate {
            Ok(())
        } else {
            Err(self.fail(message))
        }
    }

    // creation and delivery

    pub(crate) fn create_machine(
        self: &Arc<Self>,
        caller: EntityId,
        machine: Box<dyn Machine>,
        initial_event: Option<Event>,
    ) -> ActionResult<EntityId> {
        self.check_no_transition(caller, "create_machine")?;
        self.scheduler.schedule(Operation::create(), self.source())?;

        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = format!("{}({})", machine.name(), id.value());
        self.scheduler
            .register(SchedulableInfo::new(id, name.clone(), EntityKind::Machine));
        let step = self.scheduler.scheduling_step();
        let event_name = initial_event.as_ref().map(|event| event.name.clone());
        let creator = self.actor(caller);

        let mut slot = MachineSlot::new(name.clone(), machine);
        slot.handler_running = true;
        let send_step = match initial_event {
            Some(event) => {
                let mut info = EventInfo::new(event, Self::sender_of(caller), step);
                info.sender_state = self.state_of(caller);
                slot.inbox.push_back(info);
                step
            }
            None => 0,
        };
        self.machines.lock().insert(id, slot);
        debug!(machine = %name, creator = %caller, "created machine");
        self.emit(RuntimeEvent::MachineCreated {
            creator,
            machine: id,
            machine_name: name,
            event: event_name,
        });

        self.start_handler(id, send_step)?;
        Ok(id)
    }

    pub(crate) fn wait_for_quiescence(&self, caller: EntityId, target: EntityId) -> ActionResult {
        self.scheduler
            .wait_for_quiescence(caller, target, self.source())
    }

    pub(crate) fn send(
        self: &Arc<Self>,
        sender: EntityId,
        target: EntityId,
        event: Event,
        must_handle: bool,
    ) -> ActionResult {
        self.check_no_transition(sender, "send")?;
        let known = self.machines.lock().contains_key(&target);
        if !known {
            return Err(self.fail(format!(
                "Cannot send event '{}' to machine id '{target}' that was never created.",
                event.name
            )));
        }

        self.scheduler.schedule(Operation::send(target), self.source())?;
        let step = self.scheduler.scheduling_step();
        let target_name = self.name_of(target);
        self.emit(RuntimeEvent::EventSent {
            sender: self.actor(sender),
            target,
            target_name: target_name.clone(),
            event: event.name.clone(),
        });

        let mut info = EventInfo::new(event, Self::sender_of(sender), step);
        info.sender_state = self.state_of(sender);
        info.must_handle = must_handle;

        let delivery = {
            let mut machines = self.machines.lock();
            let Some(slot) = machines.get_mut(&target) else {
                return Ok(());
            };
            if slot.halted {
                if info.must_handle {
                    Delivery::MustHandleDropped(info.name().to_string())
                } else {
                    Delivery::Dropped
                }
            } else if slot
                .receive_wait
                .as_ref()
                .is_some_and(|names| names.iter().any(|name| name == info.name()))
            {
                slot.receive_wait = None;
                slot.received = Some(info);
                Delivery::Received
            } else {
                slot.inbox.push_back(info);
                if slot.handler_running {
                    Delivery::Queued
                } else {
                    slot.handler_running = true;
                    Delivery::StartHandler
                }
            }
        };

        match delivery {
            Delivery::Dropped => {
                debug!(machine = %target_name, "dropped event sent to halted machine");
                Ok(())
            }
            Delivery::MustHandleDropped(event) => Err(self.fail(format!(
                "A must-handle event '{event}' was sent to the halted machine '{target_name}'."
            ))),
            Delivery::Received => {
                self.scheduler.notify_received(target, step);
                Ok(())
            }
            Delivery::Queued => Ok(()),
            Delivery::StartHandler => self.start_handler(target, step),
        }
    }

    fn start_handler(self: &Arc<Self>, id: EntityId, send_step: u64) -> ActionResult {
        let task = self.bridge.new_task_id();
        self.bridge.bind(task, id);
        self.scheduler.notify_handler_created(id, task, send_step);
        let name = self.name_of(id);
        let inner = Arc::clone(self);
        match self.bridge.run(task, &name, move || inner.run_handler(id)) {
            Ok(handle) => self.handles.lock().push(handle),
            Err(err) => {
                self.scheduler.notify_assertion_failure(
                    BugKind::UnhandledException,
                    format!("Failed to start a handler for '{name}': {err}"),
                    true,
                );
                return Err(ExecutionCanceled);
            }
        }
        self.scheduler.wait_for_handler_to_start(id)
    }

    pub(crate) fn receive(&self, id: EntityId, events: &[&str]) -> ActionResult<Event> {
        if id == EntityId::HARNESS {
            return Err(self.fail("The test harness cannot call 'receive'.".to_string()));
        }
        self.check_no_transition(id, "receive")?;

        let queued = self.machines.lock().get(&id).and_then(|slot| {
            slot.inbox
                .iter()
                .position(|info| events.contains(&info.name()))
                .map(|index| (index, slot.inbox[index].send_step))
        });
        let info = match queued {
            Some((index, send_step)) => {
                self.scheduler.schedule_receive(send_step, self.source())?;
                self.machines
                    .lock()
                    .get_mut(&id)
                    .and_then(|slot| slot.inbox.remove(index))
            }
            None => {
                let names: Vec<String> = events.iter().map(|name| name.to_string()).collect();
                if let Some(slot) = self.machines.lock().get_mut(&id) {
                    slot.receive_wait = Some(names.clone());
                }
                self.emit(RuntimeEvent::WaitingToReceive {
                    machine: self.actor(id),
                    events: names,
                });
                self.scheduler.notify_waiting_to_receive(id);
                self.scheduler.schedule(Operation::receive(id), self.source())?;
                self.machines
                    .lock()
                    .get_mut(&id)
                    .and_then(|slot| slot.received.take())
            }
        };
        let info = info.ok_or(ExecutionCanceled)?;
        self.emit(RuntimeEvent::EventReceived {
            machine: self.actor(id),
            event: info.name().to_string(),
        });
        Ok(info.event)
    }

    // nondeterminism

    pub(crate) fn random_bool(&self, id: EntityId, max_value: u64, fair_id: Option<&str>) -> ActionResult<bool> {
        self.check_no_transition(id, "random")?;
        let value = self.scheduler.next_boolean_choice(max_value, fair_id)?;
        self.emit(RuntimeEvent::RandomChoice {
            actor: self.actor(id),
            value: RandomValue::Bool(value),
        });
        Ok(value)
    }

    pub(crate) fn random_int(&self, id: EntityId, max_value: u64) -> ActionResult<u64> {
        self.check_no_transition(id, "random")?;
        let value = self.scheduler.next_integer_choice(max_value)?;
        self.emit(RuntimeEvent::RandomChoice {
            actor: self.actor(id),
            value: RandomValue::Int(value),
        });
        Ok(value)
    }

    // monitors

    pub(crate) fn register_monitor(&self, monitor: Box<dyn Monitor>) -> ActionResult<EntityId> {
        let name = monitor.name().to_string();
        let mut monitors = self.monitors.lock();
        if let Some(existing) = monitors.iter().find(|slot| slot.name == name) {
            return Ok(existing.id);
        }
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.scheduler
            .register(SchedulableInfo::new(id, name.clone(), EntityKind::Monitor));
        let state = monitor.start_state().to_string();
        let mut slot = MonitorSlot {
            id,
            name,
            temperature: monitor.temperature(&state),
            user_hash: monitor.state_hash(),
            instance: monitor,
            state,
        };
        self.emit(RuntimeEvent::MonitorCreated {
            monitor: slot.actor(),
        });
        let result = self.step_monitor(&mut slot, MonitorInput::Enter);
        monitors.push(slot);
        drop(monitors);
        match result {
            Ok(()) => Ok(id),
            Err(message) => {
                self.scheduler
                    .notify_bug(BugKind::AssertionFailure, message, vec![id]);
                Err(ExecutionCanceled)
            }
        }
    }

    pub(crate) fn invoke_monitor(&self, caller: EntityId, name: &str, event: Event) -> ActionResult {
        self.check_no_transition(caller, "monitor")?;
        let result = {
            let mut monitors = self.monitors.lock();
            let Some(slot) = monitors.iter_mut().find(|slot| slot.name == name) else {
                debug!(monitor = name, event = %event.name, "monitor not registered");
                return Ok(());
            };
            self.step_monitor(slot, MonitorInput::Event(event))
                .map_err(|message| (slot.id, message))
        };
        result.map_err(|(id, message)| {
            self.scheduler
                .notify_bug(BugKind::AssertionFailure, message, vec![id]);
            ExecutionCanceled
        })
    }

    fn step_monitor(&self, slot: &mut MonitorSlot, mut input: MonitorInput) -> Result<(), String> {
        loop {
            let mut ctx = MonitorContext::new();
            match &input {
                MonitorInput::Enter => slot.instance.on_entry(&slot.state, &mut ctx),
                MonitorInput::Event(event) => {
                    self.emit(RuntimeEvent::MonitorEvent {
                        monitor: slot.actor(),
                        event: event.name.clone(),
                    });
                    if slot.instance.on_event(&slot.state, event, &mut ctx) == Handling::Unhandled {
                        return Err(format!(
                            "Monitor '{}' received event '{}' that cannot be handled.",
                            slot.name, event.name
                        ));
                    }
                }
            }
            slot.user_hash = slot.instance.state_hash();
            if let Some(failure) = ctx.take_failure() {
                return Err(failure);
            }
            match ctx.take_step() {
                None => break,
                Some(MonitorStep::Goto(state)) => {
                    self.emit(RuntimeEvent::StateExited {
                        entity: slot.actor(),
                        state: slot.state.clone(),
                    });
                    slot.state = state;
                    slot.temperature = slot.instance.temperature(&slot.state);
                    self.emit(RuntimeEvent::StateEntered {
                        entity: slot.actor(),
                        state: slot.state.clone(),
                    });
                    input = MonitorInput::Enter;
                }
                Some(MonitorStep::Raise(event)) => input = MonitorInput::Event(event),
            }
        }
        slot.temperature = slot.instance.temperature(&slot.state);
        Ok(())
    }

    /// Monitors still hot once the program has nothing left to do.
    fn check_hot_monitors(&self) {
        let hot = self
            .monitors
            .lock()
            .iter()
            .find(|slot| slot.temperature == Temperature::Hot)
            .map(|slot| (slot.id, slot.name.clone(), slot.state.clone()));
        if let Some((id, name, state)) = hot {
            self.scheduler.notify_bug(
                BugKind::LivenessViolation,
                format!(
                    "Monitor '{name}' detected liveness bug in hot state '{state}' at the end of program execution."
                ),
                vec![id],
            );
        }
    }

    // nested units

    pub(crate) fn run_nested<F, T>(self: &Arc<Self>, id: EntityId, work: F) -> ActionResult<T>
    where
        F: FnOnce(&Context) -> ActionResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let parent = TaskBridge::current_task();
        let task = self.bridge.new_task_id();
        self.scheduler.update_task(id, task);
        let ctx = Context::new(Arc::clone(self), id);
        let spawned = self.bridge.run(task, "nested", move || work(&ctx));

        let joined = spawned.map(JoinHandle::join);
        self.bridge.unbind(task);
        if let Some(parent) = parent {
            self.bridge.bind(parent, id);
            self.scheduler.update_task(id, parent);
        }
        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(err) => {
                self.scheduler.notify_assertion_failure(
                    BugKind::UnhandledException,
                    format!("Failed to start a nested unit for '{}': {err}", self.name_of(id)),
                    true,
                );
                Err(ExecutionCanceled)
            }
        }
    }

    // handler threads

    fn run_handler(self: &Arc<Self>, id: EntityId) {
        let ctx = Context::new(Arc::clone(self), id);
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handler_loop(&ctx)));
        self.finish_unit(id, result);
    }

    fn run_harness(self: &Arc<Self>, test: TestEntry) {
        let ctx = Context::new(Arc::clone(self), EntityId::HARNESS);
        let result = panic::catch_unwind(AssertUnwindSafe(|| test(&ctx)));
        let completed = matches!(result, Ok(Ok(())));
        self.finish_unit(EntityId::HARNESS, result);
        if completed {
            self.scheduler
                .notify_handler_completed(EntityId::HARNESS, self.source());
        }
    }

    /// Top frame of every unit.
    ///
    /// `ExecutionCanceled` returned by user code while the run is still
    /// live is an early exit requested by the program: the run stops
    /// without a bug and is not marked fully explored, so no end-of-run
    /// monitor check happens.
    fn finish_unit(&self, id: EntityId, result: std::thread::Result<ActionResult>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(ExecutionCanceled)) => {
                debug!(entity = %id, "unit canceled");
                if self.scheduler.is_running() {
                    warn!(entity = %id, "unit gave up while the run was live; stopping");
                    self.scheduler.stop();
                }
            }
            Err(payload) => {
                // panics while a stopped run unwinds are not bugs
                if !self.scheduler.is_running() {
                    debug!(entity = %id, "unit panicked after the run stopped");
                    return;
                }
                let message = panic_message(payload.as_ref());
                let name = self.name_of(id);
                self.scheduler.notify_assertion_failure(
                    BugKind::UnhandledException,
                    format!("Exception '{message}' was thrown in '{name}'."),
                    true,
                );
            }
        }
    }

    fn handler_loop(&self, ctx: &Context) -> ActionResult {
        let id = ctx.id();
        self.scheduler.notify_handler_started(id)?;
        let Some(mut machine) = self
            .machines
            .lock()
            .get_mut(&id)
            .and_then(|slot| slot.instance.take())
        else {
            return Ok(());
        };

        let result = self.drive(ctx, machine.as_mut());
        if let Some(slot) = self.machines.lock().get_mut(&id) {
            slot.instance = Some(machine);
            slot.handler_running = false;
        }
        result?;
        self.scheduler.notify_handler_completed(id, self.source());
        Ok(())
    }

    fn drive(&self, ctx: &Context, machine: &mut dyn Machine) -> ActionResult {
        let id = ctx.id();
        let start = self.machines.lock().get_mut(&id).and_then(|slot| {
            if slot.initialized {
                None
            } else {
                slot.initialized = true;
                Some(slot.state().to_string())
            }
        });
        if let Some(state) = start {
            self.emit(RuntimeEvent::StateEntered {
                entity: self.actor(id),
                state: state.clone(),
            });
            self.enter_state(ctx, machine, &state)?;
        }

        loop {
            if self.is_halted(id) {
                return Ok(());
            }
            match self.next_event(ctx, machine)? {
                Some(event) => self.handle_event(ctx, machine, event)?,
                None => return Ok(()),
            }
        }
    }

    fn is_halted(&self, id: EntityId) -> bool {
        self.machines.lock().get(&id).map_or(true, |slot| slot.halted)
    }

    /// Next event to handle, or `None` when the handler is idle.
    fn next_event(&self, ctx: &Context, machine: &dyn Machine) -> ActionResult<Option<Event>> {
        let id = ctx.id();
        let mut point = !self.scheduler.take_skip_next_receive(id);
        let mut default_checked = false;
        loop {
            let found = self.machines.lock().get(&id).and_then(|slot| {
                let state = slot.state();
                slot.inbox
                    .iter()
                    .position(|info| !machine.defers(state, &info.event))
                    .map(|index| (index, slot.inbox[index].send_step))
            });

            if let Some((index, send_step)) = found {
                if point {
                    self.scheduler.schedule_receive(send_step, self.source())?;
                }
                let info = self
                    .machines
                    .lock()
                    .get_mut(&id)
                    .and_then(|slot| slot.inbox.remove(index))
                    .ok_or(ExecutionCanceled)?;
                self.emit(RuntimeEvent::EventDequeued {
                    machine: self.actor(id),
                    event: info.name().to_string(),
                });
                return Ok(Some(info.event));
            }

            let state = self.state_of(id).unwrap_or_default();
            if !machine.has_default_handler(&state) {
                return Ok(None);
            }
            if !default_checked {
                self.scheduler
                    .schedule(Operation::default_event(id), self.source())?;
                default_checked = true;
                point = true;
                continue;
            }
            self.scheduler.schedule_receive(0, self.source())?;
            return Ok(Some(Event::default_event()));
        }
    }

    fn handle_event(&self, ctx: &Context, machine: &mut dyn Machine, event: Event) -> ActionResult {
        let id = ctx.id();
        loop {
            let state = self.state_of(id).unwrap_or_default();
            self.scheduler.begin_action(id, false);
            let handling = machine.on_event(&state, &event, ctx)?;
            self.refresh_hash(id, machine);
            if handling == Handling::Handled {
                return self.apply_transitions(ctx, machine);
            }

            // an action that did not handle the event cannot transition
            self.take_pending(id);
            if self.stack_depth(id) > 1 {
                self.exit_state(ctx, machine)?;
                let revealed = self.pop_state(id);
                self.emit(RuntimeEvent::StatePopped {
                    machine: self.actor(id),
                    state: revealed,
                });
                continue;
            }
            if event.is_halt() {
                return self.halt(id);
            }
            let name = self.name_of(id);
            return Err(self.fail(format!(
                "Machine '{name}' received event '{}' that cannot be handled.",
                event.name
            )));
        }
    }

    fn apply_transitions(&self, ctx: &Context, machine: &mut dyn Machine) -> ActionResult {
        let id = ctx.id();
        while let Some(transition) = self.take_pending(id) {
            match transition {
                Transition::Raise(event) => {
                    self.emit(RuntimeEvent::EventRaised {
                        machine: self.actor(id),
                        event: event.name.clone(),
                    });
                    return self.handle_event(ctx, machine, event);
                }
                Transition::Goto(target) => {
                    self.exit_state(ctx, machine)?;
                    if let Some(slot) = self.machines.lock().get_mut(&id) {
                        slot.states.pop();
                        slot.states.push(target.clone());
                    }
                    self.emit(RuntimeEvent::StateEntered {
                        entity: self.actor(id),
                        state: target.clone(),
                    });
                    self.enter_state(ctx, machine, &target)?;
                }
                Transition::Push(target) => {
                    if let Some(slot) = self.machines.lock().get_mut(&id) {
                        slot.states.push(target.clone());
                    }
                    self.emit(RuntimeEvent::StatePushed {
                        machine: self.actor(id),
                        state: target.clone(),
                    });
                    self.enter_state(ctx, machine, &target)?;
                }
                Transition::Pop => {
                    if self.stack_depth(id) <= 1 {
                        let name = self.name_of(id);
                        return Err(self.fail(format!("Machine '{name}' popped with no matching push.")));
                    }
                    self.exit_state(ctx, machine)?;
                    let revealed = self.pop_state(id);
                    self.emit(RuntimeEvent::StatePopped {
                        machine: self.actor(id),
                        state: revealed,
                    });
                }
                Transition::Halt => return self.halt(id),
            }
        }
        Ok(())
    }

    fn enter_state(&self, ctx: &Context, machine: &mut dyn Machine, state: &str) -> ActionResult {
        let id = ctx.id();
        self.scheduler.begin_action(id, false);
        machine.on_entry(state, ctx)?;
        self.refresh_hash(id, machine);
        Ok(())
    }

    fn exit_state(&self, ctx: &Context, machine: &mut dyn Machine) -> ActionResult {
        let id = ctx.id();
        let state = self.state_of(id).unwrap_or_default();
        self.scheduler.begin_action(id, true);
        let result = machine.on_exit(&state, ctx);
        self.scheduler.begin_action(id, false);
        result?;
        self.refresh_hash(id, machine);
        self.emit(RuntimeEvent::StateExited {
            entity: self.actor(id),
            state,
        });
        Ok(())
    }

    fn halt(&self, id: EntityId) -> ActionResult {
        let (name, must_handle) = match self.machines.lock().get(&id) {
            Some(slot) => (
                slot.name.clone(),
                slot.inbox
                    .iter()
                    .find(|info| info.must_handle)
                    .map(|info| info.name().to_string()),
            ),
            None => return Ok(()),
        };
        if let Some(event) = must_handle {
            return Err(self.fail(format!(
                "Machine '{name}' halted before dequeueing must-handle event '{event}'."
            )));
        }
        let actor = self.actor(id);
        if let Some(slot) = self.machines.lock().get_mut(&id) {
            slot.halted = true;
            slot.inbox.clear();
            slot.receive_wait = None;
        }
        self.scheduler.set_halted(id);
        debug!(machine = %name, "halted");
        self.emit(RuntimeEvent::Halted { machine: actor });
        Ok(())
    }

    fn take_pending(&self, id: EntityId) -> Option<Transition> {
        self.machines
            .lock()
            .get_mut(&id)
            .and_then(|slot| slot.pending.take())
    }

    fn stack_depth(&self, id: EntityId) -> usize {
        self.machines.lock().get(&id).map_or(0, |slot| slot.states.len())
    }

    /// Pop the top state; returns the state revealed underneath.
    fn pop_state(&self, id: EntityId) -> String {
        let mut machines = self.machines.lock();
        let Some(slot) = machines.get_mut(&id) else {
            return String::new();
        };
        slot.states.pop();
        slot.state().to_string()
    }

    fn refresh_hash(&self, id: EntityId, machine: &dyn Machine) {
        let hash = machine.state_hash();
        if let Some(slot) = self.machines.lock().get_mut(&id) {
            slot.user_hash = hash;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One run of a test under a scheduler.
pub struct TestingRuntime {
    inner: Arc<RuntimeInner>,
}

impl TestingRuntime {
    pub fn new(strategy: SharedStrategy, config: &Configuration, done: Sender<()>) -> Self {
        let bridge = Arc::new(TaskBridge::new());
        let scheduler = OperationScheduler::new(
            strategy,
            Arc::clone(&bridge),
            done,
            config.consider_depth_bound_hit_as_bug,
        );
        Self {
            inner: Arc::new(RuntimeInner {
                scheduler,
                bridge,
                machines: Mutex::new(BTreeMap::new()),
                monitors: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(EntityId::HARNESS.value() + 1),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_observer(&self, observer: impl RuntimeObserver + 'static) {
        self.inner.observers.lock().push(Box::new(observer));
    }

    /// Start the harness thread. The run then proceeds on its own; the
    /// done channel fires once it stops.
    pub fn start(&self, test: TestEntry) -> Result<(), EngineError> {
        let inner = &self.inner;
        let task = inner.bridge.new_task_id();
        inner.scheduler.register(SchedulableInfo::new(
            EntityId::HARNESS,
            HARNESS_NAME,
            EntityKind::Harness,
        ));
        inner.bridge.bind(task, EntityId::HARNESS);
        inner.scheduler.update_task(EntityId::HARNESS, task);

        let runner = Arc::clone(inner);
        let handle = inner
            .bridge
            .run(task, "harness", move || runner.run_harness(test))?;
        inner.handles.lock().push(handle);
        Ok(())
    }

    /// Wait for every thread of the run and collect the outcome.
    pub fn finish(&self) -> RunOutcome {
        loop {
            let handles = std::mem::take(&mut *self.inner.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!("runtime thread panicked outside of user code");
                }
            }
        }

        let outcome = self.inner.scheduler.outcome();
        if outcome.fully_explored && outcome.bug.is_none() {
            self.inner.check_hot_monitors();
            return self.inner.scheduler.outcome();
        }
        outcome
    }
}
