//! Runtime observer interface.
//!
//! The testing runtime reports every semantic event through one tagged
//! enum. Recorders (the bug trace, logging, coverage collectors) plug in as
//! observers; none of them is known to the scheduler.

use std::sync::Arc;

use parking_lot::Mutex;
use skein_core::EntityId;
use tracing::debug;

use crate::bug::{Actor, BugTrace, RandomValue};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    MachineCreated {
        creator: Actor,
        machine: EntityId,
        machine_name: String,
        event: Option<String>,
    },
    MonitorCreated {
        monitor: Actor,
    },
    EventSent {
        sender: Actor,
        target: EntityId,
        target_name: String,
        event: String,
    },
    EventDequeued {
        machine: Actor,
        event: String,
    },
    EventRaised {
        machine: Actor,
        event: String,
    },
    StateEntered {
        entity: Actor,
        state: String,
    },
    StateExited {
        entity: Actor,
        state: String,
    },
    StatePushed {
        machine: Actor,
        state: String,
    },
    StatePopped {
        machine: Actor,
        state: String,
    },
    WaitingToReceive {
        machine: Actor,
        events: Vec<String>,
    },
    EventReceived {
        machine: Actor,
        event: String,
    },
    RandomChoice {
        actor: Actor,
        value: RandomValue,
    },
    Halted {
        machine: Actor,
    },
    MonitorEvent {
        monitor: Actor,
        event: String,
    },
}

pub trait RuntimeObserver: Send {
    fn on_event(&mut self, event: &RuntimeEvent);
}

impl RuntimeObserver for BugTrace {
    fn on_event(&mut self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::MachineCreated {
                creator,
                machine,
                machine_name,
                event,
            } => self.add_create_machine_step(creator, *machine, machine_name, event.as_deref()),
            RuntimeEvent::MonitorCreated { monitor } => self.add_create_monitor_step(monitor),
            RuntimeEvent::EventSent {
                sender,
                target,
                target_name,
                event,
            } => self.add_send_event_step(sender, *target, target_name, event),
            RuntimeEvent::EventDequeued { machine, event } => {
                self.add_dequeue_event_step(machine, event)
            }
            RuntimeEvent::EventRaised { machine, event } => {
                self.add_raise_event_step(machine, event)
            }
            RuntimeEvent::StateEntered { entity, state } => self.add_goto_state_step(entity, state),
            RuntimeEvent::StatePushed { machine, state } => self.add_push_state_step(machine, state),
            RuntimeEvent::StatePopped { machine, state } => self.add_pop_state_step(machine, state),
            RuntimeEvent::WaitingToReceive { machine, events } => {
                self.add_wait_to_receive_step(machine, events)
            }
            RuntimeEvent::EventReceived { machine, event } => {
                self.add_received_event_step(machine, event)
            }
            RuntimeEvent::RandomChoice { actor, value } => {
                self.add_random_choice_step(actor, *value)
            }
            RuntimeEvent::Halted { machine } => self.add_halt_step(machine),
            RuntimeEvent::StateExited { .. } | RuntimeEvent::MonitorEvent { .. } => {}
        }
    }
}

/// Bug trace shared between the runtime and whoever reads it after the
/// run.
#[derive(Debug, Clone, Default)]
pub struct BugTraceRecorder {
    trace: Arc<Mutex<BugTrace>>,
}

impl BugTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the trace recorded so far.
    pub fn snapshot(&self) -> BugTrace {
        self.trace.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.trace.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.lock().is_empty()
    }
}

impl RuntimeObserver for BugTraceRecorder {
    fn on_event(&mut self, event: &RuntimeEvent) {
        self.trace.lock().on_event(event);
    }
}

/// Renders runtime events as `debug` log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

fn who(actor: &Actor) -> &str {
    actor.name.as_deref().unwrap_or("Env")
}

impl RuntimeObserver for LogObserver {
    fn on_event(&mut self, event: &RuntimeEvent) {
        match event {
            RuntimeEvent::MachineCreated {
                creator,
                machine_name,
                ..
            } => debug!(creator = who(creator), machine = %machine_name, "create machine"),
            RuntimeEvent::MonitorCreated { monitor } => {
                debug!(monitor = who(monitor), "create monitor")
            }
            RuntimeEvent::EventSent {
                sender,
                target_name,
                event,
                ..
            } => debug!(sender = who(sender), target = %target_name, event = %event, "send"),
            RuntimeEvent::EventDequeued { machine, event } => {
                debug!(machine = who(machine), event = %event, "dequeue")
            }
            RuntimeEvent::EventRaised { machine, event } => {
                debug!(machine = who(machine), event = %event, "raise")
            }
            RuntimeEvent::StateEntered { entity, state } => {
                debug!(entity = who(entity), state = %state, "enter state")
            }
            RuntimeEvent::StateExited { entity, state } => {
                debug!(entity = who(entity), state = %state, "exit state")
            }
            RuntimeEvent::StatePushed { machine, state } => {
                debug!(machine = who(machine), state = %state, "push state")
            }
            RuntimeEvent::StatePopped { machine, state } => {
                debug!(machine = who(machine), state = %state, "pop state")
            }
            RuntimeEvent::WaitingToReceive { machine, events } => {
                debug!(machine = who(machine), events = ?events, "wait to receive")
            }
            RuntimeEvent::EventReceived { machine, event } => {
                debug!(machine = who(machine), event = %event, "receive")
            }
            RuntimeEvent::RandomChoice { actor, value } => {
                debug!(actor = who(actor), value = %value, "random choice")
            }
            RuntimeEvent::Halted { machine } => debug!(machine = who(machine), "halt"),
            RuntimeEvent::MonitorEvent { monitor, event } => {
                debug!(monitor = who(monitor), event = %event, "monitor event")
            }
        }
    }
}
