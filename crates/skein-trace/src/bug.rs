//! Semantic trace of a run, kept for bug reports.
//!
//! Every step names the acting entity, the state it was in and a
//! payload-free description of what happened. Payloads are never recorded.

use std::path::Path;

use serde::{Deserialize, Serialize};
use skein_core::EntityId;

use crate::TraceError;

/// Value of a nondeterministic choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RandomValue {
    Bool(bool),
    Int(u64),
}

impl std::fmt::Display for RandomValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RandomValue::Bool(b) => write!(f, "{b}"),
            RandomValue::Int(i) => write!(f, "{i}"),
        }
    }
}

/// What a bug trace step records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BugStepKind {
    CreateMachine {
        machine: EntityId,
        machine_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
    CreateMonitor {
        monitor_name: String,
    },
    SendEvent {
        target: EntityId,
        target_name: String,
        event: String,
    },
    DequeueEvent {
        event: String,
    },
    RaiseEvent {
        event: String,
    },
    GotoState {
        to: String,
    },
    PushState {
        to: String,
    },
    PopState {
        to: String,
    },
    WaitToReceive {
        events: Vec<String>,
    },
    ReceiveEvent {
        event: String,
    },
    RandomChoice {
        value: RandomValue,
    },
    Halt,
}

/// One immutable step of the bug trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugTraceStep {
    pub index: usize,
    /// `None` for steps taken outside any entity.
    pub entity: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub kind: BugStepKind,
}

/// Who performed a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Actor {
    pub id: Option<EntityId>,
    pub name: Option<String>,
    pub state: Option<String>,
}

impl Actor {
    pub fn new(id: EntityId, name: impl Into<String>, state: Option<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
            state,
        }
    }

    /// Steps taken from outside the program (e.g. the harness before it
    /// has an identity).
    pub fn environment() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BugTrace {
    steps: Vec<BugTraceStep>,
}

impl BugTrace {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    fn push(&mut self, actor: &Actor, kind: BugStepKind) {
        let index = self.steps.len();
        self.steps.push(BugTraceStep {
            index,
            entity: actor.id,
            entity_name: actor.name.clone(),
            state: actor.state.clone(),
            kind,
        });
    }

    pub fn add_create_machine_step(
        &mut self,
        creator: &Actor,
        machine: EntityId,
        machine_name: &str,
        event: Option<&str>,
    ) {
        self.push(
            creator,
            BugStepKind::CreateMachine {
                machine,
                machine_name: machine_name.to_string(),
                event: event.map(str::to_string),
            },
        );
    }

    pub fn add_create_monitor_step(&mut self, monitor: &Actor) {
        let monitor_name = monitor.name.clone().unwrap_or_default();
        self.push(monitor, BugStepKind::CreateMonitor { monitor_name });
    }

    pub fn add_send_event_step(
        &mut self,
        sender: &Actor,
        target: EntityId,
        target_name: &str,
        event: &str,
    ) {
        self.push(
            sender,
            BugStepKind::SendEvent {
                target,
                target_name: target_name.to_string(),
                event: event.to_string(),
            },
        );
    }

    pub fn add_dequeue_event_step(&mut self, machine: &Actor, event: &str) {
        self.push(
            machine,
            BugStepKind::DequeueEvent {
                event: event.to_string(),
            },
        );
    }

    pub fn add_raise_event_step(&mut self, machine: &Actor, event: &str) {
        self.push(
            machine,
            BugStepKind::RaiseEvent {
                event: event.to_string(),
            },
        );
    }

    pub fn add_goto_state_step(&mut self, machine: &Actor, to: &str) {
        self.push(machine, BugStepKind::GotoState { to: to.to_string() });
    }

    pub fn add_push_state_step(&mut self, machine: &Actor, to: &str) {
        self.push(machine, BugStepKind::PushState { to: to.to_string() });
    }

    pub fn add_pop_state_step(&mut self, machine: &Actor, to: &str) {
        self.push(machine, BugStepKind::PopState { to: to.to_string() });
    }

    pub fn add_wait_to_receive_step(&mut self, machine: &Actor, events: &[String]) {
        self.push(
            machine,
            BugStepKind::WaitToReceive {
                events: events.to_vec(),
            },
        );
    }

    pub fn add_received_event_step(&mut self, machine: &Actor, event: &str) {
        self.push(
            machine,
            BugStepKind::ReceiveEvent {
                event: event.to_string(),
            },
        );
    }

    pub fn add_random_choice_step(&mut self, actor: &Actor, value: RandomValue) {
        self.push(actor, BugStepKind::RandomChoice { value });
    }

    pub fn add_halt_step(&mut self, machine: &Actor) {
        self.push(machine, BugStepKind::Halt);
    }

    pub fn steps(&self) -> &[BugTraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl std::fmt::Display for BugTraceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let who = self.entity_name.as_deref().unwrap_or("Env");
        let location = match &self.state {
            Some(state) => format!("'{who}' in state '{state}'"),
            None => format!("'{who}'"),
        };
        write!(f, "[{}] ", self.index)?;
        match &self.kind {
            BugStepKind::CreateMachine {
                machine_name,
                event,
                ..
            } => match event {
                Some(event) => write!(f, "{location} created '{machine_name}' with event '{event}'."),
                None => write!(f, "{location} created '{machine_name}'."),
            },
            BugStepKind::CreateMonitor { monitor_name } => {
                write!(f, "Monitor '{monitor_name}' was created.")
            }
            BugStepKind::SendEvent {
                target_name, event, ..
            } => write!(f, "{location} sent event '{event}' to '{target_name}'."),
            BugStepKind::DequeueEvent { event } => {
                write!(f, "{location} dequeued event '{event}'.")
            }
            BugStepKind::RaiseEvent { event } => write!(f, "{location} raised event '{event}'."),
            BugStepKind::GotoState { to } => write!(f, "'{who}' entered state '{to}'."),
            BugStepKind::PushState { to } => write!(f, "'{who}' pushed state '{to}'."),
            BugStepKind::PopState { to } => write!(f, "'{who}' popped to state '{to}'."),
            BugStepKind::WaitToReceive { events } => {
                write!(f, "{location} is waiting to receive '{}'.", events.join("', '"))
            }
            BugStepKind::ReceiveEvent { event } => {
                write!(f, "{location} received event '{event}'.")
            }
            BugStepKind::RandomChoice { value } => {
                write!(f, "{location} nondeterministically chose '{value}'.")
            }
            BugStepKind::Halt => write!(f, "'{who}' halted."),
        }
    }
}

impl std::fmt::Display for BugTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for step in &self.steps {
            writeln!(f, "{step}")?;
        }
        Ok(())
    }
}
