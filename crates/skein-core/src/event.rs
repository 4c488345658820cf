use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

const HALT_EVENT: &str = "halt";
const DEFAULT_EVENT: &str = "default";

/// An asynchronous message exchanged between machines.
///
/// Events are identified by name; the payload is opaque to the engine and
/// never recorded in traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Built-in event that halts the receiving machine.
    pub fn halt() -> Self {
        Self::new(HALT_EVENT)
    }

    /// Built-in event delivered when a default handler fires.
    pub fn default_event() -> Self {
        Self::new(DEFAULT_EVENT)
    }

    pub fn is_halt(&self) -> bool {
        self.name == HALT_EVENT
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_EVENT
    }
}

/// An event in flight, with the metadata the scheduler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct EventInfo {
    pub event: Event,
    /// `None` when sent from outside any machine (the harness).
    pub sender: Option<EntityId>,
    pub sender_state: Option<String>,
    /// Scheduler step at which the send was scheduled.
    pub send_step: u64,
    pub must_handle: bool,
}

impl EventInfo {
    pub fn new(event: Event, sender: Option<EntityId>, send_step: u64) -> Self {
        Self {
            event,
            sender,
            sender_state: None,
            send_step,
            must_handle: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.event.name
    }
}
