//! Operation vocabulary shared by the scheduler and the strategies.

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;

/// Kind of a schedulable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Spawning a new entity.
    Create,
    /// Enqueueing an event into an inbox.
    Send,
    /// Dequeueing from an inbox, or being unblocked by a send.
    Receive,
    /// Terminal operation of a halted entity.
    Stop,
    /// Checking whether a default handler should fire.
    DefaultEvent,
}

impl OperationType {
    /// Stable numeric code, used as a fingerprint component.
    pub fn code(self) -> u64 {
        match self {
            OperationType::Create => 0,
            OperationType::Send => 1,
            OperationType::Receive => 2,
            OperationType::Stop => 3,
            OperationType::DefaultEvent => 4,
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationType::Create => "Create",
            OperationType::Send => "Send",
            OperationType::Receive => "Receive",
            OperationType::Stop => "Stop",
            OperationType::DefaultEvent => "DefaultEvent",
        };
        f.write_str(name)
    }
}

/// What an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTargetType {
    Schedulable,
    Inbox,
}

/// One schedulable event: `(type, target type, target id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationType,
    pub target_type: OperationTargetType,
    pub target: EntityId,
}

impl Operation {
    pub fn new(kind: OperationType, target_type: OperationTargetType, target: EntityId) -> Self {
        Self {
            kind,
            target_type,
            target,
        }
    }

    /// Create is scheduled against the unbound sentinel.
    pub fn create() -> Self {
        Self::new(
            OperationType::Create,
            OperationTargetType::Schedulable,
            EntityId::UNBOUND,
        )
    }

    pub fn send(target: EntityId) -> Self {
        Self::new(OperationType::Send, OperationTargetType::Inbox, target)
    }

    pub fn receive(inbox: EntityId) -> Self {
        Self::new(OperationType::Receive, OperationTargetType::Inbox, inbox)
    }

    pub fn stop(entity: EntityId) -> Self {
        Self::new(OperationType::Stop, OperationTargetType::Schedulable, entity)
    }

    pub fn default_event(inbox: EntityId) -> Self {
        Self::new(OperationType::DefaultEvent, OperationTargetType::Inbox, inbox)
    }

    /// Waiting for another entity to become quiescent.
    pub fn join(target: EntityId) -> Self {
        Self::new(OperationType::Receive, OperationTargetType::Schedulable, target)
    }

    /// Whether the operation writes into an inbox.
    pub fn writes_inbox(&self) -> bool {
        matches!(self.kind, OperationType::Send | OperationType::DefaultEvent)
            && self.target_type == OperationTargetType::Inbox
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match self.target_type {
            OperationTargetType::Schedulable => "schedulable",
            OperationTargetType::Inbox => "inbox",
        };
        write!(f, "{}({} {})", self.kind, target, self.target)
    }
}
