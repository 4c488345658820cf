use serde::{Deserialize, Serialize};

/// Identity of a schedulable entity (harness, machine or monitor).
///
/// Ids are dense and handed out in creation order, so the id of the next
/// entity equals the number of entities created so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Target of a Create operation, whose id does not exist yet.
    pub const UNBOUND: EntityId = EntityId(u64::MAX);

    /// The test harness is always the first entity.
    pub const HARNESS: EntityId = EntityId(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_unbound(self) -> bool {
        self == Self::UNBOUND
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unbound() {
            write!(f, "unbound")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// One unit of execution: a handler activation or a nested unit spawned
/// from inside an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
