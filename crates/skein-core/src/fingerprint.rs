//! Program-state fingerprints.
//!
//! A fingerprint summarizes the global state at one scheduling point:
//! every entity's structural state plus the kind of its pending operation.
//! Entities are always folded in ascending id order, so the value does not
//! depend on the order in which the state source reports them.
//!
//! Two different states may collide on the same fingerprint; callers treat
//! equal fingerprints as equal states.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::operation::OperationType;
use crate::schedulable::EntityKind;

const SEED: u64 = 19;
const FACTOR: u64 = 31;

/// Opaque, comparable summary of one program state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Liveness temperature of a monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Hot,
    Cold,
    Neutral,
}

/// Structural state of one entity at a scheduling point.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Display name of the entity.
    pub name: String,
    /// Name of the current state (top of the state stack for machines).
    pub state: String,
    /// Hash of the current state name and any user-provided state.
    pub state_hash: u64,
    /// Pending operation kind; `None` for monitors.
    pub pending: Option<OperationType>,
    /// Only meaningful for monitors.
    pub temperature: Temperature,
}

impl EntityState {
    pub fn is_hot(&self) -> bool {
        self.kind == EntityKind::Monitor && self.temperature == Temperature::Hot
    }
}

/// Everything the liveness strategies need to know about one program state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramSnapshot {
    entities: Vec<EntityState>,
}

impl ProgramSnapshot {
    /// Entities may be supplied in any order.
    pub fn new(mut entities: Vec<EntityState>) -> Self {
        entities.sort_by_key(|e| e.id);
        Self { entities }
    }

    pub fn entities(&self) -> &[EntityState] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [EntityState] {
        &mut self.entities
    }

    pub fn fingerprint(&self) -> Fingerprint {
        let mut hash = SEED;
        for entity in &self.entities {
            hash = hash.wrapping_mul(FACTOR).wrapping_add(entity.state_hash);
            if let Some(op) = entity.pending {
                hash = hash.wrapping_mul(FACTOR).wrapping_add(op.code());
            }
        }
        Fingerprint(hash)
    }

    /// Monitors currently in a hot state.
    pub fn hot_monitors(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.iter().filter(|e| e.is_hot())
    }
}

/// Collaborator that reports the structural state of every live entity.
pub trait ProgramStateSource {
    /// Pending operations are filled in by the scheduler.
    fn entity_states(&self) -> Vec<EntityState>;
}

/// Hash of a state name combined with a user-provided state hash.
pub fn state_hash(state: &str, user_hash: u64) -> u64 {
    let mut hasher = FxHasher::default();
    state.hash(&mut hasher);
    user_hash.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(id: u64, state: &str, pending: OperationType) -> EntityState {
        EntityState {
            id: EntityId(id),
            kind: EntityKind::Machine,
            name: format!("M({id})"),
            state: state.to_string(),
            state_hash: state_hash(state, 0),
            pending: Some(pending),
            temperature: Temperature::Neutral,
        }
    }

    #[test]
    fn test_fingerprint_ignores_supply_order() {
        let a = machine(1, "Init", OperationType::Send);
        let b = machine(2, "Wait", OperationType::Receive);
        let c = machine(3, "Done", OperationType::Create);

        let forward = ProgramSnapshot::new(vec![a.clone(), b.clone(), c.clone()]);
        let shuffled = ProgramSnapshot::new(vec![c, a, b]);
        assert_eq!(forward.fingerprint(), shuffled.fingerprint());
    }

    #[test]
    fn test_fingerprint_sees_pending_operation() {
        let send = ProgramSnapshot::new(vec![machine(1, "Init", OperationType::Send)]);
        let recv = ProgramSnapshot::new(vec![machine(1, "Init", OperationType::Receive)]);
        assert_ne!(send.fingerprint(), recv.fingerprint());
    }

    #[test]
    fn test_fingerprint_sees_state() {
        let init = ProgramSnapshot::new(vec![machine(1, "Init", OperationType::Send)]);
        let done = ProgramSnapshot::new(vec![machine(1, "Done", OperationType::Send)]);
        assert_ne!(init.fingerprint(), done.fingerprint());
    }

    #[test]
    fn test_hot_monitors() {
        let monitor = EntityState {
            id: EntityId(4),
            kind: EntityKind::Monitor,
            name: "Liveness(4)".to_string(),
            state: "Waiting".to_string(),
            state_hash: state_hash("Waiting", 0),
            pending: None,
            temperature: Temperature::Hot,
        };
        let snapshot = ProgramSnapshot::new(vec![machine(1, "Init", OperationType::Send), monitor]);
        let hot: Vec<EntityId> = snapshot.hot_monitors().map(|m| m.id).collect();
        assert_eq!(hot, vec![EntityId(4)]);
    }
}
