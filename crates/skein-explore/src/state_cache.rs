use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use skein_core::{EntityId, Fingerprint, ProgramSnapshot};

/// One observation of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedState {
    /// Scheduling step at which the state was observed.
    pub step: u64,
    /// Monitors that were hot at that step.
    pub hot_monitors: BTreeSet<EntityId>,
}

/// Fingerprints of the states visited in one run.
#[derive(Debug, Default)]
pub struct StateCache {
    states: FxHashMap<Fingerprint, Vec<CachedState>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the state at `step` and return its fingerprint.
    pub fn capture(&mut self, step: u64, snapshot: &ProgramSnapshot) -> Fingerprint {
        let fingerprint = snapshot.fingerprint();
        let hot_monitors = snapshot.hot_monitors().map(|m| m.id).collect();
        self.states
            .entry(fingerprint)
            .or_default()
            .push(CachedState { step, hot_monitors });
        fingerprint
    }

    /// Steps at which `fingerprint` was observed.
    pub fn exists(&self, fingerprint: Fingerprint) -> Option<BTreeSet<u64>> {
        self.states
            .get(&fingerprint)
            .map(|seen| seen.iter().map(|s| s.step).collect())
    }

    pub fn observations(&self, fingerprint: Fingerprint) -> &[CachedState] {
        self.states
            .get(&fingerprint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of distinct fingerprints.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
