use std::collections::{BTreeMap, BTreeSet};

use skein_core::{EntityId, ProgramSnapshot, SchedulableInfo};
use skein_trace::{ScheduleStep, ScheduleTrace};
use tracing::debug;

use super::violation;
use crate::state_cache::StateCache;
use crate::strategy::{enabled, LivenessViolation, SchedulingStrategy};

/// Detects lassos: a program state that recurs while some monitor stays
/// hot all the way around the loop. Such a loop can be repeated forever,
/// so the hot state is never left.
pub struct CycleDetectionStrategy<S> {
    inner: S,
    safety_prefix: u64,
    fair_cycles_only: bool,
    cache: StateCache,
    /// Decisions of this run, as handed out by `inner`.
    steps: ScheduleTrace,
    /// `steps.len()` at each observed scheduling point.
    offsets: Vec<usize>,
    /// Entities enabled at each observed scheduling point.
    enabled_at: Vec<BTreeSet<EntityId>>,
    /// First point of each monitor's current hot streak.
    hot_since: BTreeMap<EntityId, u64>,
}

impl<S: SchedulingStrategy> CycleDetectionStrategy<S> {
    pub fn new(inner: S, safety_prefix: u64, fair_cycles_only: bool) -> Self {
        Self {
            inner,
            safety_prefix,
            fair_cycles_only,
            cache: StateCache::new(),
            steps: ScheduleTrace::new(),
            offsets: Vec::new(),
            enabled_at: Vec::new(),
            hot_since: BTreeMap::new(),
        }
    }

    pub fn state_cache(&self) -> &StateCache {
        &self.cache
    }

    /// Every entity enabled somewhere in `[start, end)` was scheduled in it.
    fn is_fair_cycle(&self, start: u64, end: u64) -> bool {
        let (start, end) = (start as usize, end as usize);
        let enabled: BTreeSet<EntityId> = self.enabled_at[start..end.min(self.enabled_at.len())]
            .iter()
            .flatten()
            .copied()
            .collect();
        let scheduled: BTreeSet<EntityId> = self.steps.steps()[self.offsets[start]..self.offsets[end]]
            .iter()
            .filter_map(|step| match step {
                ScheduleStep::SchedulingChoice { entity, .. } => Some(*entity),
                _ => None,
            })
            .collect();
        enabled.is_subset(&scheduled)
    }

    fn check_cycle(&self, point: u64, snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        let fingerprint = snapshot.fingerprint();
        let seen = self.cache.exists(fingerprint)?;
        // most recent first, the shortest loop makes the clearest witness
        for start in seen.into_iter().rev() {
            if self.fair_cycles_only && !self.is_fair_cycle(start, point) {
                debug!(start, end = point, "skipped unfair cycle");
                continue;
            }
            let hot = snapshot
                .hot_monitors()
                .find(|m| self.hot_since.get(&m.id).is_some_and(|since| *since <= start));
            if let Some(monitor) = hot {
                debug!(%fingerprint, start, end = point, "found hot cycle");
                let witness = self
                    .steps
                    .slice(self.offsets[start as usize]..self.offsets[point as usize]);
                let message = format!(
                    "Monitor '{}' detected infinite execution that violates a liveness property in hot state '{}'.",
                    monitor.name, monitor.state
                );
                return Some(violation(monitor, message, Some(witness)));
            }
        }
        None
    }

    fn clear(&mut self) {
        self.cache.clear();
        self.steps = ScheduleTrace::new();
        self.offsets.clear();
        self.enabled_at.clear();
        self.hot_since.clear();
    }
}

impl<S: SchedulingStrategy> SchedulingStrategy for CycleDetectionStrategy<S> {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        if self.enabled_at.len() < self.offsets.len() {
            self.enabled_at.push(enabled(choices).map(|c| c.id).collect());
        }
        let next = self.inner.next(choices, current)?;
        if let Some(choice) = choices.iter().find(|c| c.id == next) {
            self.steps.add_scheduling_choice(next, choice.next_operation);
        }
        Some(next)
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        let value = self.inner.next_boolean_choice(max_value)?;
        self.steps.add_boolean_choice(value);
        Some(value)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        let value = self.inner.next_integer_choice(max_value)?;
        self.steps.add_integer_choice(value);
        Some(value)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.clear();
        self.inner.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.clear();
        self.inner.reset();
    }

    fn scheduled_steps(&self) -> u64 {
        self.inner.scheduled_steps()
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.inner.has_reached_max_scheduling_steps()
    }

    fn is_fair(&self) -> bool {
        self.inner.is_fair()
    }

    fn description(&self) -> String {
        format!("{} w/ cycle detection", self.inner.description())
    }

    fn observes_program_state(&self) -> bool {
        true
    }

    fn observe_program_state(&mut self, snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        let point = self.offsets.len() as u64;
        self.offsets.push(self.steps.len());
        if self.enabled_at.len() < point as usize {
            // a point the strategy was not consulted on
            self.enabled_at.push(BTreeSet::new());
        }

        let hot: BTreeSet<EntityId> = snapshot.hot_monitors().map(|m| m.id).collect();
        self.hot_since.retain(|id, _| hot.contains(id));
        for id in hot {
            self.hot_since.entry(id).or_insert(point);
        }

        if point < self.safety_prefix {
            return None;
        }
        let found = self.check_cycle(point, snapshot);
        self.cache.capture(point, snapshot);
        found
    }
}
