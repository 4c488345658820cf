use std::collections::BTreeMap;

use skein_core::{EntityId, ProgramSnapshot, SchedulableInfo};
use tracing::debug;

use super::violation;
use crate::strategy::{LivenessViolation, SchedulingStrategy};

/// Flags a monitor that stays hot for more than `threshold` consecutive
/// scheduling points of a fair schedule.
pub struct TemperatureCheckingStrategy<S> {
    inner: S,
    threshold: u64,
    temperatures: BTreeMap<EntityId, u64>,
}

impl<S: SchedulingStrategy> TemperatureCheckingStrategy<S> {
    pub fn new(inner: S, threshold: u64) -> Self {
        Self {
            inner,
            threshold,
            temperatures: BTreeMap::new(),
        }
    }

    pub fn temperature(&self, monitor: EntityId) -> u64 {
        self.temperatures.get(&monitor).copied().unwrap_or(0)
    }
}

impl<S: SchedulingStrategy> SchedulingStrategy for TemperatureCheckingStrategy<S> {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        self.inner.next(choices, current)
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        self.inner.next_boolean_choice(max_value)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        self.inner.next_integer_choice(max_value)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.temperatures.clear();
        self.inner.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.temperatures.clear();
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
        format!("{} w/ liveness temperature {}", self.inner.description(), self.threshold)
    }

    fn observes_program_state(&self) -> bool {
        true
    }

    fn observe_program_state(&mut self, snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        // an unfair schedule can starve anyone, heat means nothing there
        if !self.inner.is_fair() {
            return None;
        }
        for entity in snapshot.entities() {
            if entity.is_hot() {
                let temperature = self.temperatures.entry(entity.id).or_insert(0);
                *temperature += 1;
                if *temperature > self.threshold {
                    debug!(monitor = %entity.name, temperature = *temperature, "liveness temperature exceeded");
                    let message = format!(
                        "Monitor '{}' detected potential liveness bug in hot state '{}'.",
                        entity.name, entity.state
                    );
                    return Some(violation(entity, message, None));
                }
            } else {
                self.temperatures.remove(&entity.id);
            }
        }
        None
    }
}
