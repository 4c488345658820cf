use skein_core::{EntityId, OperationType, ReductionKind, SchedulableInfo};

use crate::strategy::SchedulingStrategy;

/// Decorates a strategy with a cheap reduction of the scheduling points it
/// is consulted on.
///
/// Only sends can change the interleaving-sensitive state (inbox order), so
/// a point whose pending operation is not a send can be omitted
/// (`OmitSchedulingPoints`: keep running the current entity) or forced
/// (`ForceSchedule`: run the first entity that is not about to send).
pub struct BasicReductionStrategy<S> {
    inner: S,
    reduction: ReductionKind,
    max_steps: u64,
    /// Decisions taken without consulting `inner` in this run.
    reduced_steps: u64,
}

impl<S: SchedulingStrategy> BasicReductionStrategy<S> {
    pub fn new(inner: S, reduction: ReductionKind, max_steps: u64) -> Self {
        Self {
            inner,
            reduction,
            max_steps,
            reduced_steps: 0,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SchedulingStrategy> SchedulingStrategy for BasicReductionStrategy<S> {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        match self.reduction {
            ReductionKind::ForceSchedule => {
                let forced = choices
                    .iter()
                    .find(|c| c.enabled && c.next_operation.kind != OperationType::Send);
                if let Some(choice) = forced {
                    self.reduced_steps += 1;
                    return Some(choice.id);
                }
            }
            ReductionKind::OmitSchedulingPoints => {
                let keep_current = choices.iter().any(|c| {
                    c.id == current && c.enabled && c.next_operation.kind != OperationType::Send
                });
                if keep_current {
                    self.reduced_steps += 1;
                    return Some(current);
                }
            }
            ReductionKind::None => {}
        }
        self.inner.next(choices, current)
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        self.inner.next_boolean_choice(max_value)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        self.inner.next_integer_choice(max_value)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.reduced_steps = 0;
        self.inner.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.reduced_steps = 0;
        self.inner.reset();
    }

    fn scheduled_steps(&self) -> u64 {
        self.inner.scheduled_steps() + self.reduced_steps
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.inner.has_reached_max_scheduling_steps() || self.scheduled_steps() >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        self.inner.is_fair()
    }

    fn description(&self) -> String {
        let reduction = match self.reduction {
            ReductionKind::None => return self.inner.description(),
            ReductionKind::OmitSchedulingPoints => "omit-scheduling-points",
            ReductionKind::ForceSchedule => "force-schedule",
        };
        format!("{} w/ {}", self.inner.description(), reduction)
    }
}
