use skein_core::{EntityId, ProgramSnapshot, SchedulableInfo};
use skein_trace::ScheduleTrace;

/// A liveness bug found by a liveness-aware strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessViolation {
    pub monitor: EntityId,
    pub monitor_name: String,
    pub state: String,
    pub message: String,
    /// Scheduling decisions forming the offending cycle, when one was found.
    pub witness: Option<ScheduleTrace>,
}

/// An exploration strategy: the policy that decides which enabled entity
/// runs at each scheduling point and how nondeterministic choices resolve.
///
/// A strategy lives for a whole testing session and is driven by one
/// scheduler per iteration. `None` from any of the choice methods means the
/// strategy has nothing left to offer for this run.
pub trait SchedulingStrategy: Send {
    /// Pick the next entity among `choices` (all entities, ordered by id;
    /// only enabled ones may be picked). `current` is the caller.
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId>;

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool>;

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64>;

    /// Called between iterations. Returns false when the exploration
    /// budget is exhausted.
    fn prepare_for_next_iteration(&mut self) -> bool;

    /// Forget everything learned so far.
    fn reset(&mut self);

    /// Decisions taken in the current run.
    fn scheduled_steps(&self) -> u64;

    fn has_reached_max_scheduling_steps(&self) -> bool;

    /// Whether every enabled entity is eventually scheduled.
    fn is_fair(&self) -> bool;

    /// Name plus parameters, for reports.
    fn description(&self) -> String;

    /// Liveness strategies want a program snapshot before every decision.
    fn observes_program_state(&self) -> bool {
        false
    }

    fn observe_program_state(&mut self, _snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        None
    }

    /// Set when the strategy stopped because a replayed trace diverged.
    fn replay_error(&self) -> Option<String> {
        None
    }
}

impl<S: SchedulingStrategy + ?Sized> SchedulingStrategy for Box<S> {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        (**self).next(choices, current)
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        (**self).next_boolean_choice(max_value)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        (**self).next_integer_choice(max_value)
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        (**self).prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn scheduled_steps(&self) -> u64 {
        (**self).scheduled_steps()
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        (**self).has_reached_max_scheduling_steps()
    }

    fn is_fair(&self) -> bool {
        (**self).is_fair()
    }

    fn description(&self) -> String {
        (**self).description()
    }

    fn observes_program_state(&self) -> bool {
        (**self).observes_program_state()
    }

    fn observe_program_state(&mut self, snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        (**self).observe_program_state(snapshot)
    }

    fn replay_error(&self) -> Option<String> {
        (**self).replay_error()
    }
}

/// Enabled entities among `choices`, in id order.
pub fn enabled(choices: &[SchedulableInfo]) -> impl Iterator<Item = &SchedulableInfo> {
    choices.iter().filter(|c| c.enabled)
}
