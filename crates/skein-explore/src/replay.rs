use skein_core::{EntityId, SchedulableInfo};
use skein_trace::{ScheduleStep, ScheduleTrace};
use tracing::warn;

use crate::strategy::{enabled, SchedulingStrategy};

const NOT_REPRODUCIBLE: &str = "Trace is not reproducible";

/// Replays a recorded `ScheduleTrace` decision by decision.
///
/// When the program asks for something the trace does not contain the
/// replay diverges: without a suffix strategy the run ends and
/// `replay_error` explains why, otherwise the suffix strategy takes over
/// for the rest of the run.
pub struct ReplayStrategy {
    trace: ScheduleTrace,
    suffix: Option<Box<dyn SchedulingStrategy>>,
    fair: bool,
    replaying: bool,
    scheduled_steps: u64,
    max_steps: u64,
    error: Option<String>,
}

impl ReplayStrategy {
    pub fn new(trace: ScheduleTrace, fair: bool) -> Self {
        let max_steps = trace.len() as u64;
        Self {
            trace,
            suffix: None,
            fair,
            replaying: true,
            scheduled_steps: 0,
            max_steps,
            error: None,
        }
    }

    pub fn with_suffix(trace: ScheduleTrace, fair: bool, suffix: Box<dyn SchedulingStrategy>) -> Self {
        let mut strategy = Self::new(trace, fair);
        strategy.max_steps = u64::MAX;
        strategy.suffix = Some(suffix);
        strategy
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    fn next_step(&self) -> Result<&ScheduleStep, String> {
        self.trace
            .get(self.scheduled_steps as usize)
            .ok_or_else(|| format!("{NOT_REPRODUCIBLE}: execution is longer than trace."))
    }

    /// Record the divergence; true if a suffix strategy takes over.
    fn diverge(&mut self, message: String) -> bool {
        if self.suffix.is_some() {
            self.replaying = false;
            return true;
        }
        warn!(step = self.scheduled_steps, %message, "replay diverged");
        self.error = Some(message);
        false
    }

    fn replay_next(&self, choices: &[SchedulableInfo]) -> Result<EntityId, String> {
        let ScheduleStep::SchedulingChoice { entity, .. } = self.next_step()? else {
            return Err(format!("{NOT_REPRODUCIBLE}: next step is not a scheduling choice."));
        };
        enabled(choices)
            .find(|c| c.id == *entity)
            .map(|c| c.id)
            .ok_or_else(|| format!("{NOT_REPRODUCIBLE}: cannot detect id '{entity}'."))
    }

    fn replay_boolean(&self) -> Result<bool, String> {
        match self.next_step()? {
            ScheduleStep::BooleanChoice { value, .. } => Ok(*value),
            _ => Err(format!(
                "{NOT_REPRODUCIBLE}: next step is not a nondeterministic boolean choice."
            )),
        }
    }

    fn replay_integer(&self) -> Result<u64, String> {
        match self.next_step()? {
            ScheduleStep::IntegerChoice { value } => Ok(*value),
            _ => Err(format!(
                "{NOT_REPRODUCIBLE}: next step is not a nondeterministic integer choice."
            )),
        }
    }
}

impl SchedulingStrategy for ReplayStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        if self.replaying {
            if enabled(choices).next().is_none() {
                return None;
            }
            match self.replay_next(choices) {
                Ok(next) => {
                    self.scheduled_steps += 1;
                    return Some(next);
                }
                Err(message) => {
                    if !self.diverge(message) {
                        return None;
                    }
                }
            }
        }
        self.suffix.as_mut()?.next(choices, current)
    }

    fn next_boolean_choice(&mut self, max_value: u64) -> Option<bool> {
        if self.replaying {
            match self.replay_boolean() {
                Ok(value) => {
                    self.scheduled_steps += 1;
                    return Some(value);
                }
                Err(message) => {
                    if !self.diverge(message) {
                        return None;
                    }
                }
            }
        }
        self.suffix.as_mut()?.next_boolean_choice(max_value)
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        if self.replaying {
            match self.replay_integer() {
                Ok(value) => {
                    self.scheduled_steps += 1;
                    return Some(value);
                }
                Err(message) => {
                    if !self.diverge(message) {
                        return None;
                    }
                }
            }
        }
        self.suffix.as_mut()?.next_integer_choice(max_value)
    }

    /// A trace is replayed exactly once.
    fn prepare_for_next_iteration(&mut self) -> bool {
        false
    }

    fn reset(&mut self) {
        self.replaying = true;
        self.scheduled_steps = 0;
        self.error = None;
        if let Some(suffix) = self.suffix.as_mut() {
            suffix.reset();
        }
    }

    fn scheduled_steps(&self) -> u64 {
        let suffix_steps = self.suffix.as_ref().map_or(0, |s| s.scheduled_steps());
        self.scheduled_steps + suffix_steps
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        match self.suffix.as_ref() {
            Some(suffix) if !self.replaying => suffix.has_reached_max_scheduling_steps(),
            _ => self.scheduled_steps >= self.max_steps,
        }
    }

    fn is_fair(&self) -> bool {
        self.fair
    }

    fn description(&self) -> String {
        match self.suffix.as_ref() {
            Some(suffix) => format!("replay w/ suffix {}", suffix.description()),
            None => "replay".to_string(),
        }
    }

    fn replay_error(&self) -> Option<String> {
        self.error.clone()
    }
}
