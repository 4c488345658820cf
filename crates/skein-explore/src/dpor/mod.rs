//! Dynamic partial-order reduction.
//!
//! A depth-first, stateless search over schedules. Every run replays the
//! prefix kept on the stack and extends it with fresh levels; afterwards
//! the race analysis adds backtrack points for every pair of conflicting
//! inbox writes that could have happened the other way round, and the
//! stack is unwound to the deepest level with something left to try.

pub mod race;
pub mod stack;

use skein_core::{EntityId, SchedulableInfo};
use tracing::{debug, warn};

use crate::strategy::SchedulingStrategy;

use self::stack::{Choice, ChoiceLog, Level};

pub struct DporStrategy {
    max_steps: u64,
    stack: Vec<Level>,
    /// Choices taken before the first scheduling decision.
    root: ChoiceLog,
    /// Levels visited in the current run.
    depth: usize,
    /// Position in the choice log of the current level.
    choice_cursor: usize,
    scheduled_steps: u64,
    iterations: u64,
}

impl DporStrategy {
    pub fn new(max_steps: u64) -> Self {
        Self {
            max_steps,
            stack: Vec::new(),
            root: ChoiceLog::default(),
            depth: 0,
            choice_cursor: 0,
            scheduled_steps: 0,
            iterations: 0,
        }
    }

    pub fn stack(&self) -> &[Level] {
        &self.stack
    }

    fn current_log(&mut self) -> &mut ChoiceLog {
        match self.depth.checked_sub(1) {
            Some(index) => &mut self.stack[index].choices,
            None => &mut self.root,
        }
    }

    /// Replayed or fresh value for the next nondeterministic choice.
    fn next_choice(&mut self, fresh: Choice) -> Option<Choice> {
        let cursor = self.choice_cursor;
        let log = self.current_log();
        let choice = match log.get(cursor) {
            Some(recorded) => recorded,
            None => {
                log.push(fresh);
                fresh
            }
        };
        self.choice_cursor += 1;
        self.scheduled_steps += 1;
        Some(choice)
    }

    fn replay_level(&mut self, choices: &[SchedulableInfo]) -> Option<EntityId> {
        let level = &self.stack[self.depth];
        let expected = level.selected_entry();
        let consistent = choices
            .iter()
            .any(|c| c.id == expected.id && c.enabled && c.next_operation == expected.operation);
        if !consistent {
            warn!(
                depth = self.depth,
                entity = %expected.id,
                "dpor detected nondeterminism while replaying the schedule prefix"
            );
            return None;
        }
        Some(expected.id)
    }

    fn push_level(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        let mut level = Level::new(choices);
        if let Some(parent) = self.stack.last() {
            level.inherit_sleep(parent);
        }
        if !level.select_from(current) {
            if level.entries.iter().any(|e| e.enabled) {
                debug!(depth = self.depth, "every enabled entity is asleep");
            }
            return None;
        }
        let selected = level.selected_entry().id;
        self.stack.push(level);
        Some(selected)
    }

    /// Unwind to the deepest level that still has an alternative.
    fn backtrack(&mut self) -> bool {
        while let Some(top) = self.stack.last_mut() {
            if top.choices.flip_last() || top.select_next_backtrack() {
                return true;
            }
            self.stack.pop();
        }
        self.root.flip_last()
    }
}

impl SchedulingStrategy for DporStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], current: EntityId) -> Option<EntityId> {
        let next = if self.depth < self.stack.len() {
            self.replay_level(choices)
        } else {
            self.push_level(choices, current)
        };
        let next = next?;
        self.depth += 1;
        self.choice_cursor = 0;
        self.scheduled_steps += 1;
        Some(next)
    }

    fn next_boolean_choice(&mut self, _max_value: u64) -> Option<bool> {
        match self.next_choice(Choice::Bool(false))? {
            Choice::Bool(value) => Some(value),
            Choice::Int { .. } => {
                warn!("dpor expected an integer choice but the program asked for a boolean");
                None
            }
        }
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        match self.next_choice(Choice::Int { value: 0, bound: max_value })? {
            Choice::Int { value, .. } => Some(value),
            Choice::Bool(_) => {
                warn!("dpor expected a boolean choice but the program asked for an integer");
                None
            }
        }
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        // levels past the visited depth belong to a run cut short
        self.stack.truncate(self.depth);
        let report = race::analyse(&mut self.stack);
        self.iterations += 1;
        debug!(
            iteration = self.iterations,
            depth = self.depth,
            races = report.races.len(),
            backtrack_points = report.added.len(),
            "dpor race analysis finished"
        );

        self.depth = 0;
        self.choice_cursor = 0;
        self.scheduled_steps = 0;
        self.backtrack()
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.root.clear();
        self.depth = 0;
        self.choice_cursor = 0;
        self.scheduled_steps = 0;
        self.iterations = 0;
    }

    fn scheduled_steps(&self) -> u64 {
        self.scheduled_steps
    }

    fn has_reached_max_scheduling_steps(&self) -> bool {
        self.scheduled_steps >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        false
    }

    fn description(&self) -> String {
        "dpor".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_choices_enumerated_depth_first() {
        let mut strategy = DporStrategy::new(100);
        let mut seen = Vec::new();
        loop {
            let a = strategy.next_boolean_choice(2).unwrap();
            let b = strategy.next_boolean_choice(2).unwrap();
            seen.push((a, b));
            if !strategy.prepare_for_next_iteration() {
                break;
            }
        }
        assert_eq!(seen, vec![(false, false), (false, true), (true, false), (true, true)]);
    }

    #[test]
    fn test_integer_choices_replayed_as_zero() {
        let mut strategy = DporStrategy::new(100);
        assert_eq!(strategy.next_integer_choice(10), Some(0));
        assert!(!strategy.prepare_for_next_iteration());
    }
}
