//! Exhaustive depth-first search.
//!
//! Every run replays the prefix kept on the stack and extends it by always
//! taking the first enabled entity and the smallest value. Afterwards the
//! deepest decision with an untried alternative is advanced. Unlike DPOR
//! there is no race analysis: every enabled entity at every level is an
//! alternative, as is every value of every nondeterministic choice.

use skein_core::{EntityId, SchedulableInfo};
use tracing::{debug, warn};

use crate::dpor::stack::{Choice, ChoiceLog};
use crate::strategy::{enabled, SchedulingStrategy};

#[derive(Debug, Clone, PartialEq)]
struct DfsLevel {
    /// Enabled entities at this decision, in id order.
    options: Vec<EntityId>,
    /// Index into `options` of the entity run at this level.
    selected: usize,
    /// Values taken after this decision, before the next one.
    choices: ChoiceLog,
}

impl DfsLevel {
    fn selected_id(&self) -> EntityId {
        self.options[self.selected]
    }

    fn select_next(&mut self) -> bool {
        if self.selected + 1 < self.options.len() {
            self.selected += 1;
            self.choices.clear();
            true
        } else {
            false
        }
    }
}

pub struct DfsStrategy {
    max_steps: u64,
    stack: Vec<DfsLevel>,
    root: ChoiceLog,
    depth: usize,
    choice_cursor: usize,
    scheduled_steps: u64,
    iterations: u64,
}

impl DfsStrategy {
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

    /// Decisions on the current prefix.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn current_log(&mut self) -> &mut ChoiceLog {
        match self.depth.checked_sub(1) {
            Some(index) => &mut self.stack[index].choices,
            None => &mut self.root,
        }
    }

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

    fn backtrack(&mut self) -> bool {
        while let Some(top) = self.stack.last_mut() {
            if top.choices.advance_last() || top.select_next() {
                return true;
            }
            self.stack.pop();
        }
        self.root.advance_last()
    }
}

impl SchedulingStrategy for DfsStrategy {
    fn next(&mut self, choices: &[SchedulableInfo], _current: EntityId) -> Option<EntityId> {
        let options: Vec<EntityId> = enabled(choices).map(|c| c.id).collect();
        let next = if self.depth < self.stack.len() {
            let expected = self.stack[self.depth].selected_id();
            if !options.contains(&expected) {
                warn!(
                    depth = self.depth,
                    entity = %expected,
                    "dfs detected nondeterminism while replaying the schedule prefix"
                );
                return None;
            }
            expected
        } else {
            let first = *options.first()?;
            self.stack.push(DfsLevel {
                options,
                selected: 0,
                choices: ChoiceLog::default(),
            });
            first
        };
        self.depth += 1;
        self.choice_cursor = 0;
        self.scheduled_steps += 1;
        Some(next)
    }

    fn next_boolean_choice(&mut self, _max_value: u64) -> Option<bool> {
        match self.next_choice(Choice::Bool(false))? {
            Choice::Bool(value) => Some(value),
            Choice::Int { .. } => {
                warn!("dfs expected an integer choice but the program asked for a boolean");
                None
            }
        }
    }

    fn next_integer_choice(&mut self, max_value: u64) -> Option<u64> {
        let fresh = Choice::Int {
            value: 0,
            bound: max_value.max(1),
        };
        match self.next_choice(fresh)? {
            Choice::Int { value, .. } => Some(value),
            Choice::Bool(_) => {
                warn!("dfs expected a boolean choice but the program asked for an integer");
                None
            }
        }
    }

    fn prepare_for_next_iteration(&mut self) -> bool {
        self.stack.truncate(self.depth);
        self.iterations += 1;
        debug!(iteration = self.iterations, depth = self.depth, "dfs run finished");

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
        "dfs".to_string()
    }
}
