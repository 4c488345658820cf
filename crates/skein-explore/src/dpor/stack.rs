//! The DPOR search stack.
//!
//! One `Level` per scheduling decision of the current prefix. Each level
//! keeps every entity's view at that point (enabled flag, pending
//! operation) plus the search bookkeeping: which entities still have to be
//! tried (`backtrack`) and which are covered already (`sleep`).

use skein_core::{EntityId, Operation, SchedulableInfo};

#[derive(Debug, Clone, PartialEq)]
pub struct StackEntry {
    pub id: EntityId,
    pub enabled: bool,
    pub operation: Operation,
    pub send_index: u64,
    pub backtrack: bool,
    pub sleep: bool,
}

impl StackEntry {
    fn from_choice(choice: &SchedulableInfo) -> Self {
        Self {
            id: choice.id,
            enabled: choice.enabled,
            operation: choice.next_operation,
            send_index: choice.next_matching_send_index,
            backtrack: false,
            sleep: false,
        }
    }
}

/// A nondeterministic value taken between two scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Bool(bool),
    /// An integer in `0..bound`.
    Int { value: u64, bound: u64 },
}

/// Ordered record of the values taken after one decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChoiceLog {
    values: Vec<Choice>,
}

impl ChoiceLog {
    pub fn get(&self, index: usize) -> Option<Choice> {
        self.values.get(index).copied()
    }

    pub fn push(&mut self, choice: Choice) {
        self.values.push(choice);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Advance the depth-first enumeration: the last `false` becomes
    /// `true` and everything after it is dropped. Returns false when every
    /// boolean already took both values.
    pub fn flip_last(&mut self) -> bool {
        let last_false = self
            .values
            .iter()
            .rposition(|c| *c == Choice::Bool(false));
        match last_false {
            Some(index) => {
                self.values[index] = Choice::Bool(true);
                self.values.truncate(index + 1);
                true
            }
            None => false,
        }
    }

    /// Like `flip_last`, but integers are enumerated too: the last choice
    /// with a successor is advanced and everything after it is dropped.
    pub fn advance_last(&mut self) -> bool {
        let last_open = self.values.iter().rposition(|c| match c {
            Choice::Bool(value) => !value,
            Choice::Int { value, bound } => value + 1 < *bound,
        });
        let Some(index) = last_open else {
            return false;
        };
        self.values[index] = match self.values[index] {
            Choice::Bool(_) => Choice::Bool(true),
            Choice::Int { value, bound } => Choice::Int { value: value + 1, bound },
        };
        self.values.truncate(index + 1);
        true
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub entries: Vec<StackEntry>,
    /// Index into `entries` of the entity run at this level.
    pub selected: usize,
    pub choices: ChoiceLog,
}

impl Level {
    /// A fresh level for `choices`; nothing selected yet.
    pub fn new(choices: &[SchedulableInfo]) -> Self {
        Self {
            entries: choices.iter().map(StackEntry::from_choice).collect(),
            selected: 0,
            choices: ChoiceLog::default(),
        }
    }

    pub fn selected_entry(&self) -> &StackEntry {
        &self.entries[self.selected]
    }

    pub fn entry(&self, id: EntityId) -> Option<&StackEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: EntityId) -> Option<&mut StackEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    /// Inherit the sleeping entities of `parent` whose pending operation
    /// here does not conflict with the operation `parent` ran.
    pub fn inherit_sleep(&mut self, parent: &Level) {
        let ran = parent.selected_entry().operation;
        for slept in parent.entries.iter().filter(|e| e.sleep) {
            if let Some(entry) = self.entry_mut(slept.id) {
                if !dependent(&entry.operation, &ran) {
                    entry.sleep = true;
                }
            }
        }
    }

    /// Select the first enabled, awake entity, scanning round-robin from
    /// `current`. Returns false if there is none.
    pub fn select_from(&mut self, current: EntityId) -> bool {
        let len = self.entries.len();
        let start = self.entries.iter().position(|e| e.id == current).unwrap_or(0);
        for offset in 0..len {
            let index = (start + offset) % len;
            let entry = &mut self.entries[index];
            if entry.enabled && !entry.sleep {
                entry.backtrack = true;
                self.selected = index;
                return true;
            }
        }
        false
    }

    /// Move on to the next pending backtrack entity, putting the one
    /// explored so far to sleep.
    pub fn select_next_backtrack(&mut self) -> bool {
        self.entries[self.selected].sleep = true;
        let next = self
            .entries
            .iter()
            .position(|e| e.enabled && e.backtrack && !e.sleep);
        match next {
            Some(index) => {
                self.selected = index;
                self.choices.clear();
                true
            }
            None => false,
        }
    }
}

/// Two operations conflict when both write the same inbox.
pub fn dependent(a: &Operation, b: &Operation) -> bool {
    a.writes_inbox() && b.writes_inbox() && a.target == b.target
}
