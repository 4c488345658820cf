use std::ops::{Index, Range};
use std::path::Path;

use serde::{Deserialize, Serialize};
use skein_core::{EntityId, Operation};

use crate::TraceError;

/// A single decision taken during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleStep {
    /// The scheduler selected `entity`, which then performed `operation`.
    SchedulingChoice {
        entity: EntityId,
        operation: Operation,
    },
    /// A nondeterministic boolean; `fair_id` is set for fair choices.
    BooleanChoice {
        value: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fair_id: Option<String>,
    },
    IntegerChoice { value: u64 },
}

impl ScheduleStep {
    pub fn is_scheduling_choice(&self) -> bool {
        matches!(self, ScheduleStep::SchedulingChoice { .. })
    }
}

/// Ordered scheduling decisions of one run. Append-only while the run is
/// live; consumed end to end by the replay strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTrace {
    steps: Vec<ScheduleStep>,
}

impl ScheduleTrace {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn from_steps(steps: Vec<ScheduleStep>) -> Self {
        Self { steps }
    }

    pub fn add(&mut self, step: ScheduleStep) {
        self.steps.push(step);
    }

    pub fn add_scheduling_choice(&mut self, entity: EntityId, operation: Operation) {
        self.add(ScheduleStep::SchedulingChoice { entity, operation });
    }

    pub fn add_boolean_choice(&mut self, value: bool) {
        self.add(ScheduleStep::BooleanChoice {
            value,
            fair_id: None,
        });
    }

    pub fn add_fair_boolean_choice(&mut self, fair_id: impl Into<String>, value: bool) {
        self.add(ScheduleStep::BooleanChoice {
            value,
            fair_id: Some(fair_id.into()),
        });
    }

    pub fn add_integer_choice(&mut self, value: u64) {
        self.add(ScheduleStep::IntegerChoice { value });
    }

    pub fn get(&self, index: usize) -> Option<&ScheduleStep> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of entity selections, ignoring data choices.
    pub fn scheduling_choices(&self) -> usize {
        self.steps.iter().filter(|s| s.is_scheduling_choice()).count()
    }

    /// Copy of a contiguous range of steps.
    pub fn slice(&self, range: Range<usize>) -> ScheduleTrace {
        let end = range.end.min(self.steps.len());
        let start = range.start.min(end);
        Self::from_steps(self.steps[start..end].to_vec())
    }

    pub fn to_json(&self) -> Result<String, TraceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

impl Index<usize> for ScheduleTrace {
    type Output = ScheduleStep;

    fn index(&self, index: usize) -> &Self::Output {
        &self.steps[index]
    }
}
