use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use skein_core::{ConfigError, EntityId};
use skein_trace::{BugTrace, ScheduleTrace, TraceError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Thread spawn error: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Category of a bug found in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BugKind {
    AssertionFailure,
    UnhandledException,
    Deadlock,
    LivenessViolation,
    StepBoundReached,
    ReplayDivergence,
}

impl std::fmt::Display for BugKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BugKind::AssertionFailure => "assertion failure",
            BugKind::UnhandledException => "unhandled exception",
            BugKind::Deadlock => "deadlock",
            BugKind::LivenessViolation => "liveness violation",
            BugKind::StepBoundReached => "step bound reached",
            BugKind::ReplayDivergence => "replay divergence",
        };
        f.write_str(name)
    }
}

/// Why a testing session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A bug was found and the session stops on the first one.
    BugFound,
    /// All configured iterations ran.
    IterationBudgetExhausted,
    /// The strategy has no schedule left to try.
    ScheduleSpaceExhausted,
}

/// One bug with everything needed to understand and replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub kind: BugKind,
    pub message: String,
    /// Zero-based iteration that found the bug.
    pub iteration: u32,
    pub strategy: String,
    pub schedule: ScheduleTrace,
    pub bug_trace: BugTrace,
    pub entities: Vec<EntityId>,
    /// Decisions forming the infinite loop of a cycle-detected liveness bug.
    pub witness: Option<ScheduleTrace>,
}

impl BugReport {
    /// Human-readable report: the message followed by the bug trace.
    pub fn render(&self) -> String {
        format!(
            "Found {} in iteration {} using {}:\n{}\n\n{}",
            self.kind,
            self.iteration,
            self.strategy,
            self.message,
            self.bug_trace
        )
    }

    /// Write `<stem>.schedule.json`, `<stem>.bugtrace.json` and
    /// `<stem>.txt` into `dir`. Returns the path of the schedule.
    pub fn write_artifacts(&self, dir: &Path, stem: &str) -> Result<PathBuf, TraceError> {
        std::fs::create_dir_all(dir)?;
        let schedule = dir.join(format!("{stem}.schedule.json"));
        self.schedule.save(&schedule)?;
        self.bug_trace.save(dir.join(format!("{stem}.bugtrace.json")))?;
        std::fs::write(dir.join(format!("{stem}.txt")), self.render())?;
        Ok(schedule)
    }
}

/// Outcome of a testing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub strategy: String,
    pub iterations: u32,
    pub bugs: Vec<BugReport>,
    /// Runs that explored a schedule under a fair strategy.
    pub fair_schedules: u64,
    pub unfair_schedules: u64,
    /// Runs cut short by the step bound.
    pub step_bound_hits: u64,
    pub min_fair_steps: Option<u64>,
    pub max_fair_steps: u64,
    pub total_fair_steps: u64,
    pub stop_reason: StopReason,
}

impl TestReport {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            iterations: 0,
            bugs: Vec::new(),
            fair_schedules: 0,
            unfair_schedules: 0,
            step_bound_hits: 0,
            min_fair_steps: None,
            max_fair_steps: 0,
            total_fair_steps: 0,
            stop_reason: StopReason::IterationBudgetExhausted,
        }
    }

    pub fn found_bug(&self) -> bool {
        !self.bugs.is_empty()
    }

    pub fn first_bug(&self) -> Option<&BugReport> {
        self.bugs.first()
    }

    /// Account one finished run.
    pub fn record_schedule(&mut self, fair: bool, steps: u64, hit_step_bound: bool) {
        self.iterations += 1;
        if hit_step_bound {
            self.step_bound_hits += 1;
        }
        if fair {
            self.fair_schedules += 1;
            self.total_fair_steps += steps;
            self.max_fair_steps = self.max_fair_steps.max(steps);
            self.min_fair_steps = Some(self.min_fair_steps.map_or(steps, |min| min.min(steps)));
        } else {
            self.unfair_schedules += 1;
        }
    }

    /// Fold the report of another engine into this one.
    pub fn merge(&mut self, other: TestReport) {
        self.iterations += other.iterations;
        self.bugs.extend(other.bugs);
        self.fair_schedules += other.fair_schedules;
        self.unfair_schedules += other.unfair_schedules;
        self.step_bound_hits += other.step_bound_hits;
        self.min_fair_steps = match (self.min_fair_steps, other.min_fair_steps) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_fair_steps = self.max_fair_steps.max(other.max_fair_steps);
        self.total_fair_steps += other.total_fair_steps;
        self.stop_reason = match (self.stop_reason, other.stop_reason) {
            (StopReason::BugFound, _) | (_, StopReason::BugFound) => StopReason::BugFound,
            (StopReason::ScheduleSpaceExhausted, StopReason::ScheduleSpaceExhausted) => {
                StopReason::ScheduleSpaceExhausted
            }
            _ => StopReason::IterationBudgetExhausted,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bug(iteration: u32) -> BugReport {
        BugReport {
            kind: BugKind::Deadlock,
            message: "Deadlock detected.".into(),
            iteration,
            strategy: "random[seed '1']".into(),
            schedule: ScheduleTrace::new(),
            bug_trace: BugTrace::new(),
            entities: vec![EntityId(1)],
            witness: None,
        }
    }

    #[test]
    fn test_fair_step_statistics() {
        let mut report = TestReport::new("random");
        report.record_schedule(true, 10, false);
        report.record_schedule(true, 4, true);
        report.record_schedule(false, 100, false);
        assert_eq!(report.iterations, 3);
        assert_eq!(report.fair_schedules, 2);
        assert_eq!(report.unfair_schedules, 1);
        assert_eq!(report.min_fair_steps, Some(4));
        assert_eq!(report.max_fair_steps, 10);
        assert_eq!(report.total_fair_steps, 14);
        assert_eq!(report.step_bound_hits, 1);
    }

    #[test]
    fn test_merge_keeps_bugs_and_reason() {
        let mut a = TestReport::new("portfolio");
        a.record_schedule(true, 3, false);
        a.stop_reason = StopReason::ScheduleSpaceExhausted;
        let mut b = TestReport::new("random");
        b.record_schedule(true, 7, false);
        b.bugs.push(bug(0));
        b.stop_reason = StopReason::BugFound;
        a.merge(b);
        assert_eq!(a.iterations, 2);
        assert_eq!(a.min_fair_steps, Some(3));
        assert_eq!(a.stop_reason, StopReason::BugFound);
        assert!(a.found_bug());
    }

    #[test]
    fn test_render_names_kind_and_message() {
        let text = bug(3).render();
        assert!(text.starts_with("Found deadlock in iteration 3 using random[seed '1']:"));
        assert!(text.contains("Deadlock detected."));
    }
}
