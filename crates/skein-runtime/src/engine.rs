//! The testing engine: runs a test for many iterations under one strategy
//! and turns the outcome of every run into a `TestReport`.

use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use skein_core::{ActionResult, Configuration, StrategyKind};
use skein_explore::{build_strategy, SchedulingStrategy};
use skein_trace::{BugTrace, BugTraceRecorder, LogObserver, ScheduleTrace};
use tracing::{debug, info};

use crate::context::Context;
use crate::report::{BugReport, EngineError, StopReason, TestReport};
use crate::runtime::{TestEntry, TestingRuntime};
use crate::scheduler::{RunOutcome, SharedStrategy};

pub struct TestingEngine {
    config: Configuration,
    test: TestEntry,
    strategy: SharedStrategy,
}

impl TestingEngine {
    /// Validate `config` and build its strategy. In replay mode the trace
    /// is loaded from `replay_trace_path`.
    pub fn new<F>(config: Configuration, test: F) -> Result<Self, EngineError>
    where
        F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
    {
        Self::from_entry(config, Arc::new(test), 0)
    }

    /// Run under a strategy built by the caller.
    pub fn with_strategy<F>(
        config: Configuration,
        test: F,
        strategy: Box<dyn SchedulingStrategy>,
    ) -> Result<Self, EngineError>
    where
        F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            test: Arc::new(test),
            strategy: Arc::new(Mutex::new(strategy)),
        })
    }

    fn from_entry(config: Configuration, test: TestEntry, stream: u64) -> Result<Self, EngineError> {
        config.validate()?;
        let replay = load_replay_trace(&config)?;
        let strategy = build_strategy(&config, stream, replay);
        Ok(Self {
            config,
            test,
            strategy: Arc::new(Mutex::new(strategy)),
        })
    }

    /// Reproduce `trace` in a single run.
    pub fn replay<F>(config: Configuration, test: F, trace: ScheduleTrace) -> Result<TestReport, EngineError>
    where
        F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
    {
        let config = Configuration {
            iterations: 1,
            ..config
        };
        config.validate()?;
        let strategy = build_strategy(&config, 0, Some(trace));
        Self::with_strategy(config, test, strategy)?.run()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn run(&mut self) -> Result<TestReport, EngineError> {
        let description = self.strategy.lock().description();
        info!(strategy = %description, iterations = self.config.iterations, "testing started");
        let mut report = TestReport::new(description);

        for iteration in 0..self.config.iterations {
            if iteration > 0 && !self.strategy.lock().prepare_for_next_iteration() {
                debug!(iteration, "strategy has no schedule left");
                report.stop_reason = StopReason::ScheduleSpaceExhausted;
                break;
            }

            let (outcome, bug_trace) = self.run_iteration()?;
            let fair = self.strategy.lock().is_fair();
            report.record_schedule(fair, outcome.scheduled_steps, outcome.hit_step_bound);

            if let Some(bug) = self.bug_report(iteration, outcome, bug_trace)? {
                report.bugs.push(bug);
                if self.config.stop_on_first_bug {
                    report.stop_reason = StopReason::BugFound;
                    break;
                }
            }
        }

        info!(
            iterations = report.iterations,
            bugs = report.bugs.len(),
            reason = ?report.stop_reason,
            "testing finished"
        );
        Ok(report)
    }

    fn run_iteration(&self) -> Result<(RunOutcome, BugTrace), EngineError> {
        let (done_tx, done_rx) = crossbeam::channel::bounded(1);
        let runtime = TestingRuntime::new(Arc::clone(&self.strategy), &self.config, done_tx);
        let recorder = BugTraceRecorder::new();
        runtime.add_observer(recorder.clone());
        runtime.add_observer(LogObserver);
        runtime.start(Arc::clone(&self.test))?;

        // the scheduler holds the sender, so this only returns once the run stops
        let _ = done_rx.recv();
        let outcome = runtime.finish();
        Ok((outcome, recorder.snapshot()))
    }

    fn bug_report(
        &self,
        iteration: u32,
        outcome: RunOutcome,
        bug_trace: BugTrace,
    ) -> Result<Option<BugReport>, EngineError> {
        let Some(bug) = outcome.bug else {
            return Ok(None);
        };
        let report = BugReport {
            kind: bug.kind,
            message: bug.message,
            iteration,
            strategy: bug.strategy,
            schedule: outcome.schedule,
            bug_trace,
            entities: bug.entities,
            witness: bug.witness,
        };
        info!(iteration, kind = %report.kind, "{}", report.message);
        if let Some(dir) = &self.config.output_dir {
            let path = report.write_artifacts(dir, &format!("bug_{iteration}"))?;
            info!(path = %path.display(), "wrote bug trace");
        }
        Ok(Some(report))
    }
}

fn load_replay_trace(config: &Configuration) -> Result<Option<ScheduleTrace>, EngineError> {
    match (&config.strategy, &config.replay_trace_path) {
        (StrategyKind::Replay, Some(path)) => Ok(Some(ScheduleTrace::load(path)?)),
        _ => Ok(None),
    }
}

/// Run `parallel_workers` engines side by side, each on its own random
/// stream of the configured seed, and merge their reports.
pub fn run_portfolio<F>(config: Configuration, test: F) -> Result<TestReport, EngineError>
where
    F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
{
    config.validate()?;
    let workers = config.parallel_workers;
    let test: TestEntry = Arc::new(test);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("skein-worker-{index}"))
        .build()?;

    info!(workers, "portfolio started");
    let reports: Vec<Result<TestReport, EngineError>> = pool.install(|| {
        (0..workers)
            .into_par_iter()
            .map(|worker| {
                TestingEngine::from_entry(config.clone(), Arc::clone(&test), worker as u64)?.run()
            })
            .collect()
    });

    let mut merged: Option<TestReport> = None;
    for report in reports {
        let report = report?;
        match merged.as_mut() {
            Some(merged) => merged.merge(report),
            None => merged = Some(report),
        }
    }
    let mut merged = merged.unwrap_or_else(|| TestReport::new("portfolio"));
    merged.strategy = format!("portfolio of {workers} x {}", merged.strategy);
    Ok(merged)
}
