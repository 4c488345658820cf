use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use skein_core::{
    ActionResult, Configuration, EntityId, Event, Fingerprint, ProgramSnapshot, SchedulableInfo,
    StrategyKind, Temperature,
};
use skein_explore::{LivenessViolation, RandomStrategy, ReplayStrategy, SchedulingStrategy};
use skein_runtime::{
    run_portfolio, BugKind, Context, Handling, Machine, Monitor, MonitorContext, StopReason,
    TestReport, TestingEngine,
};
use skein_trace::{ScheduleStep, ScheduleTrace};

fn run<F>(config: Configuration, test: F) -> TestReport
where
    F: Fn(&Context) -> ActionResult + Send + Sync + 'static,
{
    TestingEngine::new(config, test).unwrap().run().unwrap()
}

/// Records the order events arrive in; optionally insists `FromA` wins.
struct Register {
    strict: bool,
    seen: Vec<String>,
    orders: Arc<Mutex<Vec<Vec<String>>>>,
}

impl Machine for Register {
    fn name(&self) -> &str {
        "Register"
    }

    fn start_state(&self) -> &str {
        "Open"
    }

    fn on_event(&mut self, _state: &str, event: &Event, ctx: &Context) -> ActionResult<Handling> {
        if self.seen.is_empty() && self.strict {
            ctx.assert(event.name == "FromA", "B overtook A")?;
        }
        self.seen.push(event.name.clone());
        if self.seen.len() == 2 {
            self.orders.lock().push(self.seen.clone());
        }
        Ok(Handling::Handled)
    }
}

/// Sends one event to `target` when it starts.
struct Writer {
    target: EntityId,
    event: &'static str,
}

impl Machine for Writer {
    fn name(&self) -> &str {
        "Writer"
    }

    fn start_state(&self) -> &str {
        "Init"
    }

    fn on_entry(&mut self, _state: &str, ctx: &Context) -> ActionResult {
        ctx.send(self.target, Event::new(self.event))
    }

    fn on_event(&mut self, _state: &str, _event: &Event, _ctx: &Context) -> ActionResult<Handling> {
        Ok(Handling::Unhandled)
    }
}

fn racing_writers(
    strict: bool,
    orders: Arc<Mutex<Vec<Vec<String>>>>,
) -> impl Fn(&Context) -> ActionResult + Send + Sync + 'static {
    move |ctx| {
        let register = ctx.create_machine(
            Register {
                strict,
                seen: Vec::new(),
                orders: Arc::clone(&orders),
            },
            None,
        )?;
        ctx.create_machine(
            Writer {
                target: register,
                event: "FromA",
            },
            None,
        )?;
        ctx.create_machine(
            Writer {
                target: register,
                event: "FromB",
            },
            None,
        )?;
        Ok(())
    }
}

fn random_config(iterations: u32) -> Configuration {
    Configuration {
        iterations,
        seed: 7,
        ..Default::default()
    }
}

#[test]
fn test_random_finds_reordering_bug() {
    let report = run(random_config(200), racing_writers(true, Arc::default()));
    let bug = report.first_bug().expect("the race is found");
    assert_eq!(bug.kind, BugKind::AssertionFailure);
    assert_eq!(bug.message, "B overtook A");
    assert_eq!(report.stop_reason, StopReason::BugFound);
    assert!(bug.strategy.starts_with("random"));
}

#[test]
fn test_same_seed_same_bug() {
    let first = run(random_config(200), racing_writers(true, Arc::default()));
    let second = run(random_config(200), racing_writers(true, Arc::default()));
    let (a, b) = (first.first_bug().unwrap(), second.first_bug().unwrap());
    assert_eq!(a.iteration, b.iteration);
    assert_eq!(a.schedule, b.schedule);
    assert_eq!(a.bug_trace, b.bug_trace);
}

#[test]
fn test_replay_reproduces_bug() {
    let report = run(random_config(200), racing_writers(true, Arc::default()));
    let bug = report.first_bug().unwrap();

    let replayed = TestingEngine::replay(
        Configuration::default(),
        racing_writers(true, Arc::default()),
        bug.schedule.clone(),
    )
    .unwrap();
    let again = replayed.first_bug().expect("replay hits the bug");
    assert_eq!(again.kind, bug.kind);
    assert_eq!(again.message, bug.message);
    assert_eq!(again.schedule, bug.schedule);
    assert_eq!(again.bug_trace, bug.bug_trace);
    assert_eq!(replayed.iterations, 1);
}

/// Passes every decision through and records the fingerprint of the
/// program state at each scheduling point of the latest run.
struct FingerprintLog {
    inner: Box<dyn SchedulingStrategy>,
    seen: Arc<Mutex<Vec<Fingerprint>>>,
}

impl SchedulingStrategy for FingerprintLog {
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
        self.seen.lock().clear();
        self.inner.prepare_for_next_iteration()
    }

    fn reset(&mut self) {
        self.seen.lock().clear();
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
        self.inner.description()
    }

    fn observes_program_state(&self) -> bool {
        true
    }

    fn observe_program_state(&mut self, snapshot: &ProgramSnapshot) -> Option<LivenessViolation> {
        self.seen.lock().push(snapshot.fingerprint());
        None
    }

    fn replay_error(&self) -> Option<String> {
        self.inner.replay_error()
    }
}

#[test]
fn test_replay_visits_same_program_states() {
    let config = random_config(200);
    let original = Arc::new(Mutex::new(Vec::new()));
    let strategy = FingerprintLog {
        inner: Box::new(RandomStrategy::new(config.seed, config.max_fair_steps)),
        seen: Arc::clone(&original),
    };
    let report = TestingEngine::with_strategy(
        config.clone(),
        racing_writers(true, Arc::default()),
        Box::new(strategy),
    )
    .unwrap()
    .run()
    .unwrap();
    let bug = report.first_bug().expect("the race is found");

    let replayed = Arc::new(Mutex::new(Vec::new()));
    let strategy = FingerprintLog {
        inner: Box::new(ReplayStrategy::new(bug.schedule.clone(), true)),
        seen: Arc::clone(&replayed),
    };
    let config = Configuration {
        iterations: 1,
        ..config
    };
    let again = TestingEngine::with_strategy(
        config,
        racing_writers(true, Arc::default()),
        Box::new(strategy),
    )
    .unwrap()
    .run()
    .unwrap();
    let again = again.first_bug().expect("replay hits the bug");
    assert_eq!(again.message, bug.message);
    assert_eq!(again.bug_trace, bug.bug_trace);

    let original = original.lock().clone();
    assert!(!original.is_empty());
    assert_eq!(*replayed.lock(), original);
}

/// Blocks in its entry action on an event nobody sends.
struct Stuck;

impl Machine for Stuck {
    fn name(&self) -> &str {
        "Stuck"
    }

    fn start_state(&self) -> &str {
        "Init"
    }

    fn on_entry(&mut self, _state: &str, ctx: &Context) -> ActionResult {
        ctx.receive(&["Never"])?;
        Ok(())
    }

    fn on_event(&mut self, _state: &str, _event: &Event, _ctx: &Context) -> ActionResult<Handling> {
        Ok(Handling::Unhandled)
    }
}

#[test]
fn test_replay_reproduces_deadlock() {
    let test = |ctx: &Context| -> ActionResult {
        ctx.create_machine(Stuck, None)?;
        ctx.create_machine(Stuck, None)?;
        Ok(())
    };
    let report = run(random_config(1), test);
    let bug = report.first_bug().expect("deadlock");
    assert_eq!(bug.kind, BugKind::Deadlock);

    let replayed = TestingEngine::replay(Configuration::default(), test, bug.schedule.clone()).unwrap();
    let again = replayed.first_bug().expect("replay deadlocks");
    assert_eq!(again.kind, BugKind::Deadlock);
    assert_eq!(again.message, bug.message);
    assert_eq!(again.schedule, bug.schedule);
}

#[test]
fn test_replay_of_foreign_trace_diverges() {
    let trace = ScheduleTrace::from_steps(vec![ScheduleStep::SchedulingChoice {
        entity: EntityId(5),
        operation: skein_core::Operation::create(),
    }]);
    let report = TestingEngine::replay(
        Configuration::default(),
        racing_writers(false, Arc::default()),
        trace,
    )
    .unwrap();
    let bug = report.first_bug().expect("divergence");
    assert_eq!(bug.kind, BugKind::ReplayDivergence);
    assert_eq!(bug.message, "Trace is not reproducible: cannot detect id '5'.");
}

#[test]
fn test_dpor_explores_two_racing_sends_in_two_runs() {
    let orders = Arc::new(Mutex::new(Vec::new()));
    let config = Configuration {
        iterations: 50,
        strategy: StrategyKind::Dpor,
        ..Default::default()
    };
    let report = run(config, racing_writers(false, Arc::clone(&orders)));
    assert!(!report.found_bug());
    assert_eq!(report.iterations, 2);
    assert_eq!(report.stop_reason, StopReason::ScheduleSpaceExhausted);

    let distinct: BTreeSet<Vec<String>> = orders.lock().iter().cloned().collect();
    assert_eq!(distinct.len(), 2);
}

#[test]
fn test_dpor_finds_reordering_bug() {
    let config = Configuration {
        iterations: 50,
        strategy: StrategyKind::Dpor,
        ..Default::default()
    };
    let report = run(config, racing_writers(true, Arc::default()));
    assert_eq!(report.first_bug().map(|b| b.message.as_str()), Some("B overtook A"));
    assert!(report.iterations <= 2);
}

#[test]
fn test_pct_finds_reordering_bug() {
    let config = Configuration {
        iterations: 200,
        strategy: StrategyKind::Pct {
            priority_switch_bound: 2,
        },
        ..Default::default()
    };
    let report = run(config, racing_writers(true, Arc::default()));
    assert!(report.found_bug());
    assert!(report.first_bug().unwrap().strategy.starts_with("pct"));
}

/// The harness races a writer it created: `FromA` comes from the harness,
/// `FromB` from the writer.
fn harness_races_writer(
    strict: bool,
    orders: Arc<Mutex<Vec<Vec<String>>>>,
) -> impl Fn(&Context) -> ActionResult + Send + Sync + 'static {
    move |ctx| {
        let register = ctx.create_machine(
            Register {
                strict,
                seen: Vec::new(),
                orders: Arc::clone(&orders),
            },
            None,
        )?;
        ctx.create_machine(
            Writer {
                target: register,
                event: "FromB",
            },
            None,
        )?;
        ctx.send(register, Event::new("FromA"))
    }
}

#[test]
fn test_dfs_exhausts_small_program() {
    let orders = Arc::new(Mutex::new(Vec::new()));
    let config = Configuration {
        iterations: 100_000,
        strategy: StrategyKind::Dfs,
        ..Default::default()
    };
    let report = run(config, harness_races_writer(false, Arc::clone(&orders)));
    assert!(!report.found_bug());
    assert_eq!(report.stop_reason, StopReason::ScheduleSpaceExhausted);
    assert!(report.iterations > 2);

    let distinct: BTreeSet<Vec<String>> = orders.lock().iter().cloned().collect();
    assert_eq!(distinct.len(), 2);
}

#[test]
fn test_dfs_enumerates_every_random_value() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let config = Configuration {
        iterations: 100,
        strategy: StrategyKind::Dfs,
        ..Default::default()
    };
    let report = run(config, move |ctx: &Context| -> ActionResult {
        let coin = ctx.random_bool()?;
        let die = ctx.random_int(3)?;
        log.lock().push((coin, die));
        Ok(())
    });
    assert_eq!(report.stop_reason, StopReason::ScheduleSpaceExhausted);
    assert_eq!(report.iterations, 6);
    let distinct: BTreeSet<(bool, u64)> = seen.lock().iter().copied().collect();
    assert_eq!(distinct.len(), 6);
}

#[test]
fn test_dfs_finds_reordering_bug() {
    let config = Configuration {
        iterations: 100_000,
        strategy: StrategyKind::Dfs,
        ..Default::default()
    };
    let report = run(config, harness_races_writer(true, Arc::default()));
    let bug = report.first_bug().expect("the race is found");
    assert_eq!(bug.message, "B overtook A");
    assert_eq!(bug.strategy, "dfs");
    assert_eq!(report.stop_reason, StopReason::BugFound);
}

#[test]
fn test_delay_bounding_finds_reordering_bug() {
    let config = Configuration {
        iterations: 500,
        strategy: StrategyKind::DelayBounding { max_delays: 2 },
        ..Default::default()
    };
    let report = run(config, racing_writers(true, Arc::default()));
    let bug = report.first_bug().expect("the race is found");
    assert_eq!(bug.message, "B overtook A");
    assert!(bug.strategy.starts_with("delay-bounding"));
}

#[test]
fn test_delay_bounding_finishes_without_bug() {
    let orders = Arc::new(Mutex::new(Vec::new()));
    let config = Configuration {
        iterations: 20,
        strategy: StrategyKind::DelayBounding { max_delays: 2 },
        ..Default::default()
    };
    let report = run(config, racing_writers(false, Arc::clone(&orders)));
    assert!(!report.found_bug());
    assert_eq!(report.iterations, 20);
    assert_eq!(orders.lock().len(), 20);
}

#[test]
fn test_bug_artifacts_are_written() {
    let dir = std::env::temp_dir().join(format!("skein-artifacts-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let config = Configuration {
        iterations: 1,
        output_dir: Some(dir.clone()),
        ..Default::default()
    };
    let report = run(config, |ctx| {
        ctx.random_bool()?;
        ctx.assert(false, "impossible coin")
    });
    assert!(report.found_bug());

    let schedule = ScheduleTrace::load(dir.join("bug_0.schedule.json")).unwrap();
    assert_eq!(schedule, report.first_bug().unwrap().schedule);
    assert!(dir.join("bug_0.bugtrace.json").exists());
    let text = std::fs::read_to_string(dir.join("bug_0.txt")).unwrap();
    assert!(text.contains("impossible coin"));
    std::fs::remove_dir_all(&dir).unwrap();
}

/// Sends itself `Tick` forever.
struct Ticker;

impl Machine for Ticker {
    fn name(&self) -> &str {
        "Ticker"
    }

    fn start_state(&self) -> &str {
        "Spin"
    }

    fn on_event(&mut self, _state: &str, _event: &Event, ctx: &Context) -> ActionResult<Handling> {
        ctx.send(ctx.id(), Event::new("Tick"))?;
        Ok(Handling::Handled)
    }
}

/// Hot until it hears `Done`.
struct Progress;

impl Monitor for Progress {
    fn name(&self) -> &str {
        "Progress"
    }

    fn start_state(&self) -> &str {
        "Waiting"
    }

    fn on_event(&mut self, _state: &str, event: &Event, ctx: &mut MonitorContext) -> Handling {
        if event.name == "Done" {
            ctx.goto("Finished");
            Handling::Handled
        } else {
            Handling::Unhandled
        }
    }

    fn temperature(&self, state: &str) -> Temperature {
        if state == "Waiting" {
            Temperature::Hot
        } else {
            Temperature::Cold
        }
    }
}

#[test]
fn test_hot_monitor_at_end_of_run() {
    let report = run(random_config(1), |ctx| {
        ctx.register_monitor(Progress)?;
        ctx.create_machine(Mute, Some(Event::new("Ping")))?;
        Ok(())
    });
    let bug = report.first_bug().expect("liveness bug");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert_eq!(
        bug.message,
        "Monitor 'Progress' detected liveness bug in hot state 'Waiting' at the end of program execution."
    );
    assert_eq!(bug.entities, vec![EntityId(1)]);
}

#[test]
fn test_cooled_monitor_is_fine() {
    let report = run(random_config(5), |ctx| {
        ctx.register_monitor(Progress)?;
        ctx.monitor("Progress", Event::new("Done"))
    });
    assert!(!report.found_bug());
}

#[test]
fn test_monitor_rejects_unknown_event() {
    let report = run(random_config(1), |ctx| {
        ctx.register_monitor(Progress)?;
        ctx.monitor("Progress", Event::new("Bogus"))
    });
    assert_eq!(
        report.first_bug().map(|b| b.message.as_str()),
        Some("Monitor 'Progress' received event 'Bogus' that cannot be handled.")
    );
}

/// Swallows everything.
struct Mute;

impl Machine for Mute {
    fn name(&self) -> &str {
        "Mute"
    }

    fn start_state(&self) -> &str {
        "Init"
    }

    fn on_event(&mut self, _state: &str, _event: &Event, _ctx: &Context) -> ActionResult<Handling> {
        Ok(Handling::Handled)
    }
}

fn spinning_while_hot(ctx: &Context) -> ActionResult {
    ctx.register_monitor(Progress)?;
    ctx.create_machine(Ticker, Some(Event::new("Tick")))?;
    Ok(())
}

#[test]
fn test_temperature_threshold_reports_liveness_bug() {
    let config = Configuration {
        iterations: 1,
        liveness_checking: true,
        liveness_temperature_threshold: 10,
        ..Default::default()
    };
    let report = run(config, spinning_while_hot);
    let bug = report.first_bug().expect("liveness bug");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert_eq!(
        bug.message,
        "Monitor 'Progress' detected potential liveness bug in hot state 'Waiting'."
    );
    assert!(bug.witness.is_none());
}

#[test]
fn test_cycle_detection_reports_hot_cycle() {
    let config = Configuration {
        iterations: 1,
        liveness_checking: true,
        cycle_detection: true,
        ..Default::default()
    };
    let report = run(config, spinning_while_hot);
    let bug = report.first_bug().expect("liveness bug");
    assert_eq!(bug.kind, BugKind::LivenessViolation);
    assert_eq!(
        bug.message,
        "Monitor 'Progress' detected infinite execution that violates a liveness property in hot state 'Waiting'."
    );
    // one dequeue and one self-send of the ticker, the last two decisions of the run
    let witness = bug.witness.as_ref().expect("cycle witness");
    assert_eq!(witness.len(), 2);
    let tail = &bug.schedule.steps()[bug.schedule.len() - 2..];
    assert_eq!(witness.steps(), tail);
    for step in witness.steps() {
        let ScheduleStep::SchedulingChoice { entity, .. } = step else {
            panic!("unexpected step {step:?}");
        };
        assert_eq!(*entity, EntityId(2));
    }
}

#[test]
fn test_step_bound_ends_run_quietly() {
    let config = Configuration {
        iterations: 3,
        max_fair_steps: 20,
        ..Default::default()
    };
    let report = run(config, |ctx| {
        ctx.create_machine(Ticker, Some(Event::new("Tick")))?;
        Ok(())
    });
    assert!(!report.found_bug());
    assert_eq!(report.step_bound_hits, 3);
    assert_eq!(report.max_fair_steps, 20);
}

#[test]
fn test_step_bound_as_bug() {
    let config = Configuration {
        iterations: 1,
        max_fair_steps: 20,
        consider_depth_bound_hit_as_bug: true,
        ..Default::default()
    };
    let report = run(config, |ctx| {
        ctx.create_machine(Ticker, Some(Event::new("Tick")))?;
        Ok(())
    });
    let bug = report.first_bug().expect("step bound");
    assert_eq!(bug.kind, BugKind::StepBoundReached);
    assert_eq!(bug.message, "Scheduling steps bound of 20 reached.");
}

#[test]
fn test_replay_reproduces_step_bound_bug() {
    let config = Configuration {
        iterations: 1,
        max_fair_steps: 20,
        consider_depth_bound_hit_as_bug: true,
        ..Default::default()
    };
    let ticking = |ctx: &Context| -> ActionResult {
        ctx.create_machine(Ticker, Some(Event::new("Tick")))?;
        Ok(())
    };
    let report = run(config.clone(), ticking);
    let bug = report.first_bug().expect("step bound");
    assert_eq!(bug.schedule.len(), 20);

    let replayed = TestingEngine::replay(config, ticking, bug.schedule.clone()).unwrap();
    let again = replayed.first_bug().expect("replay hits the bound");
    assert_eq!(again.kind, BugKind::StepBoundReached);
    assert_eq!(again.message, "Scheduling steps bound of 20 reached.");
    assert_eq!(again.schedule, bug.schedule);
}

#[test]
fn test_all_iterations_run_without_bug() {
    let report = run(random_config(25), racing_writers(false, Arc::default()));
    assert_eq!(report.iterations, 25);
    assert_eq!(report.fair_schedules, 25);
    assert_eq!(report.stop_reason, StopReason::IterationBudgetExhausted);
    assert!(report.min_fair_steps.is_some());
}

#[test]
fn test_portfolio_merges_workers() {
    let config = Configuration {
        iterations: 10,
        parallel_workers: 3,
        ..Default::default()
    };
    let report = run_portfolio(config, racing_writers(false, Arc::default())).unwrap();
    assert_eq!(report.iterations, 30);
    assert!(report.strategy.starts_with("portfolio of 3"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = Configuration {
        iterations: 0,
        ..Default::default()
    };
    assert!(TestingEngine::new(config, |_ctx| Ok(())).is_err());
}
