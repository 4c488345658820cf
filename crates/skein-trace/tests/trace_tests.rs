use skein_core::{EntityId, Operation};
use skein_trace::{
    Actor, BugStepKind, BugTrace, RandomValue, RuntimeEvent, RuntimeObserver, ScheduleStep,
    ScheduleTrace,
};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("skein-trace-{}-{name}", std::process::id()))
}

fn sample_schedule() -> ScheduleTrace {
    let mut trace = ScheduleTrace::new();
    trace.add_scheduling_choice(EntityId(0), Operation::create());
    trace.add_scheduling_choice(EntityId(1), Operation::send(EntityId(2)));
    trace.add_boolean_choice(false);
    trace.add_fair_boolean_choice("retry", true);
    trace.add_integer_choice(3);
    trace
}

#[test]
fn test_schedule_trace_file_roundtrip() {
    let trace = sample_schedule();
    let path = temp_path("schedule.json");
    trace.save(&path).unwrap();
    let loaded = ScheduleTrace::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, trace);
    assert_eq!(loaded.len(), 5);
}

#[test]
fn test_schedule_trace_records_operation_triples() {
    let json = sample_schedule().to_json().unwrap();
    assert!(json.contains(r#""type": "scheduling_choice""#));
    assert!(json.contains(r#""kind": "send""#));
    assert!(json.contains(r#""target_type": "inbox""#));
    assert!(json.contains(r#""fair_id": "retry""#));
}

#[test]
fn test_unbound_target_survives_serialization() {
    let trace = sample_schedule();
    let back = ScheduleTrace::from_json(&trace.to_json().unwrap()).unwrap();
    match &back[0] {
        ScheduleStep::SchedulingChoice { operation, .. } => assert!(operation.target.is_unbound()),
        other => panic!("unexpected step {other:?}"),
    }
}

#[test]
fn test_load_missing_file_is_io_error() {
    let result = ScheduleTrace::load(temp_path("does-not-exist.json"));
    assert!(matches!(result, Err(skein_trace::TraceError::Io(_))));
}

#[test]
fn test_bug_trace_from_observer_events() {
    let harness = Actor::new(EntityId(0), "Harness(0)", None);
    let server = Actor::new(EntityId(1), "Server(1)", Some("Init".to_string()));
    let events = vec![
        RuntimeEvent::MachineCreated {
            creator: harness.clone(),
            machine: EntityId(1),
            machine_name: "Server(1)".to_string(),
            event: None,
        },
        RuntimeEvent::EventSent {
            sender: harness,
            target: EntityId(1),
            target_name: "Server(1)".to_string(),
            event: "Ping".to_string(),
        },
        RuntimeEvent::EventDequeued {
            machine: server.clone(),
            event: "Ping".to_string(),
        },
        RuntimeEvent::RandomChoice {
            actor: server.clone(),
            value: RandomValue::Int(2),
        },
        RuntimeEvent::Halted { machine: server },
    ];

    let mut trace = BugTrace::new();
    for event in &events {
        trace.on_event(event);
    }

    let kinds: Vec<&str> = trace
        .steps()
        .iter()
        .map(|s| match s.kind {
            BugStepKind::CreateMachine { .. } => "create",
            BugStepKind::SendEvent { .. } => "send",
            BugStepKind::DequeueEvent { .. } => "dequeue",
            BugStepKind::RandomChoice { .. } => "random",
            BugStepKind::Halt => "halt",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["create", "send", "dequeue", "random", "halt"]);

    let path = temp_path("bugtrace.json");
    trace.save(&path).unwrap();
    let loaded = BugTrace::load(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(loaded, trace);
}
