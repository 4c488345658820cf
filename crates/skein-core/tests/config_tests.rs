use skein_core::{ConfigError, Configuration, ReductionKind, StrategyKind};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("skein-core-{}-{name}", std::process::id()))
}

#[test]
fn test_config_file_roundtrip() {
    let config = Configuration {
        iterations: 12,
        strategy: StrategyKind::Dpor,
        reduction: ReductionKind::ForceSchedule,
        liveness_checking: true,
        cycle_detection: true,
        seed: 7,
        ..Configuration::default()
    };
    let path = temp_path("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    let loaded = Configuration::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, config);
}

#[test]
fn test_missing_config_file_is_io_error() {
    let result = Configuration::from_json_file(temp_path("does-not-exist.json"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_invalid_file_contents_are_rejected() {
    let path = temp_path("invalid.json");
    std::fs::write(&path, r#"{ "parallel_workers": 0 }"#).unwrap();
    let result = Configuration::from_json_file(&path);
    std::fs::remove_file(&path).ok();

    match result {
        Err(ConfigError::Invalid(message)) => assert!(message.contains("parallel_workers")),
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn test_replay_with_path_is_accepted() {
    let config = Configuration::from_json_str(
        r#"{ "strategy": { "kind": "replay" }, "replay_trace_path": "bug.schedule.json" }"#,
    )
    .unwrap();
    assert!(config.is_replay());
    assert_eq!(
        config.replay_trace_path.as_deref(),
        Some(std::path::Path::new("bug.schedule.json"))
    );
}
