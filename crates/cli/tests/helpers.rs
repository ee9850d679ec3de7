use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;

use tempfile::tempdir;
use trace_recorder::commands::{
    build_config, load_regions, parse_sink, print_outcome, RecordOptions, RecordOutcome,
};
use trace_recorder::{default_store_path, resolve_output};
use tracer_core::config::InstructionMode;
use tracer_core::dispatcher::DispatchStats;
use tracer_core::model::{MemoryRegion, TraceSummary};
use tracer_core::sink::SinkKind;

#[test]
fn output_precedence_is_cli_then_config_then_env() {
    let cli = Some(PathBuf::from("cli.sqlite"));
    let configured = Some(PathBuf::from("config.sqlite"));
    let env = Some(OsString::from("env.sqlite"));

    assert_eq!(
        resolve_output(cli.clone(), configured.clone(), env.clone(), SinkKind::Sqlite, None),
        cli
    );
    assert_eq!(
        resolve_output(None, configured.clone(), env.clone(), SinkKind::Sqlite, None),
        configured
    );
    assert_eq!(
        resolve_output(None, None, env, SinkKind::Text, None),
        Some(PathBuf::from("env.sqlite"))
    );
}

#[test]
fn output_defaults_depend_on_sink() {
    assert_eq!(
        resolve_output(None, None, None, SinkKind::Sqlite, Some("/usr/bin/demo")),
        Some(PathBuf::from("demo.sqlite"))
    );
    assert_eq!(resolve_output(None, None, Some(OsString::new()), SinkKind::Text, None), None);
    assert_eq!(default_store_path(None), PathBuf::from("trace.sqlite"));
    assert_eq!(default_store_path(Some("")), PathBuf::from("trace.sqlite"));
}

#[test]
fn sink_names_are_validated() {
    assert_eq!(parse_sink("sqlite").expect("sqlite"), SinkKind::Sqlite);
    assert_eq!(parse_sink("relational").expect("relational"), SinkKind::Sqlite);
    assert_eq!(parse_sink("text").expect("text"), SinkKind::Text);
    let err = parse_sink("csv").unwrap_err();
    assert!(err.to_string().contains("Invalid sink"));
}

#[test]
fn cli_flags_override_config_file() {
    let dir = tempdir().expect("tempdir");
    let config_path = dir.path().join("tracer.json");
    fs::write(
        &config_path,
        r#"{"sink": "sqlite", "output": "from-config.sqlite", "process": {"program": "configured"}}"#,
    )
    .expect("write config");

    let options = RecordOptions {
        config: Some(config_path),
        output: Some(dir.path().join("out.txt")),
        sink: Some("text".to_string()),
        program: Some("demo".to_string()),
        all_instructions: true,
        args: vec!["--flag".to_string()],
        ..RecordOptions::default()
    };
    let config = build_config(&options).expect("config");

    assert_eq!(config.sink, SinkKind::Text);
    assert_eq!(config.output, Some(dir.path().join("out.txt")));
    assert_eq!(config.process.program.as_deref(), Some("demo"));
    assert_eq!(config.process.args, Some(vec!["--flag".to_string()]));
    assert_eq!(config.recording.instruction_mode(), InstructionMode::Eager);
}

#[test]
fn regions_come_from_maps_or_config() {
    let dir = tempdir().expect("tempdir");
    let maps = dir.path().join("maps");
    fs::write(&maps, "00400000-00401000 r-xp 00000000 08:02 1 /opt/app/bin/demo\n").expect("write maps");

    let options = RecordOptions {
        maps: Some(maps.clone()),
        output: Some(dir.path().join("trace.sqlite")),
        ..RecordOptions::default()
    };
    let mut config = build_config(&options).expect("config");
    config.regions = vec![MemoryRegion::new("configured", 0x1000, 0x2000)];

    let from_maps = load_regions(&options, &config).expect("maps regions");
    assert_eq!(from_maps, vec![MemoryRegion::new("demo", 0x40_0000, 0x40_1000)]);

    let full = RecordOptions { full_path_maps: true, ..options.clone() };
    assert_eq!(load_regions(&full, &config).expect("full path")[0].name, "/opt/app/bin/demo");

    let from_config = RecordOptions { maps: None, ..options };
    assert_eq!(load_regions(&from_config, &config).expect("config regions")[0].name, "configured");
}

#[test]
fn outcome_report_lists_counts() {
    let outcome = RecordOutcome {
        sink: "sqlite".to_string(),
        output: Some(PathBuf::from("trace.sqlite")),
        events: 7,
        interrupted: true,
        summary: TraceSummary { blocks: 2, instructions: 3, accesses: 4 },
        stats: DispatchStats { accesses_filtered: 2, ..DispatchStats::default() },
    };
    let mut out = Vec::new();
    print_outcome(&mut out, &outcome).expect("print");
    let text = String::from_utf8(out).expect("utf8");

    assert!(text.contains("Output: trace.sqlite"));
    assert!(text.contains("Events: 7"));
    assert!(text.contains("Memory accesses: 4"));
    assert!(text.contains("Dropped by filters/window: 2"));
    assert!(text.contains("Stopped early by signal"));
}
