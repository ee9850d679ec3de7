use std::fs;
use std::path::Path;

use predicates::prelude::*;
use rusqlite::Connection;
use tempfile::tempdir;

const EVENTS: &str = r#"{"basic_block_entry":{"start":"0x401000","end":"0x401010"}}
{"pre_instruction":{"address":"0x401000","disassembly":"push rbp","bytes":"55"}}
{"memory_access":{"instruction":{"address":"0x401004","disassembly":"mov eax, dword ptr [rbx]","bytes":"8b03"},"accesses":[{"address":"0x7000","size":4,"flags":"R","value":{"int":3735928559}}]}}
{"library_call":{"name":"puts"}}
"#;

fn write_events(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("events.jsonl");
    fs::write(&path, EVENTS).expect("write events");
    path
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

/// `record` replays an event file into a SQLite store and reports counts.
#[test]
fn record_writes_sqlite_store() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());
    let output = dir.path().join("trace.sqlite");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .env_remove("TRACER_OUTPUT")
        .arg("record")
        .arg("--events")
        .arg(&events)
        .arg("--output")
        .arg(&output)
        .arg("--program")
        .arg("demo")
        .arg("--")
        .arg("hello world")
        .assert()
        .success()
        .stdout(predicate::str::contains("Recorded trace:"))
        .stdout(predicate::str::contains("Instructions: 2"))
        .stdout(predicate::str::contains("Memory accesses: 1"));

    let conn = Connection::open(&output).expect("open store");
    assert_eq!(count(&conn, "bbl"), 2);
    assert_eq!(count(&conn, "ins"), 2);
    assert_eq!(count(&conn, "mem"), 1);

    let value: String = conn.query_row("SELECT value FROM mem", [], |row| row.get(0)).expect("mem");
    assert_eq!(value, "0xdeadbeef");
    let program: String = conn
        .query_row("SELECT value FROM info WHERE key = 'PROGRAM'", [], |row| row.get(0))
        .expect("program");
    assert_eq!(program, "demo");
    let args: String = conn
        .query_row("SELECT value FROM info WHERE key = 'ARGS'", [], |row| row.get(0))
        .expect("args");
    assert_eq!(args, "'hello world'");
}

/// The text sink owns stdout; the run report goes to stderr.
#[test]
fn record_text_sink_streams_to_stdout() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .env_remove("TRACER_OUTPUT")
        .arg("record")
        .arg("--sink")
        .arg("text")
        .arg("--all-instructions")
        .arg("--events")
        .arg(&events)
        .assert()
        .success()
        .stdout(predicate::str::contains("BB address: 0x401000, size: 16"))
        .stdout(predicate::str::contains("Inst address: 0x401000, raw: 55, disas: push rbp"))
        .stdout(predicate::str::contains(
            "Read instAddress: 0x401004, accessAddress: 0x7000, size: 4, value: efbeadde",
        ))
        .stdout(predicate::str::contains("Recorded trace:").not())
        .stderr(predicate::str::contains("Output: <stdout>"));
}

/// Events can be piped through stdin.
#[test]
fn record_reads_events_from_stdin() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("trace.txt");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("record")
        .arg("--sink")
        .arg("text")
        .arg("--output")
        .arg(&output)
        .write_stdin(EVENTS)
        .assert()
        .success();

    let text = fs::read_to_string(&output).expect("read trace");
    assert!(text.lines().any(|line| line == "Inst address: 0x0, raw: , disas: puts"));
}

/// Without --output the TRACER_OUTPUT environment variable is used.
#[test]
fn record_uses_output_from_environment() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());
    let output = dir.path().join("from-env.sqlite");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .env("TRACER_OUTPUT", &output)
        .arg("record")
        .arg("--events")
        .arg(&events)
        .assert()
        .success();

    assert!(output.exists(), "store should be written to TRACER_OUTPUT");
}

/// With no output configured, the store is named after the traced program.
#[test]
fn record_defaults_to_program_named_store() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .current_dir(dir.path())
        .env_remove("TRACER_OUTPUT")
        .arg("record")
        .arg("--events")
        .arg(&events)
        .arg("--program")
        .arg("/usr/bin/demo")
        .assert()
        .success();

    assert!(dir.path().join("demo.sqlite").exists());
}

/// A malformed line aborts the replay, but the partial trace is still finalized.
#[test]
fn record_reports_bad_event_line() {
    let dir = tempdir().expect("tempdir");
    let events = dir.path().join("events.jsonl");
    fs::write(&events, "{\"basic_block_entry\":{\"start\":16,\"end\":32}}\n{\"nope\":{}}\n")
        .expect("write events");
    let output = dir.path().join("trace.sqlite");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("record")
        .arg("--events")
        .arg(&events)
        .arg("--output")
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to replay engine events"))
        .stderr(predicate::str::contains("line 2"));

    let conn = Connection::open(&output).expect("open partial store");
    assert_eq!(count(&conn, "bbl"), 1);
}

#[test]
fn record_rejects_unknown_sink() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("record")
        .arg("--events")
        .arg(&events)
        .arg("--sink")
        .arg("csv")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid sink 'csv'"));
}

#[test]
fn record_fails_for_missing_event_file() {
    let dir = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("record")
        .arg("--events")
        .arg(dir.path().join("missing.jsonl"))
        .arg("--output")
        .arg(dir.path().join("trace.sqlite"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open event stream"));
}

/// Relocations and maps from the config reach the store.
#[test]
fn record_applies_config_relocations_and_maps() {
    let dir = tempdir().expect("tempdir");
    let events = write_events(dir.path());
    let config = dir.path().join("tracer.yaml");
    fs::write(
        &config,
        "relocations:\n  - begin: 0x401000\n    end: 0x402000\n    new_base: 0x1000\n    comment: demo\n",
    )
    .expect("write config");
    let maps = dir.path().join("maps");
    fs::write(&maps, "00401000-00402000 r-xp 00000000 08:02 1 /usr/bin/demo\n").expect("write maps");
    let output = dir.path().join("trace.sqlite");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("record")
        .arg("--config")
        .arg(&config)
        .arg("--maps")
        .arg(&maps)
        .arg("--events")
        .arg(&events)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let conn = Connection::open(&output).expect("open store");
    let first_block: String =
        conn.query_row("SELECT addr FROM bbl ORDER BY rowid LIMIT 1", [], |row| row.get(0)).expect("bbl");
    assert_eq!(first_block, "0x0000000000001000");
    let access: String = conn.query_row("SELECT addr FROM mem", [], |row| row.get(0)).expect("mem");
    assert_eq!(access, "0x8000000000007000");
    let lib: String = conn.query_row("SELECT name FROM lib", [], |row| row.get(0)).expect("lib");
    assert_eq!(lib, "demo");
}

#[test]
fn check_config_describes_settings() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("tracer.json");
    fs::write(
        &config,
        r#"{"sink": "text", "recording": {"suppress_instructions": true},
            "relocations": [{"begin": "0x1000", "end": "0x2000", "new_base": "0x9000", "comment": "[Stack]"}]}"#,
    )
    .expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("check-config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Sink: text"))
        .stdout(predicate::str::contains("Instruction mode: suppressed"))
        .stdout(predicate::str::contains("[0x1000, 0x2000) -> 0x9000 ([Stack])"));
}

#[test]
fn check_config_json_reports_normalized_policy() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("tracer.json");
    fs::write(&config, r#"{"sink": "sqlite", "recording": {"suppress_instructions": true}}"#)
        .expect("write config");

    let output = assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("check-config")
        .arg(&config)
        .arg("--json")
        .output()
        .expect("run check-config");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["sink"], "sqlite");
    assert_eq!(report["instruction_mode"], "lazy");
    assert_eq!(report["recording"]["suppress_instructions"], false);
    assert_eq!(report["default_base"], "0x8000000000000000");
}

#[test]
fn check_config_rejects_conflicting_ranges() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("tracer.json");
    fs::write(
        &config,
        r#"{"relocations": [
            {"begin": 4096, "end": 8192, "new_base": 65536},
            {"begin": 0, "end": 4096, "new_base": 67584}
        ]}"#,
    )
    .expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("trace-recorder")
        .arg("check-config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("conflicts with"));
}

/// SIGINT while the recorder waits on an idle pipe ends the run cleanly and
/// the trace recorded so far is finalized.
#[cfg(unix)]
#[test]
fn record_finalizes_when_interrupted_while_idle() {
    use std::io::Write;
    use std::process::{Command, Stdio};
    use std::thread;
    use std::time::{Duration, Instant};

    use nix::sys::signal::{kill, Signal};
    use nix::sys::stat::Mode;
    use nix::unistd::{mkfifo, Pid};

    let dir = tempdir().expect("tempdir");
    let fifo = dir.path().join("events.fifo");
    mkfifo(&fifo, Mode::S_IRWXU).expect("mkfifo");
    let output = dir.path().join("trace.txt");

    let mut child = Command::new(env!("CARGO_BIN_EXE_trace-recorder"))
        .arg("record")
        .arg("--sink")
        .arg("text")
        .arg("--events")
        .arg(&fifo)
        .arg("--output")
        .arg(&output)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn recorder");

    // Blocks until the recorder opens the read end; kept open and idle below.
    let mut writer = fs::OpenOptions::new().write(true).open(&fifo).expect("open fifo");
    writer
        .write_all(b"{\"basic_block_entry\":{\"start\":16,\"end\":32}}\n")
        .expect("write event");

    let deadline = Instant::now() + Duration::from_secs(10);
    while !fs::read_to_string(&output).unwrap_or_default().contains("BB address: 0x10") {
        assert!(Instant::now() < deadline, "recorder never handled the first event");
        thread::sleep(Duration::from_millis(20));
    }

    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).expect("send SIGINT");
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().expect("poll recorder") {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("recorder kept waiting for events after SIGINT");
        }
        thread::sleep(Duration::from_millis(20));
    };
    drop(writer);

    let report = child.wait_with_output().expect("collect output");
    assert!(status.success(), "stderr: {}", String::from_utf8_lossy(&report.stderr));
    let stdout = String::from_utf8_lossy(&report.stdout);
    assert!(stdout.contains("Events: 1"), "unexpected report: {stdout}");
    assert!(stdout.contains("Stopped early by signal"), "unexpected report: {stdout}");

    let text = fs::read_to_string(&output).expect("read trace");
    assert_eq!(text, "BB address: 0x10, size: 16\n");
}
