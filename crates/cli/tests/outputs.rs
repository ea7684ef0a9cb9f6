use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("tickwire-{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("Failed to write temp file");
    path
}

/// Copies the ATmega8 chip fixture next to a manifest with the given fields.
fn write_system(dir: &Path, clock: &str, prescaler: u16, handler_cycles: u32) {
    std::fs::copy("../../tests/fixtures/atmega8.yaml", dir.join("atmega8.yaml"))
        .expect("Failed to copy chip fixture");
    write_file(
        dir,
        "system.yaml",
        &format!(
            r#"
name: "test-system"
chip: "atmega8.yaml"
clock: "{}"
prescaler: {}
handler_cycles: {}
"#,
            clock, prescaler, handler_cycles
        ),
    );
}

fn run_script(script: &Path, extra: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tickwire"))
        .args(["test", "--script", script.to_str().unwrap()])
        .args(extra)
        .output()
        .expect("Failed to execute command")
}

#[test]
fn test_cli_test_mode_outputs() {
    let dir = temp_dir("outputs");
    // 1 MHz, clk/64, 8-bit: one overflow every 16384 cycles
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
limits:
  max_cycles: 100000
assertions:
  - handler_invocations:
      expected: 6
      tolerance: 1
  - no_coalesced_overflows: true
  - expected_stop_reason: max_cycles
"#,
    );
    let output_dir = dir.join("artifacts");

    let output = run_script(&script, &["--output-dir", output_dir.to_str().unwrap()]);
    assert!(output.status.success());

    let junit = std::fs::read_to_string(output_dir.join("junit.xml")).unwrap();
    assert!(junit.contains("<testsuite"));
    assert!(junit.contains("<testcase"));
    assert!(!junit.contains("<failure"));

    let result_content = std::fs::read_to_string(output_dir.join("result.json")).unwrap();
    let result: serde_json::Value = serde_json::from_str(&result_content).unwrap();

    assert_eq!(result["status"], "pass");
    assert_eq!(result["stop_reason"], "max_cycles");
    assert_eq!(result["invocations"], 6);
    assert_eq!(result["coalesced"], 0);
    assert_eq!(result["config_hash"].as_str().unwrap().len(), 64);
    assert!(result["config"]["system"].is_null());
    assert_eq!(result["assertions"].as_array().unwrap().len(), 3);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_with_system_manifest() {
    let dir = temp_dir("system");
    write_system(&dir, "8MHz", 64, 1);
    // 1000 timer ticks at clk/64 is 8 ms; T = 2.048 ms
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
inputs:
  system: "system.yaml"
limits:
  max_cycles: 64000
assertions:
  - handler_invocations:
      expected: 3
      tolerance: 1
  - expected_stop_reason: max_cycles
"#,
    );
    let junit_path = dir.join("report.xml");

    let output = run_script(&script, &["--junit", junit_path.to_str().unwrap()]);
    assert!(output.status.success());

    let junit = std::fs::read_to_string(&junit_path).unwrap();
    assert!(junit.contains("<testsuite"));
    assert!(junit.contains("tickwire test"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_wall_time() {
    let dir = temp_dir("walltime");
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
limits:
  max_cycles: 40000000
  wall_time_ms: 0
assertions:
  - expected_stop_reason: wall_time
"#,
    );

    let output = run_script(&script, &[]);

    // Should pass because we expect wall_time stop reason
    assert!(output.status.success());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_max_cycles_guard() {
    let dir = temp_dir("huge");
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
limits:
  max_cycles: 60000000
"#,
    );

    let output = run_script(&script, &[]);

    // Should fail due to MAX_ALLOWED_CYCLES guard
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_invocation_mismatch() {
    let dir = temp_dir("mismatch");
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
limits:
  max_cycles: 20000
assertions:
  - handler_invocations:
      expected: 100
"#,
    );
    let output_dir = dir.join("artifacts");

    let output = run_script(&script, &["--output-dir", output_dir.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));

    let junit = std::fs::read_to_string(output_dir.join("junit.xml")).unwrap();
    assert!(junit.contains("<failure"));
    let result: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output_dir.join("result.json")).unwrap())
            .unwrap();
    assert_eq!(result["status"], "fail");
    assert_eq!(result["assertions"][0]["passed"], false);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_handler_overrun_coalesces() {
    let dir = temp_dir("overrun");
    // clk/1 overflows every 256 cycles, the handler takes 300
    write_system(&dir, "1MHz", 1, 300);
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
inputs:
  system: "system.yaml"
limits:
  max_cycles: 20000
assertions:
  - no_coalesced_overflows: true
"#,
    );

    let output = run_script(&script, &[]);
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_missing_system() {
    let dir = temp_dir("missing");
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
inputs:
  system: "does-not-exist.yaml"
limits:
  max_cycles: 100
"#,
    );

    let output = run_script(&script, &[]);
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_unsupported_prescaler() {
    let dir = temp_dir("prescaler");
    write_system(&dir, "8MHz", 100, 1);
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "1.0"
inputs:
  system: "system.yaml"
limits:
  max_cycles: 100
"#,
    );

    let output = run_script(&script, &[]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported clock divisor 100"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_bad_schema_version() {
    let dir = temp_dir("schema");
    let script = write_file(
        &dir,
        "script.yaml",
        r#"
schema_version: "2.0"
limits:
  max_cycles: 100
"#,
    );

    let output = run_script(&script, &[]);
    assert_eq!(output.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&dir);
}
