use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}-{}", prefix, nonce));
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn run_script(dir: &Path, script: &str) -> (std::process::Output, serde_json::Value) {
    let script_path = dir.join("script.yaml");
    std::fs::write(&script_path, script).expect("Failed to write script");
    let output_dir = dir.join("artifacts");

    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args([
            "test",
            "--script",
            script_path.to_str().unwrap(),
            "--no-display-stdout",
            "--output-dir",
            output_dir.to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute puc8term");

    let result_content = std::fs::read_to_string(output_dir.join("result.json")).unwrap();
    let result: serde_json::Value = serde_json::from_str(&result_content).unwrap();
    (output, result)
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("PUC8 Terminal Simulator"));
}

#[test]
fn test_cli_missing_system_manifest() {
    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args(["--system", "non_existent_system.yaml"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}

#[test]
fn test_cli_test_mode_outputs() {
    let dir = temp_dir("puc8term-tests-outputs");
    let system = std::fs::canonicalize("../../configs/terminal.yaml").unwrap();
    let script = format!(
        r##"
schema_version: "1.0"
inputs:
  system: "{}"
  keys: "hi\rok"
limits:
  max_steps: 100
assertions:
  - display_contains: "hi"
  - screen_equals: "# ok"
  - expected_stop_reason: max_steps
"##,
        system.display()
    );

    let (output, result) = run_script(&dir, &script);
    assert!(output.status.success());

    assert_eq!(result["status"], "pass");
    assert_eq!(result["firmware"], "terminal");
    assert_eq!(result["stop_reason"], "max_steps");
    assert_eq!(result["steps"], 100);
    assert_eq!(result["display"], "# hi# ok");
    assert_eq!(result["display_sha256"].as_str().unwrap().len(), 64);
    assert!(result["config"]["system"]
        .as_str()
        .unwrap()
        .contains("terminal.yaml"));

    let junit = std::fs::read_to_string(dir.join("artifacts").join("junit.xml")).unwrap();
    assert!(junit.contains("<testsuite"));
    assert!(junit.contains("tests=\"3\" failures=\"0\""));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_failed_assertion() {
    let dir = temp_dir("puc8term-tests-fail");
    let script = r##"
schema_version: "1.0"
inputs:
  keys: "abc"
limits:
  max_steps: 50
assertions:
  - screen_equals: "# xyz"
"##;

    let (output, result) = run_script(&dir, script);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(result["status"], "fail");
    assert_eq!(result["screen"], "# abc");
    assert_eq!(result["assertions"][0]["passed"], false);

    let junit = std::fs::read_to_string(dir.join("artifacts").join("junit.xml")).unwrap();
    assert!(junit.contains("<failure"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_test_mode_selftest() {
    let dir = temp_dir("puc8term-tests-selftest");
    let script = r##"
schema_version: "1.0"
inputs:
  firmware: selftest
limits:
  max_steps: 1000
assertions:
  - expected_stop_reason: finished
"##;

    let (output, result) = run_script(&dir, script);
    assert!(output.status.success());
    assert_eq!(result["status"], "pass");
    assert_eq!(result["stop_reason"], "finished");
    assert!(result["failed_check"].is_null());
    assert_eq!(result["display"], "");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_selftest_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .arg("--selftest")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("checks passed"));
}

#[test]
fn test_cli_invalid_script_rejected() {
    let dir = temp_dir("puc8term-tests-invalid");
    let script_path = dir.join("script.yaml");
    std::fs::write(
        &script_path,
        "schema_version: \"1.0\"\ninputs: {}\nlimits:\n  max_steps: 0\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args(["test", "--script", script_path.to_str().unwrap()])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("max_steps"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_cli_prompt_outside_data_memory_rejected() {
    let dir = temp_dir("puc8term-tests-prompt-addr");
    let board = std::fs::canonicalize("../../configs/puc8.yaml").unwrap();
    let manifest_path = dir.join("system.yaml");
    std::fs::write(
        &manifest_path,
        format!(
            "name: \"bad-prompt\"\nboard: \"{}\"\nprompt: \"# \"\nprompt_addr: 0xFF\n",
            board.display()
        ),
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args([
            "--system",
            manifest_path.to_str().unwrap(),
            "--no-display-stdout",
            "--max-steps",
            "5",
        ])
        .stdin(std::process::Stdio::null())
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("does not fit data memory"));

    let _ = std::fs::remove_dir_all(&dir);
}
