use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn test_cli_interactive_writes_snapshot() {
    let system = std::fs::canonicalize("../../configs/terminal.yaml").unwrap();

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let snapshot_path =
        std::env::temp_dir().join(format!("puc8term-interactive-snapshot-{}.json", nonce));
    let _ = std::fs::remove_file(&snapshot_path);

    let mut child = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args([
            "--system",
            system.to_str().unwrap(),
            "--snapshot",
            snapshot_path.to_str().unwrap(),
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to execute puc8term");

    // Dropping stdin closes it, which ends the session once drained
    {
        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(b"echo\nhi").unwrap();
    }
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# echo"));
    assert!(stdout.ends_with("# hi"));
    assert!(stdout.contains("\x1b[2J"));

    let snapshot_content = std::fs::read_to_string(&snapshot_path).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&snapshot_content).unwrap();
    assert_eq!(snapshot["firmware"], "terminal");
    assert_eq!(snapshot["state"], "running");
    assert_eq!(snapshot["program"]["redraws"], 2);
    assert_eq!(snapshot["peripherals"]["display"]["screen"], "# hi");
    assert_eq!(snapshot["peripherals"]["keyboard"]["closed"], true);

    let _ = std::fs::remove_file(&snapshot_path);
}

#[test]
fn test_cli_interactive_max_steps() {
    let output = Command::new(env!("CARGO_BIN_EXE_puc8term"))
        .args(["--max-steps", "5", "--no-display-stdout"])
        .stdin(Stdio::null())
        .output()
        .expect("Failed to execute puc8term");

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}
