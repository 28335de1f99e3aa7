use anyhow::Context;
use clap::Args;
use puc8term_config::{FirmwareKind, StopReason, TestAssertion, TestScript};
use puc8term_core::bus::IoBus;
use puc8term_core::firmware::{SelfTest, Terminal};
use puc8term_core::peripherals::{Display, Keyboard};
use puc8term_core::{Firmware, Machine, RunLimits};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct TestArgs {
    /// Path to the test script (YAML)
    #[arg(long)]
    script: PathBuf,

    /// Directory for result.json and junit.xml
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not mirror display output to stdout
    #[arg(long)]
    no_display_stdout: bool,
}

/// What a finished run left behind, independent of the firmware.
struct Outcome {
    stop_reason: StopReason,
    steps: u64,
    cycles: u64,
    transcript: Vec<u8>,
    screen: String,
    failed_check: Option<String>,
}

#[derive(Serialize)]
struct AssertionResult {
    assertion: TestAssertion,
    passed: bool,
}

#[derive(Serialize)]
struct ResultConfig {
    script: String,
    system: Option<String>,
    max_steps: u64,
    wall_time_ms: Option<u64>,
}

#[derive(Serialize)]
struct TestResult {
    status: &'static str,
    firmware: FirmwareKind,
    stop_reason: StopReason,
    steps: u64,
    cycles: u64,
    display: String,
    display_sha256: String,
    screen: String,
    failed_check: Option<String>,
    assertions: Vec<AssertionResult>,
    config: ResultConfig,
    /// The run stopped abnormally without the script expecting it.
    #[serde(skip)]
    unexpected_stop: bool,
}

pub fn run_test(args: &TestArgs) -> anyhow::Result<ExitCode> {
    let script = TestScript::from_file(&args.script)?;
    let script_dir = args.script.parent().unwrap_or_else(|| Path::new("."));

    let system_path = script.inputs.system.as_ref().map(|s| script_dir.join(s));
    let (manifest, board) = crate::load_system(system_path.as_deref())?;
    let mut bus = IoBus::from_config(&board)?;
    if let Some(display) = bus.find_mut::<Display>() {
        display.set_stdout_echo(!args.no_display_stdout);
    }

    let limits = RunLimits {
        max_steps: Some(script.limits.max_steps),
        wall_time: script.limits.wall_time_ms.map(Duration::from_millis),
    };

    info!(
        "Running {:?} firmware for at most {} steps",
        script.inputs.firmware, script.limits.max_steps
    );
    let outcome = match script.inputs.firmware {
        FirmwareKind::Terminal => {
            let ports = crate::terminal_ports(&bus)?;
            let keyboard = bus.find::<Keyboard>().context("Board has no keyboard")?;
            keyboard.state.feed(script.inputs.keys.as_bytes());
            keyboard.state.close();
            let mut machine = Machine::new(Terminal::from_manifest(&manifest, ports), bus)?;
            execute(&mut machine, &limits)
        }
        FirmwareKind::Selftest => {
            let mut machine = Machine::new(SelfTest::new(), bus)?;
            let mut outcome = execute(&mut machine, &limits);
            outcome.failed_check = machine.firmware.failed_check().map(|c| c.expr.to_string());
            outcome
        }
    };

    let assertions: Vec<AssertionResult> = script
        .assertions
        .iter()
        .map(|a| AssertionResult {
            assertion: a.clone(),
            passed: check_assertion(a, &outcome),
        })
        .collect();

    let expects_stop_reason = script
        .assertions
        .iter()
        .any(|a| matches!(a, TestAssertion::ExpectedStopReason(_)));
    let abnormal_stop = matches!(
        outcome.stop_reason,
        StopReason::PortViolation | StopReason::MemoryFault | StopReason::ErrorHalt
    );
    let unexpected_stop = abnormal_stop && !expects_stop_reason;
    let passed = assertions.iter().all(|a| a.passed) && !unexpected_stop;

    let result = TestResult {
        status: if passed { "pass" } else { "fail" },
        firmware: script.inputs.firmware,
        stop_reason: outcome.stop_reason,
        steps: outcome.steps,
        cycles: outcome.cycles,
        display: String::from_utf8_lossy(&outcome.transcript).into_owned(),
        display_sha256: format!("{:x}", Sha256::digest(&outcome.transcript)),
        screen: outcome.screen.clone(),
        failed_check: outcome.failed_check.clone(),
        assertions,
        config: ResultConfig {
            script: args.script.display().to_string(),
            system: system_path.map(|p| p.display().to_string()),
            max_steps: script.limits.max_steps,
            wall_time_ms: script.limits.wall_time_ms,
        },
        unexpected_stop,
    };

    if unexpected_stop {
        tracing::warn!("Run stopped abnormally: {:?}", result.stop_reason);
    }
    if let Some(dir) = &args.output_dir {
        write_artifacts(dir, &result)?;
    }

    info!(
        "Test {}: stop reason {:?} after {} steps",
        result.status, result.stop_reason, result.steps
    );
    for a in result.assertions.iter().filter(|a| !a.passed) {
        tracing::warn!("Assertion failed: {}", describe(&a.assertion));
    }

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn execute<F: Firmware>(machine: &mut Machine<F>, limits: &RunLimits) -> Outcome {
    let stop_reason = machine.run(limits);
    let display = machine.bus.find::<Display>();
    Outcome {
        stop_reason,
        steps: machine.steps(),
        cycles: machine.bus.cycles(),
        transcript: display.map(|d| d.transcript()).unwrap_or_default(),
        screen: display.map(|d| d.screen()).unwrap_or_default(),
        failed_check: None,
    }
}

fn check_assertion(assertion: &TestAssertion, outcome: &Outcome) -> bool {
    match assertion {
        TestAssertion::DisplayContains(a) => {
            String::from_utf8_lossy(&outcome.transcript).contains(&a.display_contains)
        }
        TestAssertion::ScreenEquals(a) => outcome.screen == a.screen_equals,
        TestAssertion::ExpectedStopReason(a) => outcome.stop_reason == a.expected_stop_reason,
    }
}

fn describe(assertion: &TestAssertion) -> String {
    match assertion {
        TestAssertion::DisplayContains(a) => format!("display_contains {:?}", a.display_contains),
        TestAssertion::ScreenEquals(a) => format!("screen_equals {:?}", a.screen_equals),
        TestAssertion::ExpectedStopReason(a) => {
            format!("expected_stop_reason {:?}", a.expected_stop_reason)
        }
    }
}

fn write_artifacts(dir: &Path, result: &TestResult) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let result_path = dir.join("result.json");
    std::fs::write(&result_path, serde_json::to_string_pretty(result)?)
        .with_context(|| format!("Failed to write {:?}", result_path))?;

    let junit_path = dir.join("junit.xml");
    std::fs::write(&junit_path, junit_xml(result))
        .with_context(|| format!("Failed to write {:?}", junit_path))?;

    info!("Artifacts written to {:?}", dir);
    Ok(())
}

fn junit_xml(result: &TestResult) -> String {
    let extra = usize::from(result.unexpected_stop);
    let failures = result.assertions.iter().filter(|a| !a.passed).count() + extra;
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"puc8term\" tests=\"{}\" failures=\"{}\">\n",
        result.assertions.len() + extra,
        failures
    ));
    if result.unexpected_stop {
        xml.push_str(&format!(
            "  <testcase name=\"stop_reason\">\n    <failure message=\"unexpected stop reason {:?}\"/>\n  </testcase>\n",
            result.stop_reason
        ));
    }
    for a in &result.assertions {
        let name = xml_escape(&describe(&a.assertion));
        if a.passed {
            xml.push_str(&format!("  <testcase name=\"{}\"/>\n", name));
        } else {
            xml.push_str(&format!(
                "  <testcase name=\"{}\">\n    <failure message=\"stop reason {:?}\"/>\n  </testcase>\n",
                name, result.stop_reason
            ));
        }
    }
    xml.push_str("</testsuite>\n");
    xml
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() => out.push_str(&format!("&#x{:X};", c as u32)),
            c => out.push(c),
        }
    }
    out
}
