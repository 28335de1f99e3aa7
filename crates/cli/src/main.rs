use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use puc8term_config::{BoardDescriptor, SystemManifest};
use puc8term_core::bus::IoBus;
use puc8term_core::firmware::terminal::CARRIAGE_RETURN;
use puc8term_core::firmware::{SelfTest, Terminal, TerminalPorts};
use puc8term_core::metrics::PerformanceMetrics;
use puc8term_core::peripherals::{Display, Keyboard, KeyboardState};
use puc8term_core::{Firmware, FirmwareState, Machine, RunLimits};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod runner;

#[derive(Parser, Debug)]
#[command(author, version, about = "PUC8 Terminal Simulator", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,

    /// Enable debug-level logging of every port access
    #[arg(short, long, global = true)]
    trace: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted session and check its assertions
    Test(runner::TestArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the system manifest (YAML)
    #[arg(short, long)]
    system: Option<PathBuf>,

    /// Stop after this many loop iterations
    #[arg(long)]
    max_steps: Option<u64>,

    /// Write a JSON machine snapshot here when the run ends
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Do not mirror display output to stdout
    #[arg(long)]
    no_display_stdout: bool,

    /// Run the arithmetic self-test instead of the terminal
    #[arg(long)]
    selftest: bool,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the display.
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting PUC8 Terminal Simulator");

    match cli.command {
        Some(Command::Test(args)) => runner::run_test(&args),
        None => run_interactive(&cli.run),
    }
}

/// Load the system manifest and its board, or fall back to the stock board.
pub(crate) fn load_system(path: Option<&Path>) -> anyhow::Result<(SystemManifest, BoardDescriptor)> {
    match path {
        Some(path) => {
            info!("Loading system manifest: {:?}", path);
            SystemManifest::load_with_board(path)
        }
        None => {
            info!("Using default hardware configuration");
            Ok((SystemManifest::default(), BoardDescriptor::default()))
        }
    }
}

pub(crate) fn terminal_ports(bus: &IoBus) -> anyhow::Result<TerminalPorts> {
    TerminalPorts::from_bus(bus).context("The terminal needs a display and a keyboard on the board")
}

fn run_interactive(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let (manifest, board) = load_system(args.system.as_deref())?;
    let mut bus = IoBus::from_config(&board)?;
    info!("Board '{}' ready", board.name);

    if args.selftest {
        return run_selftest(bus, args);
    }

    let ports = terminal_ports(&bus)?;
    if let Some(display) = bus.find_mut::<Display>() {
        display.set_stdout_echo(!args.no_display_stdout);
    }
    let keyboard = bus
        .find::<Keyboard>()
        .map(|k| k.state.clone())
        .context("Board has no keyboard")?;
    spawn_stdin_feeder(keyboard.clone());

    let mut machine = Machine::new(Terminal::from_manifest(&manifest, ports), bus)?;
    let metrics = Arc::new(PerformanceMetrics::new());
    machine.observers.push(metrics.clone());

    info!(
        "Terminal on LCR={:#04x} LDR={:#04x} KDR={:#04x}",
        ports.lcr, ports.ldr, ports.kdr
    );

    loop {
        if args.max_steps.is_some_and(|max| machine.steps() >= max) {
            info!("Reached step limit");
            break;
        }
        // The last key read still has to be acted on before stopping.
        if keyboard.is_drained() && machine.firmware.last() == 0 {
            info!("Input closed");
            break;
        }
        if let Err(e) = machine.step() {
            info!("Simulation Error at step {}: {}", machine.steps(), e);
            break;
        }
        if keyboard.pending() == 0 && !keyboard.is_closed() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    info!(
        "Ran {} steps, {} writes, {} busy spins ({:.0} steps/s)",
        metrics.get_steps(),
        metrics.get_writes(),
        metrics.get_busy_spins(),
        metrics.get_sps()
    );
    write_snapshot(&machine, args.snapshot.as_deref())?;
    Ok(ExitCode::SUCCESS)
}

fn run_selftest(bus: IoBus, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let mut machine = Machine::new(SelfTest::new(), bus)?;
    let reason = machine.run(&RunLimits {
        max_steps: args.max_steps,
        wall_time: None,
    });
    write_snapshot(&machine, args.snapshot.as_deref())?;

    let total = machine.firmware.checks().len();
    match machine.firmware.state() {
        FirmwareState::Finished => {
            println!("selftest: {}/{} checks passed", total, total);
            Ok(ExitCode::SUCCESS)
        }
        FirmwareState::Halted { check } => {
            let expr = machine.firmware.failed_check().map(|c| c.expr).unwrap_or("?");
            println!("selftest: halted in error loop at check {}: {}", check, expr);
            Ok(ExitCode::FAILURE)
        }
        FirmwareState::Running => {
            println!(
                "selftest: stopped ({:?}) after {}/{} checks",
                reason,
                machine.firmware.passed(),
                total
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

pub(crate) fn write_snapshot<F: Firmware>(
    machine: &Machine<F>,
    path: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(path) = path {
        let json = serde_json::to_string_pretty(&machine.snapshot())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))?;
        info!("Snapshot written to {:?}", path);
    }
    Ok(())
}

/// Feed stdin to the keyboard from a background thread. Enter arrives as
/// LF (or CRLF) and is delivered as a single carriage return.
fn spawn_stdin_feeder(keyboard: Arc<KeyboardState>) {
    std::thread::spawn(move || {
        let mut prev = 0u8;
        for byte in std::io::stdin().lock().bytes() {
            let Ok(byte) = byte else { break };
            match byte {
                b'\n' if prev == CARRIAGE_RETURN => {}
                b'\n' => keyboard.push(CARRIAGE_RETURN),
                other => keyboard.push(other),
            }
            prev = byte;
        }
        keyboard.close();
    });
}
