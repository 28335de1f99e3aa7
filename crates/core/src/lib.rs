pub mod alu;
pub mod bus;
pub mod devices;
pub mod firmware;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod snapshot;

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use puc8term_config::StopReason;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Unmapped port access at {0:#04x}")]
    PortViolation(u8),
    #[error("Port range {base:#04x}+{size} of '{name}' overlaps '{other}'")]
    PortConflict {
        name: String,
        other: String,
        base: u8,
        size: u8,
    },
    #[error("String at {0:#04x} runs off the end of data memory")]
    UnterminatedString(u8),
    #[error("Data segment at {addr:#04x} ({len} bytes) does not fit data memory")]
    SegmentOutOfRange { addr: u8, len: usize },
}

impl SimulationError {
    /// How a run that hit this error is reported.
    pub fn stop_reason(&self) -> StopReason {
        match self {
            SimulationError::PortViolation(_) | SimulationError::PortConflict { .. } => {
                StopReason::PortViolation
            }
            SimulationError::UnterminatedString(_) | SimulationError::SegmentOutOfRange { .. } => {
                StopReason::MemoryFault
            }
        }
    }
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self, _reason: StopReason) {}
    fn on_step_start(&self, _step: u64) {}
    fn on_step_end(&self, _cycles: u64) {}
    /// One poll of an input register; `None` is the idle sentinel.
    fn on_input(&self, _port: u8, _value: Option<u8>) {}
    /// One completed output write, after `busy_spins` polls of the busy flag.
    fn on_output(&self, _port: u8, _value: u8, _busy_spins: u32) {}
}

/// Trait representing a port-mapped peripheral
pub trait Peripheral: std::fmt::Debug + Send {
    /// Number of consecutive ports the device decodes.
    fn register_count(&self) -> u8 {
        1
    }
    /// Reads may have side effects (a keyboard read consumes a key).
    fn read(&mut self, offset: u8) -> SimResult<u8>;
    fn write(&mut self, offset: u8, value: u8) -> SimResult<()>;
    /// Advance the device by one bus cycle.
    fn tick(&mut self) {}
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
}

/// Trait representing the 8-bit system bus
pub trait Bus {
    fn read_u8(&mut self, addr: u8) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u8, value: u8) -> SimResult<()>;
    fn tick_peripherals(&mut self);

    /// Platform `inp(register)` primitive.
    fn inp(&mut self, port: u8) -> SimResult<u8> {
        self.read_u8(port)
    }

    /// Platform `outp(value, register)` primitive. Note the argument order.
    fn outp(&mut self, value: u8, port: u8) -> SimResult<()> {
        self.write_u8(port, value)
    }
}

/// Execution state of a firmware program as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum FirmwareState {
    Running,
    /// `main` returned.
    Finished,
    /// Spinning in the error loop; `check` identifies what failed.
    Halted { check: usize },
}

/// A program running against the bus, one loop iteration per step.
pub trait Firmware {
    fn name(&self) -> &'static str;
    fn reset(&mut self);
    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()>;
    fn state(&self) -> FirmwareState {
        FirmwareState::Running
    }
    /// Initialised data memory the program expects at start-up.
    fn data_image(&self) -> memory::DataImage {
        memory::DataImage::default()
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    pub max_steps: Option<u64>,
    pub wall_time: Option<Duration>,
}

pub struct Machine<F: Firmware> {
    pub firmware: F,
    pub bus: bus::IoBus,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
    steps: u64,
}

impl<F: Firmware> Machine<F> {
    /// Build a machine, load the firmware's data image and reset it.
    ///
    /// Fails if the image does not fit the board's data memory.
    pub fn new(firmware: F, bus: bus::IoBus) -> SimResult<Self> {
        let mut machine = Self {
            firmware,
            bus,
            observers: Vec::new(),
            steps: 0,
        };
        let image = machine.firmware.data_image();
        machine.load_image(&image)?;
        machine.reset();
        Ok(machine)
    }

    pub fn load_image(&mut self, image: &memory::DataImage) -> SimResult<()> {
        for segment in &image.segments {
            if !self.bus.ram.load_from_segment(segment) {
                return Err(SimulationError::SegmentOutOfRange {
                    addr: segment.start_addr,
                    len: segment.data.len(),
                });
            }
            tracing::debug!(
                "Loaded {} bytes at {:#04x}",
                segment.data.len(),
                segment.start_addr
            );
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.firmware.reset();
        self.steps = 0;
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn step(&mut self) -> SimResult<()> {
        for observer in &self.observers {
            observer.on_step_start(self.steps);
        }
        let before = self.bus.cycles();
        let res = self.firmware.step(&mut self.bus, &self.observers);
        self.steps += 1;
        let cycles = self.bus.cycles() - before;
        for observer in &self.observers {
            observer.on_step_end(cycles);
        }
        res
    }

    /// Step until a limit is reached or the firmware stops making progress.
    pub fn run(&mut self, limits: &RunLimits) -> StopReason {
        for observer in &self.observers {
            observer.on_simulation_start();
        }
        let started = Instant::now();
        let mut executed: u64 = 0;

        let reason = loop {
            match self.firmware.state() {
                FirmwareState::Finished => break StopReason::Finished,
                FirmwareState::Halted { check } => {
                    tracing::warn!("{} halted in error loop (check {})", self.firmware.name(), check);
                    break StopReason::ErrorHalt;
                }
                FirmwareState::Running => {}
            }
            if limits.max_steps.is_some_and(|max| executed >= max) {
                break StopReason::MaxSteps;
            }
            if limits.wall_time.is_some_and(|limit| started.elapsed() >= limit) {
                break StopReason::WallTime;
            }
            if let Err(e) = self.step() {
                tracing::error!("Simulation error at step {}: {}", self.steps, e);
                break e.stop_reason();
            }
            executed += 1;
        };

        for observer in &self.observers {
            observer.on_simulation_stop(reason);
        }
        tracing::info!(
            "{} stopped after {} steps ({} cycles): {:?}",
            self.firmware.name(),
            self.steps,
            self.bus.cycles(),
            reason
        );
        reason
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            firmware: self.firmware.name().to_string(),
            state: self.firmware.state(),
            steps: self.steps,
            cycles: self.bus.cycles(),
            program: self.firmware.snapshot(),
            peripherals: self.bus.snapshot(),
        }
    }
}
