use crate::bus::IoBus;
use crate::devices::{InputDevice, OutputDevice, PortDevice};
use crate::memory::DataImage;
use crate::peripherals::{Display, Keyboard};
use crate::{Bus, Firmware, SimResult, SimulationError, SimulationObserver};
use puc8term_config::SystemManifest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CARRIAGE_RETURN: u8 = 0x0D;
pub const CLEAR_SCREEN: u8 = Display::CLEAR_SCREEN;

/// Register addresses the terminal talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalPorts {
    pub kdr: u8,
    pub ldr: u8,
    pub lcr: u8,
}

impl Default for TerminalPorts {
    fn default() -> Self {
        Self {
            lcr: 0xFC,
            ldr: 0xFD,
            kdr: 0xFE,
        }
    }
}

impl TerminalPorts {
    /// Derive the register addresses from where the display and keyboard
    /// are mapped.
    pub fn from_bus(bus: &IoBus) -> Option<Self> {
        let display = bus.base_of_type::<Display>()?;
        let keyboard = bus.base_of_type::<Keyboard>()?;
        Some(Self {
            lcr: display + Display::LCR,
            ldr: display + Display::LDR,
            kdr: keyboard + Keyboard::KDR,
        })
    }
}

/// What one loop iteration does with the last character read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Clear the screen and print the prompt.
    Redraw,
    Echo(u8),
    /// Nothing was typed.
    Idle,
}

pub fn react(last: u8) -> Reaction {
    match last {
        CARRIAGE_RETURN => Reaction::Redraw,
        0 => Reaction::Idle,
        c => Reaction::Echo(c),
    }
}

/// Spin on the busy flag, then write `value` exactly once.
///
/// There is no timeout: a device that never clears its flag blocks forever.
/// Returns how many times the flag read busy.
pub fn write_character<D: OutputDevice + ?Sized>(device: &mut D, value: u8) -> SimResult<u32> {
    let mut spins: u32 = 0;
    while device.is_busy()? {
        spins = spins.saturating_add(1);
    }
    device.write(value)?;
    Ok(spins)
}

/// Single non-blocking poll; `None` means no key this time.
pub fn poll_input<D: InputDevice + ?Sized>(device: &mut D) -> SimResult<Option<u8>> {
    device.try_read()
}

/// Polling echo terminal with a prompt redrawn on every carriage return.
#[derive(Debug, Clone)]
pub struct Terminal {
    ports: TerminalPorts,
    prompt: Vec<u8>,
    prompt_addr: u8,
    last: u8,
    redraws: u64,
    echoes: u64,
}

impl Terminal {
    pub fn new(ports: TerminalPorts) -> Self {
        Self {
            ports,
            prompt: puc8term_config::DEFAULT_PROMPT.as_bytes().to_vec(),
            prompt_addr: 0,
            last: CARRIAGE_RETURN,
            redraws: 0,
            echoes: 0,
        }
    }

    /// Zero bytes in `prompt` would end the string early and are dropped.
    pub fn with_prompt(mut self, prompt: &[u8], addr: u8) -> Self {
        self.prompt = prompt.iter().copied().filter(|&c| c != 0).collect();
        self.prompt_addr = addr;
        self
    }

    pub fn from_manifest(manifest: &SystemManifest, ports: TerminalPorts) -> Self {
        Self::new(ports).with_prompt(manifest.prompt.as_bytes(), manifest.prompt_addr)
    }

    /// The character that the next step will act on.
    pub fn last(&self) -> u8 {
        self.last
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    pub fn echoes(&self) -> u64 {
        self.echoes
    }

    fn emit(
        &self,
        bus: &mut dyn Bus,
        port: u8,
        value: u8,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        let spins = write_character(&mut PortDevice::new(bus, port), value)?;
        tracing::debug!("Terminal: wrote {:#04x} to {:#04x} after {} busy polls", value, port, spins);
        for observer in observers {
            observer.on_output(port, value, spins);
        }
        Ok(())
    }

    /// Prints the zero-terminated prompt straight out of data memory.
    fn draw_prompt(
        &self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        let mut addr = self.prompt_addr;
        loop {
            let c = bus.read_u8(addr)?;
            if c == 0 {
                return Ok(());
            }
            self.emit(bus, self.ports.ldr, c, observers)?;
            addr = addr
                .checked_add(1)
                .ok_or(SimulationError::UnterminatedString(self.prompt_addr))?;
        }
    }
}

impl Firmware for Terminal {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn reset(&mut self) {
        // Start as if Enter was pressed so the prompt appears once.
        self.last = CARRIAGE_RETURN;
    }

    fn step(
        &mut self,
        bus: &mut dyn Bus,
        observers: &[Arc<dyn SimulationObserver>],
    ) -> SimResult<()> {
        match react(self.last) {
            Reaction::Redraw => {
                self.emit(bus, self.ports.lcr, CLEAR_SCREEN, observers)?;
                self.draw_prompt(bus, observers)?;
                self.redraws += 1;
            }
            Reaction::Echo(c) => {
                self.emit(bus, self.ports.ldr, c, observers)?;
                self.echoes += 1;
            }
            Reaction::Idle => {}
        }

        let input = poll_input(&mut PortDevice::new(bus, self.ports.kdr))?;
        tracing::trace!("Terminal: poll {:#04x} -> {:?}", self.ports.kdr, input);
        for observer in observers {
            observer.on_input(self.ports.kdr, input);
        }
        self.last = input.unwrap_or(0);
        Ok(())
    }

    fn data_image(&self) -> DataImage {
        let mut image = DataImage::new();
        image.add_cstr(self.prompt_addr, &self.prompt);
        image
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "ports": self.ports,
            "prompt_addr": self.prompt_addr,
            "last": self.last,
            "redraws": self.redraws,
            "echoes": self.echoes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Output device that reports busy for a fixed number of polls and
    /// records every poll and write in order.
    #[derive(Default)]
    struct SlowDevice {
        busy_polls: u32,
        log: Vec<&'static str>,
        written: Vec<u8>,
    }

    impl OutputDevice for SlowDevice {
        fn is_busy(&mut self) -> SimResult<bool> {
            if self.busy_polls > 0 {
                self.busy_polls -= 1;
                self.log.push("busy");
                Ok(true)
            } else {
                self.log.push("ready");
                Ok(false)
            }
        }

        fn write(&mut self, value: u8) -> SimResult<()> {
            assert_eq!(self.busy_polls, 0, "write while busy");
            self.log.push("write");
            self.written.push(value);
            Ok(())
        }
    }

    struct Script(VecDeque<u8>);

    impl InputDevice for Script {
        fn try_read(&mut self) -> SimResult<Option<u8>> {
            Ok(self.0.pop_front().filter(|&c| c != 0))
        }
    }

    #[test]
    fn test_react_classifies_sentinel_cr_and_text() {
        assert_eq!(react(0x00), Reaction::Idle);
        assert_eq!(react(CARRIAGE_RETURN), Reaction::Redraw);
        assert_eq!(react(b'a'), Reaction::Echo(b'a'));
        assert_eq!(react(0xFF), Reaction::Echo(0xFF));
        for c in 1..=255u8 {
            if c != CARRIAGE_RETURN {
                assert_eq!(react(c), Reaction::Echo(c));
            }
        }
    }

    #[test]
    fn test_write_character_waits_for_busy_to_clear() {
        for n in [0u32, 1, 5, 100] {
            let mut dev = SlowDevice {
                busy_polls: n,
                ..Default::default()
            };
            let spins = write_character(&mut dev, b'Z').unwrap();
            assert_eq!(spins, n);
            assert_eq!(dev.written, vec![b'Z']);

            let mut expected = vec!["busy"; n as usize];
            expected.push("ready");
            expected.push("write");
            assert_eq!(dev.log, expected);
        }
    }

    #[test]
    fn test_poll_input_reports_sentinel_as_none() {
        let mut keys = Script(VecDeque::from(vec![b'k', 0]));
        assert_eq!(poll_input(&mut keys).unwrap(), Some(b'k'));
        assert_eq!(poll_input(&mut keys).unwrap(), None);
        assert_eq!(poll_input(&mut keys).unwrap(), None);
    }

    #[test]
    fn test_default_ports_match_stock_bus() {
        let bus = IoBus::stock().unwrap();
        assert_eq!(TerminalPorts::from_bus(&bus), Some(TerminalPorts::default()));
    }

    #[test]
    fn test_prompt_nul_bytes_dropped() {
        let term = Terminal::new(TerminalPorts::default()).with_prompt(b"a\0b", 0x10);
        let image = term.data_image();
        assert_eq!(image.segments[0].start_addr, 0x10);
        assert_eq!(image.segments[0].data, b"ab\0".to_vec());
    }
}
