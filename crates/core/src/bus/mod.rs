use crate::memory::LinearMemory;
use crate::peripherals::{display::Display, keyboard::Keyboard};
use crate::{Bus, Peripheral, SimResult, SimulationError};
use anyhow::Context;
use puc8term_config::{parse_size, BoardDescriptor};
use std::collections::HashMap;

#[derive(Debug)]
pub struct PeripheralEntry {
    pub name: String,
    pub base: u8,
    pub size: u8,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn end(&self) -> usize {
        self.base as usize + self.size as usize
    }

    fn overlaps(&self, base: u8, size: u8) -> bool {
        let start = base as usize;
        let end = start + size as usize;
        start < self.end() && (self.base as usize) < end
    }
}

/// Data memory and peripheral registers sharing the 8-bit address space.
/// Every access costs one cycle and ticks all peripherals afterwards.
#[derive(Debug)]
pub struct IoBus {
    pub ram: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
    cycles: u64,
}

impl IoBus {
    /// The stock board: see [`BoardDescriptor::default`].
    pub fn stock() -> anyhow::Result<Self> {
        Self::from_config(&BoardDescriptor::default())
    }

    pub fn empty(ram: LinearMemory) -> Self {
        Self {
            ram,
            peripherals: Vec::new(),
            cycles: 0,
        }
    }

    pub fn from_config(board: &BoardDescriptor) -> anyhow::Result<Self> {
        let ram_size = parse_size(&board.ram.size)
            .with_context(|| format!("Invalid RAM size for board '{}'", board.name))? as usize;
        if board.ram.base as usize + ram_size > 0x100 {
            anyhow::bail!(
                "RAM {:#04x}+{} does not fit the 8-bit address space",
                board.ram.base,
                ram_size
            );
        }
        let mut bus = Self::empty(LinearMemory::new(ram_size, board.ram.base));

        for p in &board.peripherals {
            let dev: Box<dyn Peripheral> = match p.r#type.as_str() {
                "keyboard" => Box::new(Keyboard::new()),
                "display" => {
                    let busy_cycles = p.config_u64("busy_cycles").unwrap_or(4);
                    let busy_cycles = u32::try_from(busy_cycles).with_context(|| {
                        format!("busy_cycles of '{}' is out of range", p.id)
                    })?;
                    let scrollback = match p.config_str("scrollback") {
                        Some(s) => parse_size(s)
                            .with_context(|| format!("Invalid scrollback for '{}'", p.id))?
                            as usize,
                        None => 4096,
                    };
                    if scrollback == 0 {
                        anyhow::bail!("Scrollback of '{}' must be at least one byte", p.id);
                    }
                    let mut display = Display::new(busy_cycles, scrollback);
                    if let Some(echo) = p.config_bool("echo_stdout") {
                        display.set_stdout_echo(echo);
                    }
                    Box::new(display)
                }
                other => {
                    tracing::warn!("Unknown peripheral type '{}' for '{}', skipping", other, p.id);
                    continue;
                }
            };
            bus.map(&p.id, p.base_port, dev)?;
            tracing::debug!("Mapped {} ({}) at {:#04x}", p.id, p.r#type, p.base_port);
        }

        Ok(bus)
    }

    /// Register a peripheral. Its size is taken from the device type.
    pub fn map(&mut self, name: &str, base: u8, dev: Box<dyn Peripheral>) -> SimResult<()> {
        let size = dev.register_count();
        let conflict = |other: &str| SimulationError::PortConflict {
            name: name.to_string(),
            other: other.to_string(),
            base,
            size,
        };

        if base as usize + size as usize > 0x100 {
            return Err(conflict("end of address space"));
        }
        if (0..size).any(|i| self.ram.contains(base + i)) {
            return Err(conflict("data memory"));
        }
        if let Some(p) = self.peripherals.iter().find(|p| p.overlaps(base, size)) {
            return Err(conflict(&p.name));
        }

        self.peripherals.push(PeripheralEntry {
            name: name.to_string(),
            base,
            size,
            dev,
        });
        Ok(())
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// First peripheral of concrete type `T`.
    pub fn find<T: 'static>(&self) -> Option<&T> {
        self.peripherals
            .iter()
            .find_map(|p| p.dev.as_any().and_then(|a| a.downcast_ref::<T>()))
    }

    pub fn find_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.peripherals
            .iter_mut()
            .find_map(|p| p.dev.as_any_mut().and_then(|a| a.downcast_mut::<T>()))
    }

    /// Base port of the first peripheral of type `T`.
    pub fn base_of_type<T: 'static>(&self) -> Option<u8> {
        self.peripherals
            .iter()
            .find(|p| p.dev.as_any().is_some_and(|a| a.is::<T>()))
            .map(|p| p.base)
    }

    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.peripherals
            .iter()
            .map(|p| (p.name.clone(), p.dev.snapshot()))
            .collect()
    }

    fn peripheral_at(&mut self, addr: u8) -> Option<(&mut PeripheralEntry, u8)> {
        self.peripherals
            .iter_mut()
            .find(|p| (addr as usize) >= p.base as usize && (addr as usize) < p.end())
            .map(|p| {
                let offset = addr - p.base;
                (p, offset)
            })
    }

    fn access<T>(&mut self, addr: u8, op: impl FnOnce(&mut Self) -> SimResult<T>) -> SimResult<T> {
        let res = op(self);
        self.cycles += 1;
        self.tick_peripherals();
        if res.is_err() {
            tracing::debug!("Bus fault at {:#04x}", addr);
        }
        res
    }
}

impl crate::Bus for IoBus {
    fn read_u8(&mut self, addr: u8) -> SimResult<u8> {
        self.access(addr, |bus| {
            if let Some(byte) = bus.ram.read_u8(addr) {
                return Ok(byte);
            }
            match bus.peripheral_at(addr) {
                Some((p, offset)) => p.dev.read(offset),
                None => Err(SimulationError::PortViolation(addr)),
            }
        })
    }

    fn write_u8(&mut self, addr: u8, value: u8) -> SimResult<()> {
        self.access(addr, |bus| {
            if bus.ram.write_u8(addr, value) {
                return Ok(());
            }
            match bus.peripheral_at(addr) {
                Some((p, offset)) => p.dev.write(offset, value),
                None => Err(SimulationError::PortViolation(addr)),
            }
        })
    }

    fn tick_peripherals(&mut self) {
        for p in &mut self.peripherals {
            p.dev.tick();
        }
    }
}
