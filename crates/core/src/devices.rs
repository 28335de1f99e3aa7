//! Capability view of the I/O registers.
//!
//! Firmware talks to devices through [`InputDevice`] and [`OutputDevice`]
//! rather than raw ports, so the same loop runs against the simulated bus,
//! a host console or a test double.

use crate::{Bus, SimResult};

pub trait InputDevice {
    /// One non-blocking read of the data register. `None` is the idle
    /// sentinel (the register read zero).
    fn try_read(&mut self) -> SimResult<Option<u8>>;
}

pub trait OutputDevice {
    /// Current state of the busy flag.
    fn is_busy(&mut self) -> SimResult<bool>;
    /// Unconditional write of the data register.
    fn write(&mut self, value: u8) -> SimResult<()>;
}

/// A single bus port seen as a device.
///
/// Reading an output register yields its busy flag, the way the puc8
/// display reports status.
pub struct PortDevice<'a> {
    bus: &'a mut dyn Bus,
    port: u8,
}

impl<'a> PortDevice<'a> {
    pub fn new(bus: &'a mut dyn Bus, port: u8) -> Self {
        Self { bus, port }
    }
}

impl InputDevice for PortDevice<'_> {
    fn try_read(&mut self) -> SimResult<Option<u8>> {
        match self.bus.inp(self.port)? {
            0 => Ok(None),
            c => Ok(Some(c)),
        }
    }
}

impl OutputDevice for PortDevice<'_> {
    fn is_busy(&mut self) -> SimResult<bool> {
        Ok(self.bus.inp(self.port)? != 0)
    }

    fn write(&mut self, value: u8) -> SimResult<()> {
        self.bus.outp(value, self.port)
    }
}
