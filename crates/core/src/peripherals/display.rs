use crate::{Peripheral, SimResult};
use bitflags::bitflags;
use std::collections::VecDeque;
use std::io::{self, Write};

bitflags! {
    /// Value read back from either display register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DisplayStatus: u8 {
        const BUSY = 0x01;
    }
}

/// Character display with a busy flag.
///
/// `LCR` (offset 0) takes control codes, `LDR` (offset 1) takes characters.
/// Reading either register returns [`DisplayStatus`]. Every write keeps the
/// device busy for `busy_cycles` bus cycles, counting the write itself.
/// Screen and transcript both keep at most `scrollback` bytes.
#[derive(Debug)]
pub struct Display {
    busy_cycles: u32,
    busy_remaining: u32,
    screen: VecDeque<u8>,
    transcript: VecDeque<u8>,
    scrollback: usize,
    clears: u64,
    writes: u64,
    overruns: u64,
    stdout_echo: bool,
}

impl Display {
    pub const LCR: u8 = 0x00;
    pub const LDR: u8 = 0x01;
    pub const CLEAR_SCREEN: u8 = 0x01;

    pub fn new(busy_cycles: u32, scrollback: usize) -> Self {
        Self {
            busy_cycles,
            busy_remaining: 0,
            screen: VecDeque::new(),
            transcript: VecDeque::new(),
            scrollback: scrollback.max(1),
            clears: 0,
            writes: 0,
            overruns: 0,
            stdout_echo: false,
        }
    }

    pub fn set_stdout_echo(&mut self, enabled: bool) {
        self.stdout_echo = enabled;
    }

    pub fn status(&self) -> DisplayStatus {
        if self.busy_remaining > 0 {
            DisplayStatus::BUSY
        } else {
            DisplayStatus::empty()
        }
    }

    /// Characters written since the last clear.
    pub fn screen(&self) -> String {
        let bytes: Vec<u8> = self.screen.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Every character written to `LDR`, oldest dropped beyond the scrollback.
    pub fn transcript(&self) -> Vec<u8> {
        self.transcript.iter().copied().collect()
    }

    pub fn transcript_text(&self) -> String {
        String::from_utf8_lossy(&self.transcript()).into_owned()
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Writes that arrived while the busy flag was set and were dropped.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    fn control(&mut self, value: u8) {
        match value {
            Self::CLEAR_SCREEN => {
                self.screen.clear();
                self.clears += 1;
                tracing::debug!("Display: clear screen");
                if self.stdout_echo {
                    print!("\x1b[2J\x1b[H");
                    let _ = io::stdout().flush();
                }
            }
            other => tracing::debug!("Display: ignoring control code {:#04x}", other),
        }
    }

    fn character(&mut self, value: u8) {
        push_capped(&mut self.screen, value, self.scrollback);
        push_capped(&mut self.transcript, value, self.scrollback);
        if self.stdout_echo {
            print!("{}", value as char);
            let _ = io::stdout().flush();
        }
    }
}

fn push_capped(buf: &mut VecDeque<u8>, value: u8, cap: usize) {
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(value);
}

impl Peripheral for Display {
    fn register_count(&self) -> u8 {
        2
    }

    fn read(&mut self, offset: u8) -> SimResult<u8> {
        match offset {
            Self::LCR | Self::LDR => Ok(self.status().bits()),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u8, value: u8) -> SimResult<()> {
        if self.busy_remaining > 0 {
            self.overruns += 1;
            tracing::warn!(
                "Display: write {:#04x} to offset {} while busy, dropped",
                value,
                offset
            );
            return Ok(());
        }

        match offset {
            Self::LCR => self.control(value),
            Self::LDR => self.character(value),
            _ => return Ok(()),
        }
        self.writes += 1;
        self.busy_remaining = self.busy_cycles;
        Ok(())
    }

    fn tick(&mut self) {
        self.busy_remaining = self.busy_remaining.saturating_sub(1);
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "screen": self.screen(),
            "busy": self.status().contains(DisplayStatus::BUSY),
            "clears": self.clears,
            "writes": self.writes,
            "overruns": self.overruns,
        })
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }
}
