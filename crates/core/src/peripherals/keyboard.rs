use crate::{Peripheral, SimResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Keystrokes waiting to be read, shared with whoever types them.
#[derive(Debug, Default)]
pub struct KeyboardState {
    pending: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
}

impl KeyboardState {
    fn queue(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one key. Zero is the idle sentinel and cannot be typed.
    pub fn push(&self, key: u8) {
        if key == 0 {
            tracing::trace!("Keyboard: dropping NUL key");
            return;
        }
        self.queue().push_back(key);
    }

    pub fn feed(&self, keys: &[u8]) {
        let mut queue = self.queue();
        queue.extend(keys.iter().copied().filter(|&k| k != 0));
    }

    pub fn pop(&self) -> Option<u8> {
        self.queue().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    /// Marks the input source as exhausted; queued keys are still delivered.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closed and nothing left to read.
    pub fn is_drained(&self) -> bool {
        self.is_closed() && self.pending() == 0
    }
}

/// Polled keyboard. `KDR` at offset 0 returns the next key, or 0 when idle.
#[derive(Debug, Clone, Default)]
pub struct Keyboard {
    pub state: Arc<KeyboardState>,
}

impl Keyboard {
    pub const KDR: u8 = 0x00;

    pub fn new() -> Self {
        Self::default()
    }
}

impl Peripheral for Keyboard {
    fn read(&mut self, offset: u8) -> SimResult<u8> {
        match offset {
            Self::KDR => Ok(self.state.pop().unwrap_or(0)),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u8, value: u8) -> SimResult<()> {
        tracing::debug!("Keyboard: ignoring write {:#04x} to offset {}", value, offset);
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "pending": self.state.pending(),
            "closed": self.state.is_closed(),
        })
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_drain_queue_then_idle() {
        let mut kbd = Keyboard::new();
        kbd.state.feed(b"hi");
        assert_eq!(kbd.read(Keyboard::KDR).unwrap(), b'h');
        assert_eq!(kbd.read(Keyboard::KDR).unwrap(), b'i');
        assert_eq!(kbd.read(Keyboard::KDR).unwrap(), 0);
        assert_eq!(kbd.read(Keyboard::KDR).unwrap(), 0);
    }

    #[test]
    fn test_nul_keys_are_dropped() {
        let kbd = Keyboard::new();
        kbd.state.push(0);
        kbd.state.feed(&[b'a', 0, b'b']);
        assert_eq!(kbd.state.pending(), 2);
    }

    #[test]
    fn test_drained_requires_close() {
        let kbd = Keyboard::new();
        kbd.state.push(b'x');
        assert!(!kbd.state.is_drained());
        kbd.state.close();
        assert!(!kbd.state.is_drained());
        assert_eq!(kbd.state.pop(), Some(b'x'));
        assert!(kbd.state.is_drained());
    }
}
