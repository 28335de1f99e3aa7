use crate::{SimulationObserver, StopReason};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
pub struct PerformanceMetrics {
    step_count: AtomicU64,
    cycle_count: AtomicU64,
    poll_count: AtomicU64,
    idle_poll_count: AtomicU64,
    write_count: AtomicU64,
    busy_spin_count: AtomicU64,
    start_time: Mutex<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            step_count: AtomicU64::new(0),
            cycle_count: AtomicU64::new(0),
            poll_count: AtomicU64::new(0),
            idle_poll_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            busy_spin_count: AtomicU64::new(0),
            start_time: Mutex::new(Instant::now()),
        }
    }

    pub fn reset(&self) {
        self.step_count.store(0, Ordering::SeqCst);
        self.cycle_count.store(0, Ordering::SeqCst);
        self.poll_count.store(0, Ordering::SeqCst);
        self.idle_poll_count.store(0, Ordering::SeqCst);
        self.write_count.store(0, Ordering::SeqCst);
        self.busy_spin_count.store(0, Ordering::SeqCst);
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn get_steps(&self) -> u64 {
        self.step_count.load(Ordering::SeqCst)
    }

    pub fn get_cycles(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    pub fn get_polls(&self) -> u64 {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn get_idle_polls(&self) -> u64 {
        self.idle_poll_count.load(Ordering::SeqCst)
    }

    pub fn get_writes(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn get_busy_spins(&self) -> u64 {
        self.busy_spin_count.load(Ordering::SeqCst)
    }

    /// Loop iterations per second since the last start.
    pub fn get_sps(&self) -> f64 {
        let elapsed = self
            .start_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
            .as_secs_f64();
        if elapsed > 0.0 {
            self.get_steps() as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_simulation_start(&self) {
        *self.start_time.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn on_simulation_stop(&self, reason: StopReason) {
        tracing::debug!(
            "metrics: {:?} after {} steps, {} polls ({} idle), {} writes, {} busy spins",
            reason,
            self.get_steps(),
            self.get_polls(),
            self.get_idle_polls(),
            self.get_writes(),
            self.get_busy_spins()
        );
    }

    fn on_step_start(&self, _step: u64) {
        self.step_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_step_end(&self, cycles: u64) {
        self.cycle_count.fetch_add(cycles, Ordering::SeqCst);
    }

    fn on_input(&self, _port: u8, value: Option<u8>) {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        if value.is_none() {
            self.idle_poll_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_output(&self, _port: u8, _value: u8, busy_spins: u32) {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.busy_spin_count
            .fetch_add(busy_spins as u64, Ordering::SeqCst);
    }
}
