use crate::vector::Vector;
use crate::SimulationObserver;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

const NO_ENTRY: u64 = u64::MAX;

/// Aggregate counters for one run.
#[derive(Debug)]
pub struct InterruptMetrics {
    overflow_count: AtomicU64,
    coalesced_count: AtomicU64,
    invocation_count: AtomicU64,
    foreground_cycles: AtomicU64,
    max_latency: AtomicU64,
    first_entry: AtomicU64,
    last_entry: AtomicU64,
}

impl Default for InterruptMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptMetrics {
    pub fn new() -> Self {
        Self {
            overflow_count: AtomicU64::new(0),
            coalesced_count: AtomicU64::new(0),
            invocation_count: AtomicU64::new(0),
            foreground_cycles: AtomicU64::new(0),
            max_latency: AtomicU64::new(0),
            first_entry: AtomicU64::new(NO_ENTRY),
            last_entry: AtomicU64::new(NO_ENTRY),
        }
    }

    pub fn reset(&self) {
        self.overflow_count.store(0, Ordering::SeqCst);
        self.coalesced_count.store(0, Ordering::SeqCst);
        self.invocation_count.store(0, Ordering::SeqCst);
        self.foreground_cycles.store(0, Ordering::SeqCst);
        self.max_latency.store(0, Ordering::SeqCst);
        self.first_entry.store(NO_ENTRY, Ordering::SeqCst);
        self.last_entry.store(NO_ENTRY, Ordering::SeqCst);
    }

    pub fn get_overflows(&self) -> u64 {
        self.overflow_count.load(Ordering::SeqCst)
    }

    pub fn get_coalesced(&self) -> u64 {
        self.coalesced_count.load(Ordering::SeqCst)
    }

    pub fn get_invocations(&self) -> u64 {
        self.invocation_count.load(Ordering::SeqCst)
    }

    pub fn get_foreground_cycles(&self) -> u64 {
        self.foreground_cycles.load(Ordering::SeqCst)
    }

    /// Worst-case cycles between an overflow and its handler entry.
    pub fn get_max_latency(&self) -> u64 {
        self.max_latency.load(Ordering::SeqCst)
    }

    /// Average cycles between consecutive handler entries.
    pub fn mean_period_cycles(&self) -> Option<f64> {
        let count = self.get_invocations();
        let first = self.first_entry.load(Ordering::SeqCst);
        let last = self.last_entry.load(Ordering::SeqCst);
        if count < 2 || first == NO_ENTRY {
            return None;
        }
        Some((last - first) as f64 / (count - 1) as f64)
    }
}

impl SimulationObserver for InterruptMetrics {
    fn on_overflow(&self, _vector: Vector, _cycle: u64) {
        self.overflow_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_coalesced_overflow(&self, _vector: Vector, _cycle: u64) {
        self.coalesced_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_interrupt_enter(&self, _vector: Vector, cycle: u64, latency: u64) {
        self.invocation_count.fetch_add(1, Ordering::SeqCst);
        self.max_latency.fetch_max(latency, Ordering::SeqCst);
        let _ = self.first_entry.compare_exchange(
            NO_ENTRY,
            cycle,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.last_entry.store(cycle, Ordering::SeqCst);
    }

    fn on_step_end(&self, cycles: u32) {
        self.foreground_cycles.fetch_add(cycles as u64, Ordering::SeqCst);
    }
}

/// Per-invocation record of handler entries, and how deeply they nested.
#[derive(Debug, Default)]
pub struct InvocationLog {
    entries: Mutex<Vec<(Vector, u64)>>,
    depth: AtomicU32,
    max_depth: AtomicU32,
}

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry cycles for `vector`, in order.
    pub fn entries(&self, vector: Vector) -> Vec<u64> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(v, _)| *v == vector)
            .map(|(_, cycle)| *cycle)
            .collect()
    }

    /// Cycles between consecutive entries of `vector`.
    pub fn periods(&self, vector: Vector) -> Vec<u64> {
        self.entries(vector)
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }

    /// Deepest handler nesting seen. Anything above 1 means a handler was
    /// preempted.
    pub fn max_depth(&self) -> u32 {
        self.max_depth.load(Ordering::SeqCst)
    }
}

impl SimulationObserver for InvocationLog {
    fn on_interrupt_enter(&self, vector: Vector, cycle: u64, _latency: u64) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_depth.fetch_max(depth, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((vector, cycle));
    }

    fn on_interrupt_exit(&self, _vector: Vector, _cycle: u64) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
