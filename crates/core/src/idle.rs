use crate::{Bus, SimResult};

/// `rjmp .-2`: a relative jump to itself.
pub const IDLE_LOOP_CYCLES: u32 = 2;

/// Foreground execution context. One call to `step` is one instruction;
/// interrupts are only taken between calls.
pub trait Foreground {
    /// Returns the cycles the instruction took.
    fn step(&mut self, bus: &mut dyn Bus) -> SimResult<u32>;
}

/// Spins forever without touching any state the handler could need.
#[derive(Debug, Default)]
pub struct IdleLoop {
    iterations: u64,
}

impl IdleLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }
}

impl Foreground for IdleLoop {
    fn step(&mut self, _bus: &mut dyn Bus) -> SimResult<u32> {
        self.iterations += 1;
        tracing::trace!("idle: rjmp .-2");
        Ok(IDLE_LOOP_CYCLES)
    }
}
