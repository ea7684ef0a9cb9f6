use crate::peripherals::status::Sreg;
use crate::vector::Vector;
use crate::{SimResult, SimulationError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Hardware interrupt response: push PC, clear I, jump through the vector.
pub const INTERRUPT_ENTRY_CYCLES: u32 = 4;
/// `reti`: pop PC, set I.
pub const RETI_CYCLES: u32 = 4;

/// The parts of the core the interrupt path touches: the status register
/// (shared with its memory-mapped view) and the in-service marker.
#[derive(Debug)]
pub struct Cpu {
    sreg: Arc<AtomicU8>,
    in_service: Option<Vector>,
    return_shadow: bool,
}

impl Cpu {
    pub fn new(sreg: Arc<AtomicU8>) -> Self {
        Self {
            sreg,
            in_service: None,
            return_shadow: false,
        }
    }

    pub fn sreg(&self) -> Sreg {
        Sreg::from_bits_retain(self.sreg.load(Ordering::SeqCst))
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.sreg().contains(Sreg::I)
    }

    pub fn in_service(&self) -> Option<Vector> {
        self.in_service
    }

    pub fn enter_interrupt(&mut self, vector: Vector) -> SimResult<()> {
        if let Some(active) = self.in_service {
            tracing::error!("{} requested while {} is in service", vector, active);
            return Err(SimulationError::ReentrantDispatch(vector));
        }
        self.sreg.fetch_and(!Sreg::I.bits(), Ordering::SeqCst);
        self.in_service = Some(vector);
        Ok(())
    }

    pub fn return_from_interrupt(&mut self) -> Option<Vector> {
        self.sreg.fetch_or(Sreg::I.bits(), Ordering::SeqCst);
        self.return_shadow = true;
        self.in_service.take()
    }

    /// After `reti` the core executes one more foreground instruction
    /// before it will take the next interrupt.
    pub fn take_return_shadow(&mut self) -> bool {
        std::mem::take(&mut self.return_shadow)
    }
}
