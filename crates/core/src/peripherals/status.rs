use crate::{Peripheral, SimResult};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    /// AVR status register (SREG).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Sreg: u8 {
        const C = 1 << 0;
        const Z = 1 << 1;
        const N = 1 << 2;
        const V = 1 << 3;
        const S = 1 << 4;
        const H = 1 << 5;
        const T = 1 << 6;
        /// Global interrupt enable
        const I = 1 << 7;
    }
}

/// Memory-mapped view of SREG. The value itself is shared with the CPU,
/// which clears and sets `I` on interrupt entry and return.
#[derive(Debug)]
pub struct StatusRegister {
    sreg: Arc<AtomicU8>,
}

impl StatusRegister {
    pub fn new(sreg: Arc<AtomicU8>) -> Self {
        Self { sreg }
    }
}

impl Peripheral for StatusRegister {
    fn read(&self, offset: u64) -> SimResult<u8> {
        match offset {
            0x00 => Ok(self.sreg.load(Ordering::SeqCst)),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        if offset == 0x00 {
            let previous = self.sreg.swap(value, Ordering::SeqCst);
            let was_enabled = Sreg::from_bits_retain(previous).contains(Sreg::I);
            let now_enabled = Sreg::from_bits_retain(value).contains(Sreg::I);
            if was_enabled != now_enabled {
                tracing::info!(
                    "SREG: global interrupts {}",
                    if now_enabled { "enabled" } else { "disabled" }
                );
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "sreg": self.sreg.load(Ordering::SeqCst) })
    }
}
