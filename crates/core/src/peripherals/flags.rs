use crate::{Peripheral, SimResult};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

bitflags::bitflags! {
    /// Bit layout shared by TIFR (flags) and TIMSK (enables) on the ATmega8.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TimerInterrupts: u8 {
        const TOV0 = 1 << 0;
        const TOV1 = 1 << 2;
        const OCF1B = 1 << 3;
        const OCF1A = 1 << 4;
        const ICF1 = 1 << 5;
        const TOV2 = 1 << 6;
        const OCF2 = 1 << 7;
    }
}

/// Shared state for the interrupt flag (TIFR) and mask (TIMSK) registers.
/// Timers raise flags, the dispatcher clears them.
#[derive(Debug, Default)]
pub struct InterruptFlagState {
    tifr: AtomicU8,
    timsk: AtomicU8,
}

impl InterruptFlagState {
    pub fn flags(&self) -> TimerInterrupts {
        TimerInterrupts::from_bits_retain(self.tifr.load(Ordering::SeqCst))
    }

    pub fn mask(&self) -> TimerInterrupts {
        TimerInterrupts::from_bits_retain(self.timsk.load(Ordering::SeqCst))
    }

    /// Flags that are both raised and enabled.
    pub fn pending(&self) -> TimerInterrupts {
        self.flags() & self.mask()
    }

    pub fn raise(&self, bits: TimerInterrupts) {
        self.tifr.fetch_or(bits.bits(), Ordering::SeqCst);
    }

    pub fn clear(&self, bits: TimerInterrupts) {
        self.tifr.fetch_and(!bits.bits(), Ordering::SeqCst);
    }
}

/// TIFR at offset 0, TIMSK at offset 1.
#[derive(Debug, Clone)]
pub struct InterruptFlags {
    pub state: Arc<InterruptFlagState>,
}

impl InterruptFlags {
    pub fn new(state: Arc<InterruptFlagState>) -> Self {
        Self { state }
    }
}

impl Peripheral for InterruptFlags {
    fn read(&self, offset: u64) -> SimResult<u8> {
        match offset {
            0x00 => Ok(self.state.tifr.load(Ordering::SeqCst)),
            0x01 => Ok(self.state.timsk.load(Ordering::SeqCst)),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        match offset {
            0x00 => {
                // TIFR: writing a logical one clears the flag
                self.state.tifr.fetch_and(!value, Ordering::SeqCst);
            }
            0x01 => {
                self.state.timsk.store(value, Ordering::SeqCst);
                tracing::info!("TIMSK set to {:#04x}", value);
            }
            _ => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "tifr": self.state.tifr.load(Ordering::SeqCst),
            "timsk": self.state.timsk.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tifr_write_one_to_clear() {
        let state = Arc::new(InterruptFlagState::default());
        let mut flags = InterruptFlags::new(state.clone());

        state.raise(TimerInterrupts::TOV0 | TimerInterrupts::TOV1);
        flags.write(0x00, TimerInterrupts::TOV0.bits()).unwrap();

        assert_eq!(state.flags(), TimerInterrupts::TOV1);
        // Writing zero leaves flags untouched
        flags.write(0x00, 0).unwrap();
        assert_eq!(state.flags(), TimerInterrupts::TOV1);
    }

    #[test]
    fn test_pending_requires_flag_and_mask() {
        let state = Arc::new(InterruptFlagState::default());
        let mut flags = InterruptFlags::new(state.clone());

        state.raise(TimerInterrupts::TOV0);
        assert!(state.pending().is_empty());

        flags.write(0x01, TimerInterrupts::TOV0.bits()).unwrap();
        assert_eq!(state.pending(), TimerInterrupts::TOV0);
        assert_eq!(flags.read(0x01).unwrap(), 0x01);

        state.clear(TimerInterrupts::TOV0);
        assert!(state.pending().is_empty());
    }
}
