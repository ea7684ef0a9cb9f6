//! Interrupt vectors and the handler binding table.
//!
//! A [`VectorTable`] is meant to be built in a `const` or `static` item, so a
//! vector bound twice is rejected while the program is compiled:
//!
//! ```
//! use tickwire_core::vector::{Vector, VectorTable};
//!
//! fn timer0_overflow() {}
//!
//! static VECTORS: VectorTable = VectorTable::new().bind(Vector::Timer0Ovf, timer0_overflow);
//! assert!(VECTORS.is_bound(Vector::Timer0Ovf));
//! ```
//!
//! ```compile_fail
//! use tickwire_core::vector::{Vector, VectorTable};
//!
//! fn first() {}
//! fn second() {}
//!
//! static VECTORS: VectorTable = VectorTable::new()
//!     .bind(Vector::Timer0Ovf, first)
//!     .bind(Vector::Timer0Ovf, second);
//! ```

use crate::peripherals::flags::TimerInterrupts;
use crate::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const VECTOR_COUNT: usize = 19;

/// Cycles charged for a handler body when none is given (a single `nop`).
pub const DEFAULT_BODY_CYCLES: u32 = 1;

/// ATmega8 interrupt sources in vector order. A lower index wins when
/// several interrupts are pending at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vector {
    Reset,
    Int0,
    Int1,
    Timer2Comp,
    Timer2Ovf,
    Timer1Capt,
    Timer1CompA,
    Timer1CompB,
    Timer1Ovf,
    Timer0Ovf,
    SpiStc,
    UsartRxc,
    UsartUdre,
    UsartTxc,
    Adc,
    EeRdy,
    AnaComp,
    Twi,
    SpmRdy,
}

impl Vector {
    pub const ALL: [Vector; VECTOR_COUNT] = [
        Vector::Reset,
        Vector::Int0,
        Vector::Int1,
        Vector::Timer2Comp,
        Vector::Timer2Ovf,
        Vector::Timer1Capt,
        Vector::Timer1CompA,
        Vector::Timer1CompB,
        Vector::Timer1Ovf,
        Vector::Timer0Ovf,
        Vector::SpiStc,
        Vector::UsartRxc,
        Vector::UsartUdre,
        Vector::UsartTxc,
        Vector::Adc,
        Vector::EeRdy,
        Vector::AnaComp,
        Vector::Twi,
        Vector::SpmRdy,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit in TIFR/TIMSK that flags and enables this source, for the timer
    /// interrupts that live there.
    pub const fn flag_mask(self) -> Option<TimerInterrupts> {
        match self {
            Vector::Timer2Comp => Some(TimerInterrupts::OCF2),
            Vector::Timer2Ovf => Some(TimerInterrupts::TOV2),
            Vector::Timer1Capt => Some(TimerInterrupts::ICF1),
            Vector::Timer1CompA => Some(TimerInterrupts::OCF1A),
            Vector::Timer1CompB => Some(TimerInterrupts::OCF1B),
            Vector::Timer1Ovf => Some(TimerInterrupts::TOV1),
            Vector::Timer0Ovf => Some(TimerInterrupts::TOV0),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Vector::Reset => "reset",
            Vector::Int0 => "int0",
            Vector::Int1 => "int1",
            Vector::Timer2Comp => "timer2_comp",
            Vector::Timer2Ovf => "timer2_ovf",
            Vector::Timer1Capt => "timer1_capt",
            Vector::Timer1CompA => "timer1_comp_a",
            Vector::Timer1CompB => "timer1_comp_b",
            Vector::Timer1Ovf => "timer1_ovf",
            Vector::Timer0Ovf => "timer0_ovf",
            Vector::SpiStc => "spi_stc",
            Vector::UsartRxc => "usart_rxc",
            Vector::UsartUdre => "usart_udre",
            Vector::UsartTxc => "usart_txc",
            Vector::Adc => "adc",
            Vector::EeRdy => "ee_rdy",
            Vector::AnaComp => "ana_comp",
            Vector::Twi => "twi",
            Vector::SpmRdy => "spm_rdy",
        }
    }
}

impl std::fmt::Display for Vector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Vector {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Vector::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| ConfigurationError::UnknownVector(s.to_string()))
    }
}

/// Zero-argument, zero-return interrupt service routine. Anything it shares
/// with the foreground must go through atomics (see [`crate::shared`]).
pub type Handler = fn();

#[derive(Debug, Clone, Copy)]
pub struct Isr {
    pub handler: Handler,
    /// Cycles the handler body takes. Must stay well below the timer
    /// period or overflows start to coalesce.
    pub body_cycles: u32,
}

/// One handler slot per vector.
#[derive(Debug, Clone, Copy)]
pub struct VectorTable {
    slots: [Option<Isr>; VECTOR_COUNT],
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; VECTOR_COUNT],
        }
    }

    pub const fn bind(self, vector: Vector, handler: Handler) -> Self {
        self.bind_with_cycles(vector, handler, DEFAULT_BODY_CYCLES)
    }

    /// Panics on a duplicate or reset binding; in a `const` context that
    /// panic is a compile error.
    pub const fn bind_with_cycles(
        mut self,
        vector: Vector,
        handler: Handler,
        body_cycles: u32,
    ) -> Self {
        if matches!(vector, Vector::Reset) {
            panic!("the reset vector cannot be bound to an interrupt handler");
        }
        if self.slots[vector.index()].is_some() {
            panic!("interrupt vector bound twice");
        }
        self.slots[vector.index()] = Some(Isr {
            handler,
            body_cycles,
        });
        self
    }

    /// Runtime binding, for tables assembled from configuration.
    pub fn try_bind(&mut self, vector: Vector, isr: Isr) -> Result<(), ConfigurationError> {
        if vector == Vector::Reset {
            return Err(ConfigurationError::NotBindable(vector));
        }
        let slot = &mut self.slots[vector.index()];
        if slot.is_some() {
            return Err(ConfigurationError::DuplicateBinding(vector));
        }
        *slot = Some(isr);
        Ok(())
    }

    pub fn get(&self, vector: Vector) -> Option<&Isr> {
        self.slots[vector.index()].as_ref()
    }

    pub fn is_bound(&self, vector: Vector) -> bool {
        self.slots[vector.index()].is_some()
    }

    pub fn bound(&self) -> impl Iterator<Item = Vector> + '_ {
        Vector::ALL.into_iter().filter(|v| self.is_bound(*v))
    }
}

impl Default for VectorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop() {}

    #[test]
    fn test_vector_order_matches_index() {
        for (i, vector) in Vector::ALL.iter().enumerate() {
            assert_eq!(vector.index(), i);
        }
        assert_eq!(Vector::Timer0Ovf.index(), 9);
    }

    #[test]
    fn test_vector_from_str() {
        assert_eq!("timer0_ovf".parse::<Vector>(), Ok(Vector::Timer0Ovf));
        assert_eq!(" TIMER1_OVF ".parse::<Vector>(), Ok(Vector::Timer1Ovf));
        assert_eq!(
            "timer9_ovf".parse::<Vector>(),
            Err(ConfigurationError::UnknownVector("timer9_ovf".to_string()))
        );
    }

    #[test]
    fn test_only_timer_vectors_have_flags() {
        assert_eq!(Vector::Timer0Ovf.flag_mask(), Some(TimerInterrupts::TOV0));
        assert_eq!(Vector::Timer1Ovf.flag_mask(), Some(TimerInterrupts::TOV1));
        assert_eq!(Vector::Int0.flag_mask(), None);
        assert_eq!(Vector::Reset.flag_mask(), None);
    }

    #[test]
    fn test_const_binding() {
        const TABLE: VectorTable =
            VectorTable::new().bind_with_cycles(Vector::Timer0Ovf, nop, 12);

        let isr = TABLE.get(Vector::Timer0Ovf).unwrap();
        assert_eq!(isr.body_cycles, 12);
        assert!(!TABLE.is_bound(Vector::Timer1Ovf));
        assert_eq!(TABLE.bound().collect::<Vec<_>>(), vec![Vector::Timer0Ovf]);
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn test_duplicate_const_binding_panics_at_runtime_too() {
        let _ = VectorTable::new()
            .bind(Vector::Timer0Ovf, nop)
            .bind(Vector::Timer0Ovf, nop);
    }

    #[test]
    fn test_try_bind_rejects_duplicates_and_reset() {
        let mut table = VectorTable::new();
        let isr = Isr {
            handler: nop,
            body_cycles: DEFAULT_BODY_CYCLES,
        };

        assert!(table.try_bind(Vector::Timer0Ovf, isr).is_ok());
        assert_eq!(
            table.try_bind(Vector::Timer0Ovf, isr),
            Err(ConfigurationError::DuplicateBinding(Vector::Timer0Ovf))
        );
        assert_eq!(
            table.try_bind(Vector::Reset, isr),
            Err(ConfigurationError::NotBindable(Vector::Reset))
        );
    }
}
