//! Typestate timer controller.
//!
//! The init protocol is configure, then arm, then enable global interrupts.
//! Each step consumes the controller and returns it in the next state, so
//! steps cannot be skipped or reordered. Arming an unconfigured timer does
//! not compile:
//!
//! ```compile_fail
//! use tickwire_core::bus::SystemBus;
//! use tickwire_core::hal::{TimerController, TimerLayout};
//!
//! let mut bus = SystemBus::new();
//! let timer = TimerController::new(&mut bus, TimerLayout::default());
//! timer.enable_overflow_interrupt();
//! ```
//!
//! ```
//! use tickwire_core::bus::SystemBus;
//! use tickwire_core::hal::{ClockDivisor, TimerController, TimerLayout};
//!
//! let mut bus = SystemBus::new();
//! let running = TimerController::new(&mut bus, TimerLayout::default())
//!     .configure(ClockDivisor::Div64)?
//!     .enable_overflow_interrupt()?
//!     .enable_global_interrupts()?;
//! assert_eq!(running.divisor(), ClockDivisor::Div64);
//! # Ok::<(), tickwire_core::SimulationError>(())
//! ```

use super::interrupt;
use crate::bus::{INTERRUPT_FLAGS_BASE, SREG_ADDR, TIMER0_BASE};
use crate::peripherals::flags::TimerInterrupts;
use crate::peripherals::timer::{ClockDivisor, CounterWidth, CS_MASK, TCCR, TCNT_LOW};
use crate::vector::Vector;
use crate::{Bus, ConfigurationError, SimResult};

/// Where the registers of one timer and its interrupt plumbing live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerLayout {
    /// TCNT (low byte)
    pub counter: u64,
    /// TCCR
    pub control: u64,
    /// TIFR
    pub flags: u64,
    /// TIMSK
    pub mask: u64,
    /// SREG
    pub status: u64,
    pub overflow: Vector,
    pub width: CounterWidth,
}

impl TimerLayout {
    pub const fn atmega8_timer0() -> Self {
        Self {
            counter: TIMER0_BASE + TCNT_LOW,
            control: TIMER0_BASE + TCCR,
            flags: INTERRUPT_FLAGS_BASE,
            mask: INTERRUPT_FLAGS_BASE + 1,
            status: SREG_ADDR,
            overflow: Vector::Timer0Ovf,
            width: CounterWidth::BITS_8,
        }
    }

    pub fn overflow_mask(&self) -> Result<TimerInterrupts, ConfigurationError> {
        self.overflow
            .flag_mask()
            .ok_or(ConfigurationError::NoInterruptFlag(self.overflow))
    }
}

impl Default for TimerLayout {
    fn default() -> Self {
        Self::atmega8_timer0()
    }
}

#[derive(Debug)]
pub struct Unconfigured;

#[derive(Debug)]
pub struct Configured {
    divisor: ClockDivisor,
}

#[derive(Debug)]
pub struct Armed {
    divisor: ClockDivisor,
}

/// Proof that the init protocol completed. Only `enable_global_interrupts`
/// can produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Running {
    divisor: ClockDivisor,
    layout: TimerLayout,
}

impl Running {
    pub fn divisor(&self) -> ClockDivisor {
        self.divisor
    }

    pub fn layout(&self) -> TimerLayout {
        self.layout
    }
}

#[derive(Debug)]
pub struct TimerController<'a, B: Bus + ?Sized, S> {
    bus: &'a mut B,
    layout: TimerLayout,
    state: S,
}

impl<'a, B: Bus + ?Sized, S> TimerController<'a, B, S> {
    pub fn layout(&self) -> &TimerLayout {
        &self.layout
    }

    /// Current counter value.
    pub fn counter(&self) -> SimResult<u32> {
        let low = self.bus.read_u8(self.layout.counter)? as u32;
        if self.layout.width.bits() > 8 {
            let high = self.bus.read_u8(self.layout.counter + 2)? as u32;
            Ok((high << 8) | low)
        } else {
            Ok(low)
        }
    }
}

impl<'a, B: Bus + ?Sized> TimerController<'a, B, Unconfigured> {
    pub fn new(bus: &'a mut B, layout: TimerLayout) -> Self {
        Self {
            bus,
            layout,
            state: Unconfigured,
        }
    }

    /// Selects the prescaled clock source. The counter starts running as
    /// soon as the write lands.
    pub fn configure(self, divisor: ClockDivisor) -> SimResult<TimerController<'a, B, Configured>> {
        let tccr = self.bus.read_u8(self.layout.control)?;
        let value = (tccr & !CS_MASK) | divisor.clock_select();
        self.bus.write_u8(self.layout.control, value)?;
        tracing::info!("Timer configured: {} ({:#04x} -> TCCR)", divisor, value);

        Ok(TimerController {
            bus: self.bus,
            layout: self.layout,
            state: Configured { divisor },
        })
    }
}

impl<'a, B: Bus + ?Sized> TimerController<'a, B, Configured> {
    pub fn divisor(&self) -> ClockDivisor {
        self.state.divisor
    }

    /// Sets the overflow enable bit in the interrupt mask, leaving other
    /// sources untouched.
    pub fn enable_overflow_interrupt(self) -> SimResult<TimerController<'a, B, Armed>> {
        let bit = self.layout.overflow_mask()?;
        let timsk = self.bus.read_u8(self.layout.mask)?;
        self.bus.write_u8(self.layout.mask, timsk | bit.bits())?;
        tracing::info!("{} interrupt armed", self.layout.overflow);

        Ok(TimerController {
            bus: self.bus,
            layout: self.layout,
            state: Armed {
                divisor: self.state.divisor,
            },
        })
    }
}

impl<'a, B: Bus + ?Sized> TimerController<'a, B, Armed> {
    pub fn divisor(&self) -> ClockDivisor {
        self.state.divisor
    }

    /// Clears the overflow enable bit again, going back to `Configured`.
    pub fn disable_overflow_interrupt(self) -> SimResult<TimerController<'a, B, Configured>> {
        let bit = self.layout.overflow_mask()?;
        let timsk = self.bus.read_u8(self.layout.mask)?;
        self.bus.write_u8(self.layout.mask, timsk & !bit.bits())?;

        Ok(TimerController {
            bus: self.bus,
            layout: self.layout,
            state: Configured {
                divisor: self.state.divisor,
            },
        })
    }

    pub fn enable_global_interrupts(self) -> SimResult<Running> {
        interrupt::enable(self.bus, self.layout.status)?;
        Ok(Running {
            divisor: self.state.divisor,
            layout: self.layout,
        })
    }
}
