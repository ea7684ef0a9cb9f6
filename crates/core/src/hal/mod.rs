//! Driver-side view of the timer-interrupt subsystem: what firmware does to
//! the registers, as opposed to what the simulated hardware does with them.

pub mod interrupt;
pub mod timer;

pub use crate::peripherals::timer::{ClockDivisor, CounterWidth};
pub use timer::{Armed, Configured, Running, TimerController, TimerLayout, Unconfigured};
