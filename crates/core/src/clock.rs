use crate::peripherals::timer::{ClockDivisor, CounterWidth};
use crate::ConfigurationError;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Deterministic system clock. Every peripheral is ticked once per cycle;
/// nothing here depends on wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimClock {
    frequency_hz: u32,
    cycles: u64,
}

impl SimClock {
    pub fn new(frequency_hz: u32) -> Result<Self, ConfigurationError> {
        if frequency_hz == 0 {
            return Err(ConfigurationError::ZeroFrequency);
        }
        Ok(Self {
            frequency_hz,
            cycles: 0,
        })
    }

    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Advances by one cycle and returns the new cycle count.
    pub fn tick(&mut self) -> u64 {
        self.cycles += 1;
        self.cycles
    }

    pub fn elapsed(&self) -> Duration {
        self.cycles_to_duration(self.cycles)
    }

    pub fn cycles_to_duration(&self, cycles: u64) -> Duration {
        let nanos = cycles as u128 * NANOS_PER_SEC / self.frequency_hz as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Whole cycles that fit in `duration` (rounded down).
    pub fn duration_to_cycles(&self, duration: Duration) -> u64 {
        (duration.as_nanos() * self.frequency_hz as u128 / NANOS_PER_SEC) as u64
    }

    /// T = D * 2^W / F
    pub fn overflow_period(&self, divisor: ClockDivisor, width: CounterWidth) -> Duration {
        self.cycles_to_duration(overflow_period_cycles(divisor, width))
    }
}

pub fn overflow_period_cycles(divisor: ClockDivisor, width: CounterWidth) -> u64 {
    divisor.value() as u64 * width.modulus()
}
