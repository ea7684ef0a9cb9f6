use crate::peripherals::flags::{InterruptFlagState, TimerInterrupts};
use crate::{ConfigurationError, Peripheral, SimResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Clock select field (CSn2:0) of the timer control register.
pub const CS_MASK: u8 = 0b0000_0111;

// Register offsets relative to the timer base address
pub const TCNT_LOW: u64 = 0x00;
pub const TCCR: u64 = 0x01;
pub const TCNT_HIGH: u64 = 0x02; // only present on counters wider than 8 bits

/// Prescaler divisors the timer hardware supports. Anything else cannot be
/// expressed in typed code; raw values go through `TryFrom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClockDivisor {
    Div1,
    Div8,
    Div64,
    Div256,
    Div1024,
}

impl ClockDivisor {
    pub const ALL: [ClockDivisor; 5] = [
        ClockDivisor::Div1,
        ClockDivisor::Div8,
        ClockDivisor::Div64,
        ClockDivisor::Div256,
        ClockDivisor::Div1024,
    ];

    pub const fn value(self) -> u32 {
        match self {
            ClockDivisor::Div1 => 1,
            ClockDivisor::Div8 => 8,
            ClockDivisor::Div64 => 64,
            ClockDivisor::Div256 => 256,
            ClockDivisor::Div1024 => 1024,
        }
    }

    pub const fn clock_select(self) -> u8 {
        match self {
            ClockDivisor::Div1 => 1,
            ClockDivisor::Div8 => 2,
            ClockDivisor::Div64 => 3,
            ClockDivisor::Div256 => 4,
            ClockDivisor::Div1024 => 5,
        }
    }

    /// Decodes the clock select bits of a control register value. Returns
    /// `None` when the timer is stopped (0) or clocked externally (6, 7).
    pub fn from_clock_select(tccr: u8) -> Option<Self> {
        match tccr & CS_MASK {
            1 => Some(ClockDivisor::Div1),
            2 => Some(ClockDivisor::Div8),
            3 => Some(ClockDivisor::Div64),
            4 => Some(ClockDivisor::Div256),
            5 => Some(ClockDivisor::Div1024),
            _ => None,
        }
    }
}

impl TryFrom<u16> for ClockDivisor {
    type Error = ConfigurationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        ClockDivisor::ALL
            .into_iter()
            .find(|d| d.value() == value as u32)
            .ok_or(ConfigurationError::UnsupportedDivisor(value))
    }
}

impl std::fmt::Display for ClockDivisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clk/{}", self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct CounterWidth(u8);

impl CounterWidth {
    pub const BITS_8: CounterWidth = CounterWidth(8);
    pub const BITS_16: CounterWidth = CounterWidth(16);

    pub fn new(bits: u8) -> Result<Self, ConfigurationError> {
        if (1..=16).contains(&bits) {
            Ok(Self(bits))
        } else {
            Err(ConfigurationError::UnsupportedCounterWidth(bits))
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn max(self) -> u32 {
        (1u32 << self.0) - 1
    }

    /// Ticks per full wrap, 2^W.
    pub const fn modulus(self) -> u64 {
        1u64 << self.0
    }

    pub const fn register_bytes(self) -> u64 {
        if self.0 > 8 {
            2
        } else {
            1
        }
    }
}

impl TryFrom<u8> for CounterWidth {
    type Error = ConfigurationError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Self::new(bits)
    }
}

impl From<CounterWidth> for u8 {
    fn from(width: CounterWidth) -> u8 {
        width.0
    }
}

impl Default for CounterWidth {
    fn default() -> Self {
        Self::BITS_8
    }
}

/// Free-running up-counter with a prescaled clock and an overflow flag.
#[derive(Debug)]
pub struct TimerCounter {
    tccr: u8,
    tcnt: u32,
    prescale_count: u32,
    width: CounterWidth,
    overflow_flag: TimerInterrupts,
    flags: Arc<InterruptFlagState>,
}

impl TimerCounter {
    pub fn new(
        width: CounterWidth,
        overflow_flag: TimerInterrupts,
        flags: Arc<InterruptFlagState>,
    ) -> Self {
        Self {
            tccr: 0,
            tcnt: 0,
            prescale_count: 0,
            width,
            overflow_flag,
            flags,
        }
    }

    /// Bytes of register space the timer occupies.
    pub fn size(&self) -> u64 {
        1 + self.width.register_bytes()
    }

    pub fn counter(&self) -> u32 {
        self.tcnt
    }

    pub fn divisor(&self) -> Option<ClockDivisor> {
        ClockDivisor::from_clock_select(self.tccr)
    }

    pub fn width(&self) -> CounterWidth {
        self.width
    }
}

impl Peripheral for TimerCounter {
    fn read(&self, offset: u64) -> SimResult<u8> {
        match offset {
            TCNT_LOW => Ok((self.tcnt & 0xFF) as u8),
            TCCR => Ok(self.tccr),
            TCNT_HIGH if self.width.bits() > 8 => Ok(((self.tcnt >> 8) & 0xFF) as u8),
            _ => Ok(0),
        }
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        match offset {
            TCNT_LOW => {
                self.tcnt = ((self.tcnt & !0xFF) | value as u32) & self.width.max();
            }
            TCNT_HIGH if self.width.bits() > 8 => {
                self.tcnt = ((self.tcnt & 0xFF) | ((value as u32) << 8)) & self.width.max();
            }
            TCCR => {
                let old_cs = self.tccr & CS_MASK;
                self.tccr = value;
                if old_cs != value & CS_MASK {
                    self.prescale_count = 0;
                    match self.divisor() {
                        Some(divisor) => tracing::info!("Timer clock source set to {}", divisor),
                        None => tracing::info!("Timer stopped (CS={:#05b})", value & CS_MASK),
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn tick(&mut self) -> bool {
        let Some(divisor) = self.divisor() else {
            return false; // Stopped
        };

        self.prescale_count += 1;
        if self.prescale_count < divisor.value() {
            return false;
        }
        self.prescale_count = 0;

        if self.tcnt == self.width.max() {
            self.tcnt = 0;
            self.flags.raise(self.overflow_flag);
            true
        } else {
            self.tcnt += 1;
            false
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "tcnt": self.tcnt,
            "tccr": self.tccr,
            "width": self.width.bits(),
            "prescale_count": self.prescale_count,
        })
    }
}
