use crate::hal::timer::TimerLayout;
use crate::peripherals::flags::{InterruptFlagState, InterruptFlags, TimerInterrupts};
use crate::peripherals::status::StatusRegister;
use crate::peripherals::timer::{CounterWidth, TimerCounter, TCCR, TCNT_LOW};
use crate::vector::Vector;
use crate::{ConfigurationError, Peripheral, SimResult, SimulationError};
use anyhow::Context;
use serde::Serialize;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tickwire_config::ChipDescriptor;

// ATmega8 I/O register addresses (data space)
pub const TIMER0_BASE: u64 = 0x52;
pub const INTERRUPT_FLAGS_BASE: u64 = 0x58;
pub const SREG_ADDR: u64 = 0x5F;

#[derive(Debug)]
pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub irq: Option<Vector>,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size
    }
}

/// One register store, in the order the bus saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterWrite {
    pub seq: u64,
    pub addr: u64,
    pub value: u8,
}

#[derive(Debug)]
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
    pub flags: Arc<InterruptFlagState>,
    pub sreg: Arc<AtomicU8>,
    timer: Option<TimerLayout>,
    write_log: Vec<RegisterWrite>,
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBus {
    /// ATmega8 layout: 8-bit Timer0, TIFR/TIMSK and SREG.
    pub fn new() -> Self {
        let flags = Arc::new(InterruptFlagState::default());
        let sreg = Arc::new(AtomicU8::new(0));
        let layout = TimerLayout::atmega8_timer0();
        let timer = TimerCounter::new(CounterWidth::BITS_8, TimerInterrupts::TOV0, flags.clone());

        let peripherals = vec![
            PeripheralEntry {
                name: "timer0".to_string(),
                base: TIMER0_BASE,
                size: timer.size(),
                irq: Some(layout.overflow),
                dev: Box::new(timer),
            },
            PeripheralEntry {
                name: "tifr".to_string(),
                base: INTERRUPT_FLAGS_BASE,
                size: 2,
                irq: None,
                dev: Box::new(InterruptFlags::new(flags.clone())),
            },
            PeripheralEntry {
                name: "sreg".to_string(),
                base: SREG_ADDR,
                size: 1,
                irq: None,
                dev: Box::new(StatusRegister::new(sreg.clone())),
            },
        ];

        Self {
            peripherals,
            flags,
            sreg,
            timer: Some(layout),
            write_log: Vec::new(),
        }
    }

    pub fn from_config(chip: &ChipDescriptor) -> anyhow::Result<Self> {
        let flags = Arc::new(InterruptFlagState::default());
        let sreg = Arc::new(AtomicU8::new(0));
        let mut peripherals = Vec::new();

        let mut timer: Option<(u64, Vector, CounterWidth)> = None;
        let mut flags_base = None;
        let mut status_base = None;

        for p_cfg in &chip.peripherals {
            let irq = p_cfg
                .irq
                .as_deref()
                .map(str::parse::<Vector>)
                .transpose()
                .with_context(|| format!("Peripheral '{}'", p_cfg.id))?;

            let (dev, size) = match p_cfg.r#type.as_str() {
                "timer" => {
                    if timer.is_some() {
                        anyhow::bail!(
                            "Peripheral '{}': only one timer per system is supported",
                            p_cfg.id
                        );
                    }
                    let vector = irq.with_context(|| {
                        format!("Timer '{}' needs an 'irq' overflow vector", p_cfg.id)
                    })?;
                    let flag = vector.flag_mask().ok_or_else(|| {
                        anyhow::anyhow!(
                            "Timer '{}': {}",
                            p_cfg.id,
                            ConfigurationError::NoInterruptFlag(vector)
                        )
                    })?;
                    let bits = p_cfg
                        .config
                        .get("width")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(8);
                    let width = CounterWidth::new(u8::try_from(bits).unwrap_or(u8::MAX))
                        .with_context(|| format!("Timer '{}'", p_cfg.id))?;

                    timer = Some((p_cfg.base_address, vector, width));
                    let dev = TimerCounter::new(width, flag, flags.clone());
                    let size = dev.size();
                    (Box::new(dev) as Box<dyn Peripheral>, size)
                }
                "interrupt_flags" => {
                    flags_base = Some(p_cfg.base_address);
                    (Box::new(InterruptFlags::new(flags.clone())) as Box<dyn Peripheral>, 2)
                }
                "status" => {
                    status_base = Some(p_cfg.base_address);
                    (Box::new(StatusRegister::new(sreg.clone())) as Box<dyn Peripheral>, 1)
                }
                other => {
                    anyhow::bail!(
                        "Peripheral '{}': unsupported type '{}'",
                        p_cfg.id,
                        other
                    );
                }
            };

            tracing::info!(
                "Mapped {} '{}' at {:#04x}",
                p_cfg.r#type,
                p_cfg.id,
                p_cfg.base_address
            );
            peripherals.push(PeripheralEntry {
                name: p_cfg.id.clone(),
                base: p_cfg.base_address,
                size,
                irq,
                dev,
            });
        }

        let layout = match timer {
            Some((base, overflow, width)) => {
                let flags_base = flags_base.with_context(|| {
                    format!("Chip '{}' has a timer but no interrupt_flags", chip.name)
                })?;
                let status = status_base.with_context(|| {
                    format!("Chip '{}' has a timer but no status register", chip.name)
                })?;
                Some(TimerLayout {
                    counter: base + TCNT_LOW,
                    control: base + TCCR,
                    flags: flags_base,
                    mask: flags_base + 1,
                    status,
                    overflow,
                    width,
                })
            }
            None => None,
        };

        Ok(Self {
            peripherals,
            flags,
            sreg,
            timer: layout,
            write_log: Vec::new(),
        })
    }

    pub fn timer_layout(&self) -> SimResult<TimerLayout> {
        self.timer
            .ok_or(SimulationError::Configuration(ConfigurationError::MissingTimer))
    }

    pub fn write_log(&self) -> &[RegisterWrite] {
        &self.write_log
    }

    pub fn clear_write_log(&mut self) {
        self.write_log.clear();
    }
}

impl crate::Bus for SystemBus {
    fn read_u8(&self, addr: u64) -> SimResult<u8> {
        let p = self
            .peripherals
            .iter()
            .find(|p| p.contains(addr))
            .ok_or(SimulationError::MemoryViolation(addr))?;
        p.dev.read(addr - p.base)
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        let p = self
            .peripherals
            .iter_mut()
            .find(|p| p.contains(addr))
            .ok_or(SimulationError::MemoryViolation(addr))?;
        tracing::trace!("{} <- {:#04x} ({:#04x})", p.name, value, addr);
        p.dev.write(addr - p.base, value)?;

        let seq = self.write_log.len() as u64;
        self.write_log.push(RegisterWrite { seq, addr, value });
        Ok(())
    }

    fn tick_peripherals(&mut self) -> Vec<Vector> {
        let mut raised = Vec::new();
        for p in &mut self.peripherals {
            if p.dev.tick() {
                if let Some(irq) = p.irq {
                    raised.push(irq);
                }
            }
        }
        raised
    }
}
