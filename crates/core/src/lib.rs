pub mod audit;
pub mod bus;
pub mod clock;
pub mod cpu;
pub mod hal;
pub mod idle;
pub mod metrics;
pub mod peripherals;
pub mod shared;
pub mod snapshot;
pub mod vector;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hal::timer::{Running, TimerController};
use crate::idle::{Foreground, IdleLoop};
use crate::peripherals::timer::ClockDivisor;
use crate::vector::{Vector, VectorTable, VECTOR_COUNT};


/// Static configuration mistakes. Typed code cannot produce most of these;
/// they surface when configuration comes from raw registers or YAML.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Unsupported clock divisor {0} (expected 1, 8, 64, 256 or 1024)")]
    UnsupportedDivisor(u16),
    #[error("Unsupported counter width {0} bits (expected 1..=16)")]
    UnsupportedCounterWidth(u8),
    #[error("Clock frequency must be non-zero")]
    ZeroFrequency,
    #[error("Vector {0} is bound to more than one handler")]
    DuplicateBinding(Vector),
    #[error("Vector {0} cannot be bound to an interrupt handler")]
    NotBindable(Vector),
    #[error("Vector {0} has no bound handler")]
    UnboundVector(Vector),
    #[error("Vector {0} has no interrupt flag")]
    NoInterruptFlag(Vector),
    #[error("Unknown interrupt vector '{0}'")]
    UnknownVector(String),
    #[error("No timer peripheral is installed on the bus")]
    MissingTimer,
    #[error("Overflow interrupt enabled before the timer clock source was configured")]
    ArmedBeforeConfigured,
    #[error("Global interrupts enabled before the overflow interrupt was armed")]
    InterruptsBeforeArmed,
    #[error("Timer already initialized (lifecycle {0:?}, global interrupts {1})")]
    AlreadyInitialized(Lifecycle, bool),
    #[error("Timer register {0:#04x} written after global interrupts were enabled")]
    ReconfiguredWhileRunning(u64),
    #[error("Timer clock stopped while the overflow interrupt was armed")]
    ClockStoppedWhileArmed,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Vector {0} dispatched while an interrupt was already in service")]
    ReentrantDispatch(Vector),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self) {}
    fn on_overflow(&self, _vector: Vector, _cycle: u64) {}
    /// An overflow arrived while the previous one was still pending.
    fn on_coalesced_overflow(&self, _vector: Vector, _cycle: u64) {}
    fn on_interrupt_enter(&self, _vector: Vector, _cycle: u64, _latency: u64) {}
    fn on_interrupt_exit(&self, _vector: Vector, _cycle: u64) {}
    fn on_step_end(&self, _cycles: u32) {}
}

/// Trait representing a memory-mapped peripheral
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u64) -> SimResult<u8>;
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()>;
    /// Advance by one clock cycle. Returns true when the peripheral raised its interrupt.
    fn tick(&mut self) -> bool {
        false
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Trait representing the I/O register space
pub trait Bus {
    fn read_u8(&self, addr: u64) -> SimResult<u8>;
    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()>;
    fn tick_peripherals(&mut self) -> Vec<Vector>; // Returns vectors raised this cycle
}

/// Process-wide state of the timer-interrupt program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Uninitialized,
    Configured,
    Armed,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Foreground { cycles: u32 },
    Interrupt { vector: Vector, cycles: u32 },
}

pub struct Machine<F: Foreground = IdleLoop> {
    pub cpu: cpu::Cpu,
    pub bus: bus::SystemBus,
    pub clock: clock::SimClock,
    pub vectors: VectorTable,
    pub foreground: F,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
    raised_at: [Option<u64>; VECTOR_COUNT],
}

impl Machine<IdleLoop> {
    pub fn new(bus: bus::SystemBus, clock: clock::SimClock, vectors: VectorTable) -> Self {
        Self::with_foreground(bus, clock, vectors, IdleLoop::new())
    }
}

impl<F: Foreground> Machine<F> {
    pub fn with_foreground(
        bus: bus::SystemBus,
        clock: clock::SimClock,
        vectors: VectorTable,
        foreground: F,
    ) -> Self {
        let cpu = cpu::Cpu::new(bus.sreg.clone());
        Self {
            cpu,
            bus,
            clock,
            vectors,
            foreground,
            observers: Vec::new(),
            raised_at: [None; VECTOR_COUNT],
        }
    }

    /// Two-phase init: configure the clock source, arm the overflow
    /// interrupt, then enable global interrupt delivery. Runs once, from
    /// reset state with SREG.I clear.
    pub fn boot(&mut self, divisor: ClockDivisor) -> SimResult<Running> {
        let layout = self.bus.timer_layout()?;
        let lifecycle = self.lifecycle();
        let global = self.cpu.interrupts_enabled();
        if lifecycle != Lifecycle::Uninitialized || global {
            tracing::error!("Refusing to boot: lifecycle {:?}, SREG.I {}", lifecycle, global);
            return Err(ConfigurationError::AlreadyInitialized(lifecycle, global).into());
        }
        if !self.vectors.is_bound(layout.overflow) {
            return Err(ConfigurationError::UnboundVector(layout.overflow).into());
        }

        let running = TimerController::new(&mut self.bus, layout)
            .configure(divisor)?
            .enable_overflow_interrupt()?
            .enable_global_interrupts()?;

        tracing::info!(
            "Timer running: {} overflow every {:?}",
            layout.overflow,
            self.clock.overflow_period(divisor, layout.width)
        );

        for observer in &self.observers {
            observer.on_simulation_start();
        }
        Ok(running)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        let Ok(layout) = self.bus.timer_layout() else {
            return Lifecycle::Uninitialized;
        };
        let configured = self
            .bus
            .read_u8(layout.control)
            .map(|tccr| ClockDivisor::from_clock_select(tccr).is_some())
            .unwrap_or(false);
        let armed = configured
            && layout
                .overflow
                .flag_mask()
                .map(|mask| self.bus.flags.mask().contains(mask))
                .unwrap_or(false);

        if armed && (self.cpu.interrupts_enabled() || self.cpu.in_service().is_some()) {
            Lifecycle::Running
        } else if armed {
            Lifecycle::Armed
        } else if configured {
            Lifecycle::Configured
        } else {
            Lifecycle::Uninitialized
        }
    }

    /// Executes one foreground instruction, or services one interrupt if
    /// one is pending at this instruction boundary.
    pub fn step(&mut self) -> SimResult<StepOutcome> {
        let just_returned = self.cpu.take_return_shadow();
        if !just_returned && self.cpu.interrupts_enabled() {
            if let Some(vector) = self.pending_interrupt() {
                let start = self.clock.cycles();
                self.dispatch(vector)?;
                let cycles = (self.clock.cycles() - start) as u32;
                return Ok(StepOutcome::Interrupt { vector, cycles });
            }
        }

        let cycles = self.foreground.step(&mut self.bus)?;
        self.advance(cycles);
        for observer in &self.observers {
            observer.on_step_end(cycles);
        }
        Ok(StepOutcome::Foreground { cycles })
    }

    /// Steps until at least `cycles` clock cycles have elapsed. Returns the
    /// cycles actually run, which may overshoot by one instruction or handler.
    pub fn run_cycles(&mut self, cycles: u64) -> SimResult<u64> {
        let start = self.clock.cycles();
        let target = start + cycles;
        while self.clock.cycles() < target {
            self.step()?;
        }
        Ok(self.clock.cycles() - start)
    }

    pub fn stop(&self) {
        for observer in &self.observers {
            observer.on_simulation_stop();
        }
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            cycles: self.clock.cycles(),
            elapsed_ns: self.clock.elapsed().as_nanos() as u64,
            frequency_hz: self.clock.frequency_hz(),
            lifecycle: self.lifecycle(),
            cpu: snapshot::CpuSnapshot {
                sreg: self.cpu.sreg().bits(),
                global_interrupts: self.cpu.interrupts_enabled(),
                in_service: self.cpu.in_service(),
            },
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.snapshot()))
                .collect(),
        }
    }

    fn pending_interrupt(&self) -> Option<Vector> {
        let pending = self.bus.flags.pending();
        if pending.is_empty() {
            return None;
        }
        Vector::ALL.into_iter().find(|vector| {
            vector
                .flag_mask()
                .map(|mask| pending.intersects(mask))
                .unwrap_or(false)
        })
    }

    fn dispatch(&mut self, vector: Vector) -> SimResult<()> {
        let isr = self
            .vectors
            .get(vector)
            .copied()
            .ok_or(ConfigurationError::UnboundVector(vector))?;
        let mask = vector
            .flag_mask()
            .ok_or(ConfigurationError::NoInterruptFlag(vector))?;

        self.cpu.enter_interrupt(vector)?;
        self.bus.flags.clear(mask);

        let entry_cycle = self.clock.cycles();
        let latency = self.raised_at[vector.index()]
            .take()
            .map(|raised| entry_cycle - raised)
            .unwrap_or(0);
        tracing::debug!(
            "{} enter at cycle {} (latency {} cycles)",
            vector,
            entry_cycle,
            latency
        );
        for observer in &self.observers {
            observer.on_interrupt_enter(vector, entry_cycle, latency);
        }

        self.advance(cpu::INTERRUPT_ENTRY_CYCLES);
        (isr.handler)();
        self.advance(isr.body_cycles);
        self.advance(cpu::RETI_CYCLES);
        self.cpu.return_from_interrupt();

        let exit_cycle = self.clock.cycles();
        tracing::debug!("{} reti at cycle {}", vector, exit_cycle);
        for observer in &self.observers {
            observer.on_interrupt_exit(vector, exit_cycle);
        }
        Ok(())
    }

    fn advance(&mut self, cycles: u32) {
        for _ in 0..cycles {
            let flagged = self.bus.flags.flags();
            let cycle = self.clock.tick();
            for vector in self.bus.tick_peripherals() {
                let already_pending = vector
                    .flag_mask()
                    .map(|mask| flagged.intersects(mask))
                    .unwrap_or(false);
                if already_pending {
                    tracing::warn!(
                        "{} overflow at cycle {} coalesced with a pending one (handler overrun?)",
                        vector,
                        cycle
                    );
                    for observer in &self.observers {
                        observer.on_coalesced_overflow(vector, cycle);
                    }
                } else {
                    self.raised_at[vector.index()] = Some(cycle);
                }
                tracing::debug!("{} raised at cycle {}", vector, cycle);
                for observer in &self.observers {
                    observer.on_overflow(vector, cycle);
                }
            }
        }
    }
}

impl<F: Foreground> std::fmt::Debug for Machine<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("cpu", &self.cpu)
            .field("clock", &self.clock)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
