use crate::peripherals::status::Sreg;
use crate::{Bus, SimResult};

/// `sei`
pub fn enable<B: Bus + ?Sized>(bus: &mut B, status: u64) -> SimResult<()> {
    let sreg = bus.read_u8(status)?;
    bus.write_u8(status, sreg | Sreg::I.bits())
}

/// `cli`
pub fn disable<B: Bus + ?Sized>(bus: &mut B, status: u64) -> SimResult<()> {
    let sreg = bus.read_u8(status)?;
    bus.write_u8(status, sreg & !Sreg::I.bits())
}

pub fn is_enabled<B: Bus + ?Sized>(bus: &B, status: u64) -> SimResult<bool> {
    Ok(Sreg::from_bits_retain(bus.read_u8(status)?).contains(Sreg::I))
}

/// Runs `f` with interrupt delivery masked and restores the previous
/// global enable state afterwards, also when `f` fails.
pub fn free<B, R, F>(bus: &mut B, status: u64, f: F) -> SimResult<R>
where
    B: Bus + ?Sized,
    F: FnOnce(&mut B) -> SimResult<R>,
{
    let was_enabled = is_enabled(&*bus, status)?;
    if was_enabled {
        disable(bus, status)?;
    }

    let result = f(&mut *bus);

    if was_enabled {
        enable(bus, status)?;
    }
    result
}
