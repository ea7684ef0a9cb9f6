//! Checks a recorded register write sequence against the init protocol,
//! for firmware that pokes registers directly instead of going through
//! [`crate::hal::TimerController`].

use crate::bus::RegisterWrite;
use crate::hal::timer::TimerLayout;
use crate::peripherals::status::Sreg;
use crate::peripherals::timer::ClockDivisor;
use crate::ConfigurationError;

pub fn check_init_order(
    log: &[RegisterWrite],
    layout: &TimerLayout,
) -> Result<(), ConfigurationError> {
    let overflow = layout.overflow_mask()?;
    let mut configured = false;
    let mut armed = false;
    let mut enabled = false;

    for write in log {
        let timer_register = write.addr == layout.control || write.addr == layout.mask;
        if timer_register && enabled {
            tracing::warn!(
                "Write #{} touches {:#04x} after SREG.I was set",
                write.seq,
                write.addr
            );
            return Err(ConfigurationError::ReconfiguredWhileRunning(write.addr));
        }

        if write.addr == layout.control {
            configured = ClockDivisor::from_clock_select(write.value).is_some();
            if armed && !configured {
                tracing::warn!("Write #{} stops the clock of an armed timer", write.seq);
                return Err(ConfigurationError::ClockStoppedWhileArmed);
            }
        } else if write.addr == layout.mask {
            let arms = write.value & overflow.bits() != 0;
            if arms && !configured {
                tracing::warn!(
                    "Write #{} arms {} before the clock source",
                    write.seq,
                    layout.overflow
                );
                return Err(ConfigurationError::ArmedBeforeConfigured);
            }
            armed = arms;
        } else if write.addr == layout.status && write.value & Sreg::I.bits() != 0 {
            if !armed {
                tracing::warn!(
                    "Write #{} sets SREG.I before {} is armed",
                    write.seq,
                    layout.overflow
                );
                return Err(ConfigurationError::InterruptsBeforeArmed);
            }
            enabled = true;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(writes: &[(u64, u8)]) -> Vec<RegisterWrite> {
        writes
            .iter()
            .enumerate()
            .map(|(seq, &(addr, value))| RegisterWrite {
                seq: seq as u64,
                addr,
                value,
            })
            .collect()
    }

    #[test]
    fn test_protocol_order_passes() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x53, 0x03), (0x59, 0x01), (0x5F, 0x80)]);
        assert_eq!(check_init_order(&writes, &layout), Ok(()));
    }

    #[test]
    fn test_empty_log_passes() {
        assert_eq!(check_init_order(&[], &TimerLayout::default()), Ok(()));
    }

    #[test]
    fn test_arm_before_configure() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x59, 0x01), (0x53, 0x03), (0x5F, 0x80)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::ArmedBeforeConfigured)
        );
    }

    #[test]
    fn test_sei_before_arm() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x53, 0x03), (0x5F, 0x80), (0x59, 0x01)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::InterruptsBeforeArmed)
        );
    }

    #[test]
    fn test_stopping_the_clock_unconfigures() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x53, 0x03), (0x53, 0x00), (0x59, 0x01)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::ArmedBeforeConfigured)
        );
    }

    #[test]
    fn test_stopping_the_clock_of_an_armed_timer() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x53, 0x03), (0x59, 0x01), (0x53, 0x00)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::ClockStoppedWhileArmed)
        );
    }

    #[test]
    fn test_reconfigure_after_sei() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x53, 0x03), (0x59, 0x01), (0x5F, 0x80), (0x53, 0x01)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::ReconfiguredWhileRunning(0x53))
        );

        // A critical section clearing I does not reopen the window
        let writes = log(&[
            (0x53, 0x03),
            (0x59, 0x01),
            (0x5F, 0x80),
            (0x5F, 0x00),
            (0x59, 0x00),
        ]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::ReconfiguredWhileRunning(0x59))
        );
    }

    #[test]
    fn test_critical_sections_after_boot_pass() {
        let layout = TimerLayout::default();
        let writes = log(&[
            (0x53, 0x03),
            (0x59, 0x01),
            (0x5F, 0x80),
            (0x5F, 0x00),
            (0x5F, 0x80),
        ]);
        assert_eq!(check_init_order(&writes, &layout), Ok(()));
    }

    #[test]
    fn test_unrelated_mask_bits_do_not_arm() {
        let layout = TimerLayout::default();
        // TOIE1 only, then sei
        let writes = log(&[(0x53, 0x03), (0x59, 0x04), (0x5F, 0x80)]);
        assert_eq!(
            check_init_order(&writes, &layout),
            Err(ConfigurationError::InterruptsBeforeArmed)
        );
    }

    #[test]
    fn test_clearing_sreg_is_always_allowed() {
        let layout = TimerLayout::default();
        let writes = log(&[(0x5F, 0x00), (0x53, 0x03)]);
        assert_eq!(check_init_order(&writes, &layout), Ok(()));
    }
}
