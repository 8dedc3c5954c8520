//! Fast IRQ-safe timestamp path
//!
//! Devices with memory mapped I/O expose the current time as a 64 bit
//! register pair (binary fractions, then seconds). Reading the two
//! words under the dedicated spinlock is orders of magnitude faster
//! than a command/response transaction and touches neither the
//! transaction mutex nor the command interface.

use crate::device::Device;
use crate::types::{TimeStamp, TimeStampCycles};

/// Read the memory mapped timestamp register pair.
///
/// Returns the zero timestamp when the device has no mapped timestamp
/// register, mirroring what the hardware would deliver before its ASIC
/// latches the first second.
pub fn fast_timestamp(dev: &Device) -> TimeStamp {
    let guard = dev.tstamp.lock();
    match &*guard {
        Some(t) => {
            let frac = t.regs.read32_to_cpu(t.offs);
            let sec = t.regs.read32_to_cpu(t.offs + 4);
            TimeStamp { sec, frac }
        }
        None => TimeStamp::default(),
    }
}

/// Variant that samples the CPU cycle counter inside the same critical
/// section, so callers can relate the device time to the host timeline.
pub fn fast_timestamp_cycles(dev: &Device) -> TimeStampCycles {
    let guard = dev.tstamp.lock();
    match &*guard {
        Some(t) => {
            let cycles = dev.host().cycles();
            let frac = t.regs.read32_to_cpu(t.offs);
            let sec = t.regs.read32_to_cpu(t.offs + 4);
            TimeStampCycles {
                tstamp: TimeStamp { sec, frac },
                cycles,
            }
        }
        None => TimeStampCycles {
            tstamp: TimeStamp::default(),
            cycles: dev.host().cycles(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use crate::types::TimeStamp;

    #[test]
    fn test_fast_timestamp_reads_register_pair() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        fix.card.set_tstamp(TimeStamp {
            sec: 0x6650_1234,
            frac: 0x8000_0000,
        });
        let ts = fast_timestamp(&fix.dev);
        assert_eq!(ts.sec, 0x6650_1234);
        assert_eq!(ts.frac, 0x8000_0000);
    }

    #[test]
    fn test_fast_timestamp_without_mapping_is_zero() {
        let fix = mock::asic_fixture(mock::model::ClockModel::pci511());
        let ts = fast_timestamp(&fix.dev);
        assert_eq!(ts, TimeStamp::default());
    }

    #[test]
    fn test_fast_timestamp_cycles_samples_counter() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        let a = fast_timestamp_cycles(&fix.dev);
        fix.host.advance_us(5);
        let b = fast_timestamp_cycles(&fix.dev);
        assert!(b.cycles > a.cycles);
    }
}
