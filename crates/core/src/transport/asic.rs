//! Vendor PCI interface ASIC register block
//!
//! The same 64 byte register block appears behind three attachments:
//! as an I/O port range (PCI510 era), behind a PEX8311 PCIe-to-PCI
//! bridge with a 16 bit wide memory window, and memory mapped with the
//! ASIC integrated (the MBGPEX generation). The layout is identical in
//! all three cases, so one offset map serves every variant.

use crate::device::StatusReg;
use crate::error::DriverResult;
use crate::hal::{HostOs, RegIo};

/// Control/status register; carries the IRQ enable and flag bits
pub const CONTROL_STATUS: u32 = 0x00;
/// Command register: the 8 bit command is written as a 32 bit LE word
pub const PCI_DATA: u32 = 0x10;
/// Raw interface logic version
pub const RAW_VERSION: u32 = 0x20;
/// ASIC feature word, see [`crate::device::ASIC_FEAT_MM_IO`]
pub const FEATURES: u32 = 0x24;
/// Response data window, four 32 bit words
pub const ADDON_DATA: u32 = 0x28;
/// Status port with the BUSY flag
pub const STATUS_PORT: u32 = 0x38;
/// Size of the register block
pub const ASIC_SIZE: u64 = 0x40;

/// 64 bit timestamp register pair directly after the register block
/// (fractions first, then seconds), on models with memory mapped access
pub const TSTAMP_OFFS: u32 = 0x40;

/// IRQ enable bit in the control/status register
pub const CTL_IRQ_ENABLE: u32 = 0x0001;
/// IRQ flag / acknowledge bit in the control/status register
pub const CTL_IRQ_FLAG: u32 = 0x0004;

/// Read through the ASIC with 32 bit data accesses; serves both the
/// port I/O and the memory mapped attachment since [`RegIo`] hides the
/// difference.
pub fn read_asic32(
    regs: &dyn RegIo,
    status: &StatusReg,
    host: &dyn HostOs,
    timeout_us: u64,
    cmd: u8,
    buf: &mut [u8],
) -> DriverResult<()> {
    regs.write32_from_cpu(PCI_DATA, cmd as u32);

    super::wait_busy(status, host, timeout_us)?;

    let mut offs = ADDON_DATA;
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&regs.read32_to_cpu(offs).to_le_bytes());
        offs += 4;
    }
    let rem = chunks.into_remainder();
    if !rem.is_empty() {
        let word = regs.read32_to_cpu(offs).to_le_bytes();
        rem.copy_from_slice(&word[..rem.len()]);
    }

    Ok(())
}

/// Read variant for the PEX8311 whose memory window is only 16 bits
/// wide; the command write still goes out as a 32 bit word.
pub fn read_asic16(
    regs: &dyn RegIo,
    status: &StatusReg,
    host: &dyn HostOs,
    timeout_us: u64,
    cmd: u8,
    buf: &mut [u8],
) -> DriverResult<()> {
    regs.write32_from_cpu(PCI_DATA, cmd as u32);

    super::wait_busy(status, host, timeout_us)?;

    let mut offs = ADDON_DATA;
    let mut chunks = buf.chunks_exact_mut(2);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&regs.read16_to_cpu(offs).to_le_bytes());
        offs += 2;
    }
    let rem = chunks.into_remainder();
    if !rem.is_empty() {
        let word = regs.read16_to_cpu(offs).to_le_bytes();
        rem[0] = word[0];
    }

    Ok(())
}
