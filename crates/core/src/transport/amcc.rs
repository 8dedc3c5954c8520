//! AMCC S5933 / S5920 PCI interface chips
//!
//! The oldest PCI generations talk through an AMCC bus mate: the S5933
//! forwards the command through outgoing mailbox 1 and serves the
//! response from an 8 bit FIFO, the S5920 uses its outgoing mailbox and
//! a 32 bit data window in a second port range.

use crate::device::StatusReg;
use crate::error::{DriverError, DriverResult};
use crate::hal::{HostOs, RegIo};

/// S5933 operation registers (port range 0)
pub mod s5933 {
    /// Outgoing mailbox 1: the command register
    pub const OMB1: u32 = 0x00;
    /// Incoming mailbox 4; its high byte is the status port
    pub const IMB4: u32 = 0x1C;
    /// Response FIFO, four byte lanes
    pub const FIFO: u32 = 0x20;
    pub const INTCSR: u32 = 0x38;
    /// Mailbox/FIFO control and status
    pub const MCSR: u32 = 0x3C;
    /// FIFO-empty bit of the 16 bit MCSR read
    pub const MCSR_FIFO_EMPTY: u16 = 0x20;
    pub const OP_REG_RANGE: u64 = 0x40;

    pub const INT_ENB: u32 = 0x0000_1000;
    pub const INT_MASK: u32 = 0x0000_1000;
    pub const INT_FLAG: u32 = 0x0002_0000;
    pub const INT_ACK: u32 = 0x0002_0000;
}

/// S5920 registers
pub mod s5920 {
    /// Outgoing mailbox (port range 0): the command register
    pub const OMB: u32 = 0x0C;
    /// Incoming mailbox; its high byte is the status port
    pub const IMB4: u32 = 0x1C;
    pub const INTCSR: u32 = 0x38;
    pub const OP_REG_RANGE: u64 = 0x80;
    /// Length of the data window (port range 1)
    pub const DATA_RANGE: u64 = 0x10;

    pub const INT_ENB: u32 = 0x0000_1000;
    pub const INT_MASK: u32 = 0x0000_1000;
    pub const INT_FLAG: u32 = 0x0002_0000;
    pub const INT_ACK: u32 = 0x0002_0000;
}

/// Offset of the status port inside range 0, same for both chips
pub const STATUS_PORT: u32 = s5933::IMB4 + 3;

/// Read function for devices with the AMCC S5933 interface chip
pub fn read_s5933(
    port: &dyn RegIo,
    status: &StatusReg,
    host: &dyn HostOs,
    timeout_us: u64,
    cmd: u8,
    buf: &mut [u8],
) -> DriverResult<()> {
    // reset inbound mailbox and FIFO status
    port.write8(s5933::MCSR + 3, 0x0C);
    // set FIFO
    port.write8(s5933::INTCSR + 3, 0x3C);

    port.write8(s5933::OMB1, cmd);

    super::wait_busy(status, host, timeout_us)?;

    for (i, b) in buf.iter_mut().enumerate() {
        if port.read16_to_cpu(s5933::MCSR) & s5933::MCSR_FIFO_EMPTY != 0 {
            return Err(DriverError::Timeout);
        }
        *b = port.read8(s5933::FIFO + (i % 4) as u32);
    }

    Ok(())
}

/// Read function for devices with the AMCC S5920 interface chip.
///
/// Data is only readable as 32 bit words; an unaligned tail is read as
/// one full word and the surplus bytes are discarded.
pub fn read_s5920(
    cmd_port: &dyn RegIo,
    data_port: &dyn RegIo,
    status: &StatusReg,
    host: &dyn HostOs,
    timeout_us: u64,
    cmd: u8,
    buf: &mut [u8],
) -> DriverResult<()> {
    cmd_port.write8(s5920::OMB, cmd);

    super::wait_busy(status, host, timeout_us)?;

    if buf.is_empty() {
        // no payload expected, do one dummy data read
        let _ = data_port.read32(0);
        return Ok(());
    }

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&data_port.read32_to_cpu(0).to_le_bytes());
    }
    let rem = chunks.into_remainder();
    if !rem.is_empty() {
        let word = data_port.read32_to_cpu(0).to_le_bytes();
        rem.copy_from_slice(&word[..rem.len()]);
    }

    Ok(())
}
