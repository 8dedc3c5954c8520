//! PEX8311 PCIe-to-PCI bridge local configuration space
//!
//! Cards of the PEX generation keep the interrupt control register in
//! the bridge's local configuration space, which lives in a different
//! port range than the data registers. The IRQ acknowledge still goes
//! to the ASIC control/status register behind the bridge.

/// Interrupt control/status register in the local configuration space
pub const LCS_INTCSR: u32 = 0x68;

/// Local interrupt input + PCI interrupt enable
pub const INTCSR_INT_ENB: u32 = 0x0900;

/// Local interrupt active flag
pub const INTCSR_INT_FLAG: u32 = 0x8000;

/// GPIO control register; carries the "booted" flag of on-card Linux
/// models (PTP270PEX HW 2.0 and later)
pub const LCS_GPIOC: u32 = 0x6C;

/// GPIO bit the card raises once its firmware has finished booting
pub const GPIOC_READY: u32 = 0x0004;

/// Upper bound for the boot time of an on-card Linux system in seconds
pub const MAX_BOOT_TIME_SECS: u64 = 27;
