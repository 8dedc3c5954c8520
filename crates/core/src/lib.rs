//! Bus-level driver engine for radio clock cards
//!
//! Probes and drives a family of PCI/PCIe, ISA and USB time reference
//! devices (GPS/GNSS, long wave, IRIG time code, PTP, free running):
//! classifies candidate hardware, discovers its capability set,
//! mediates every request/response transaction over the device's
//! command interface, delivers the once-per-second tick to readers, and
//! dispatches the versioned IOCTL surface.
//!
//! The engine is OS independent: the host kernel wrapper supplies bus
//! access and task services through the traits in [`hal`], registers
//! [`cyclic::irq_handler`] for plug-in cards, and forwards file
//! operations to [`chardev`]. With the `mock-devices` feature the same
//! code runs against simulated hardware.
//!
//! ```text
//! chardev / ioctl          file operations, request dispatch
//!    |        \
//! cyclic   timestamp       tick delivery, fast MMIO timestamps
//!    |        |
//! transaction               per-device serialization, protocols
//!    |
//! transport                 S5933 / S5920 / ASIC / MMIO / USB
//!    |
//! hal                       ports, mapped memory, USB pipes, clock
//! ```

#![cfg_attr(not(any(test, feature = "mock-devices")), no_std)]

extern crate alloc;

pub mod chardev;
pub mod cyclic;
pub mod device;
pub mod error;
pub mod features;
pub mod hal;
pub mod ioctl;
pub mod probe;
pub mod registry;
pub mod timeout;
pub mod timestamp;
pub mod transaction;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "mock-devices"))]
pub mod mock;

pub use device::Device;
pub use error::{DriverError, DriverResult};
pub use registry::DriverContext;
