//! Common driver error types
//!
//! One closed error set is used throughout the engine. Transport errors
//! bubble up unchanged through the transaction layer and the IOCTL
//! dispatcher; only the outermost OS wrapper translates them to native
//! error codes.

use core::fmt;

/// Common driver error type
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// Device did not clear its BUSY flag within the device timeout
    Timeout,

    /// Byte count reported by the device does not match the caller's buffer
    ByteCount,

    /// Device rejected the requested data sub-type
    InvalidType,

    /// Feature predicate failed for this device
    NotSupportedByDevice,

    /// Operation is not available on the host OS
    NotSupportedOnOs,

    /// Invalid parameter or argument
    InvalidParameter,

    /// Buffer allocation failed
    NoMemory,

    /// Device busy, hardware access refused while unsafe IRQs are enabled
    Busy,

    /// Caller lacks the required privilege
    Permission,

    /// Copying data in from the caller failed
    CopyFromUser,

    /// Copying data out to the caller failed
    CopyToUser,

    /// Hardware access failed, e.g. because the device was disconnected
    DeviceAccessFailed,

    /// Blocking operation was interrupted
    Interrupted,

    /// No such device, or device has been removed
    NoDevice,

    /// Device has not finished booting yet
    NotReady,

    /// Firmware ID is unknown or invalid
    UnknownFirmwareId,

    /// PCI BAR conflict caused by a faulty BIOS
    DuplicateBaseAddress,

    /// An I/O or memory resource could not be registered
    ResourceItem,
}

impl DriverError {
    /// Get error code for logging
    pub fn code(&self) -> u32 {
        match self {
            Self::Timeout => 1,
            Self::ByteCount => 2,
            Self::InvalidType => 3,
            Self::NotSupportedByDevice => 4,
            Self::NotSupportedOnOs => 5,
            Self::InvalidParameter => 6,
            Self::NoMemory => 7,
            Self::Busy => 8,
            Self::Permission => 9,
            Self::CopyFromUser => 10,
            Self::CopyToUser => 11,
            Self::DeviceAccessFailed => 12,
            Self::Interrupted => 13,
            Self::NoDevice => 14,
            Self::NotReady => 15,
            Self::UnknownFirmwareId => 16,
            Self::DuplicateBaseAddress => 17,
            Self::ResourceItem => 18,
        }
    }

    /// Get error name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::ByteCount => "ByteCount",
            Self::InvalidType => "InvalidType",
            Self::NotSupportedByDevice => "NotSupportedByDevice",
            Self::NotSupportedOnOs => "NotSupportedOnOs",
            Self::InvalidParameter => "InvalidParameter",
            Self::NoMemory => "NoMemory",
            Self::Busy => "Busy",
            Self::Permission => "Permission",
            Self::CopyFromUser => "CopyFromUser",
            Self::CopyToUser => "CopyToUser",
            Self::DeviceAccessFailed => "DeviceAccessFailed",
            Self::Interrupted => "Interrupted",
            Self::NoDevice => "NoDevice",
            Self::NotReady => "NotReady",
            Self::UnknownFirmwareId => "UnknownFirmwareId",
            Self::DuplicateBaseAddress => "DuplicateBaseAddress",
            Self::ResourceItem => "ResourceItem",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Device access timed out"),
            Self::ByteCount => write!(f, "Byte count mismatch"),
            Self::InvalidType => write!(f, "Data type not recognized by device"),
            Self::NotSupportedByDevice => write!(f, "Not supported by device"),
            Self::NotSupportedOnOs => write!(f, "Not supported on this OS"),
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::NoMemory => write!(f, "Buffer allocation failed"),
            Self::Busy => write!(f, "Device busy"),
            Self::Permission => write!(f, "Permission denied"),
            Self::CopyFromUser => write!(f, "Failed to copy data from caller"),
            Self::CopyToUser => write!(f, "Failed to copy data to caller"),
            Self::DeviceAccessFailed => write!(f, "Device access failed"),
            Self::Interrupted => write!(f, "Interrupted"),
            Self::NoDevice => write!(f, "No such device"),
            Self::NotReady => write!(f, "Device not ready"),
            Self::UnknownFirmwareId => write!(f, "Unknown firmware ID"),
            Self::DuplicateBaseAddress => write!(f, "Duplicate PCI base address (faulty BIOS)"),
            Self::ResourceItem => write!(f, "Failed to register I/O resource"),
        }
    }
}

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_unique() {
        let all = [
            DriverError::Timeout,
            DriverError::ByteCount,
            DriverError::InvalidType,
            DriverError::NotSupportedByDevice,
            DriverError::NotSupportedOnOs,
            DriverError::InvalidParameter,
            DriverError::NoMemory,
            DriverError::Busy,
            DriverError::Permission,
            DriverError::CopyFromUser,
            DriverError::CopyToUser,
            DriverError::DeviceAccessFailed,
            DriverError::Interrupted,
            DriverError::NoDevice,
            DriverError::NotReady,
            DriverError::UnknownFirmwareId,
            DriverError::DuplicateBaseAddress,
            DriverError::ResourceItem,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_error_name_matches_debug() {
        assert_eq!(DriverError::Busy.name(), "Busy");
        assert_eq!(DriverError::ByteCount.name(), "ByteCount");
    }
}
