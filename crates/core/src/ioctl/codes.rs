//! IOCTL request codes
//!
//! Byte-packed identifiers in the classic direction/size/number layout:
//! bits 31..30 direction (1 = caller writes, 2 = caller reads), bits
//! 29..16 payload size, bits 15..8 the driver magic, bits 7..0 the
//! command number. The command number space is partitioned by function
//! group, matching the device command code ranges where a 1:1
//! correspondence exists.

use crate::types::{HrTime, Stime, Time, TimeStamp, UcapEntries, Wire};

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

const MAGIC: u32 = b'M' as u32;

const fn ioc(dir: u32, nr: u8, size: usize) -> u32 {
    (dir << 30) | ((size as u32) << 16) | (MAGIC << 8) | nr as u32
}

pub const fn io(nr: u8) -> u32 {
    ioc(IOC_NONE, nr, 0)
}

pub const fn ior(nr: u8, size: usize) -> u32 {
    ioc(IOC_READ, nr, size)
}

pub const fn iow(nr: u8, size: usize) -> u32 {
    ioc(IOC_WRITE, nr, size)
}

pub const fn iorw(nr: u8, size: usize) -> u32 {
    ioc(IOC_READ | IOC_WRITE, nr, size)
}

/// Payload size encoded in a request code
pub const fn size_of_code(code: u32) -> usize {
    ((code >> 16) & 0x3FFF) as usize
}

/// Command number of a request code
pub const fn nr_of_code(code: u32) -> u8 {
    (code & 0xFF) as u8
}

// Opaque configuration payload sizes. The engine never interprets these
// structures; the sizes exist so request codes are fully specified and
// the device-side count check has something to disagree with.
pub const SIZE_SERIAL: usize = 24;
pub const SIZE_TZCODE: usize = 1;
pub const SIZE_TZDL: usize = 40;
pub const SIZE_REF_OFFS: usize = 2;
pub const SIZE_OPT_INFO: usize = 8;
pub const SIZE_OPT_SETTINGS: usize = 4;
pub const SIZE_IRIG_INFO: usize = 12;
pub const SIZE_IRIG_SETTINGS: usize = 4;
pub const SIZE_SYNTH: usize = 10;
pub const SIZE_SYNTH_STATE: usize = 4;
pub const SIZE_IRIG_CTRL_BITS: usize = 4;
pub const SIZE_RAW_IRIG_DATA: usize = 16;
pub const SIZE_CORR_INFO: usize = 8;
pub const SIZE_TR_DISTANCE: usize = 2;
pub const SIZE_DEBUG_STATUS: usize = 8;
pub const SIZE_EVT_LOG_ENTRY: usize = 8;
pub const SIZE_SW_REV: usize = 22;
pub const SIZE_STAT_INFO: usize = 20;
pub const SIZE_ANT_INFO: usize = 16;
pub const SIZE_IDENT: usize = 16;
pub const SIZE_POS: usize = 36;
pub const SIZE_TIME_SCALE_INFO: usize = 12;
pub const SIZE_TIME_SCALE_SETTINGS: usize = 4;
pub const SIZE_UTC_PARM: usize = 26;
pub const SIZE_LAN_IF_INFO: usize = 32;
pub const SIZE_IP4_SETTINGS: usize = 20;
pub const SIZE_PTP_STATE: usize = 48;
pub const SIZE_PTP_CFG: usize = 32;
pub const SIZE_GNSS_MODE: usize = 8;
pub const SIZE_ALL_GPIO_INFO: usize = 64;
pub const SIZE_ALL_XMR_STATUS: usize = 64;

/// Size of the fixed driver info record
pub const SIZE_DRVR_INFO: usize = 8;
/// Size of the device info snapshot
pub const SIZE_DEV_INFO: usize = 20;
/// Size of the mapped-memory window record
pub const SIZE_MAPPED_MEM: usize = 16;
/// Size of the feature check request
pub const SIZE_CHK_DEV_FEAT: usize = 8;
/// Size of the generic request descriptor (without payloads)
pub const SIZE_GENERIC_REQ: usize = 12;
/// Size of the time info records (host time + cycles around a reading)
pub const SIZE_TIME_INFO_HRT: usize = 16 + HrTime::SIZE + 16;
pub const SIZE_TIME_INFO_TSTAMP: usize = 16 + TimeStamp::SIZE + 16;

// Current time, low latency group
pub const GET_PCPS_TIME: u32 = ior(0x01, Time::SIZE);
pub const GET_PCPS_SYNC_TIME: u32 = ior(0x02, Time::SIZE);
pub const GET_PCPS_HR_TIME: u32 = ior(0x03, HrTime::SIZE);
pub const GET_FAST_HR_TIMESTAMP: u32 = ior(0x05, TimeStamp::SIZE);
pub const GET_FAST_HR_TIMESTAMP_CYCLES: u32 = ior(0x06, TimeStamp::SIZE + 8);
pub const GET_PCPS_TIME_CYCLES: u32 = ior(0x07, Time::SIZE + 8);
pub const GET_PCPS_HR_TIME_CYCLES: u32 = ior(0x08, HrTime::SIZE + 8);
pub const GET_TIME_INFO_HRT: u32 = ior(0x09, SIZE_TIME_INFO_HRT);
pub const GET_TIME_INFO_TSTAMP: u32 = ior(0x0A, SIZE_TIME_INFO_TSTAMP);

// Set time group
pub const SET_TIME: u32 = iow(0x10, Stime::SIZE);
pub const SET_EVENT_TIME: u32 = iow(0x14, TimeStamp::SIZE);

// Legacy configuration group
pub const GET_SERIAL: u32 = ior(0x30, SIZE_SERIAL);
pub const SET_SERIAL: u32 = iow(0x31, SIZE_SERIAL);
pub const GET_TZCODE: u32 = ior(0x32, SIZE_TZCODE);
pub const SET_TZCODE: u32 = iow(0x33, SIZE_TZCODE);
pub const GET_PCPS_TZDL: u32 = ior(0x34, SIZE_TZDL);
pub const SET_PCPS_TZDL: u32 = iow(0x35, SIZE_TZDL);
pub const GET_REF_OFFS: u32 = ior(0x36, SIZE_REF_OFFS);
pub const SET_REF_OFFS: u32 = iow(0x37, SIZE_REF_OFFS);
pub const GET_OPT_INFO: u32 = ior(0x38, SIZE_OPT_INFO);
pub const SET_OPT_SETTINGS: u32 = iow(0x39, SIZE_OPT_SETTINGS);
pub const GET_IRIG_RX_INFO: u32 = ior(0x3A, SIZE_IRIG_INFO);
pub const SET_IRIG_RX_SETTINGS: u32 = iow(0x3B, SIZE_IRIG_SETTINGS);
pub const GET_IRIG_TX_INFO: u32 = ior(0x3C, SIZE_IRIG_INFO);
pub const SET_IRIG_TX_SETTINGS: u32 = iow(0x3D, SIZE_IRIG_SETTINGS);
pub const GET_SYNTH: u32 = ior(0x3E, SIZE_SYNTH);
pub const SET_SYNTH: u32 = iow(0x3F, SIZE_SYNTH);

// Identification and driver state group
pub const GET_PCPS_DRVR_INFO: u32 = ior(0x40, SIZE_DRVR_INFO);
pub const GET_PCPS_DEV: u32 = ior(0x41, SIZE_DEV_INFO);
pub const GET_PCPS_STATUS_PORT: u32 = ior(0x42, 1);
pub const GET_PCI_ASIC_VERSION: u32 = ior(0x43, 4);
pub const GET_PCI_ASIC_FEATURES: u32 = ior(0x44, 4);
pub const GET_IRQ_STAT_INFO: u32 = ior(0x45, 1);
pub const GET_CYCLES_FREQUENCY: u32 = ior(0x46, 8);
pub const CHK_DEV_FEAT: u32 = iow(0x47, SIZE_CHK_DEV_FEAT);
pub const GET_SYNTH_STATE: u32 = ior(0x48, SIZE_SYNTH_STATE);
pub const GET_IRIG_CTRL_BITS: u32 = ior(0x49, SIZE_IRIG_CTRL_BITS);
pub const GET_RAW_IRIG_DATA: u32 = ior(0x4A, SIZE_RAW_IRIG_DATA);
pub const GET_DEBUG_STATUS: u32 = ior(0x4B, SIZE_DEBUG_STATUS);
pub const GET_MAPPED_MEM_ADDR: u32 = ior(0x4C, SIZE_MAPPED_MEM);
pub const UNMAP_MAPPED_MEM: u32 = iow(0x4D, SIZE_MAPPED_MEM);

// Generic transactions and the large-structure group
pub const PCPS_GENERIC_READ: u32 = iorw(0x50, SIZE_GENERIC_REQ);
pub const PCPS_GENERIC_WRITE: u32 = iorw(0x51, SIZE_GENERIC_REQ);
pub const PCPS_GENERIC_READ_GPS: u32 = iorw(0x52, SIZE_GENERIC_REQ);
pub const PCPS_GENERIC_WRITE_GPS: u32 = iorw(0x53, SIZE_GENERIC_REQ);
pub const PCPS_GENERIC_IO: u32 = iorw(0x54, SIZE_GENERIC_REQ);
pub const GET_GPS_SW_REV: u32 = ior(0x55, SIZE_SW_REV);
pub const GET_GPS_STAT_INFO: u32 = ior(0x56, SIZE_STAT_INFO);
pub const GET_GPS_ANT_INFO: u32 = ior(0x57, SIZE_ANT_INFO);
pub const GET_GPS_IDENT: u32 = ior(0x58, SIZE_IDENT);
pub const GET_GPS_POS: u32 = ior(0x59, SIZE_POS);
pub const SET_GPS_POS: u32 = iow(0x5A, SIZE_POS);
pub const GET_GPS_TIME_SCALE_INFO: u32 = ior(0x5B, SIZE_TIME_SCALE_INFO);
pub const SET_GPS_TIME_SCALE_SETTINGS: u32 = iow(0x5C, SIZE_TIME_SCALE_SETTINGS);
pub const GET_GPS_UTC_PARM: u32 = ior(0x5D, SIZE_UTC_PARM);
pub const SET_GPS_UTC_PARM: u32 = iow(0x5E, SIZE_UTC_PARM);
pub const GET_GPS_RECEIVER_INFO: u32 = ior(0x5F, crate::types::RECEIVER_INFO_SIZE);

// Capture FIFO, correlation and event log group
pub const CLR_UCAP_BUFF: u32 = io(0x60);
pub const GET_PCPS_UCAP_ENTRIES: u32 = ior(0x61, UcapEntries::SIZE);
pub const GET_PCPS_UCAP_EVENT: u32 = ior(0x62, HrTime::SIZE);
pub const GET_CORR_INFO: u32 = ior(0x63, SIZE_CORR_INFO);
pub const GET_TR_DISTANCE: u32 = ior(0x64, SIZE_TR_DISTANCE);
pub const SET_TR_DISTANCE: u32 = iow(0x65, SIZE_TR_DISTANCE);
pub const CLR_EVT_LOG: u32 = io(0x66);
pub const GET_NUM_EVT_LOG_ENTRIES: u32 = ior(0x67, 8);
pub const GET_FIRST_EVT_LOG_ENTRY: u32 = ior(0x68, SIZE_EVT_LOG_ENTRY);
pub const GET_NEXT_EVT_LOG_ENTRY: u32 = ior(0x69, SIZE_EVT_LOG_ENTRY);
pub const GET_LAN_IF_INFO: u32 = ior(0x6A, SIZE_LAN_IF_INFO);
pub const GET_IP4_SETTINGS: u32 = ior(0x6B, SIZE_IP4_SETTINGS);
pub const SET_IP4_SETTINGS: u32 = iow(0x6C, SIZE_IP4_SETTINGS);
pub const GET_PTP_STATE: u32 = ior(0x6D, SIZE_PTP_STATE);
pub const GET_PTP_CFG: u32 = ior(0x6E, SIZE_PTP_CFG);
pub const SET_PTP_CFG: u32 = iow(0x6F, SIZE_PTP_CFG);

// Newer capability surfaces
pub const GET_GNSS_MODE: u32 = ior(0x70, SIZE_GNSS_MODE);
pub const SET_GNSS_MODE: u32 = iow(0x71, SIZE_GNSS_MODE);
pub const GET_ALL_GPIO_INFO: u32 = ior(0x72, SIZE_ALL_GPIO_INFO);
pub const GET_ALL_XMR_STATUS: u32 = ior(0x73, SIZE_ALL_XMR_STATUS);
pub const DEV_IS_GPS: u32 = ior(0x74, 4);
pub const DEV_IS_IRIG_RX: u32 = ior(0x75, 4);
pub const DEV_HAS_HR_TIME: u32 = ior(0x76, 4);
pub const DEV_HAS_UCAP: u32 = ior(0x77, 4);
pub const DEV_HAS_FAST_HR_TIMESTAMP: u32 = ior(0x78, 4);

// Dangerous commands
pub const FORCE_RESET: u32 = io(0x80);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_packing() {
        assert_eq!(nr_of_code(GET_PCPS_TIME), 0x01);
        assert_eq!(size_of_code(GET_PCPS_TIME), Time::SIZE);
        assert_eq!(GET_PCPS_TIME >> 30, IOC_READ);
        assert_eq!(SET_TIME >> 30, IOC_WRITE);
        assert_eq!(FORCE_RESET >> 30, IOC_NONE);
        assert_eq!(PCPS_GENERIC_IO >> 30, IOC_READ | IOC_WRITE);
    }

    #[test]
    fn test_nr_ranges_follow_partitioning() {
        // get-time codes below 0x10, set-time in 0x10..0x20, legacy
        // config in 0x30..0x40, large-structure group in 0x50..0x60
        assert!(nr_of_code(GET_PCPS_HR_TIME) < 0x10);
        assert!((0x10..0x20).contains(&nr_of_code(SET_TIME)));
        assert!((0x30..0x40).contains(&nr_of_code(SET_TZCODE)));
        assert!((0x50..0x60).contains(&nr_of_code(PCPS_GENERIC_READ)));
        assert_eq!(nr_of_code(FORCE_RESET), 0x80);
    }
}
