//! Wire-level data structures and command codes
//!
//! Everything in this module mirrors the device's command/status
//! interface. Multi-byte fields are little-endian on the wire; the
//! [`Wire`] implementations convert to host order during unmarshalling
//! so higher layers only ever see host-order values.

use bitflags::bitflags;

/// Size of the on-board output FIFO; also the block size of the large
/// structure transport.
pub const FIFO_SIZE: usize = 16;

/// Firmware ID string length incl. terminating NUL (two FIFO reads)
pub const FW_ID_SIZE: usize = 2 * FIFO_SIZE + 1;

/// Serial number string length incl. terminating NUL
pub const SERNUM_SIZE: usize = 17;

/// Command codes of the board's command/status interface.
///
/// The code space is partitioned by function group; see the module-level
/// docs of [`crate::ioctl`] for the mapping to the IOCTL surface.
pub mod cmd {
    /// (r) current time as [`super::Time`], clears sec/min change flags
    pub const GIVE_TIME: u8 = 0x00;
    /// (r) current time as [`super::Time`], change flags untouched
    pub const GIVE_TIME_NOCLEAR: u8 = 0x01;
    /// (r) time of last sync as [`super::Time`]
    pub const GIVE_SYNC_TIME: u8 = 0x02;
    /// (r) high resolution time as [`super::HrTime`]
    pub const GIVE_HR_TIME: u8 = 0x03;
    /// (r) raw IRIG time code
    pub const GIVE_IRIG_TIME: u8 = 0x04;

    /// (w) set on-board time from a [`super::Stime`]
    pub const SET_TIME: u8 = 0x10;
    /// (w) write an event time as [`super::TimeStamp`]
    pub const SET_EVENT_TIME: u8 = 0x14;

    /// (w) disable cyclic interrupts
    pub const IRQ_NONE: u8 = 0x20;
    /// (w) enable one interrupt per second
    pub const IRQ_1_SEC: u8 = 0x21;

    pub const GET_SERIAL: u8 = 0x30;
    pub const SET_SERIAL: u8 = 0x31;
    pub const GET_TZCODE: u8 = 0x32;
    pub const SET_TZCODE: u8 = 0x33;
    pub const GET_TZDL: u8 = 0x34;
    pub const SET_TZDL: u8 = 0x35;
    pub const GET_REF_OFFS: u8 = 0x36;
    pub const SET_REF_OFFS: u8 = 0x37;
    pub const GET_OPT_INFO: u8 = 0x38;
    pub const SET_OPT_SETTINGS: u8 = 0x39;
    pub const GET_IRIG_RX_INFO: u8 = 0x3A;
    pub const SET_IRIG_RX_SETTINGS: u8 = 0x3B;
    pub const GET_IRIG_TX_INFO: u8 = 0x3C;
    pub const SET_IRIG_TX_SETTINGS: u8 = 0x3D;
    pub const GET_SYNTH: u8 = 0x3E;
    pub const SET_SYNTH: u8 = 0x3F;

    /// (r) first half of the firmware ID string
    pub const GIVE_FW_ID_1: u8 = 0x40;
    /// (r) second half of the firmware ID string
    pub const GIVE_FW_ID_2: u8 = 0x41;
    /// (r) serial number string
    pub const GIVE_SERNUM: u8 = 0x42;
    /// (rw) generic I/O transaction, see [`crate::transaction`]
    pub const GENERIC_IO: u8 = 0x43;
    pub const GET_SYNTH_STATE: u8 = 0x44;
    pub const GET_IRIG_CTRL_BITS: u8 = 0x45;
    pub const GET_RAW_IRIG_DATA: u8 = 0x46;
    pub const GET_STATUS_PORT: u8 = 0x4B;
    pub const GET_DEBUG_STATUS: u8 = 0x4C;

    /// (r) large structure transport, see [`crate::transaction`]
    pub const READ_GPS_DATA: u8 = 0x50;
    /// (w) large structure transport
    pub const WRITE_GPS_DATA: u8 = 0x51;

    /// (w) clear the on-board user capture FIFO
    pub const CLR_UCAP_BUFF: u8 = 0x60;
    /// (r) number of entries in the user capture FIFO
    pub const GIVE_UCAP_ENTRIES: u8 = 0x61;
    /// (r) oldest user capture event as [`super::HrTime`]
    pub const GIVE_UCAP_EVENT: u8 = 0x62;
    pub const GET_CORR_INFO: u8 = 0x63;
    pub const GET_TR_DISTANCE: u8 = 0x64;
    pub const SET_TR_DISTANCE: u8 = 0x65;
    pub const CLR_EVT_LOG: u8 = 0x66;
    pub const NUM_EVT_LOG_ENTRIES: u8 = 0x67;
    pub const FIRST_EVT_LOG_ENTRY: u8 = 0x68;
    pub const NEXT_EVT_LOG_ENTRY: u8 = 0x69;

    /// (w) hardware reset; can lock up the host, see the `force-reset`
    /// build feature
    pub const FORCE_RESET: u8 = 0x80;
}

/// Sub-type codes of the large structure (GPS data) transport.
///
/// The payloads are opaque to the engine except for the three records the
/// probe decodes: `RECEIVER_INFO`, `XFEATURE_BUFFER` and `TLV_INFO`.
pub mod gps {
    pub const BVAR_STAT: u8 = 0x01;
    pub const TIME: u8 = 0x02;
    pub const POS: u8 = 0x03;
    pub const TZDL: u8 = 0x04;
    pub const SW_REV: u8 = 0x05;
    pub const STAT_INFO: u8 = 0x06;
    pub const ANT_INFO: u8 = 0x0F;
    pub const UCAP: u8 = 0x10;
    pub const IDENT: u8 = 0x12;
    pub const RECEIVER_INFO: u8 = 0x22;
    pub const ALL_STR_TYPE_INFO: u8 = 0x23;
    pub const ALL_PORT_INFO: u8 = 0x24;
    pub const TIME_SCALE: u8 = 0x25;
    pub const LAN_IF_INFO: u8 = 0x26;
    pub const IP4_STATE: u8 = 0x27;
    pub const IP4_SETTINGS: u8 = 0x28;
    pub const PTP_STATE: u8 = 0x29;
    pub const PTP_CFG: u8 = 0x2A;
    pub const UTC_PARM: u8 = 0x2B;
    pub const XFEATURE_BUFFER: u8 = 0x32;
    pub const TLV_INFO: u8 = 0x33;
    pub const GNSS_MODE: u8 = 0x37;
    pub const ALL_GPIO_INFO: u8 = 0x3A;
    pub const ALL_XMR_STATUS: u8 = 0x40;
}

/// Status port bit layout
pub mod status_port {
    /// Device is busy filling the output FIFO
    pub const BUSY: u8 = 0x01;
    /// Device has generated an IRQ on the PC bus (ISA cards only)
    pub const IRQ_FLAG: u8 = 0x02;
    /// Raw demodulated long-wave signal
    pub const MOD: u8 = 0x20;
    /// Seconds have changed since last reading (legacy, cleared on read)
    pub const SEC: u8 = 0x40;
    /// Minutes have changed since last reading (legacy, cleared on read)
    pub const MIN: u8 = 0x80;
}

bitflags! {
    /// Synchronization status delivered with every time frame
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimeStatus: u8 {
        /// Receiver is free running on its crystal
        const FREER = 0x01;
        /// Daylight saving currently enabled
        const DL_ENB = 0x02;
        /// Receiver has synchronized at least once after power up
        const SYNCD = 0x04;
        /// Change in daylight saving status announced
        const DL_ANN = 0x08;
        /// Returned time is UTC instead of local time
        const UTC = 0x10;
        /// Leap second announced
        const LS_ANN = 0x20;
        /// Current time was set via an API call
        const IFTM = 0x40;
        /// Time is invalid (e.g. battery had been disconnected)
        const INVT = 0x80;
    }
}

/// Marshalling of a fixed-size wire structure.
///
/// `read_var`/`write_var` in the transaction layer move `SIZE` raw bytes
/// and convert via these methods; endianness is handled here and nowhere
/// else above the transport.
pub trait Wire: Sized {
    const SIZE: usize;

    fn from_wire(buf: &[u8]) -> Self;
    fn to_wire(&self, buf: &mut [u8]);
}

impl Wire for u8 {
    const SIZE: usize = 1;

    fn from_wire(buf: &[u8]) -> Self {
        buf[0]
    }

    fn to_wire(&self, buf: &mut [u8]) {
        buf[0] = *self;
    }
}

impl Wire for u16 {
    const SIZE: usize = 2;

    fn from_wire(buf: &[u8]) -> Self {
        u16::from_le_bytes([buf[0], buf[1]])
    }

    fn to_wire(&self, buf: &mut [u8]) {
        buf[..2].copy_from_slice(&self.to_le_bytes());
    }
}

impl Wire for u32 {
    const SIZE: usize = 4;

    fn from_wire(buf: &[u8]) -> Self {
        u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    fn to_wire(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }
}

/// Legacy time frame with 10 ms resolution, supported by every device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Time {
    /// Hundredths of seconds, 0..99
    pub sec100: u8,
    /// Seconds, 0..59, or 60 during a leap second
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    /// Day of month, 1..31
    pub mday: u8,
    /// Day of week, 1..7, 1 = Monday
    pub wday: u8,
    pub month: u8,
    /// Year of the century, 0..99
    pub year: u8,
    pub status: TimeStatus,
    /// Signal strength, or capture channel number
    pub signal: u8,
    /// Local offset from UTC in hours, 0 if the device can't tell
    pub offs_utc: i8,
}

impl Wire for Time {
    const SIZE: usize = 11;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            sec100: b[0],
            sec: b[1],
            min: b[2],
            hour: b[3],
            mday: b[4],
            wday: b[5],
            month: b[6],
            year: b[7],
            status: TimeStatus::from_bits_retain(b[8]),
            signal: b[9],
            offs_utc: b[10] as i8,
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        b[0] = self.sec100;
        b[1] = self.sec;
        b[2] = self.min;
        b[3] = self.hour;
        b[4] = self.mday;
        b[5] = self.wday;
        b[6] = self.month;
        b[7] = self.year;
        b[8] = self.status.bits();
        b[9] = self.signal;
        b[10] = self.offs_utc as u8;
    }
}

/// Payload of the SET_TIME command; [`Time`] without signal and offset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stime {
    pub sec100: u8,
    pub sec: u8,
    pub min: u8,
    pub hour: u8,
    pub mday: u8,
    pub wday: u8,
    pub month: u8,
    pub year: u8,
    pub status: TimeStatus,
}

impl Wire for Stime {
    const SIZE: usize = 9;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            sec100: b[0],
            sec: b[1],
            min: b[2],
            hour: b[3],
            mday: b[4],
            wday: b[5],
            month: b[6],
            year: b[7],
            status: TimeStatus::from_bits_retain(b[8]),
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        b[0] = self.sec100;
        b[1] = self.sec;
        b[2] = self.min;
        b[3] = self.hour;
        b[4] = self.mday;
        b[5] = self.wday;
        b[6] = self.month;
        b[7] = self.year;
        b[8] = self.status.bits();
    }
}

/// High resolution time stamp: UTC seconds plus binary fractions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeStamp {
    /// Seconds since 1970, UTC scale
    pub sec: u32,
    /// Binary fractions of a second (0x8000_0000 = 0.5 s)
    pub frac: u32,
}

impl Wire for TimeStamp {
    const SIZE: usize = 8;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            sec: u32::from_wire(&b[0..4]),
            frac: u32::from_wire(&b[4..8]),
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        self.sec.to_wire(&mut b[0..4]);
        self.frac.to_wire(&mut b[4..8]);
    }
}

/// Extended status word used by [`HrTime`]; the low byte matches
/// [`TimeStatus`]
pub mod xstatus {
    /// Current second is a leap second
    pub const LS_ENB: u16 = 0x0100;
    /// Antenna failure
    pub const ANT_FAIL: u16 = 0x0200;
}

/// High resolution time frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HrTime {
    pub tstamp: TimeStamp,
    /// Local time offset from UTC in seconds
    pub utc_offs: i32,
    /// Extended status, see [`TimeStatus`] and [`xstatus`]
    pub status: u16,
    pub signal: u8,
}

impl Wire for HrTime {
    const SIZE: usize = 15;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            tstamp: TimeStamp::from_wire(&b[0..8]),
            utc_offs: u32::from_wire(&b[8..12]) as i32,
            status: u16::from_wire(&b[12..14]),
            signal: b[14],
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        self.tstamp.to_wire(&mut b[0..8]);
        (self.utc_offs as u32).to_wire(&mut b[8..12]);
        self.status.to_wire(&mut b[12..14]);
        b[14] = self.signal;
    }
}

/// Timestamp plus the CPU cycle counter sampled in the same critical
/// section; lets user space correlate device time with the TSC
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeStampCycles {
    pub tstamp: TimeStamp,
    pub cycles: u64,
}

/// Number of entries in the user capture FIFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UcapEntries {
    pub used: u32,
    pub max: u32,
}

impl Wire for UcapEntries {
    const SIZE: usize = 8;

    fn from_wire(b: &[u8]) -> Self {
        Self {
            used: u32::from_wire(&b[0..4]),
            max: u32::from_wire(&b[4..8]),
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        self.used.to_wire(&mut b[0..4]);
        self.max.to_wire(&mut b[4..8]);
    }
}

/// Fixed prefix of the receiver info record.
///
/// The full record is larger; the engine decodes only the leading fields
/// it needs for capability inference and keeps the serial number text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverInfo {
    pub model_code: u16,
    /// Software revision, packed like the firmware revision
    pub sw_rev: u16,
    pub n_channels: u8,
    pub osc_type: u8,
    /// GPS-level feature bits, see [`crate::features::ri_bits`]
    pub features: u32,
    pub sernum: heapless::String<SERNUM_SIZE>,
}

/// Wire size of the receiver info record as transferred by the device
pub const RECEIVER_INFO_SIZE: usize = 10 + SERNUM_SIZE;

impl Wire for ReceiverInfo {
    const SIZE: usize = RECEIVER_INFO_SIZE;

    fn from_wire(b: &[u8]) -> Self {
        let mut sernum = heapless::String::new();
        for &c in b[10..10 + SERNUM_SIZE].iter() {
            if c == 0 {
                break;
            }
            let _ = sernum.push(c as char);
        }
        Self {
            model_code: u16::from_wire(&b[0..2]),
            sw_rev: u16::from_wire(&b[2..4]),
            n_channels: b[4],
            osc_type: b[5],
            features: u32::from_wire(&b[6..10]),
            sernum,
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        self.model_code.to_wire(&mut b[0..2]);
        self.sw_rev.to_wire(&mut b[2..4]);
        b[4] = self.n_channels;
        b[5] = self.osc_type;
        self.features.to_wire(&mut b[6..10]);
        for slot in b[10..10 + SERNUM_SIZE].iter_mut() {
            *slot = 0;
        }
        for (slot, c) in b[10..].iter_mut().zip(self.sernum.as_bytes()) {
            *slot = *c;
        }
    }
}

/// Model code reported by devices which predate the receiver info record
pub const MODEL_UNKNOWN: u16 = 0;

/// Extended feature bitset layered on top of [`ReceiverInfo::features`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XFeatures {
    pub bits: [u8; Self::N_BYTES],
}

impl XFeatures {
    pub const N_BYTES: usize = 32;

    /// Bit number of the TLV API extended feature
    pub const TLV_API: u16 = 0;

    pub fn empty() -> Self {
        Self {
            bits: [0; Self::N_BYTES],
        }
    }

    pub fn has_bit(&self, n: u16) -> bool {
        let byte = (n / 8) as usize;
        byte < Self::N_BYTES && self.bits[byte] & (1 << (n % 8)) != 0
    }

    #[cfg(any(test, feature = "mock-devices"))]
    pub fn set_bit(&mut self, n: u16) {
        let byte = (n / 8) as usize;
        if byte < Self::N_BYTES {
            self.bits[byte] |= 1 << (n % 8);
        }
    }
}

impl Default for XFeatures {
    fn default() -> Self {
        Self::empty()
    }
}

impl Wire for XFeatures {
    const SIZE: usize = Self::N_BYTES;

    fn from_wire(b: &[u8]) -> Self {
        let mut bits = [0; Self::N_BYTES];
        bits.copy_from_slice(&b[..Self::N_BYTES]);
        Self { bits }
    }

    fn to_wire(&self, b: &mut [u8]) {
        b[..Self::N_BYTES].copy_from_slice(&self.bits);
    }
}

/// TLV capability record: flags plus a bitset of supported TLV types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvInfo {
    pub reserved: u16,
    pub flags: u32,
    pub supported: [u8; Self::N_FEAT_BYTES],
}

impl TlvInfo {
    pub const N_FEAT_BYTES: usize = 16;

    /// Bit number of the firmware update TLV type
    pub const FEAT_FW_UPDATE: u16 = 0;

    pub fn empty() -> Self {
        Self {
            reserved: 0,
            flags: 0,
            supported: [0; Self::N_FEAT_BYTES],
        }
    }

    pub fn has_feat(&self, n: u16) -> bool {
        let byte = (n / 8) as usize;
        byte < Self::N_FEAT_BYTES && self.supported[byte] & (1 << (n % 8)) != 0
    }

    #[cfg(any(test, feature = "mock-devices"))]
    pub fn set_feat(&mut self, n: u16) {
        let byte = (n / 8) as usize;
        if byte < Self::N_FEAT_BYTES {
            self.supported[byte] |= 1 << (n % 8);
        }
    }
}

impl Default for TlvInfo {
    fn default() -> Self {
        Self::empty()
    }
}

impl Wire for TlvInfo {
    const SIZE: usize = 6 + Self::N_FEAT_BYTES;

    fn from_wire(b: &[u8]) -> Self {
        let mut supported = [0; Self::N_FEAT_BYTES];
        supported.copy_from_slice(&b[6..6 + Self::N_FEAT_BYTES]);
        Self {
            reserved: u16::from_wire(&b[0..2]),
            flags: u32::from_wire(&b[2..6]),
            supported,
        }
    }

    fn to_wire(&self, b: &mut [u8]) {
        self.reserved.to_wire(&mut b[0..2]);
        self.flags.to_wire(&mut b[2..6]);
        b[6..6 + Self::N_FEAT_BYTES].copy_from_slice(&self.supported);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_round_trip() {
        let t = Time {
            sec100: 0,
            sec: 59,
            min: 59,
            hour: 23,
            mday: 31,
            wday: 3,
            month: 12,
            year: 24,
            status: TimeStatus::SYNCD | TimeStatus::UTC,
            signal: 64,
            offs_utc: 0,
        };
        let mut buf = [0u8; Time::SIZE];
        t.to_wire(&mut buf);
        assert_eq!(Time::from_wire(&buf), t);
        assert_eq!(buf[8], 0x14); // SYNCD | UTC
    }

    #[test]
    fn test_hr_time_layout() {
        // 15 bytes: 8 tstamp + 4 utc_offs + 2 status + 1 signal
        let mut buf = [0u8; HrTime::SIZE];
        let h = HrTime {
            tstamp: TimeStamp {
                sec: 0x1122_3344,
                frac: 0x8000_0000,
            },
            utc_offs: -3600,
            status: 0x0204,
            signal: 100,
        };
        h.to_wire(&mut buf);
        assert_eq!(&buf[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(HrTime::from_wire(&buf), h);
    }

    #[test]
    fn test_receiver_info_sernum() {
        let mut buf = [0u8; ReceiverInfo::SIZE];
        let mut ri = ReceiverInfo {
            model_code: 11,
            sw_rev: 0x0210,
            n_channels: 12,
            osc_type: 2,
            features: (1 << 13) | (1 << 15),
            sernum: heapless::String::new(),
        };
        ri.sernum.push_str("029511016290").unwrap();
        ri.to_wire(&mut buf);
        let back = ReceiverInfo::from_wire(&buf);
        assert_eq!(back, ri);
    }

    #[test]
    fn test_xfeatures_bits() {
        let mut x = XFeatures::empty();
        assert!(!x.has_bit(XFeatures::TLV_API));
        x.set_bit(XFeatures::TLV_API);
        x.set_bit(77);
        assert!(x.has_bit(0));
        assert!(x.has_bit(77));
        assert!(!x.has_bit(78));
    }
}
