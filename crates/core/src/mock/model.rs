// Mock clock firmware
//
// One state machine implements the command/response behavior of the
// on-board microcontroller: the expectation protocol for writes, the
// block handshake of the large-structure transport, and the generic
// I/O preamble. The bus front-ends (register-level ASIC card, USB
// device) translate their transport's accesses into `exec` calls.

use crate::device::TypeNum;
use crate::types::{
    cmd, gps, HrTime, ReceiverInfo, Time, TimeStamp, TimeStatus, TlvInfo, Wire, XFeatures,
};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// Transfer state of the large-structure and generic I/O protocols
enum Xfer {
    Idle,
    /// Saw READ_GPS_DATA / WRITE_GPS_DATA, waiting for the sub-type
    AwaitType { write: bool },
    /// Read handshake done, waiting for the block number
    AwaitBlock { ty: u8 },
    /// Write handshake done, collecting payload bytes
    GpsPayload { ty: u8, remaining: usize, got: Vec<u8> },
    /// Collecting the parameter bytes of a plain write command
    WritePayload { set_cmd: u8, remaining: usize, got: Vec<u8> },
    /// Collecting the generic I/O preamble and input payload
    Generic { got: Vec<u8> },
}

/// Simulated device firmware
pub struct ClockModel {
    pub type_num: TypeNum,
    pub dev_id: u16,
    pub fw_id: String,
    pub serial: String,
    pub asic_raw_version: u32,
    pub asic_features: u32,
    pub time: Time,
    pub hr_time: HrTime,
    gps_data_16: bool,
    /// GET-command response payloads, keyed by command code
    cfg_store: BTreeMap<u8, Vec<u8>>,
    /// Large-structure records, keyed by sub-type
    gps_store: BTreeMap<u8, Vec<u8>>,
    xfer: Xfer,
}

/// Default test time frame: 2024-12-31 23:59:59 UTC, synchronized
pub fn default_time() -> Time {
    Time {
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
    }
}

fn default_hr_time() -> HrTime {
    HrTime {
        tstamp: TimeStamp {
            sec: 1_735_689_599,
            frac: 0,
        },
        utc_offs: 0,
        status: (TimeStatus::SYNCD | TimeStatus::UTC).bits() as u16,
        signal: 64,
    }
}

impl ClockModel {
    fn base(type_num: TypeNum, dev_id: u16, fw_id: &str, serial: &str) -> Self {
        let mut m = Self {
            type_num,
            dev_id,
            fw_id: String::from(fw_id),
            serial: String::from(serial),
            asic_raw_version: 0,
            asic_features: 0,
            time: default_time(),
            hr_time: default_hr_time(),
            gps_data_16: false,
            cfg_store: BTreeMap::new(),
            gps_store: BTreeMap::new(),
            xfer: Xfer::Idle,
        };
        // Config defaults every device answers with.
        m.cfg_store.insert(cmd::GET_TZCODE, vec![0x00]);
        m.cfg_store.insert(cmd::GET_SERIAL, vec![0u8; 24]);
        m.cfg_store.insert(cmd::GET_TZDL, vec![0u8; 40]);
        m.cfg_store.insert(cmd::GET_REF_OFFS, vec![0u8; 2]);
        m.cfg_store.insert(cmd::GET_OPT_INFO, vec![0u8; 8]);
        m.cfg_store.insert(cmd::GET_STATUS_PORT, vec![0x00]);
        m.cfg_store.insert(cmd::GIVE_UCAP_ENTRIES, vec![0u8; 8]);
        m
    }

    /// A current generation GNSS PCIe card with memory mapped access
    pub fn gps180pex() -> Self {
        let mut m = Self::base(
            TypeNum::Gps180pex,
            0x0206,
            "GPS180 v2.10 standard",
            "029511016290",
        );
        m.asic_raw_version = 0x0000_010C; // v12.1
        m.asic_features = crate::device::ASIC_FEAT_MM_IO;
        m.gps_data_16 = true;

        let mut ri = ReceiverInfo {
            model_code: 11,
            sw_rev: 0x0210,
            n_channels: 12,
            osc_type: 2,
            features: (1 << crate::features::ri_bits::TIME_SCALE)
                | (1 << crate::features::ri_bits::PTP)
                | (1 << crate::features::ri_bits::LAN_IP4)
                | (1 << crate::features::ri_bits::XFEATURE),
            sernum: heapless::String::new(),
        };
        let _ = ri.sernum.push_str("029511016290");
        m.set_gps_record_var(gps::RECEIVER_INFO, &ri);

        let mut xf = XFeatures::empty();
        xf.set_bit(XFeatures::TLV_API);
        m.set_gps_record_var(gps::XFEATURE_BUFFER, &xf);

        let mut tlv = TlvInfo::empty();
        tlv.set_feat(TlvInfo::FEAT_FW_UPDATE);
        m.set_gps_record_var(gps::TLV_INFO, &tlv);

        m.gps_store.insert(gps::SW_REV, vec![0u8; 22]);
        m.gps_store.insert(gps::STAT_INFO, vec![0u8; 20]);
        m.gps_store.insert(gps::ANT_INFO, vec![0u8; 16]);
        m.gps_store.insert(gps::POS, vec![0u8; 36]);
        m.gps_store.insert(gps::TIME_SCALE, vec![0u8; 12]);
        m.gps_store.insert(gps::UTC_PARM, vec![0u8; 26]);
        m.gps_store.insert(gps::LAN_IF_INFO, vec![0u8; 32]);
        m.gps_store.insert(gps::IP4_SETTINGS, vec![0u8; 20]);
        m.gps_store.insert(gps::PTP_STATE, vec![0u8; 48]);
        m.gps_store.insert(gps::PTP_CFG, vec![0u8; 32]);
        m.gps_store.insert(gps::GNSS_MODE, vec![0u8; 8]);
        m.gps_store
            .insert(gps::IDENT, b"029511016290\0\0\0\0".to_vec());
        m
    }

    /// A long-wave PCI card of the port-I/O ASIC generation
    pub fn pci511() -> Self {
        let mut m = Self::base(TypeNum::Pci511, 0x0104, "PCI511 v1.02", "030811002551");
        m.asic_raw_version = 0x0000_0105;
        m
    }

    /// A PEX511 whose firmware/ASIC combination predates the IRQ fix
    pub fn pex511_old_firmware() -> Self {
        let mut m = Self::base(TypeNum::Pex511, 0x0105, "PEX511 v1.00", "031211000123");
        m.asic_raw_version = 0x0000_0009; // ASIC v9.0
        m
    }

    /// A USB 2.0 generation long-wave receiver
    pub fn dcf600usb() -> Self {
        let mut m = Self::base(
            TypeNum::Dcf600usb,
            0x0202,
            "DCF600USB v1.04 standard",
            "041211004711",
        );
        m.gps_data_16 = true;

        let mut ri = ReceiverInfo {
            model_code: 42,
            sw_rev: 0x0104,
            n_channels: 1,
            osc_type: 1,
            features: 0,
            sernum: heapless::String::new(),
        };
        let _ = ri.sernum.push_str("041211004711");
        m.set_gps_record_var(gps::RECEIVER_INFO, &ri);
        m
    }

    pub fn set_time(&mut self, t: Time) {
        self.time = t;
    }

    pub fn set_gps_record(&mut self, ty: u8, data: Vec<u8>) {
        self.gps_store.insert(ty, data);
    }

    fn set_gps_record_var<T: Wire>(&mut self, ty: u8, val: &T) {
        let mut buf = vec![0u8; T::SIZE];
        val.to_wire(&mut buf);
        self.gps_store.insert(ty, buf);
    }

    /// Parameter byte count each write command expects
    fn write_expected(&self, c: u8) -> Option<usize> {
        Some(match c {
            cmd::SET_TIME => 9,
            cmd::SET_EVENT_TIME => 8,
            cmd::SET_SERIAL => 24,
            cmd::SET_TZCODE => 1,
            cmd::SET_TZDL => 40,
            cmd::SET_REF_OFFS => 2,
            cmd::SET_OPT_SETTINGS => 4,
            cmd::SET_IRIG_RX_SETTINGS | cmd::SET_IRIG_TX_SETTINGS => 4,
            cmd::SET_SYNTH => 10,
            cmd::SET_TR_DISTANCE => 2,
            _ => return None,
        })
    }

    /// The GET command that answers with the payload a SET stored
    fn get_for_set(set_cmd: u8) -> Option<u8> {
        Some(match set_cmd {
            cmd::SET_SERIAL => cmd::GET_SERIAL,
            cmd::SET_TZCODE => cmd::GET_TZCODE,
            cmd::SET_TZDL => cmd::GET_TZDL,
            cmd::SET_REF_OFFS => cmd::GET_REF_OFFS,
            cmd::SET_OPT_SETTINGS => cmd::GET_OPT_INFO,
            cmd::SET_IRIG_RX_SETTINGS => cmd::GET_IRIG_RX_INFO,
            cmd::SET_IRIG_TX_SETTINGS => cmd::GET_IRIG_TX_INFO,
            cmd::SET_SYNTH => cmd::GET_SYNTH,
            cmd::SET_TR_DISTANCE => cmd::GET_TR_DISTANCE,
            _ => return None,
        })
    }

    fn fw_id_block(&self, second: bool) -> Vec<u8> {
        let mut block = vec![0u8; 16];
        let bytes = self.fw_id.as_bytes();
        let start = if second { 16 } else { 0 };
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = *bytes.get(start + i).unwrap_or(&0);
        }
        block
    }

    fn read_response(&self, c: u8) -> Vec<u8> {
        match c {
            cmd::GIVE_TIME | cmd::GIVE_TIME_NOCLEAR | cmd::GIVE_SYNC_TIME => {
                let mut buf = vec![0u8; Time::SIZE];
                self.time.to_wire(&mut buf);
                buf
            }
            cmd::GIVE_HR_TIME | cmd::GIVE_UCAP_EVENT => {
                let mut buf = vec![0u8; HrTime::SIZE];
                self.hr_time.to_wire(&mut buf);
                buf
            }
            cmd::GIVE_FW_ID_1 => self.fw_id_block(false),
            cmd::GIVE_FW_ID_2 => self.fw_id_block(true),
            cmd::GIVE_SERNUM => {
                let mut buf = vec![0u8; 16];
                for (slot, b) in buf.iter_mut().zip(self.serial.as_bytes()) {
                    *slot = *b;
                }
                buf
            }
            cmd::GET_IRIG_CTRL_BITS => vec![0u8; 4],
            cmd::GET_RAW_IRIG_DATA => vec![0u8; 16],
            cmd::GET_SYNTH => vec![0u8; 10],
            cmd::GET_SYNTH_STATE => vec![0u8; 4],
            cmd::GET_CORR_INFO => vec![0u8; 8],
            cmd::GET_TR_DISTANCE => vec![0u8; 2],
            cmd::GET_DEBUG_STATUS => vec![0u8; 8],
            cmd::NUM_EVT_LOG_ENTRIES => vec![0u8; 8],
            cmd::FIRST_EVT_LOG_ENTRY | cmd::NEXT_EVT_LOG_ENTRY => vec![0u8; 8],
            cmd::GET_IRIG_RX_INFO | cmd::GET_IRIG_TX_INFO => vec![0u8; 12],
            _ => self
                .cfg_store
                .get(&c)
                .cloned()
                .unwrap_or_else(|| vec![0u8; 16]),
        }
    }

    fn gps_len(&self, ty: u8) -> usize {
        self.gps_store.get(&ty).map(|d| d.len()).unwrap_or(0)
    }

    fn apply_write(&mut self, set_cmd: u8, data: &[u8]) -> i8 {
        if set_cmd == cmd::SET_TIME {
            if data.len() == 9 {
                self.time = Time {
                    sec100: data[0],
                    sec: data[1],
                    min: data[2],
                    hour: data[3],
                    mday: data[4],
                    wday: data[5],
                    month: data[6],
                    year: data[7],
                    status: TimeStatus::from_bits_retain(data[8]),
                    signal: self.time.signal,
                    offs_utc: self.time.offs_utc,
                };
            }
            return 0;
        }
        if let Some(get_cmd) = Self::get_for_set(set_cmd) {
            self.cfg_store.insert(get_cmd, data.to_vec());
        }
        0
    }

    /// Execute one command byte; returns the bytes the device places in
    /// its output FIFO in response.
    pub fn exec(&mut self, c: u8) -> Vec<u8> {
        match core::mem::replace(&mut self.xfer, Xfer::Idle) {
            Xfer::Idle => self.exec_idle(c),

            Xfer::AwaitType { write } => {
                let len = self.gps_len(c);
                let width = if self.gps_data_16 { 2 } else { 1 };
                let mut resp = vec![0u8; width];
                resp[0] = (len & 0xFF) as u8;
                if width == 2 {
                    resp[1] = (len >> 8) as u8;
                }
                if len != 0 {
                    self.xfer = if write {
                        Xfer::GpsPayload {
                            ty: c,
                            remaining: len,
                            got: Vec::new(),
                        }
                    } else {
                        Xfer::AwaitBlock { ty: c }
                    };
                }
                resp
            }

            Xfer::AwaitBlock { ty } => {
                // The command byte is the block number; serve the record
                // from the block offset onward. Each block re-runs the
                // handshake, so this transfer is complete.
                let data = self.gps_store.get(&ty).cloned().unwrap_or_default();
                let start = (c as usize * crate::types::FIFO_SIZE).min(data.len());
                data[start..].to_vec()
            }

            Xfer::GpsPayload {
                ty,
                remaining,
                mut got,
            } => {
                got.push(c);
                if got.len() >= remaining {
                    self.gps_store.insert(ty, got);
                    vec![0] // completion code
                } else {
                    self.xfer = Xfer::GpsPayload { ty, remaining, got };
                    Vec::new()
                }
            }

            Xfer::WritePayload {
                set_cmd,
                remaining,
                mut got,
            } => {
                got.push(c);
                if got.len() >= remaining {
                    let code = self.apply_write(set_cmd, &got);
                    vec![code as u8]
                } else {
                    self.xfer = Xfer::WritePayload {
                        set_cmd,
                        remaining,
                        got,
                    };
                    Vec::new()
                }
            }

            Xfer::Generic { mut got } => {
                got.push(c);
                // Preamble: sub-type, in_len, then either the out_len
                // byte terminates (no input) or out_len plus in_len
                // payload bytes follow.
                let done = if got.len() >= 2 {
                    let in_len = got[1] as usize;
                    if in_len == 0 {
                        got.len() == 3
                    } else {
                        got.len() == 3 + in_len
                    }
                } else {
                    false
                };

                if !done {
                    self.xfer = Xfer::Generic { got };
                    return Vec::new();
                }

                let out_len = got[2] as usize;
                let input = &got[3..];
                // Completion code, one reserved byte, then the output
                // payload; the mock firmware echoes the input.
                let mut resp = vec![0u8; 2 + out_len];
                for (slot, b) in resp[2..].iter_mut().zip(input.iter()) {
                    *slot = *b;
                }
                resp
            }
        }
    }

    fn exec_idle(&mut self, c: u8) -> Vec<u8> {
        match c {
            cmd::READ_GPS_DATA => {
                self.xfer = Xfer::AwaitType { write: false };
                vec![1]
            }
            cmd::WRITE_GPS_DATA => {
                self.xfer = Xfer::AwaitType { write: true };
                vec![1]
            }
            cmd::GENERIC_IO => {
                self.xfer = Xfer::Generic { got: Vec::new() };
                vec![3]
            }
            cmd::IRQ_NONE | cmd::IRQ_1_SEC | cmd::CLR_UCAP_BUFF | cmd::CLR_EVT_LOG
            | cmd::FORCE_RESET => Vec::new(),
            _ => {
                if let Some(expected) = self.write_expected(c) {
                    self.xfer = Xfer::WritePayload {
                        set_cmd: c,
                        remaining: expected,
                        got: Vec::new(),
                    };
                    vec![expected as u8]
                } else {
                    self.read_response(c)
                }
            }
        }
    }

    /// USB front-end: one OUT transfer carries the command byte(s) and,
    /// for writes, the payload. Returns the response for the next IN
    /// transfer on the host-in endpoint.
    pub fn exec_usb_out(&mut self, data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }
        let c = data[0];

        // A single byte goes through the same state machine as the
        // register transports; this covers plain reads and the byte
        // stream of a generic I/O transaction.
        if data.len() == 1 {
            return self.exec(c);
        }

        if c == cmd::READ_GPS_DATA && data.len() == 2 {
            let ty = data[1];
            return self.gps_store.get(&ty).cloned().unwrap_or_default();
        }

        if c == cmd::WRITE_GPS_DATA {
            let ty = data[1];
            self.gps_store.insert(ty, data[2..].to_vec());
            return vec![0];
        }

        if let Some(expected) = self.write_expected(c) {
            let payload = &data[1..];
            if payload.len() != expected {
                // Respond with the byte count the firmware expected.
                return vec![expected as u8];
            }
            let code = self.apply_write(c, payload);
            return vec![code as u8];
        }

        self.read_response(c)
    }
}
