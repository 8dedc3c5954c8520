//! Capability model
//!
//! Four layers of capability information are collapsed into one
//! queryable predicate:
//!
//! 1. A per-model base feature mask plus firmware-revision gates
//!    ([`DEVICE_FEATURES`]).
//! 2. The `receiver_info` feature word, mapped onto driver feature bits
//!    via [`RI_FEATURE_MAP`].
//! 3. The extended feature bitset (`XFEATURE_BUFFER`).
//! 4. The TLV capability record.
//!
//! [`check_feature`] answers every capability question the IOCTL layer
//! asks; it never touches hardware.

use crate::device::{AsicVersion, RefClass, TypeNum, N_REF_CLASSES};
use crate::error::{DriverError, DriverResult};
use crate::types::{TlvInfo, XFeatures};
use bitflags::bitflags;

bitflags! {
    /// Driver-level feature bits ("pcps features")
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PcpsFeatures: u32 {
        const CAN_SET_TIME       = 1 << 0;
        const HAS_SERIAL         = 1 << 1;
        const HAS_SYNC_TIME      = 1 << 2;
        const HAS_TZDL           = 1 << 3;
        /// Serial number must be decoded from the legacy IDENT record
        const HAS_IDENT          = 1 << 4;
        const HAS_UTC_OFFS       = 1 << 5;
        const HAS_HR_TIME        = 1 << 6;
        /// Serial number readable via the dedicated command
        const HAS_SERNUM         = 1 << 7;
        const HAS_CABLE_LEN      = 1 << 8;
        const HAS_TZCODE         = 1 << 9;
        const HAS_PCPS_TZDL      = 1 << 10;
        const HAS_REF_OFFS       = 1 << 11;
        const HAS_OPT_SETTINGS   = 1 << 12;
        /// Large-structure transport uses a 16 bit length field
        const HAS_GPS_DATA_16    = 1 << 13;
        const HAS_SYNTH          = 1 << 14;
        const HAS_GENERIC_IO     = 1 << 15;
        /// Long-wave correlation info (PZF receivers)
        const HAS_CORR_INFO      = 1 << 16;
        const HAS_TR_DISTANCE    = 1 << 17;
        const HAS_EVT_LOG        = 1 << 18;
        const HAS_RECEIVER_INFO  = 1 << 19;
        const CAN_CLR_UCAP_BUFF  = 1 << 20;
        const HAS_UCAP           = 1 << 21;
        const HAS_IRIG_TX        = 1 << 22;
        const HAS_EVENT_TIME     = 1 << 23;
        const HAS_TIME_SCALE     = 1 << 24;
        const HAS_UTC_PARM       = 1 << 25;
        const HAS_IRIG_CTRL_BITS = 1 << 26;
        const HAS_LAN_INTF       = 1 << 27;
        const HAS_PTP            = 1 << 28;
        const HAS_IRIG_TIME      = 1 << 29;
        const HAS_RAW_IRIG_DATA  = 1 << 30;
        /// Memory mapped 64 bit timestamp register pair
        const HAS_FAST_HR_TSTAMP = 1 << 31;
    }
}

pub const N_PCPS_FEATURE_BITS: u16 = 32;

bitflags! {
    /// Built-in model features, fixed per device type then narrowed by
    /// firmware gates
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BuiltinFeatures: u32 {
        /// Supports the TIM/TTM time transfer record
        const TIME_TTM = 1 << 0;
        /// Supports position records
        const POS = 1 << 1;
        /// Supports the satellite status records
        const SAT_INFO = 1 << 2;
    }
}

pub const N_BUILTIN_FEATURE_BITS: u16 = 3;

/// Bit numbers of the `receiver_info` feature word
pub mod ri_bits {
    pub const PPS: u16 = 0;
    pub const PPM: u16 = 1;
    pub const SYNTH: u16 = 2;
    pub const DCFMARKS: u16 = 3;
    pub const IRIG_TX: u16 = 4;
    pub const IRIG_RX: u16 = 5;
    pub const LAN_IP4: u16 = 6;
    pub const MULTI_REF: u16 = 7;
    pub const RCV_TIMEOUT: u16 = 8;
    pub const IGNORE_LOCK: u16 = 9;
    pub const FIVE_MHZ: u16 = 10;
    pub const XMULTI_REF: u16 = 11;
    pub const OPT_SETTINGS: u16 = 12;
    pub const TIME_SCALE: u16 = 13;
    pub const IRIG_CTRL_BITS: u16 = 14;
    pub const PTP: u16 = 15;
    pub const NAV_ENGINE_SETTINGS: u16 = 16;
    pub const RAW_IRIG_DATA: u16 = 17;
    pub const RAW_IRIG_TIME: u16 = 18;
    pub const PTP_UNICAST: u16 = 19;
    pub const GPIO: u16 = 20;
    pub const XMRS_MULT_INSTC: u16 = 21;
    pub const TEN_MHZ_DISBD: u16 = 22;
    pub const EVT_LOG: u16 = 23;
    pub const IMS: u16 = 24;
    pub const HAVEQUICK: u16 = 25;
    pub const NTP: u16 = 26;
    pub const NET_CFG: u16 = 27;
    pub const VST: u16 = 28;
    pub const SHS: u16 = 29;
    pub const XBP: u16 = 30;
    /// Device supports the extended feature bitset
    pub const XFEATURE: u16 = 31;
}

pub const N_RI_FEATURE_BITS: u16 = 32;

/// Map of `receiver_info` feature bits to driver feature bits.
///
/// A set bit `n` in `receiver_info.features` ORs `RI_FEATURE_MAP[n]`
/// into the device's feature mask. Empty entries are capabilities the
/// bus API has no corresponding call for.
pub static RI_FEATURE_MAP: [PcpsFeatures; N_RI_FEATURE_BITS as usize] = {
    let mut map = [PcpsFeatures::empty(); N_RI_FEATURE_BITS as usize];
    map[ri_bits::SYNTH as usize] = PcpsFeatures::HAS_SYNTH;
    map[ri_bits::IRIG_TX as usize] = PcpsFeatures::HAS_IRIG_TX;
    map[ri_bits::LAN_IP4 as usize] = PcpsFeatures::HAS_LAN_INTF;
    map[ri_bits::TIME_SCALE as usize] = PcpsFeatures::HAS_TIME_SCALE.union(PcpsFeatures::HAS_UTC_PARM);
    map[ri_bits::IRIG_CTRL_BITS as usize] = PcpsFeatures::HAS_IRIG_CTRL_BITS;
    map[ri_bits::PTP as usize] = PcpsFeatures::HAS_PTP;
    map[ri_bits::RAW_IRIG_DATA as usize] =
        PcpsFeatures::HAS_IRIG_TIME.union(PcpsFeatures::HAS_RAW_IRIG_DATA);
    map[ri_bits::EVT_LOG as usize] = PcpsFeatures::HAS_EVT_LOG;
    map
};

/// A feature that appears only when the firmware is recent enough
#[derive(Debug, Clone, Copy)]
pub struct FirmwareGate {
    /// Minimum packed firmware revision
    pub min_fw_rev: u16,
    pub feature: PcpsFeatures,
}

/// Requirement pair after which IRQ operation is considered fixed:
/// a device is safe iff its firmware **or** its ASIC meets the level
#[derive(Debug, Clone, Copy)]
pub struct IrqFixLevels {
    pub min_fw_rev: u16,
    pub asic_major: u8,
    pub asic_minor: u8,
}

impl IrqFixLevels {
    pub fn is_safe(&self, fw_rev: u16, asic: AsicVersion) -> bool {
        fw_rev >= self.min_fw_rev || asic.at_least(self.asic_major, self.asic_minor)
    }
}

/// HR time support of the PEX511 additionally requires this ASIC level
pub const PEX511_HR_TIME_ASIC: (u8, u8) = (9, 3);

/// Columnar per-model feature table row
pub struct DeviceFeatures {
    pub num: TypeNum,
    pub base: PcpsFeatures,
    pub default_builtin: BuiltinFeatures,
    pub gates: &'static [FirmwareGate],
    pub irq_fix: Option<IrqFixLevels>,
}

const DCF_BASE: PcpsFeatures = PcpsFeatures::CAN_SET_TIME
    .union(PcpsFeatures::HAS_SERIAL)
    .union(PcpsFeatures::HAS_SYNC_TIME)
    .union(PcpsFeatures::HAS_UTC_OFFS)
    .union(PcpsFeatures::HAS_TZCODE);

const GPS_BASE: PcpsFeatures = PcpsFeatures::CAN_SET_TIME
    .union(PcpsFeatures::HAS_IDENT)
    .union(PcpsFeatures::HAS_SYNC_TIME)
    .union(PcpsFeatures::HAS_TZDL);

const IRIG_BASE: PcpsFeatures = PcpsFeatures::CAN_SET_TIME
    .union(PcpsFeatures::HAS_SERIAL)
    .union(PcpsFeatures::HAS_REF_OFFS)
    .union(PcpsFeatures::HAS_OPT_SETTINGS);

const GPS_GEN2: PcpsFeatures = GPS_BASE
    .union(PcpsFeatures::HAS_HR_TIME)
    .union(PcpsFeatures::HAS_CABLE_LEN);

const GPS_GEN3: PcpsFeatures = GPS_GEN2
    .union(PcpsFeatures::HAS_RECEIVER_INFO)
    .union(PcpsFeatures::HAS_SERNUM)
    .union(PcpsFeatures::HAS_UCAP)
    .union(PcpsFeatures::CAN_CLR_UCAP_BUFF)
    .union(PcpsFeatures::HAS_GENERIC_IO);

const GPS_GEN4: PcpsFeatures = GPS_GEN3.union(PcpsFeatures::HAS_GPS_DATA_16);

const IRIG_GEN2: PcpsFeatures = IRIG_BASE
    .union(PcpsFeatures::HAS_HR_TIME)
    .union(PcpsFeatures::HAS_SERNUM)
    .union(PcpsFeatures::HAS_GENERIC_IO);

const IRIG_GEN3: PcpsFeatures = IRIG_GEN2
    .union(PcpsFeatures::HAS_RECEIVER_INFO)
    .union(PcpsFeatures::HAS_GPS_DATA_16)
    .union(PcpsFeatures::HAS_UCAP)
    .union(PcpsFeatures::CAN_CLR_UCAP_BUFF);

const USB_DCF_BASE: PcpsFeatures = DCF_BASE
    .union(PcpsFeatures::HAS_HR_TIME)
    .union(PcpsFeatures::HAS_SERNUM)
    .union(PcpsFeatures::HAS_GENERIC_IO);

const USB_V2_EXTRA: PcpsFeatures = PcpsFeatures::HAS_RECEIVER_INFO
    .union(PcpsFeatures::HAS_GPS_DATA_16);

const GPS_BUILTIN: BuiltinFeatures = BuiltinFeatures::TIME_TTM
    .union(BuiltinFeatures::POS)
    .union(BuiltinFeatures::SAT_INFO);

static GATES_PC31: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0240, feature: PcpsFeatures::CAN_SET_TIME },
    FirmwareGate { min_fw_rev: 0x0260, feature: PcpsFeatures::HAS_SERIAL },
    FirmwareGate { min_fw_rev: 0x0300, feature: PcpsFeatures::HAS_SYNC_TIME },
    FirmwareGate { min_fw_rev: 0x0340, feature: PcpsFeatures::HAS_UTC_OFFS },
];

static GATES_GPS167PC: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0305, feature: PcpsFeatures::HAS_HR_TIME },
    FirmwareGate { min_fw_rev: 0x0303, feature: PcpsFeatures::HAS_CABLE_LEN },
];

static GATES_GPS167PCI: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0402, feature: PcpsFeatures::HAS_CABLE_LEN },
    FirmwareGate { min_fw_rev: 0x0406, feature: PcpsFeatures::CAN_CLR_UCAP_BUFF },
    FirmwareGate { min_fw_rev: 0x0407, feature: PcpsFeatures::HAS_UCAP },
];

static GATES_GPS168PCI: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0101, feature: PcpsFeatures::CAN_CLR_UCAP_BUFF },
    FirmwareGate { min_fw_rev: 0x0103, feature: PcpsFeatures::HAS_UCAP },
];

static GATES_GPS169PCI: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0205, feature: PcpsFeatures::HAS_GPS_DATA_16 },
];

static GATES_TCR510PCI: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0111, feature: PcpsFeatures::HAS_HR_TIME },
];

static GATES_PCI511: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0103, feature: PcpsFeatures::HAS_HR_TIME },
];

static GATES_TCR511PCI: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0105, feature: PcpsFeatures::HAS_IRIG_CTRL_BITS },
    FirmwareGate { min_fw_rev: 0x0106, feature: PcpsFeatures::HAS_IRIG_TIME },
    FirmwareGate { min_fw_rev: 0x0107, feature: PcpsFeatures::HAS_RAW_IRIG_DATA },
];

static GATES_TCR511PEX: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0102, feature: PcpsFeatures::HAS_IRIG_CTRL_BITS },
    FirmwareGate { min_fw_rev: 0x0102, feature: PcpsFeatures::HAS_IRIG_TIME },
    FirmwareGate { min_fw_rev: 0x0102, feature: PcpsFeatures::HAS_RAW_IRIG_DATA },
];

static GATES_TCR51USB: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0105, feature: PcpsFeatures::HAS_IRIG_CTRL_BITS },
    FirmwareGate { min_fw_rev: 0x0106, feature: PcpsFeatures::HAS_IRIG_TIME },
    FirmwareGate { min_fw_rev: 0x0107, feature: PcpsFeatures::HAS_RAW_IRIG_DATA },
];

/// The PEX511 gate applies only after the ASIC check, see
/// [`PEX511_HR_TIME_ASIC`]
pub static GATES_PEX511_HR: &[FirmwareGate] = &[
    FirmwareGate { min_fw_rev: 0x0102, feature: PcpsFeatures::HAS_HR_TIME },
];

const IRQ_FIX_PEX511: IrqFixLevels = IrqFixLevels { min_fw_rev: 0x0106, asic_major: 9, asic_minor: 6 };
const IRQ_FIX_TCR511PEX: IrqFixLevels = IrqFixLevels { min_fw_rev: 0x0105, asic_major: 10, asic_minor: 2 };
const IRQ_FIX_GPS170PEX: IrqFixLevels = IrqFixLevels { min_fw_rev: 0x0205, asic_major: 8, asic_minor: 3 };

macro_rules! row {
    ($num:ident, $base:expr, $builtin:expr, $gates:expr, $irq_fix:expr) => {
        DeviceFeatures {
            num: TypeNum::$num,
            base: $base,
            default_builtin: $builtin,
            gates: $gates,
            irq_fix: $irq_fix,
        }
    };
}

/// Per-model feature table, in [`crate::device::DEVICE_TYPES`] order
pub static DEVICE_FEATURES: &[DeviceFeatures] = &[
    row!(Pc31, PcpsFeatures::empty(), BuiltinFeatures::empty(), GATES_PC31, None),
    row!(Ps31Old, PcpsFeatures::empty(), BuiltinFeatures::empty(), GATES_PC31, None),
    row!(Ps31, PcpsFeatures::empty(), BuiltinFeatures::empty(), GATES_PC31, None),
    row!(Pc32, DCF_BASE, BuiltinFeatures::empty(), &[], None),
    row!(Pci32, DCF_BASE, BuiltinFeatures::empty(), &[], None),
    row!(Gps167pc, GPS_BASE, GPS_BUILTIN, GATES_GPS167PC, None),
    row!(Gps167pci, GPS_BASE.union(PcpsFeatures::HAS_HR_TIME), GPS_BUILTIN, GATES_GPS167PCI, None),
    row!(Pci509, DCF_BASE.union(PcpsFeatures::HAS_SERNUM).union(PcpsFeatures::HAS_GENERIC_IO), BuiltinFeatures::empty(), &[], None),
    row!(Gps168pci, GPS_GEN2, GPS_BUILTIN, GATES_GPS168PCI, None),
    row!(Pci510, DCF_BASE.union(PcpsFeatures::HAS_SERNUM).union(PcpsFeatures::HAS_GENERIC_IO), BuiltinFeatures::empty(), &[], None),
    row!(Gps169pci, GPS_GEN3, GPS_BUILTIN, GATES_GPS169PCI, None),
    row!(Tcr510pci, IRIG_BASE.union(PcpsFeatures::HAS_SERNUM).union(PcpsFeatures::HAS_GENERIC_IO), BuiltinFeatures::empty(), GATES_TCR510PCI, None),
    row!(Tcr167pci, IRIG_GEN3, BuiltinFeatures::empty(), &[], None),
    row!(Gps170pci, GPS_GEN4, GPS_BUILTIN, &[], None),
    row!(Pci511, DCF_BASE.union(PcpsFeatures::HAS_SERNUM).union(PcpsFeatures::HAS_GENERIC_IO), BuiltinFeatures::empty(), GATES_PCI511, None),
    row!(Tcr511pci, IRIG_GEN2, BuiltinFeatures::empty(), GATES_TCR511PCI, None),
    row!(Pex511, DCF_BASE.union(PcpsFeatures::HAS_SERNUM).union(PcpsFeatures::HAS_GENERIC_IO), BuiltinFeatures::empty(), &[], Some(IRQ_FIX_PEX511)),
    row!(Tcr511pex, IRIG_GEN2, BuiltinFeatures::empty(), GATES_TCR511PEX, Some(IRQ_FIX_TCR511PEX)),
    row!(Gps170pex, GPS_GEN4, GPS_BUILTIN, &[], Some(IRQ_FIX_GPS170PEX)),
    row!(Usb5131, USB_DCF_BASE, BuiltinFeatures::empty(), &[], None),
    row!(Tcr51usb, IRIG_GEN2, BuiltinFeatures::empty(), GATES_TCR51USB, None),
    row!(Msf51usb, USB_DCF_BASE, BuiltinFeatures::empty(), &[], None),
    row!(Ptp270pex, GPS_GEN4.union(PcpsFeatures::HAS_PTP).difference(PcpsFeatures::HAS_IDENT), BuiltinFeatures::empty(), &[], None),
    row!(Frc511pex, GPS_GEN4.difference(PcpsFeatures::HAS_IDENT), BuiltinFeatures::empty(), &[], None),
    row!(Tcr170pex, IRIG_GEN3, BuiltinFeatures::empty(), &[], None),
    row!(Wwvb51usb, USB_DCF_BASE, BuiltinFeatures::empty(), &[], None),
    row!(Gps180pex, GPS_GEN4, GPS_BUILTIN, &[], None),
    row!(Tcr180pex, IRIG_GEN3, BuiltinFeatures::empty(), &[], None),
    row!(Dcf600usb, USB_DCF_BASE.union(USB_V2_EXTRA), BuiltinFeatures::empty(), &[], None),
    row!(Pzf180pex, DCF_BASE.union(GPS_GEN4).union(PcpsFeatures::HAS_CORR_INFO).union(PcpsFeatures::HAS_TR_DISTANCE), BuiltinFeatures::empty(), &[], None),
    row!(Tcr600usb, IRIG_GEN3, BuiltinFeatures::empty(), &[], None),
    row!(Msf600usb, USB_DCF_BASE.union(USB_V2_EXTRA), BuiltinFeatures::empty(), &[], None),
    row!(Wvb600usb, USB_DCF_BASE.union(USB_V2_EXTRA), BuiltinFeatures::empty(), &[], None),
    row!(Gln180pex, GPS_GEN4, GPS_BUILTIN, &[], None),
    row!(Gps180amc, GPS_GEN4, GPS_BUILTIN, &[], None),
    row!(Gns181pex, GPS_GEN4, GPS_BUILTIN, &[], None),
    row!(Tcr180usb, IRIG_GEN3, BuiltinFeatures::empty(), &[], None),
];

/// Builtin-feature firmware gates for models that gained a record type
/// in a firmware update
pub struct BuiltinGate {
    pub num: TypeNum,
    pub min_fw_rev: u16,
    pub feature: BuiltinFeatures,
}

pub static BUILTIN_GATES: &[BuiltinGate] = &[
    BuiltinGate { num: TypeNum::Pzf180pex, min_fw_rev: 0x0206, feature: BuiltinFeatures::TIME_TTM },
    BuiltinGate { num: TypeNum::Tcr180pex, min_fw_rev: 0x0113, feature: BuiltinFeatures::TIME_TTM },
];

/// Look up the feature table row for a device model
pub fn device_features(num: TypeNum) -> &'static DeviceFeatures {
    DEVICE_FEATURES
        .iter()
        .find(|f| f.num == num)
        .expect("feature table covers all model numbers")
}

/// The kinds of capability the feature predicate can be asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FeatureType {
    Builtin = 0,
    RefType = 1,
    Pcps = 2,
    Ri = 3,
    XFeat = 4,
    TlvFeat = 5,
}

impl FeatureType {
    pub fn from_num(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::Builtin),
            1 => Some(Self::RefType),
            2 => Some(Self::Pcps),
            3 => Some(Self::Ri),
            4 => Some(Self::XFeat),
            5 => Some(Self::TlvFeat),
            _ => None,
        }
    }
}

/// Inputs of the feature predicate, a snapshot of the probed capability
/// state of one device
pub struct FeatureSet<'a> {
    pub real_builtin: BuiltinFeatures,
    pub ref_class: RefClass,
    pub pcps: PcpsFeatures,
    pub ri_features: u32,
    pub xfeatures: &'a XFeatures,
    pub tlv_info: &'a TlvInfo,
}

/// The feature predicate (§ capability query).
///
/// Returns `Ok(true)`/`Ok(false)` for a valid bit number and
/// `InvalidParameter` for a bit outside the respective range.
pub fn check_feature(set: &FeatureSet<'_>, ftype: FeatureType, num: u16) -> DriverResult<bool> {
    match ftype {
        FeatureType::Builtin => {
            if num >= N_BUILTIN_FEATURE_BITS {
                return Err(DriverError::InvalidParameter);
            }
            Ok(set.real_builtin.bits() & (1 << num) != 0)
        }
        FeatureType::RefType => {
            if num >= N_REF_CLASSES {
                return Err(DriverError::InvalidParameter);
            }
            Ok(num == set.ref_class as u16)
        }
        FeatureType::Pcps => {
            if num >= N_PCPS_FEATURE_BITS {
                return Err(DriverError::InvalidParameter);
            }
            Ok(set.pcps.bits() & (1 << num) != 0)
        }
        FeatureType::Ri => {
            if num >= N_RI_FEATURE_BITS {
                return Err(DriverError::InvalidParameter);
            }
            Ok(set.ri_features & (1 << num) != 0)
        }
        FeatureType::XFeat => {
            if num as usize >= XFeatures::N_BYTES * 8 {
                return Err(DriverError::InvalidParameter);
            }
            Ok(set.xfeatures.has_bit(num))
        }
        FeatureType::TlvFeat => {
            if num as usize >= TlvInfo::N_FEAT_BYTES * 8 {
                return Err(DriverError::InvalidParameter);
            }
            Ok(set.tlv_info.has_feat(num))
        }
    }
}

/// Bit position helper: the single set bit of a one-bit feature mask
pub fn feature_bit(f: PcpsFeatures) -> u16 {
    f.bits().trailing_zeros() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_table_covers_all_types() {
        for t in crate::device::DEVICE_TYPES {
            assert_eq!(device_features(t.num).num, t.num);
        }
    }

    #[test]
    fn test_ri_map_time_scale_implies_utc_parm() {
        let f = RI_FEATURE_MAP[ri_bits::TIME_SCALE as usize];
        assert!(f.contains(PcpsFeatures::HAS_TIME_SCALE));
        assert!(f.contains(PcpsFeatures::HAS_UTC_PARM));
        assert_eq!(
            RI_FEATURE_MAP[ri_bits::PTP as usize],
            PcpsFeatures::HAS_PTP
        );
        assert!(RI_FEATURE_MAP[ri_bits::PPS as usize].is_empty());
    }

    #[test]
    fn test_check_feature_ranges() {
        let x = XFeatures::empty();
        let tlv = TlvInfo::empty();
        let set = FeatureSet {
            real_builtin: BuiltinFeatures::TIME_TTM,
            ref_class: RefClass::Gps,
            pcps: PcpsFeatures::HAS_UCAP,
            ri_features: 1 << ri_bits::PTP,
            xfeatures: &x,
            tlv_info: &tlv,
        };
        assert_eq!(check_feature(&set, FeatureType::Builtin, 0), Ok(true));
        assert_eq!(check_feature(&set, FeatureType::Builtin, 1), Ok(false));
        assert_eq!(
            check_feature(&set, FeatureType::Builtin, N_BUILTIN_FEATURE_BITS),
            Err(DriverError::InvalidParameter)
        );
        assert_eq!(
            check_feature(&set, FeatureType::RefType, RefClass::Gps as u16),
            Ok(true)
        );
        assert_eq!(
            check_feature(&set, FeatureType::RefType, RefClass::Irig as u16),
            Ok(false)
        );
        assert_eq!(
            check_feature(&set, FeatureType::Pcps, feature_bit(PcpsFeatures::HAS_UCAP)),
            Ok(true)
        );
        assert_eq!(check_feature(&set, FeatureType::Ri, ri_bits::PTP), Ok(true));
        assert_eq!(check_feature(&set, FeatureType::Ri, ri_bits::GPIO), Ok(false));
        assert_eq!(
            check_feature(&set, FeatureType::XFeat, 2048),
            Err(DriverError::InvalidParameter)
        );
    }

    #[test]
    fn test_irq_fix_levels() {
        // Safe if either the firmware or the ASIC is new enough.
        assert!(IRQ_FIX_PEX511.is_safe(0x0106, AsicVersion { major: 9, minor: 0 }));
        assert!(IRQ_FIX_PEX511.is_safe(0x0100, AsicVersion { major: 9, minor: 6 }));
        assert!(!IRQ_FIX_PEX511.is_safe(0x0105, AsicVersion { major: 9, minor: 5 }));
    }
}
