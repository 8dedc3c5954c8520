//! IOCTL dispatcher
//!
//! One switch by request code. Every code carries three pieces of
//! metadata: the privilege it requires, the feature predicate that must
//! hold, and its payload shape. Hardware-touching requests funnel
//! through the transaction layer; capability queries are answered from
//! the descriptor and never touch the bus.
//!
//! Error codes translate to host-native errnos exactly once, in the OS
//! wrapper above this module. No partial output is ever returned: the
//! output buffer is written only after the transaction succeeded.

pub mod codes;

use crate::device::{BusKind, Device};
use crate::error::{DriverError, DriverResult};
use crate::features::{check_feature, FeatureSet, FeatureType, PcpsFeatures};
use crate::registry::DriverContext;
use crate::timestamp;
use crate::transaction;
use crate::types::{cmd, gps, HrTime, Stime, Time, TimeStamp, UcapEntries, Wire};
use alloc::sync::Arc;
use alloc::vec;

/// Driver version reported by `GET_PCPS_DRVR_INFO`
pub const DRIVER_VERSION: u32 = 0x0001_0000;

/// Privilege level a request requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    /// Always allowed
    None,
    /// Extended status reads
    ExtStatus,
    /// Configuration reads
    CfgRead,
    /// Configuration writes; requires administrator capability
    CfgWrite,
    /// System-level operations; requires administrator capability
    System,
}

/// Credentials of the calling process
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller {
    pub admin: bool,
}

impl Caller {
    pub fn admin() -> Self {
        Self { admin: true }
    }
}

/// Required privilege per request code; `None` for unknown codes
pub fn required_privilege(code: u32) -> Option<Privilege> {
    use codes::*;
    Some(match code {
        GET_PCPS_TIME | GET_PCPS_TIME_CYCLES | GET_PCPS_HR_TIME | GET_PCPS_HR_TIME_CYCLES
        | GET_FAST_HR_TIMESTAMP | GET_FAST_HR_TIMESTAMP_CYCLES | GET_PCPS_SYNC_TIME
        | GET_TIME_INFO_HRT | GET_TIME_INFO_TSTAMP | GET_PCPS_DRVR_INFO | GET_PCPS_DEV
        | GET_PCPS_STATUS_PORT | GET_PCI_ASIC_VERSION | GET_PCI_ASIC_FEATURES
        | GET_IRQ_STAT_INFO | GET_CYCLES_FREQUENCY | CHK_DEV_FEAT | DEV_IS_GPS
        | DEV_IS_IRIG_RX | DEV_HAS_HR_TIME | DEV_HAS_UCAP | DEV_HAS_FAST_HR_TIMESTAMP => {
            Privilege::None
        }

        GET_PCPS_UCAP_ENTRIES | GET_PCPS_UCAP_EVENT | GET_SYNTH_STATE | GET_DEBUG_STATUS
        | GET_CORR_INFO | GET_NUM_EVT_LOG_ENTRIES | GET_FIRST_EVT_LOG_ENTRY
        | GET_NEXT_EVT_LOG_ENTRY | GET_GPS_STAT_INFO | GET_GPS_ANT_INFO => Privilege::ExtStatus,

        GET_SERIAL | GET_TZCODE | GET_PCPS_TZDL | GET_REF_OFFS | GET_OPT_INFO
        | GET_IRIG_RX_INFO | GET_IRIG_TX_INFO | GET_SYNTH | GET_IRIG_CTRL_BITS
        | GET_RAW_IRIG_DATA | GET_TR_DISTANCE | GET_GPS_SW_REV | GET_GPS_IDENT | GET_GPS_POS
        | GET_GPS_TIME_SCALE_INFO | GET_GPS_UTC_PARM | GET_GPS_RECEIVER_INFO
        | GET_LAN_IF_INFO | GET_IP4_SETTINGS | GET_PTP_STATE | GET_PTP_CFG | GET_GNSS_MODE
        | GET_ALL_GPIO_INFO | GET_ALL_XMR_STATUS | GET_MAPPED_MEM_ADDR | UNMAP_MAPPED_MEM
        | PCPS_GENERIC_READ | PCPS_GENERIC_READ_GPS => Privilege::CfgRead,

        SET_SERIAL | SET_TZCODE | SET_PCPS_TZDL | SET_REF_OFFS | SET_OPT_SETTINGS
        | SET_IRIG_RX_SETTINGS | SET_IRIG_TX_SETTINGS | SET_SYNTH | SET_TR_DISTANCE
        | CLR_UCAP_BUFF | CLR_EVT_LOG | SET_GPS_TIME_SCALE_SETTINGS | SET_GPS_UTC_PARM
        | SET_IP4_SETTINGS | SET_PTP_CFG | SET_GNSS_MODE | PCPS_GENERIC_WRITE
        | PCPS_GENERIC_WRITE_GPS | PCPS_GENERIC_IO => Privilege::CfgWrite,

        SET_TIME | SET_EVENT_TIME | SET_GPS_POS | FORCE_RESET => Privilege::System,

        _ => return None,
    })
}

fn out_bytes(output: &mut [u8], data: &[u8]) -> DriverResult<usize> {
    if output.len() < data.len() {
        return Err(DriverError::CopyToUser);
    }
    output[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

fn out_var<T: Wire>(output: &mut [u8], val: &T) -> DriverResult<usize> {
    if output.len() < T::SIZE {
        return Err(DriverError::CopyToUser);
    }
    val.to_wire(&mut output[..T::SIZE]);
    Ok(T::SIZE)
}

fn in_var<T: Wire>(input: &[u8]) -> DriverResult<T> {
    if input.len() < T::SIZE {
        return Err(DriverError::CopyFromUser);
    }
    Ok(T::from_wire(&input[..T::SIZE]))
}

fn snapshot_features(dev: &Device) -> (PcpsFeatures, FeatureSetOwned) {
    let cfg = dev.cfg.read();
    (
        cfg.features,
        FeatureSetOwned {
            real_builtin: cfg.real_builtin_features,
            ref_class: cfg.type_info.ref_class,
            pcps: cfg.features,
            ri_features: cfg.receiver_info.features,
            xfeatures: cfg.xfeatures,
            tlv_info: cfg.tlv_info,
        },
    )
}

/// Owned snapshot of the predicate inputs, so the config lock is not
/// held across hardware access
struct FeatureSetOwned {
    real_builtin: crate::features::BuiltinFeatures,
    ref_class: crate::device::RefClass,
    pcps: PcpsFeatures,
    ri_features: u32,
    xfeatures: crate::types::XFeatures,
    tlv_info: crate::types::TlvInfo,
}

impl FeatureSetOwned {
    fn as_ref(&self) -> FeatureSet<'_> {
        FeatureSet {
            real_builtin: self.real_builtin,
            ref_class: self.ref_class,
            pcps: self.pcps,
            ri_features: self.ri_features,
            xfeatures: &self.xfeatures,
            tlv_info: &self.tlv_info,
        }
    }
}

fn require(cond: bool) -> DriverResult<()> {
    if cond {
        Ok(())
    } else {
        Err(DriverError::NotSupportedByDevice)
    }
}

/// Read a fixed structure from the device, gated on the unsafe-IRQ check
fn hw_read_var<T: Wire>(dev: &Device, c: u8, output: &mut [u8]) -> DriverResult<usize> {
    dev.check_access_safe()?;
    let val: T = transaction::read_var(dev, c)?;
    out_var(output, &val)
}

/// Read an opaque record whose transfer size is the caller's buffer size
fn hw_read_raw(dev: &Device, c: u8, output: &mut [u8]) -> DriverResult<usize> {
    dev.check_access_safe()?;
    let mut buf = vec![0u8; output.len()];
    transaction::read(dev, c, &mut buf)?;
    out_bytes(output, &buf)
}

fn hw_write_raw(dev: &Device, c: u8, input: &[u8]) -> DriverResult<usize> {
    dev.check_access_safe()?;
    let code = transaction::write(dev, c, input)?;
    transaction::completion_result(code)?;
    Ok(0)
}

fn hw_read_gps_raw(dev: &Device, sub: u8, output: &mut [u8]) -> DriverResult<usize> {
    dev.check_access_safe()?;
    let mut buf = vec![0u8; output.len()];
    transaction::read_gps(dev, sub, &mut buf)?;
    out_bytes(output, &buf)
}

fn hw_write_gps_raw(dev: &Device, sub: u8, input: &[u8]) -> DriverResult<usize> {
    dev.check_access_safe()?;
    let code = transaction::write_gps(dev, sub, input)?;
    transaction::completion_result(code)?;
    Ok(0)
}

fn hw_write_cmd(dev: &Device, c: u8) -> DriverResult<usize> {
    dev.check_access_safe()?;
    transaction::write_cmd(dev, c)?;
    Ok(0)
}

fn bool_out(output: &mut [u8], b: bool) -> DriverResult<usize> {
    out_var(output, &(b as u32))
}

/// Descriptor of a generic request: sub-code plus payload sizes
struct GenericReq {
    info: u32,
    in_sz: usize,
    out_sz: usize,
}

fn parse_generic_req(input: &[u8]) -> DriverResult<(GenericReq, &[u8])> {
    if input.len() < codes::SIZE_GENERIC_REQ {
        return Err(DriverError::CopyFromUser);
    }
    let req = GenericReq {
        info: u32::from_wire(&input[0..4]),
        in_sz: u32::from_wire(&input[4..8]) as usize,
        out_sz: u32::from_wire(&input[8..12]) as usize,
    };
    let payload = &input[codes::SIZE_GENERIC_REQ..];
    if payload.len() < req.in_sz {
        return Err(DriverError::CopyFromUser);
    }
    let in_sz = req.in_sz;
    Ok((req, &payload[..in_sz]))
}

/// Dispatch one request.
///
/// `input` carries the caller's request payload, `output` receives the
/// reply; the number of valid output bytes is returned. The wrapper
/// performs the user-space copies and errno translation.
pub fn dispatch(
    ctx: &DriverContext,
    dev: &Arc<Device>,
    caller: &Caller,
    code: u32,
    input: &[u8],
    output: &mut [u8],
) -> DriverResult<usize> {
    let priv_lvl = required_privilege(code).ok_or_else(|| {
        log::warn!("ioctl: unknown request code 0x{:08X}", code);
        DriverError::InvalidParameter
    })?;

    match priv_lvl {
        Privilege::None | Privilege::ExtStatus | Privilege::CfgRead => {}
        Privilege::CfgWrite | Privilege::System => {
            if !caller.admin {
                log::warn!(
                    "ioctl: 0x{:08X} denied for {} {}: admin rights required",
                    code,
                    dev.name(),
                    dev.sernum()
                );
                return Err(DriverError::Permission);
            }
        }
    }

    if !dev.connected() {
        return Err(DriverError::NoDevice);
    }

    let (features, feat_set) = snapshot_features(dev);

    use codes::*;
    let result = match code {
        // --- current time, lowest latency first ---
        GET_FAST_HR_TIMESTAMP => {
            require(features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP))?;
            out_var(output, &timestamp::fast_timestamp(dev))
        }

        GET_FAST_HR_TIMESTAMP_CYCLES => {
            require(features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP))?;
            let tsc = timestamp::fast_timestamp_cycles(dev);
            let mut buf = [0u8; TimeStamp::SIZE + 8];
            tsc.tstamp.to_wire(&mut buf[..TimeStamp::SIZE]);
            buf[TimeStamp::SIZE..].copy_from_slice(&tsc.cycles.to_le_bytes());
            out_bytes(output, &buf)
        }

        GET_PCPS_HR_TIME => {
            require(features.contains(PcpsFeatures::HAS_HR_TIME))?;
            hw_read_var::<HrTime>(dev, cmd::GIVE_HR_TIME, output)
        }

        GET_PCPS_HR_TIME_CYCLES => {
            require(features.contains(PcpsFeatures::HAS_HR_TIME))?;
            dev.check_access_safe()?;
            let (t, cycles): (HrTime, u64) =
                transaction::read_var_cycles(dev, cmd::GIVE_HR_TIME)?;
            let mut buf = [0u8; HrTime::SIZE + 8];
            t.to_wire(&mut buf[..HrTime::SIZE]);
            buf[HrTime::SIZE..].copy_from_slice(&cycles.to_le_bytes());
            out_bytes(output, &buf)
        }

        GET_PCPS_UCAP_EVENT => {
            require(features.contains(PcpsFeatures::HAS_UCAP))?;
            hw_read_var::<HrTime>(dev, cmd::GIVE_UCAP_EVENT, output)
        }

        GET_PCPS_TIME => hw_read_var::<Time>(dev, cmd::GIVE_TIME_NOCLEAR, output),

        GET_PCPS_TIME_CYCLES => {
            dev.check_access_safe()?;
            let (t, cycles): (Time, u64) =
                transaction::read_var_cycles(dev, cmd::GIVE_TIME_NOCLEAR)?;
            let mut buf = [0u8; Time::SIZE + 8];
            t.to_wire(&mut buf[..Time::SIZE]);
            buf[Time::SIZE..].copy_from_slice(&cycles.to_le_bytes());
            out_bytes(output, &buf)
        }

        GET_PCPS_SYNC_TIME => {
            require(features.contains(PcpsFeatures::HAS_SYNC_TIME))?;
            hw_read_var::<Time>(dev, cmd::GIVE_SYNC_TIME, output)
        }

        GET_TIME_INFO_HRT => {
            require(features.contains(PcpsFeatures::HAS_HR_TIME))?;
            dev.check_access_safe()?;
            let host = dev.host();
            let us_before = host.timestamp_us();
            let cyc_before = host.cycles();
            let t: HrTime = transaction::read_var(dev, cmd::GIVE_HR_TIME)?;
            let cyc_after = host.cycles();
            let us_after = host.timestamp_us();

            let mut buf = [0u8; codes::SIZE_TIME_INFO_HRT];
            buf[0..8].copy_from_slice(&us_before.to_le_bytes());
            buf[8..16].copy_from_slice(&cyc_before.to_le_bytes());
            t.to_wire(&mut buf[16..16 + HrTime::SIZE]);
            buf[16 + HrTime::SIZE..24 + HrTime::SIZE].copy_from_slice(&cyc_after.to_le_bytes());
            buf[24 + HrTime::SIZE..32 + HrTime::SIZE].copy_from_slice(&us_after.to_le_bytes());
            out_bytes(output, &buf)
        }

        GET_TIME_INFO_TSTAMP => {
            require(features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP))?;
            let host = dev.host();
            let us_before = host.timestamp_us();
            let cyc_before = host.cycles();
            let ts = timestamp::fast_timestamp(dev);
            let cyc_after = host.cycles();
            let us_after = host.timestamp_us();

            let mut buf = [0u8; codes::SIZE_TIME_INFO_TSTAMP];
            buf[0..8].copy_from_slice(&us_before.to_le_bytes());
            buf[8..16].copy_from_slice(&cyc_before.to_le_bytes());
            ts.to_wire(&mut buf[16..16 + TimeStamp::SIZE]);
            buf[16 + TimeStamp::SIZE..24 + TimeStamp::SIZE]
                .copy_from_slice(&cyc_after.to_le_bytes());
            buf[24 + TimeStamp::SIZE..32 + TimeStamp::SIZE]
                .copy_from_slice(&us_after.to_le_bytes());
            out_bytes(output, &buf)
        }

        // --- capture FIFO ---
        GET_PCPS_UCAP_ENTRIES => {
            require(features.contains(PcpsFeatures::HAS_UCAP))?;
            hw_read_var::<UcapEntries>(dev, cmd::GIVE_UCAP_ENTRIES, output)
        }

        CLR_UCAP_BUFF => {
            require(features.contains(PcpsFeatures::CAN_CLR_UCAP_BUFF))?;
            hw_write_cmd(dev, cmd::CLR_UCAP_BUFF)
        }

        // --- set time group ---
        SET_TIME => {
            require(features.contains(PcpsFeatures::CAN_SET_TIME))?;
            let t: Stime = in_var(input)?;
            dev.check_access_safe()?;
            let code = transaction::write_var(dev, cmd::SET_TIME, &t)?;
            transaction::completion_result(code)?;
            Ok(0)
        }

        SET_EVENT_TIME => {
            require(features.contains(PcpsFeatures::HAS_EVENT_TIME))?;
            let t: TimeStamp = in_var(input)?;
            dev.check_access_safe()?;
            let code = transaction::write_var(dev, cmd::SET_EVENT_TIME, &t)?;
            transaction::completion_result(code)?;
            Ok(0)
        }

        // --- legacy configuration ---
        GET_SERIAL => {
            require(features.contains(PcpsFeatures::HAS_SERIAL))?;
            hw_read_raw(dev, cmd::GET_SERIAL, output)
        }
        SET_SERIAL => {
            require(features.contains(PcpsFeatures::HAS_SERIAL))?;
            hw_write_raw(dev, cmd::SET_SERIAL, input)
        }

        GET_TZCODE => {
            require(features.contains(PcpsFeatures::HAS_TZCODE))?;
            hw_read_var::<u8>(dev, cmd::GET_TZCODE, output)
        }
        SET_TZCODE => {
            require(features.contains(PcpsFeatures::HAS_TZCODE))?;
            hw_write_raw(dev, cmd::SET_TZCODE, input)
        }

        GET_PCPS_TZDL => {
            require(features.contains(PcpsFeatures::HAS_PCPS_TZDL))?;
            hw_read_raw(dev, cmd::GET_TZDL, output)
        }
        SET_PCPS_TZDL => {
            require(features.contains(PcpsFeatures::HAS_PCPS_TZDL))?;
            hw_write_raw(dev, cmd::SET_TZDL, input)
        }

        GET_REF_OFFS => {
            require(features.contains(PcpsFeatures::HAS_REF_OFFS))?;
            hw_read_raw(dev, cmd::GET_REF_OFFS, output)
        }
        SET_REF_OFFS => {
            require(features.contains(PcpsFeatures::HAS_REF_OFFS))?;
            hw_write_raw(dev, cmd::SET_REF_OFFS, input)
        }

        GET_OPT_INFO => {
            require(features.contains(PcpsFeatures::HAS_OPT_SETTINGS))?;
            hw_read_raw(dev, cmd::GET_OPT_INFO, output)
        }
        SET_OPT_SETTINGS => {
            require(features.contains(PcpsFeatures::HAS_OPT_SETTINGS))?;
            hw_write_raw(dev, cmd::SET_OPT_SETTINGS, input)
        }

        GET_IRIG_RX_INFO => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Irig as u16,
            )?)?;
            hw_read_raw(dev, cmd::GET_IRIG_RX_INFO, output)
        }
        SET_IRIG_RX_SETTINGS => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Irig as u16,
            )?)?;
            hw_write_raw(dev, cmd::SET_IRIG_RX_SETTINGS, input)
        }

        GET_IRIG_TX_INFO => {
            require(features.contains(PcpsFeatures::HAS_IRIG_TX))?;
            hw_read_raw(dev, cmd::GET_IRIG_TX_INFO, output)
        }
        SET_IRIG_TX_SETTINGS => {
            require(features.contains(PcpsFeatures::HAS_IRIG_TX))?;
            hw_write_raw(dev, cmd::SET_IRIG_TX_SETTINGS, input)
        }

        GET_SYNTH => {
            require(features.contains(PcpsFeatures::HAS_SYNTH))?;
            hw_read_raw(dev, cmd::GET_SYNTH, output)
        }
        SET_SYNTH => {
            require(features.contains(PcpsFeatures::HAS_SYNTH))?;
            hw_write_raw(dev, cmd::SET_SYNTH, input)
        }
        GET_SYNTH_STATE => {
            require(features.contains(PcpsFeatures::HAS_SYNTH))?;
            hw_read_raw(dev, cmd::GET_SYNTH_STATE, output)
        }

        GET_IRIG_CTRL_BITS => {
            require(features.contains(PcpsFeatures::HAS_IRIG_CTRL_BITS))?;
            hw_read_var::<u32>(dev, cmd::GET_IRIG_CTRL_BITS, output)
        }

        GET_RAW_IRIG_DATA => {
            require(features.contains(PcpsFeatures::HAS_RAW_IRIG_DATA))?;
            hw_read_raw(dev, cmd::GET_RAW_IRIG_DATA, output)
        }

        GET_CORR_INFO => {
            require(features.contains(PcpsFeatures::HAS_CORR_INFO))?;
            hw_read_raw(dev, cmd::GET_CORR_INFO, output)
        }

        GET_TR_DISTANCE => {
            require(features.contains(PcpsFeatures::HAS_TR_DISTANCE))?;
            hw_read_raw(dev, cmd::GET_TR_DISTANCE, output)
        }
        SET_TR_DISTANCE => {
            require(features.contains(PcpsFeatures::HAS_TR_DISTANCE))?;
            hw_write_raw(dev, cmd::SET_TR_DISTANCE, input)
        }

        GET_DEBUG_STATUS => hw_read_raw(dev, cmd::GET_DEBUG_STATUS, output),

        CLR_EVT_LOG => {
            require(features.contains(PcpsFeatures::HAS_EVT_LOG))?;
            hw_write_cmd(dev, cmd::CLR_EVT_LOG)
        }
        GET_NUM_EVT_LOG_ENTRIES => {
            require(features.contains(PcpsFeatures::HAS_EVT_LOG))?;
            hw_read_raw(dev, cmd::NUM_EVT_LOG_ENTRIES, output)
        }
        GET_FIRST_EVT_LOG_ENTRY => {
            require(features.contains(PcpsFeatures::HAS_EVT_LOG))?;
            hw_read_raw(dev, cmd::FIRST_EVT_LOG_ENTRY, output)
        }
        GET_NEXT_EVT_LOG_ENTRY => {
            require(features.contains(PcpsFeatures::HAS_EVT_LOG))?;
            hw_read_raw(dev, cmd::NEXT_EVT_LOG_ENTRY, output)
        }

        // --- large structure reads/writes ---
        GET_GPS_SW_REV => hw_read_gps_raw(dev, gps::SW_REV, output),
        GET_GPS_STAT_INFO => hw_read_gps_raw(dev, gps::STAT_INFO, output),
        GET_GPS_ANT_INFO => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Gps as u16,
            )?)?;
            hw_read_gps_raw(dev, gps::ANT_INFO, output)
        }
        GET_GPS_IDENT => hw_read_gps_raw(dev, gps::IDENT, output),
        GET_GPS_POS => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Gps as u16,
            )?)?;
            hw_read_gps_raw(dev, gps::POS, output)
        }
        SET_GPS_POS => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Gps as u16,
            )?)?;
            hw_write_gps_raw(dev, gps::POS, input)
        }

        GET_GPS_TIME_SCALE_INFO => {
            require(features.contains(PcpsFeatures::HAS_TIME_SCALE))?;
            hw_read_gps_raw(dev, gps::TIME_SCALE, output)
        }
        SET_GPS_TIME_SCALE_SETTINGS => {
            require(features.contains(PcpsFeatures::HAS_TIME_SCALE))?;
            hw_write_gps_raw(dev, gps::TIME_SCALE, input)
        }

        GET_GPS_UTC_PARM => {
            require(features.contains(PcpsFeatures::HAS_UTC_PARM))?;
            hw_read_gps_raw(dev, gps::UTC_PARM, output)
        }
        SET_GPS_UTC_PARM => {
            require(features.contains(PcpsFeatures::HAS_UTC_PARM))?;
            hw_write_gps_raw(dev, gps::UTC_PARM, input)
        }

        GET_GPS_RECEIVER_INFO => {
            require(features.contains(PcpsFeatures::HAS_RECEIVER_INFO))?;
            hw_read_gps_raw(dev, gps::RECEIVER_INFO, output)
        }

        GET_LAN_IF_INFO => {
            require(features.contains(PcpsFeatures::HAS_LAN_INTF))?;
            hw_read_gps_raw(dev, gps::LAN_IF_INFO, output)
        }
        GET_IP4_SETTINGS => {
            require(features.contains(PcpsFeatures::HAS_LAN_INTF))?;
            hw_read_gps_raw(dev, gps::IP4_SETTINGS, output)
        }
        SET_IP4_SETTINGS => {
            require(features.contains(PcpsFeatures::HAS_LAN_INTF))?;
            hw_write_gps_raw(dev, gps::IP4_SETTINGS, input)
        }

        GET_PTP_STATE => {
            require(features.contains(PcpsFeatures::HAS_PTP))?;
            hw_read_gps_raw(dev, gps::PTP_STATE, output)
        }
        GET_PTP_CFG => {
            require(features.contains(PcpsFeatures::HAS_PTP))?;
            hw_read_gps_raw(dev, gps::PTP_CFG, output)
        }
        SET_PTP_CFG => {
            require(features.contains(PcpsFeatures::HAS_PTP))?;
            hw_write_gps_raw(dev, gps::PTP_CFG, input)
        }

        GET_GNSS_MODE => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Gps as u16,
            )?)?;
            hw_read_gps_raw(dev, gps::GNSS_MODE, output)
        }
        SET_GNSS_MODE => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::RefType,
                crate::device::RefClass::Gps as u16,
            )?)?;
            hw_write_gps_raw(dev, gps::GNSS_MODE, input)
        }

        GET_ALL_GPIO_INFO => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::Ri,
                crate::features::ri_bits::GPIO,
            )?)?;
            hw_read_gps_raw(dev, gps::ALL_GPIO_INFO, output)
        }
        GET_ALL_XMR_STATUS => {
            require(check_feature(
                &feat_set.as_ref(),
                FeatureType::Ri,
                crate::features::ri_bits::XMULTI_REF,
            )?)?;
            hw_read_gps_raw(dev, gps::ALL_XMR_STATUS, output)
        }

        // --- generic transactions ---
        PCPS_GENERIC_READ => {
            require(features.contains(PcpsFeatures::HAS_GENERIC_IO))?;
            let (req, _) = parse_generic_req(input)?;
            if req.out_sz > u8::MAX as usize || output.len() < req.out_sz {
                return Err(DriverError::InvalidParameter);
            }
            dev.check_access_safe()?;
            let mut buf = vec![0u8; req.out_sz];
            transaction::read(dev, req.info as u8, &mut buf)?;
            out_bytes(output, &buf)
        }

        PCPS_GENERIC_WRITE => {
            require(features.contains(PcpsFeatures::HAS_GENERIC_IO))?;
            let (req, payload) = parse_generic_req(input)?;
            dev.check_access_safe()?;
            let code = transaction::write(dev, req.info as u8, payload)?;
            transaction::completion_result(code)?;
            Ok(0)
        }

        PCPS_GENERIC_READ_GPS => {
            let (req, _) = parse_generic_req(input)?;
            if output.len() < req.out_sz {
                return Err(DriverError::InvalidParameter);
            }
            dev.check_access_safe()?;
            let mut buf = vec![0u8; req.out_sz];
            transaction::read_gps(dev, req.info as u8, &mut buf)?;
            out_bytes(output, &buf)
        }

        PCPS_GENERIC_WRITE_GPS => {
            let (req, payload) = parse_generic_req(input)?;
            dev.check_access_safe()?;
            let code = transaction::write_gps(dev, req.info as u8, payload)?;
            transaction::completion_result(code)?;
            Ok(0)
        }

        PCPS_GENERIC_IO => {
            require(features.contains(PcpsFeatures::HAS_GENERIC_IO))?;
            let (req, payload) = parse_generic_req(input)?;
            if output.len() < req.out_sz {
                return Err(DriverError::InvalidParameter);
            }
            dev.check_access_safe()?;
            let mut buf = vec![0u8; req.out_sz];
            let code = transaction::generic_io(dev, req.info as u8, payload, &mut buf)?;
            transaction::completion_result(code)?;
            out_bytes(output, &buf)
        }

        // --- identification and driver state, no hardware access ---
        GET_PCPS_DRVR_INFO => {
            let mut buf = [0u8; codes::SIZE_DRVR_INFO];
            buf[0..4].copy_from_slice(&DRIVER_VERSION.to_le_bytes());
            buf[4..8].copy_from_slice(&(ctx.device_count() as u32).to_le_bytes());
            out_bytes(output, &buf)
        }

        GET_PCPS_DEV => {
            let cfg = dev.cfg.read();
            let mut buf = [0u8; codes::SIZE_DEV_INFO];
            buf[0..2].copy_from_slice(&cfg.type_info.dev_id.to_le_bytes());
            buf[2] = cfg.type_info.ref_class as u8;
            buf[3] = bus_code(cfg.type_info.bus);
            buf[4..6].copy_from_slice(&cfg.fw_rev.to_le_bytes());
            buf[8..12].copy_from_slice(&cfg.features.bits().to_le_bytes());
            buf[12..16].copy_from_slice(&cfg.asic_raw_version.to_le_bytes());
            buf[16] = cfg.err_flags.bits();
            buf[17] = dev.irq_state().bits();
            out_bytes(output, &buf)
        }

        GET_PCPS_STATUS_PORT => {
            if dev.is_usb() {
                hw_read_var::<u8>(dev, cmd::GET_STATUS_PORT, output)
            } else {
                let status = dev.io.lock().status.clone();
                let val = status.map(|s| s.read()).unwrap_or(0);
                out_var(output, &val)
            }
        }

        GET_PCI_ASIC_VERSION => {
            require(dev.cfg.read().type_info.bus.has_asic())?;
            out_var(output, &dev.cfg.read().asic_raw_version)
        }

        GET_PCI_ASIC_FEATURES => {
            require(dev.cfg.read().type_info.bus.has_asic())?;
            out_var(output, &dev.cfg.read().asic_features)
        }

        GET_IRQ_STAT_INFO => out_var(output, &dev.irq_state().bits()),

        GET_CYCLES_FREQUENCY => {
            let freq = dev.host().cycles_frequency();
            out_bytes(output, &freq.to_le_bytes())
        }

        CHK_DEV_FEAT => {
            if input.len() < codes::SIZE_CHK_DEV_FEAT {
                return Err(DriverError::CopyFromUser);
            }
            let ftype = u32::from_wire(&input[0..4]);
            let fnum = u32::from_wire(&input[4..8]);
            let ftype = FeatureType::from_num(ftype).ok_or(DriverError::InvalidParameter)?;
            if fnum > u16::MAX as u32 {
                return Err(DriverError::InvalidParameter);
            }
            if check_feature(&feat_set.as_ref(), ftype, fnum as u16)? {
                Ok(0)
            } else {
                Err(DriverError::NotSupportedByDevice)
            }
        }

        DEV_IS_GPS => bool_out(
            output,
            dev.cfg.read().type_info.ref_class == crate::device::RefClass::Gps,
        ),
        DEV_IS_IRIG_RX => bool_out(
            output,
            dev.cfg.read().type_info.ref_class == crate::device::RefClass::Irig,
        ),
        DEV_HAS_HR_TIME => bool_out(output, features.contains(PcpsFeatures::HAS_HR_TIME)),
        DEV_HAS_UCAP => bool_out(output, features.contains(PcpsFeatures::HAS_UCAP)),
        DEV_HAS_FAST_HR_TIMESTAMP => bool_out(
            output,
            features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP),
        ),

        // --- memory mapping ---
        GET_MAPPED_MEM_ADDR => {
            require(dev.cfg.read().asic_features & crate::device::ASIC_FEAT_MM_IO != 0)?;
            let cfg = dev.cfg.read();
            if cfg.mem0_len == 0 {
                return Err(DriverError::NotSupportedByDevice);
            }
            let asic_size = crate::transport::asic::ASIC_SIZE;
            let mut buf = [0u8; codes::SIZE_MAPPED_MEM];
            buf[0..8].copy_from_slice(&(cfg.mem0_base_raw + asic_size).to_le_bytes());
            buf[8..16].copy_from_slice(&(cfg.mem0_len.saturating_sub(asic_size)).to_le_bytes());
            out_bytes(output, &buf)
        }

        UNMAP_MAPPED_MEM => {
            require(dev.cfg.read().asic_features & crate::device::ASIC_FEAT_MM_IO != 0)?;
            Ok(0)
        }

        // --- dangerous commands ---
        FORCE_RESET => {
            #[cfg(feature = "force-reset")]
            {
                dev.check_access_safe()?;
                transaction::write_cmd(dev, cmd::FORCE_RESET)?;
                Ok(0)
            }
            #[cfg(not(feature = "force-reset"))]
            {
                Err(DriverError::NotSupportedOnOs)
            }
        }

        _ => Err(DriverError::InvalidParameter),
    };

    if let Err(e) = &result {
        match e {
            DriverError::NotSupportedByDevice => log::debug!(
                "ioctl: 0x{:08X} not supported by {} {}",
                code,
                dev.name(),
                dev.sernum()
            ),
            DriverError::Busy => log::warn!(
                "ioctl: 0x{:08X} refused, unsafe IRQs enabled on {} {}",
                code,
                dev.name(),
                dev.sernum()
            ),
            e => log::warn!(
                "ioctl: 0x{:08X} failed on {} {}: {}",
                code,
                dev.name(),
                dev.sernum(),
                e
            ),
        }
    }

    result
}

fn bus_code(bus: BusKind) -> u8 {
    match bus {
        BusKind::Isa => 0,
        BusKind::Mca => 1,
        BusKind::PciS5933 => 2,
        BusKind::PciS5920 => 3,
        BusKind::PciAsic => 4,
        BusKind::PciPex8311 => 5,
        BusKind::PciMbgpex => 6,
        BusKind::Usb => 7,
        BusKind::UsbV2 => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyclic;
    use crate::device::IrqState;
    use crate::features::feature_bit;
    use crate::mock;
    use crate::types::TimeStatus;

    fn fixture() -> mock::AsicFixture {
        mock::asic_fixture(mock::model::ClockModel::gps180pex())
    }

    #[test]
    fn test_get_time_roundtrip() {
        let fix = fixture();
        let mut out = [0u8; Time::SIZE];
        let n = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::GET_PCPS_TIME,
            &[],
            &mut out,
        )
        .unwrap();
        assert_eq!(n, Time::SIZE);
        let t = Time::from_wire(&out);
        assert!(t.status.contains(TimeStatus::SYNCD));
    }

    #[test]
    fn test_privilege_denied_for_cfg_write() {
        let fix = fixture();
        let mut out = [];
        let rc = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::SET_TZCODE,
            &[0x02],
            &mut out,
        );
        assert_eq!(rc, Err(DriverError::Permission));

        let rc = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::admin(),
            codes::SET_TZCODE,
            &[0x02],
            &mut out,
        );
        assert_eq!(rc, Ok(0));
    }

    #[test]
    fn test_capability_query_never_touches_hardware() {
        let fix = fixture();
        let before = fix.card.command_count();
        let mut out = [0u8; 4];
        dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::DEV_HAS_HR_TIME,
            &[],
            &mut out,
        )
        .unwrap();
        assert_eq!(u32::from_le_bytes(out), 1);
        assert_eq!(fix.card.command_count(), before);
    }

    #[test]
    fn test_chk_dev_feat() {
        let fix = fixture();
        let mut req = [0u8; 8];
        req[0..4].copy_from_slice(&(FeatureType::Pcps as u32).to_le_bytes());
        req[4..8]
            .copy_from_slice(&(feature_bit(PcpsFeatures::HAS_UCAP) as u32).to_le_bytes());
        assert_eq!(
            dispatch(&fix.ctx, &fix.dev, &Caller::default(), codes::CHK_DEV_FEAT, &req, &mut []),
            Ok(0)
        );

        req[4..8].copy_from_slice(&(feature_bit(PcpsFeatures::HAS_CORR_INFO) as u32).to_le_bytes());
        assert_eq!(
            dispatch(&fix.ctx, &fix.dev, &Caller::default(), codes::CHK_DEV_FEAT, &req, &mut []),
            Err(DriverError::NotSupportedByDevice)
        );

        req[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert_eq!(
            dispatch(&fix.ctx, &fix.dev, &Caller::default(), codes::CHK_DEV_FEAT, &req, &mut []),
            Err(DriverError::InvalidParameter)
        );
    }

    #[test]
    fn test_unsafe_irq_gate_returns_busy() {
        let fix = mock::asic_fixture(mock::model::ClockModel::pex511_old_firmware());
        assert!(fix.dev.irq_state().contains(IrqState::UNSAFE));

        // Not enabled yet: access is still allowed.
        let mut out = [0u8; Time::SIZE];
        assert!(dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::GET_PCPS_TIME,
            &[],
            &mut out
        )
        .is_ok());

        cyclic::enable(&fix.dev, 0).unwrap();
        let before = fix.card.command_count();
        let rc = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::GET_PCPS_TIME,
            &[],
            &mut out,
        );
        assert_eq!(rc, Err(DriverError::Busy));
        // No bus cycles may have been issued.
        assert_eq!(fix.card.command_count(), before);
    }

    #[test]
    fn test_feature_gated_request() {
        // PCI511 is a long-wave card without PTP.
        let fix = mock::asic_fixture(mock::model::ClockModel::pci511());
        let mut out = [0u8; codes::SIZE_PTP_CFG];
        let rc = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::GET_PTP_CFG,
            &[],
            &mut out,
        );
        assert_eq!(rc, Err(DriverError::NotSupportedByDevice));
    }

    #[test]
    fn test_generic_read() {
        let fix = fixture();
        let mut input = [0u8; codes::SIZE_GENERIC_REQ];
        input[0..4].copy_from_slice(&(cmd::GIVE_TIME as u32).to_le_bytes());
        input[8..12].copy_from_slice(&(Time::SIZE as u32).to_le_bytes());
        let mut out = [0u8; Time::SIZE];
        let n = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            codes::PCPS_GENERIC_READ,
            &input,
            &mut out,
        )
        .unwrap();
        assert_eq!(n, Time::SIZE);
        assert_eq!(Time::from_wire(&out).hour, 23);
    }

    #[test]
    fn test_unknown_code() {
        let fix = fixture();
        let rc = dispatch(
            &fix.ctx,
            &fix.dev,
            &Caller::default(),
            0xDEAD_BEEF,
            &[],
            &mut [],
        );
        assert_eq!(rc, Err(DriverError::InvalidParameter));
    }
}
