//! Device probing and capability inference
//!
//! The host's plug-and-play layer enumerates candidate hardware and
//! hands each candidate to [`attach`] together with its bus resources.
//! Probing classifies the device, selects the transport, reads firmware
//! and ASIC identification, and collapses four layers of capability
//! information into the descriptor's feature masks.
//!
//! A USB device that is re-plugged while an application still holds an
//! open handle is re-attached to its existing descriptor, located by
//! bus kind, device id and serial number.

use crate::cyclic;
use crate::device::{
    lookup_device_type, AsicVersion, BusKind, Device, DeviceType, ErrorFlags, IrqRegs, IrqState,
    ProbeBus, ResourceRange, StatusReg, TstampRegs, TypeNum, UsbState, ASIC_FEAT_MM_IO,
    ISA_ID_PC32,
};
use crate::error::{DriverError, DriverResult};
use crate::features::{
    self, check_feature, device_features, BuiltinFeatures, FeatureSet, FeatureType, PcpsFeatures,
    RI_FEATURE_MAP, N_RI_FEATURE_BITS,
};
use crate::hal::{RegIo, UsbIo};
use crate::registry::DriverContext;
use crate::transaction;
use crate::transport::{amcc, asic, plx, usb, Transport};
use crate::types::{
    cmd, gps, HrTime, ReceiverInfo, TlvInfo, XFeatures, FIFO_SIZE, MODEL_UNKNOWN, SERNUM_SIZE,
};
use alloc::sync::Arc;

/// Bus resources discovered by the plug-and-play collaborator
pub struct ProbeResources {
    pub ports: heapless::Vec<ResourceRange, 2>,
    pub mems: heapless::Vec<ResourceRange, 2>,
    pub irq: Option<u16>,
    pub usb: Option<Arc<dyn UsbIo>>,
    pub bus_num: u16,
    pub slot_num: u16,
}

impl ProbeResources {
    pub fn new() -> Self {
        Self {
            ports: heapless::Vec::new(),
            mems: heapless::Vec::new(),
            irq: None,
            usb: None,
            bus_num: 0,
            slot_num: 0,
        }
    }
}

impl Default for ProbeResources {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver-wide access overrides (module parameters in a kernel wrapper)
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeOptions {
    /// Use port I/O even where memory mapped access is available
    pub force_io_access: bool,
    /// Use the 16 bit memory window of the PEX8311 instead of port I/O
    pub force_mm16_access: bool,
}

/// Extract the packed firmware revision from an ID string: the first
/// `X.YY` digit group becomes `0xXYY`, e.g. "v2.70" -> 0x0270.
pub fn fw_rev_from_id(fw_id: &str) -> u16 {
    let b = fw_id.as_bytes();
    for i in 0..b.len() {
        if b[i] == b'.'
            && i > 0
            && b[i - 1].is_ascii_digit()
            && i + 1 < b.len()
            && b[i + 1].is_ascii_digit()
        {
            let major = (b[i - 1] - b'0') as u16;
            let minor_hi = (b[i + 1] - b'0') as u16;
            let minor_lo = if i + 2 < b.len() && b[i + 2].is_ascii_digit() {
                (b[i + 2] - b'0') as u16
            } else {
                0
            };
            return (major << 8) | (minor_hi << 4) | minor_lo;
        }
    }
    0
}

/// Strip unprintable characters and trailing space/fill characters from
/// a serial number; an empty result becomes the unknown marker.
pub fn beautify_sernum(raw: &str) -> heapless::String<SERNUM_SIZE> {
    let mut out: heapless::String<SERNUM_SIZE> = heapless::String::new();
    for c in raw.chars() {
        if (' '..='~').contains(&c) {
            let _ = out.push(c);
        }
    }
    while out.ends_with(' ') || out.ends_with('F') {
        let len = out.len();
        out.truncate(len - 1);
    }
    if out.is_empty() {
        let _ = out.push_str("????????");
    }
    out
}

fn set_fail(dev: &Device, flags: ErrorFlags, err: DriverError) -> DriverError {
    dev.set_err_flags(flags);
    err
}

/// Probe one candidate device and register it.
///
/// Returns the descriptor and its minor number. For USB devices an
/// existing descriptor with the same identity is re-used so open
/// handles survive an unplug/replug cycle.
pub fn attach(
    ctx: &DriverContext,
    bus: ProbeBus,
    dev_id: u16,
    rsrc: ProbeResources,
    opts: ProbeOptions,
) -> DriverResult<(Arc<Device>, usize)> {
    let type_info = *lookup_device_type(bus, dev_id).ok_or_else(|| {
        log::warn!("probe: unsupported device id 0x{:04X}", dev_id);
        DriverError::NoDevice
    })?;

    // A replugged USB device may still have a live descriptor.
    let mut existing = None;
    if bus == ProbeBus::Usb {
        if let Some(pipes) = rsrc.usb.as_ref() {
            if let Some(serial) = pipes.serial() {
                existing = ctx.find_by_identity(bus, dev_id, serial.as_str());
            }
        }
    }

    let reattached = existing.is_some();
    let dev =
        existing.unwrap_or_else(|| Arc::new(Device::new(ctx.host().clone(), type_info)));

    probe_device(&dev, type_info, rsrc, opts).map_err(|e| {
        dev.set_connected(false);
        e
    })?;

    dev.set_connected(true);

    let minor = if reattached {
        log::info!(
            "probe: re-attached {} {} to its open descriptor",
            dev.name(),
            dev.sernum()
        );
        // Restart the cyclic source for handles that were already open.
        if dev.open_count() > 0 {
            cyclic::enable(&dev, 1)?;
        }
        ctx.minor_of(&dev).ok_or(DriverError::NoDevice)?
    } else {
        ctx.add(dev.clone())?
    };

    if dev.irq_state().contains(IrqState::UNSAFE) {
        let cfg = dev.cfg.read();
        log::warn!(
            "probe: {} IRQ support unsafe with firmware 0x{:03X} and ASIC v{}.{}",
            cfg.type_info.name,
            cfg.fw_rev,
            cfg.asic_version.major,
            cfg.asic_version.minor
        );
    }

    Ok((dev, minor))
}

/// Handle removal of a device from the bus.
///
/// The descriptor is only unregistered when nothing holds it open;
/// otherwise it lingers, disconnected, until the last release (and a
/// matching USB replug may resurrect it first).
pub fn detach(ctx: &DriverContext, dev: &Arc<Device>) {
    dev.set_connected(false);

    if dev.open_count() == 0 {
        cyclic::disable(dev);
        ctx.remove(dev);
        log::info!("probe: removed {} {}", dev.name(), dev.sernum());
    } else {
        log::info!(
            "probe: {} {} unplugged while open, descriptor kept",
            dev.name(),
            dev.sernum()
        );
    }
}

/// Fill in a partially-initialized descriptor from the live hardware
pub fn probe_device(
    dev: &Arc<Device>,
    type_info: DeviceType,
    rsrc: ProbeResources,
    opts: ProbeOptions,
) -> DriverResult<()> {
    // Reset probe-derived state; a re-probe starts from scratch.
    {
        let mut cfg = dev.cfg.write();
        *cfg = crate::device::DeviceConfig::new(type_info);
        cfg.bus_num = rsrc.bus_num;
        cfg.slot_num = rsrc.slot_num;
    }
    dev.set_irq_state(IrqState::empty(), IrqState::UNSAFE);
    dev.set_connected(true);

    setup_transport(dev, &type_info, rsrc, opts)?;

    if type_info.num == TypeNum::Ptp270pex {
        wait_on_card_system_ready(dev);
    }

    read_firmware_id(dev)?;

    if type_info.bus.is_isa() {
        infer_isa_type(dev)?;
    }

    {
        let cfg = dev.cfg.read();
        log::info!(
            "probe: found {} at {}:{}, firmware \"{}\" (0x{:03X})",
            cfg.type_info.name,
            cfg.bus_num,
            cfg.slot_num,
            cfg.fw_id,
            cfg.fw_rev
        );
    }

    if type_info.bus.has_asic() {
        read_asic_version(dev);
    }

    apply_feature_tables(dev);
    setup_real_builtin_features(dev);

    setup_sernum_and_receiver_info(dev)?;
    check_receiver_info_and_features(dev)?;

    if type_info.bus.has_asic() {
        apply_asic_features(dev);
    }

    if type_info.bus.is_usb() {
        check_usb_timing(dev)?;
    }

    Ok(())
}

/// Select the transport strategy, pre-compute status and IRQ register
/// locations and claim the bus resources.
fn setup_transport(
    dev: &Arc<Device>,
    type_info: &DeviceType,
    mut rsrc: ProbeResources,
    opts: ProbeOptions,
) -> DriverResult<()> {
    let mut io = dev.io.lock();
    // Collected here and committed to the config in one go at the end,
    // so no other lock is ever taken under the config write lock.
    let mut irq_regs = IrqRegs::default();

    io.transport = Transport::Null;
    io.status = None;
    io.usb = None;
    io.irq_num = rsrc.irq;

    match type_info.bus {
        BusKind::Usb | BusKind::UsbV2 => {
            let pipes = rsrc.usb.take().ok_or_else(|| {
                set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
            })?;
            let eps = pipes.endpoints().map_err(|e| {
                set_fail(dev, ErrorFlags::IO_INIT, e)
            })?;
            let (ep_in, ep_out, ep_cyc) = usb::select_endpoints(&eps).map_err(|e| {
                log::warn!(
                    "probe: {} advertises {} endpoints, {} required",
                    type_info.name,
                    eps.len(),
                    usb::MIN_ENDPOINTS_REQUIRED
                );
                set_fail(dev, ErrorFlags::IO_INIT, e)
            })?;
            io.usb = Some(UsbState {
                io: pipes,
                ep_host_in: ep_in,
                ep_host_out: ep_out,
                ep_cyclic_in: ep_cyc,
            });
            io.transport = Transport::Usb;
        }

        BusKind::Isa | BusKind::Mca => {
            let port = first_range(&rsrc.ports).ok_or_else(|| {
                set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
            })?;
            io.status = Some(StatusReg {
                regs: port.clone(),
                offs: 1,
            });
            io.transport = Transport::Isa { port };
        }

        BusKind::PciS5933 => {
            let port = first_range(&rsrc.ports).ok_or_else(|| {
                set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
            })?;
            io.status = Some(StatusReg {
                regs: port.clone(),
                offs: amcc::STATUS_PORT,
            });
            irq_regs = IrqRegs {
                enable: Some((port.clone(), amcc::s5933::INTCSR, amcc::s5933::INT_ENB)),
                disable: Some((port.clone(), amcc::s5933::INTCSR, amcc::s5933::INT_MASK)),
                flag: Some((port.clone(), amcc::s5933::INTCSR, amcc::s5933::INT_FLAG)),
                ack: Some((port.clone(), amcc::s5933::INTCSR, amcc::s5933::INT_ACK)),
            };
            io.transport = Transport::S5933 { port };
        }

        BusKind::PciS5920 => {
            if rsrc.ports.len() < 2 {
                return Err(set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem));
            }
            let cmd_port = rsrc.ports[0].regs.clone();
            let data_port = rsrc.ports[1].regs.clone();
            io.status = Some(StatusReg {
                regs: cmd_port.clone(),
                offs: amcc::STATUS_PORT,
            });
            irq_regs = IrqRegs {
                enable: Some((cmd_port.clone(), amcc::s5920::INTCSR, amcc::s5920::INT_ENB)),
                disable: Some((cmd_port.clone(), amcc::s5920::INTCSR, amcc::s5920::INT_MASK)),
                flag: Some((cmd_port.clone(), amcc::s5920::INTCSR, amcc::s5920::INT_FLAG)),
                ack: Some((cmd_port.clone(), amcc::s5920::INTCSR, amcc::s5920::INT_ACK)),
            };
            io.transport = Transport::S5920 { cmd_port, data_port };
        }

        BusKind::PciAsic => {
            let port = first_range(&rsrc.ports).ok_or_else(|| {
                set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
            })?;
            io.status = Some(StatusReg {
                regs: port.clone(),
                offs: asic::STATUS_PORT,
            });
            irq_regs = IrqRegs {
                enable: Some((port.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_ENABLE)),
                disable: Some((port.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_ENABLE)),
                flag: Some((port.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_FLAG)),
                ack: Some((port.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_FLAG)),
            };
            io.transport = Transport::AsicPio { port };
        }

        BusKind::PciPex8311 => {
            // Range 0 addresses the bridge configuration registers and
            // range 1 the data registers; swap them so the data
            // registers are always found at index 0.
            if rsrc.ports.len() < 2 {
                return Err(set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem));
            }
            rsrc.ports.swap(0, 1);
            if rsrc.mems.len() >= 2 {
                rsrc.mems.swap(0, 1);
            }

            let data_port = rsrc.ports[0].regs.clone();
            let bridge = rsrc.ports[1].regs.clone();
            io.status = Some(StatusReg {
                regs: data_port.clone(),
                offs: asic::STATUS_PORT,
            });
            irq_regs = IrqRegs {
                enable: Some((bridge.clone(), plx::LCS_INTCSR, plx::INTCSR_INT_ENB)),
                disable: Some((bridge.clone(), plx::LCS_INTCSR, plx::INTCSR_INT_ENB)),
                flag: Some((bridge, plx::LCS_INTCSR, plx::INTCSR_INT_FLAG)),
                ack: Some((data_port.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_FLAG)),
            };

            if opts.force_mm16_access {
                let mem = first_range(&rsrc.mems).ok_or_else(|| {
                    set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
                })?;
                io.status = Some(StatusReg {
                    regs: mem.clone(),
                    offs: asic::STATUS_PORT,
                });
                io.transport = Transport::AsicMmio16 { mem };
            } else {
                io.transport = Transport::AsicPio { port: data_port };
            }
        }

        BusKind::PciMbgpex => {
            let mem = first_range(&rsrc.mems).ok_or_else(|| {
                set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
            })?;
            let port = first_range(&rsrc.ports);

            irq_regs = IrqRegs {
                enable: Some((mem.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_ENABLE)),
                disable: Some((mem.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_ENABLE)),
                flag: Some((mem.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_FLAG)),
                ack: Some((mem.clone(), asic::CONTROL_STATUS, asic::CTL_IRQ_FLAG)),
            };

            if opts.force_io_access {
                let port = port.ok_or_else(|| {
                    set_fail(dev, ErrorFlags::IO_INIT, DriverError::ResourceItem)
                })?;
                io.status = Some(StatusReg {
                    regs: port.clone(),
                    offs: asic::STATUS_PORT,
                });
                io.transport = Transport::AsicPio { port };
            } else {
                io.status = Some(StatusReg {
                    regs: mem.clone(),
                    offs: asic::STATUS_PORT,
                });
                io.transport = Transport::AsicMmio { mem };
            }
        }
    }

    // The timestamp register pair sits behind the ASIC block on models
    // with a memory window.
    if matches!(type_info.bus, BusKind::PciMbgpex | BusKind::PciPex8311) {
        if let Some(mem) = first_range(&rsrc.mems) {
            *dev.tstamp.lock() = Some(TstampRegs {
                regs: mem,
                offs: asic::TSTAMP_OFFS,
            });
        }
    }

    // Duplicate BARs produced by a faulty BIOS make the card unusable.
    if rsrc.ports.len() >= 2
        && rsrc.ports[0].base_raw != 0
        && rsrc.ports[0].base_raw == rsrc.ports[1].base_raw
    {
        log::warn!(
            "probe: duplicate base address 0x{:04X}, {} will not work (BIOS faulty)",
            rsrc.ports[0].base_raw,
            type_info.name
        );
        return Err(set_fail(
            dev,
            ErrorFlags::IO_RESOURCE_CONFLICT,
            DriverError::DuplicateBaseAddress,
        ));
    }

    {
        let mut cfg = dev.cfg.write();
        cfg.irq_regs = irq_regs;
        if let Some(mem0) = rsrc.mems.first() {
            cfg.mem0_base_raw = mem0.base_raw;
            cfg.mem0_len = mem0.len;
        }
    }

    io.ports = rsrc.ports;
    io.mems = rsrc.mems;

    log::debug!("probe: {} uses {}", type_info.name, io.transport.mode_name());

    Ok(())
}

fn first_range(v: &heapless::Vec<ResourceRange, 2>) -> Option<Arc<dyn RegIo>> {
    v.first().map(|r| r.regs.clone())
}

/// Cards that boot an operating system of their own must not be
/// accessed before they are ready; they flag readiness through a GPIO
/// in the bridge configuration space. Hosts without an uptime source
/// skip the bounded wait.
fn wait_on_card_system_ready(dev: &Arc<Device>) {
    let host = dev.host.clone();
    let bridge = {
        let io = dev.io.lock();
        io.ports.get(1).map(|r| r.regs.clone())
    };

    let started = host.timestamp_us();
    loop {
        if let Some(bridge) = &bridge {
            if bridge.read32_to_cpu(plx::LCS_GPIOC) & plx::GPIOC_READY != 0 {
                break;
            }
        }

        match host.uptime_secs() {
            // Without an uptime source there is no way to bound the
            // wait, so don't.
            None => break,
            Some(uptime) if uptime >= plx::MAX_BOOT_TIME_SECS => break,
            _ => host.sleep_us(1_000_000),
        }
    }

    let waited_us = host.timestamp_us().saturating_sub(started);
    if waited_us >= 1_000_000 {
        log::info!(
            "probe: waited {}.{:03} s for on-card system startup",
            waited_us / 1_000_000,
            (waited_us % 1_000_000) / 1000
        );
    }
}

/// Read the two-part firmware ID and parse the revision number
fn read_firmware_id(dev: &Arc<Device>) -> DriverResult<()> {
    let mut raw = [0u8; 2 * FIFO_SIZE];

    for (i, c) in [cmd::GIVE_FW_ID_1, cmd::GIVE_FW_ID_2].iter().enumerate() {
        let block = &mut raw[i * FIFO_SIZE..(i + 1) * FIFO_SIZE];
        transaction::read(dev, *c, block).map_err(|e| {
            let cfg = dev.cfg.read();
            if cfg.type_info.bus.is_isa() {
                // ISA cards are detected by attempting exactly this
                // read, so a timeout just means no card at this port.
                log::debug!("probe: no ISA card found at this address");
            } else {
                log::error!(
                    "probe: {}: failed to read firmware ID: {}",
                    cfg.type_info.name,
                    e
                );
            }
            drop(cfg);
            set_fail(dev, ErrorFlags::TIMEOUT, e)
        })?;
    }

    {
        let mut cfg = dev.cfg.write();
        cfg.fw_id.clear();
        for &b in raw.iter() {
            if b == 0 {
                break;
            }
            if !(0x20..0x7F).contains(&b) {
                drop(cfg);
                return Err(set_fail(
                    dev,
                    ErrorFlags::INVALID_FW_ID,
                    DriverError::UnknownFirmwareId,
                ));
            }
            let _ = cfg.fw_id.push(b as char);
        }
        cfg.fw_rev = fw_rev_from_id(cfg.fw_id.as_str());
    }
    Ok(())
}

/// ISA cards all probe alike; the concrete model is inferred from the
/// firmware ID prefix and, for the PC31/PC32 family, from the signature
/// word at `base + 2`.
fn infer_isa_type(dev: &Arc<Device>) -> DriverResult<()> {
    let fw_id = dev.cfg.read().fw_id.clone();

    let num = if fw_id.as_str().starts_with("GPS167") {
        TypeNum::Gps167pc
    } else if fw_id.as_str().contains("PC3") || fw_id.as_str().contains("PS3") {
        let sig = {
            let io = dev.io.lock();
            io.ports
                .first()
                .map(|p| p.regs.read16_to_cpu(2))
                .unwrap_or(0)
        };
        if sig == ISA_ID_PC32 {
            TypeNum::Pc32
        } else {
            TypeNum::Pc31
        }
    } else {
        return Err(set_fail(
            dev,
            ErrorFlags::INVALID_FW_ID,
            DriverError::UnknownFirmwareId,
        ));
    };

    dev.cfg.write().type_info = *crate::device::device_type_by_num(num);
    Ok(())
}

/// Read the raw interface logic version through the active transport
fn read_asic_version(dev: &Arc<Device>) {
    let raw = {
        let io = dev.io.lock();
        match &io.transport {
            Transport::AsicPio { port } => port.read32_to_cpu(asic::RAW_VERSION),
            Transport::AsicMmio { mem } | Transport::AsicMmio16 { mem } => {
                mem.read32_to_cpu(asic::RAW_VERSION)
            }
            _ => 0,
        }
    };

    let mut cfg = dev.cfg.write();
    cfg.asic_raw_version = raw;
    cfg.asic_version = AsicVersion::decode(raw);
    log::debug!(
        "probe: ASIC version v{}.{} (raw 0x{:08X})",
        cfg.asic_version.major,
        cfg.asic_version.minor,
        raw
    );
}

/// Apply the per-model base features and firmware-revision gates
fn apply_feature_tables(dev: &Arc<Device>) {
    let mut cfg = dev.cfg.write();
    let row = device_features(cfg.type_info.num);

    cfg.features = row.base;
    cfg.default_builtin_features = row.default_builtin;

    let fw_rev = cfg.fw_rev;
    for gate in row.gates {
        if fw_rev >= gate.min_fw_rev {
            cfg.features |= gate.feature;
        } else {
            log::debug!(
                "probe: {} v0x{:03X}: feature {:?} needs firmware 0x{:03X}",
                cfg.type_info.name,
                fw_rev,
                gate.feature,
                gate.min_fw_rev
            );
        }
    }

    // HR time support of the PEX511 requires both a minimum ASIC level
    // and a minimum firmware version.
    if cfg.type_info.num == TypeNum::Pex511 {
        let (maj, min) = features::PEX511_HR_TIME_ASIC;
        if cfg.asic_version.at_least(maj, min) {
            for gate in features::GATES_PEX511_HR {
                if fw_rev >= gate.min_fw_rev {
                    cfg.features |= gate.feature;
                }
            }
        }
    }

    if let Some(fix) = row.irq_fix {
        if !fix.is_safe(fw_rev, cfg.asic_version) {
            // Also neutralize the acknowledge register so a stray
            // enable can't make the handler touch the card.
            cfg.irq_regs.ack = None;
            drop(cfg);
            dev.set_irq_state(IrqState::UNSAFE, IrqState::empty());
            return;
        }
    }
}

/// Narrow the default builtin features to what the probed firmware
/// really provides
fn setup_real_builtin_features(dev: &Arc<Device>) {
    let mut cfg = dev.cfg.write();
    let mut real = cfg.default_builtin_features;

    // All satellite receivers support the time transfer record, others
    // usually don't.
    if cfg.type_info.ref_class == crate::device::RefClass::Gps {
        real |= BuiltinFeatures::TIME_TTM;
    } else {
        real &= !BuiltinFeatures::TIME_TTM;
    }

    // A few non-satellite models gained the record in a firmware update.
    for gate in features::BUILTIN_GATES {
        if gate.num == cfg.type_info.num && cfg.fw_rev >= gate.min_fw_rev {
            real |= gate.feature;
        }
    }

    // Keep the invariant default ⊇ real intact.
    cfg.default_builtin_features |= real;
    cfg.real_builtin_features = real;
}

/// Read the serial number and the receiver info record
fn setup_sernum_and_receiver_info(dev: &Arc<Device>) -> DriverResult<()> {
    let features = dev.cfg.read().features;
    let mut direct_sernum: heapless::String<SERNUM_SIZE> = heapless::String::new();

    if features.contains(PcpsFeatures::HAS_SERNUM) {
        let mut raw = [0u8; SERNUM_SIZE - 1];
        transaction::read(dev, cmd::GIVE_SERNUM, &mut raw).map_err(|e| {
            log::error!("probe: failed to read serial number: {}", e);
            e
        })?;
        for &b in raw.iter() {
            if b == 0 {
                break;
            }
            let _ = direct_sernum.push(b as char);
        }
    }

    let mut ri = ReceiverInfo::default();

    if features.contains(PcpsFeatures::HAS_RECEIVER_INFO) {
        ri = transaction::read_gps_var(dev, gps::RECEIVER_INFO).map_err(|e| {
            log::error!("probe: failed to read receiver info: {}", e);
            e
        })?;
    }

    if ri.model_code == MODEL_UNKNOWN {
        // Very old devices neither provide a receiver info record nor
        // the serial number command; synthesize defaults.
        let cfg = dev.cfg.read();
        ri.model_code = MODEL_UNKNOWN;
        ri.sw_rev = cfg.fw_rev;
        ri.n_channels = if cfg.type_info.ref_class == crate::device::RefClass::Gps {
            8
        } else {
            0
        };
        drop(cfg);

        if features.contains(PcpsFeatures::HAS_IDENT) {
            // Old satellite receivers keep the S/N inside the IDENT
            // record; only the leading digits are valid.
            let mut ident = [0u8; 16];
            transaction::read_gps(dev, gps::IDENT, &mut ident).map_err(|e| {
                log::warn!("probe: failed to read ident record: {}", e);
                e
            })?;
            for &b in ident.iter() {
                if !b.is_ascii_digit() {
                    break;
                }
                let _ = direct_sernum.push(b as char);
            }
        }
    }

    let ri_sernum = beautify_sernum(ri.sernum.as_str());
    ri.sernum = ri_sernum.clone();

    let mut sernum = beautify_sernum(direct_sernum.as_str());
    if sernum.as_str() == "????????" && ri_sernum.as_str() != "????????" {
        sernum = ri_sernum;
    }

    let mut cfg = dev.cfg.write();
    cfg.sernum = sernum;
    cfg.receiver_info = ri;
    Ok(())
}

/// Map receiver info feature bits to driver features and pull in the
/// extended feature and TLV records where supported
fn check_receiver_info_and_features(dev: &Arc<Device>) -> DriverResult<()> {
    {
        let mut cfg = dev.cfg.write();
        let ri_features = cfg.receiver_info.features;
        for bit in 0..N_RI_FEATURE_BITS {
            if ri_features & (1 << bit) != 0 {
                let mapped = RI_FEATURE_MAP[bit as usize];
                if !mapped.is_empty() {
                    cfg.features |= mapped;
                }
            }
        }

        // Special firmware builds identify themselves in the ID string.
        if cfg.fw_id.as_str().contains("CERN") {
            cfg.features |= PcpsFeatures::HAS_EVENT_TIME;
        }
    }

    let supports_xfeature = {
        let cfg = dev.cfg.read();
        let set = FeatureSet {
            real_builtin: cfg.real_builtin_features,
            ref_class: cfg.type_info.ref_class,
            pcps: cfg.features,
            ri_features: cfg.receiver_info.features,
            xfeatures: &cfg.xfeatures,
            tlv_info: &cfg.tlv_info,
        };
        check_feature(&set, FeatureType::Ri, features::ri_bits::XFEATURE)?
    };

    if supports_xfeature {
        match transaction::read_gps_var::<XFeatures>(dev, gps::XFEATURE_BUFFER) {
            Ok(x) => dev.cfg.write().xfeatures = x,
            Err(e) => {
                log::warn!("probe: failed to read extended features: {}", e);
                dev.cfg.write().xfeatures = XFeatures::empty();
            }
        }
    }

    let supports_tlv = dev
        .cfg
        .read()
        .xfeatures
        .has_bit(XFeatures::TLV_API);

    if supports_tlv {
        match transaction::read_gps_var::<TlvInfo>(dev, gps::TLV_INFO) {
            Ok(t) => dev.cfg.write().tlv_info = t,
            Err(e) => {
                log::warn!("probe: failed to read TLV info: {}", e);
                dev.cfg.write().tlv_info = TlvInfo::empty();
            }
        }
    }

    Ok(())
}

/// Read the ASIC feature word; memory mapped I/O support enables the
/// fast timestamp path
fn apply_asic_features(dev: &Arc<Device>) {
    let features = {
        let io = dev.io.lock();
        match &io.transport {
            Transport::AsicPio { port } => port.read32_to_cpu(asic::FEATURES),
            Transport::AsicMmio { mem } | Transport::AsicMmio16 { mem } => {
                mem.read32_to_cpu(asic::FEATURES)
            }
            _ => 0,
        }
    };

    let mut cfg = dev.cfg.write();
    cfg.asic_features = features;
    if features & ASIC_FEAT_MM_IO != 0 {
        cfg.features |= PcpsFeatures::HAS_FAST_HR_TSTAMP;
    } else if cfg.features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP) {
        log::warn!("probe: ASIC features don't reflect memory mapped timestamp support");
    }

    if !cfg.features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP) {
        drop(cfg);
        *dev.tstamp.lock() = None;
    }
}

/// Detect USB 2.0 microframe timing by timing a high resolution time
/// read: a round trip below one millisecond is only possible with
/// 125 us microframes.
fn check_usb_timing(dev: &Arc<Device>) -> DriverResult<()> {
    if !dev.cfg.read().features.contains(PcpsFeatures::HAS_HR_TIME) {
        return Ok(());
    }

    let (_, start_cycles) = transaction::read_var_cycles::<HrTime>(dev, cmd::GIVE_HR_TIME)
        .map_err(|e| set_fail(dev, ErrorFlags::IO_INIT, e))?;
    let end_cycles = dev.host.cycles();

    let freq = dev.host.cycles_frequency();
    if freq != 0 {
        let delta_ns = crate::hal::cycles_to_ns(end_cycles.saturating_sub(start_cycles), freq);
        let usb_20 = delta_ns < 1_000_000;
        dev.cfg.write().usb_20_mode = usb_20;
        log::info!(
            "probe: USB microframe timing{} detected ({} ns round trip)",
            if usb_20 { "" } else { " NOT" },
            delta_ns
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fw_rev_from_id() {
        assert_eq!(fw_rev_from_id("GPS180PEX v2.70 standard"), 0x0270);
        assert_eq!(fw_rev_from_id("PZF180PEX v2.06"), 0x0206);
        assert_eq!(fw_rev_from_id("TCR511PEX v1.02"), 0x0102);
        assert_eq!(fw_rev_from_id("no revision here"), 0);
    }

    #[test]
    fn test_beautify_sernum() {
        assert_eq!(beautify_sernum("029511016290  ").as_str(), "029511016290");
        assert_eq!(beautify_sernum("1234FFFF").as_str(), "1234");
        assert_eq!(beautify_sernum("\u{1}\u{2}  ").as_str(), "????????");
        assert_eq!(beautify_sernum("").as_str(), "????????");
    }
}
