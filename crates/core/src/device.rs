//! Device model: supported hardware table and the per-device descriptor
//!
//! A [`Device`] is created by the probe engine and lives until the last
//! open handle is released. All mutable state is split across a small
//! number of locks with fixed roles:
//!
//! - `io` — the transaction mutex; every hardware command/response
//!   sequence runs with this held (see [`crate::transaction`]).
//! - `cyclic` — rendezvous between the cyclic event source and readers.
//! - `tstamp` — the memory-mapped timestamp register pair.
//! - `cfg` — probe-derived configuration; written during (re-)probe,
//!   read everywhere else.

use crate::error::{DriverError, DriverResult};
use crate::features::{BuiltinFeatures, PcpsFeatures};
use crate::hal::{EndpointDesc, HostOs, RegIo, UsbIo};
use crate::transport::Transport;
use crate::types::{ReceiverInfo, Time, TlvInfo, XFeatures, FW_ID_SIZE, SERNUM_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use spin::{Mutex, RwLock};

/// PCI vendor ID of the supported clock cards
pub const PCI_VENDOR_ID: u16 = 0x1360;

/// USB vendor ID of the supported clock devices
pub const USB_VENDOR_ID: u16 = 0x1938;

/// Reference time source class of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RefClass {
    None = 0,
    /// DCF77 long wave signal (Germany)
    Dcf = 1,
    /// GPS / GNSS satellite system
    Gps = 2,
    /// IRIG or similar time code
    Irig = 3,
    /// MSF long wave signal (UK)
    Msf = 4,
    /// PTP/IEEE1588 network protocol
    Ptp = 5,
    /// Free running clock
    Frc = 6,
    /// WWVB long wave signal (U.S.)
    Wwvb = 7,
    /// JJY long wave signal (Japan)
    Jjy = 8,
}

pub const N_REF_CLASSES: u16 = 9;

impl RefClass {
    pub fn from_num(n: u16) -> Option<Self> {
        match n {
            0 => Some(Self::None),
            1 => Some(Self::Dcf),
            2 => Some(Self::Gps),
            3 => Some(Self::Irig),
            4 => Some(Self::Msf),
            5 => Some(Self::Ptp),
            6 => Some(Self::Frc),
            7 => Some(Self::Wwvb),
            8 => Some(Self::Jjy),
            _ => None,
        }
    }
}

/// Bus attachment of a device model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Isa,
    Mca,
    /// PCI via AMCC S5933 interface chip
    PciS5933,
    /// PCI via AMCC S5920 interface chip
    PciS5920,
    /// PCI via the vendor interface ASIC, port I/O only
    PciAsic,
    /// PCIe via a PEX8311 PCIe-to-PCI bridge in front of the ASIC
    PciPex8311,
    /// PCIe with the ASIC integrated, memory mapped
    PciMbgpex,
    /// USB 1.1 generation
    Usb,
    /// USB 2.0 generation
    UsbV2,
}

impl BusKind {
    pub fn is_pci(&self) -> bool {
        matches!(
            self,
            Self::PciS5933 | Self::PciS5920 | Self::PciAsic | Self::PciPex8311 | Self::PciMbgpex
        )
    }

    pub fn is_usb(&self) -> bool {
        matches!(self, Self::Usb | Self::UsbV2)
    }

    pub fn is_isa(&self) -> bool {
        matches!(self, Self::Isa | Self::Mca)
    }

    /// Buses whose interface logic exposes the ASIC register block
    pub fn has_asic(&self) -> bool {
        matches!(self, Self::PciAsic | Self::PciPex8311 | Self::PciMbgpex)
    }
}

/// Bus class used by the plug-and-play collaborator when handing us a
/// candidate device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBus {
    Isa,
    Pci,
    Usb,
}

impl BusKind {
    fn matches(&self, probe: ProbeBus) -> bool {
        match probe {
            ProbeBus::Isa => self.is_isa(),
            ProbeBus::Pci => self.is_pci(),
            ProbeBus::Usb => self.is_usb(),
        }
    }
}

/// Symbolic device model numbers, in the order of [`DEVICE_TYPES`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeNum {
    Pc31,
    Ps31Old,
    Ps31,
    Pc32,
    Pci32,
    Gps167pc,
    Gps167pci,
    Pci509,
    Gps168pci,
    Pci510,
    Gps169pci,
    Tcr510pci,
    Tcr167pci,
    Gps170pci,
    Pci511,
    Tcr511pci,
    Pex511,
    Tcr511pex,
    Gps170pex,
    Usb5131,
    Tcr51usb,
    Msf51usb,
    Ptp270pex,
    Frc511pex,
    Tcr170pex,
    Wwvb51usb,
    Gps180pex,
    Tcr180pex,
    Dcf600usb,
    Pzf180pex,
    Tcr600usb,
    Msf600usb,
    Wvb600usb,
    Gln180pex,
    Gps180amc,
    Gns181pex,
    Tcr180usb,
}

/// One row of the supported-hardware table
#[derive(Debug, Clone, Copy)]
pub struct DeviceType {
    pub num: TypeNum,
    pub name: &'static str,
    /// 16 bit device id; high byte encodes the reference class for PCI
    pub dev_id: u16,
    pub ref_class: RefClass,
    pub bus: BusKind,
}

const fn pci_id(ref_class: RefClass, idx: u8) -> u16 {
    ((ref_class as u16) << 8) | idx as u16
}

// USB product ids group devices by an internal class code in the high byte.
const USB_CLASS_DCF: u16 = 0x02;
const USB_CLASS_TCR: u16 = 0x04;
const USB_CLASS_MSF: u16 = 0x05;
const USB_CLASS_WWVB: u16 = 0x06;

const fn usb_id(class: u16, idx: u8) -> u16 {
    (class << 8) | idx as u16
}

/// 16 bit signature word of ISA cards carrying the PC32 model id
pub const ISA_ID_PC32: u16 = pci_id(RefClass::Dcf, 0x32);

/// The supported-hardware table.
///
/// Exported so the host's plug-and-play layer can build its match tables
/// from it.
pub static DEVICE_TYPES: &[DeviceType] = &[
    DeviceType { num: TypeNum::Pc31,      name: "PC31",      dev_id: 0,                              ref_class: RefClass::Dcf,  bus: BusKind::Isa },
    DeviceType { num: TypeNum::Ps31Old,   name: "PS31",      dev_id: 0x6ABB,                         ref_class: RefClass::Dcf,  bus: BusKind::Mca },
    DeviceType { num: TypeNum::Ps31,      name: "PS31",      dev_id: 0x6ABB,                         ref_class: RefClass::Dcf,  bus: BusKind::Mca },
    DeviceType { num: TypeNum::Pc32,      name: "PC32",      dev_id: ISA_ID_PC32,                    ref_class: RefClass::Dcf,  bus: BusKind::Isa },
    DeviceType { num: TypeNum::Pci32,     name: "PCI32",     dev_id: pci_id(RefClass::Dcf, 0x01),    ref_class: RefClass::Dcf,  bus: BusKind::PciS5933 },
    DeviceType { num: TypeNum::Gps167pc,  name: "GPS167PC",  dev_id: 0,                              ref_class: RefClass::Gps,  bus: BusKind::Isa },
    DeviceType { num: TypeNum::Gps167pci, name: "GPS167PCI", dev_id: pci_id(RefClass::Gps, 0x01),    ref_class: RefClass::Gps,  bus: BusKind::PciS5933 },
    DeviceType { num: TypeNum::Pci509,    name: "PCI509",    dev_id: pci_id(RefClass::Dcf, 0x02),    ref_class: RefClass::Dcf,  bus: BusKind::PciS5920 },
    DeviceType { num: TypeNum::Gps168pci, name: "GPS168PCI", dev_id: pci_id(RefClass::Gps, 0x02),    ref_class: RefClass::Gps,  bus: BusKind::PciS5920 },
    DeviceType { num: TypeNum::Pci510,    name: "PCI510",    dev_id: pci_id(RefClass::Dcf, 0x03),    ref_class: RefClass::Dcf,  bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Gps169pci, name: "GPS169PCI", dev_id: pci_id(RefClass::Gps, 0x03),    ref_class: RefClass::Gps,  bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Tcr510pci, name: "TCR510PCI", dev_id: pci_id(RefClass::Irig, 0x01),   ref_class: RefClass::Irig, bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Tcr167pci, name: "TCR167PCI", dev_id: pci_id(RefClass::Irig, 0x02),   ref_class: RefClass::Irig, bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Gps170pci, name: "GPS170PCI", dev_id: pci_id(RefClass::Gps, 0x04),    ref_class: RefClass::Gps,  bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Pci511,    name: "PCI511",    dev_id: pci_id(RefClass::Dcf, 0x04),    ref_class: RefClass::Dcf,  bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Tcr511pci, name: "TCR511PCI", dev_id: pci_id(RefClass::Irig, 0x03),   ref_class: RefClass::Irig, bus: BusKind::PciAsic },
    DeviceType { num: TypeNum::Pex511,    name: "PEX511",    dev_id: pci_id(RefClass::Dcf, 0x05),    ref_class: RefClass::Dcf,  bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Tcr511pex, name: "TCR511PEX", dev_id: pci_id(RefClass::Irig, 0x04),   ref_class: RefClass::Irig, bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Gps170pex, name: "GPS170PEX", dev_id: pci_id(RefClass::Gps, 0x05),    ref_class: RefClass::Gps,  bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Usb5131,   name: "USB5131",   dev_id: usb_id(USB_CLASS_DCF, 0x01),    ref_class: RefClass::Dcf,  bus: BusKind::Usb },
    DeviceType { num: TypeNum::Tcr51usb,  name: "TCR51USB",  dev_id: usb_id(USB_CLASS_TCR, 0x01),    ref_class: RefClass::Irig, bus: BusKind::Usb },
    DeviceType { num: TypeNum::Msf51usb,  name: "MSF51USB",  dev_id: usb_id(USB_CLASS_MSF, 0x01),    ref_class: RefClass::Msf,  bus: BusKind::Usb },
    DeviceType { num: TypeNum::Ptp270pex, name: "PTP270PEX", dev_id: pci_id(RefClass::Ptp, 0x01),    ref_class: RefClass::Ptp,  bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Frc511pex, name: "FRC511PEX", dev_id: pci_id(RefClass::Frc, 0x01),    ref_class: RefClass::Frc,  bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Tcr170pex, name: "TCR170PEX", dev_id: pci_id(RefClass::Irig, 0x05),   ref_class: RefClass::Irig, bus: BusKind::PciPex8311 },
    DeviceType { num: TypeNum::Wwvb51usb, name: "WWVB51USB", dev_id: usb_id(USB_CLASS_WWVB, 0x01),   ref_class: RefClass::Wwvb, bus: BusKind::Usb },
    DeviceType { num: TypeNum::Gps180pex, name: "GPS180PEX", dev_id: pci_id(RefClass::Gps, 0x06),    ref_class: RefClass::Gps,  bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Tcr180pex, name: "TCR180PEX", dev_id: pci_id(RefClass::Irig, 0x06),   ref_class: RefClass::Irig, bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Dcf600usb, name: "DCF600USB", dev_id: usb_id(USB_CLASS_DCF, 0x02),    ref_class: RefClass::Dcf,  bus: BusKind::UsbV2 },
    DeviceType { num: TypeNum::Pzf180pex, name: "PZF180PEX", dev_id: pci_id(RefClass::Dcf, 0x06),    ref_class: RefClass::Dcf,  bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Tcr600usb, name: "TCR600USB", dev_id: usb_id(USB_CLASS_TCR, 0x02),    ref_class: RefClass::Irig, bus: BusKind::UsbV2 },
    DeviceType { num: TypeNum::Msf600usb, name: "MSF600USB", dev_id: usb_id(USB_CLASS_MSF, 0x02),    ref_class: RefClass::Msf,  bus: BusKind::UsbV2 },
    DeviceType { num: TypeNum::Wvb600usb, name: "WVB600USB", dev_id: usb_id(USB_CLASS_WWVB, 0x02),   ref_class: RefClass::Wwvb, bus: BusKind::UsbV2 },
    DeviceType { num: TypeNum::Gln180pex, name: "GLN180PEX", dev_id: pci_id(RefClass::Gps, 0x07),    ref_class: RefClass::Gps,  bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Gps180amc, name: "GPS180AMC", dev_id: pci_id(RefClass::Gps, 0x08),    ref_class: RefClass::Gps,  bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Gns181pex, name: "GNS181PEX", dev_id: pci_id(RefClass::Gps, 0x09),    ref_class: RefClass::Gps,  bus: BusKind::PciMbgpex },
    DeviceType { num: TypeNum::Tcr180usb, name: "TCR180USB", dev_id: usb_id(USB_CLASS_TCR, 0x04),    ref_class: RefClass::Irig, bus: BusKind::UsbV2 },
];

/// Look up the hardware table entry for a probed bus/device-id pair
pub fn lookup_device_type(bus: ProbeBus, dev_id: u16) -> Option<&'static DeviceType> {
    DEVICE_TYPES
        .iter()
        .find(|t| t.bus.matches(bus) && t.dev_id == dev_id)
}

/// Find a table entry by symbolic model number
pub fn device_type_by_num(num: TypeNum) -> &'static DeviceType {
    DEVICE_TYPES
        .iter()
        .find(|t| t.num == num)
        .expect("device type table covers all model numbers")
}

bitflags! {
    /// Probe error classification kept in the descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlags: u8 {
        const IO_INIT = 0x01;
        const IO_ENABLE = 0x02;
        const IO_RESOURCE_CONFLICT = 0x04;
        const MEM_RESOURCE_CONFLICT = 0x08;
        const TIMEOUT = 0x10;
        const INVALID_FW_ID = 0x20;
    }
}

bitflags! {
    /// IRQ bring-up state of the cyclic source
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqState: u8 {
        /// IRQ operation known to corrupt transactions on this hardware
        const UNSAFE = 0x01;
        /// `enable` has been called at least once
        const ENABLE_CALLED = 0x02;
        /// Cyclic source currently running
        const ENABLED = 0x04;
    }
}

/// Decoded interface ASIC/EPLD version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsicVersion {
    pub major: u8,
    pub minor: u8,
}

impl AsicVersion {
    pub fn decode(raw: u32) -> Self {
        Self {
            major: (raw & 0xFF) as u8,
            minor: ((raw >> 8) & 0xFF) as u8,
        }
    }

    pub fn at_least(&self, major: u8, minor: u8) -> bool {
        self.major > major || (self.major == major && self.minor >= minor)
    }
}

/// ASIC feature bit: device supports memory mapped I/O incl. the fast
/// timestamp register pair
pub const ASIC_FEAT_MM_IO: u32 = 0x0001;

/// One port I/O or memory range assigned by the bus
pub struct ResourceRange {
    pub base_raw: u64,
    pub len: u64,
    pub regs: Arc<dyn RegIo>,
}

/// Status register location, pre-computed at probe time so the BUSY poll
/// does not branch on the transport
#[derive(Clone)]
pub struct StatusReg {
    pub regs: Arc<dyn RegIo>,
    pub offs: u32,
}

impl StatusReg {
    pub fn read(&self) -> u8 {
        self.regs.read8(self.offs)
    }
}

/// Pre-computed IRQ control register accesses
#[derive(Clone, Default)]
pub struct IrqRegs {
    pub enable: Option<(Arc<dyn RegIo>, u32, u32)>,
    pub disable: Option<(Arc<dyn RegIo>, u32, u32)>,
    pub flag: Option<(Arc<dyn RegIo>, u32, u32)>,
    pub ack: Option<(Arc<dyn RegIo>, u32, u32)>,
}

impl IrqRegs {
    /// Check whether the device has flagged an interrupt (shared IRQ path)
    pub fn irq_pending(&self) -> bool {
        match &self.flag {
            Some((regs, offs, mask)) => regs.read32_to_cpu(*offs) & mask != 0,
            None => false,
        }
    }

    pub fn ack_irq(&self) {
        if let Some((regs, offs, mask)) = &self.ack {
            let val = regs.read32_to_cpu(*offs);
            regs.write32_from_cpu(*offs, val | mask);
        }
    }

    pub fn enable_irq(&self) {
        if let Some((regs, offs, mask)) = &self.enable {
            let val = regs.read32_to_cpu(*offs);
            regs.write32_from_cpu(*offs, val | mask);
        }
    }

    pub fn disable_irq(&self) {
        if let Some((regs, offs, mask)) = &self.disable {
            let val = regs.read32_to_cpu(*offs);
            regs.write32_from_cpu(*offs, val & !mask);
        }
    }
}

/// USB pipe state selected at probe time
pub struct UsbState {
    pub io: Arc<dyn UsbIo>,
    pub ep_host_in: EndpointDesc,
    pub ep_host_out: EndpointDesc,
    pub ep_cyclic_in: EndpointDesc,
}

/// Scratch buffer size; large enough for any single transaction the
/// dispatcher marshals through it
pub const IO_BUFFER_SIZE: usize = 512;

/// State guarded by the transaction mutex (`dev_mutex`)
pub struct DeviceIo {
    pub transport: Transport,
    pub status: Option<StatusReg>,
    pub ports: heapless::Vec<ResourceRange, 2>,
    pub mems: heapless::Vec<ResourceRange, 2>,
    pub irq_num: Option<u16>,
    pub usb: Option<UsbState>,
    /// Shared DMA-capable scratch buffer for marshalling
    pub buffer: [u8; IO_BUFFER_SIZE],
    /// Width of the length field of the large-structure transport (1 or 2)
    pub size_n_bytes: u8,
    /// CPU cycles sampled right before the last command write
    pub acc_cycles: u64,
}

impl DeviceIo {
    pub(crate) fn new() -> Self {
        Self {
            transport: Transport::Null,
            status: None,
            ports: heapless::Vec::new(),
            mems: heapless::Vec::new(),
            irq_num: None,
            usb: None,
            buffer: [0; IO_BUFFER_SIZE],
            size_n_bytes: 1,
            acc_cycles: 0,
        }
    }
}

/// Probe-derived configuration; rebuilt when a USB device is re-attached
pub struct DeviceConfig {
    pub type_info: DeviceType,
    pub bus_num: u16,
    pub slot_num: u16,
    pub fw_id: heapless::String<FW_ID_SIZE>,
    /// Packed firmware revision, e.g. 0x0270 for "v2.70"
    pub fw_rev: u16,
    pub sernum: heapless::String<SERNUM_SIZE>,
    pub asic_raw_version: u32,
    pub asic_version: AsicVersion,
    pub asic_features: u32,
    pub features: PcpsFeatures,
    pub default_builtin_features: BuiltinFeatures,
    pub real_builtin_features: BuiltinFeatures,
    pub receiver_info: ReceiverInfo,
    pub xfeatures: XFeatures,
    pub tlv_info: TlvInfo,
    pub err_flags: ErrorFlags,
    pub irq_regs: IrqRegs,
    /// USB 2.0 microframe timing detected at probe
    pub usb_20_mode: bool,
    /// Raw base/len of memory range 0, kept for mmap
    pub mem0_base_raw: u64,
    pub mem0_len: u64,
    /// Device transaction timeout
    pub timeout_us: u64,
}

impl DeviceConfig {
    pub(crate) fn new(type_info: DeviceType) -> Self {
        Self {
            type_info,
            bus_num: 0,
            slot_num: 0,
            fw_id: heapless::String::new(),
            fw_rev: 0,
            sernum: heapless::String::new(),
            asic_raw_version: 0,
            asic_version: AsicVersion::default(),
            asic_features: 0,
            features: PcpsFeatures::empty(),
            default_builtin_features: BuiltinFeatures::empty(),
            real_builtin_features: BuiltinFeatures::empty(),
            receiver_info: ReceiverInfo::default(),
            xfeatures: XFeatures::empty(),
            tlv_info: TlvInfo::empty(),
            err_flags: ErrorFlags::empty(),
            irq_regs: IrqRegs::default(),
            usb_20_mode: false,
            mem0_base_raw: 0,
            mem0_len: 0,
            timeout_us: crate::timeout::DEFAULT_TIMEOUT_US,
        }
    }
}

/// State shared between the cyclic event source and readers
#[derive(Default)]
pub struct CyclicShared {
    pub last_time: Time,
    /// Host timestamp of the last tick, for staleness detection
    pub tick_stamp_us: u64,
}

/// Callback target for asynchronous tick notification (SIGIO delivery
/// in a kernel wrapper)
pub trait TickNotify: Send + Sync {
    fn notify(&self);
}

/// The per-device descriptor
pub struct Device {
    pub(crate) host: Arc<dyn HostOs>,
    /// Probe-derived configuration; written during (re-)probe, read
    /// everywhere else
    pub cfg: RwLock<DeviceConfig>,
    pub(crate) io: Mutex<DeviceIo>,
    pub(crate) cyclic: Mutex<CyclicShared>,
    /// MMIO timestamp register pair, if the device has one
    pub(crate) tstamp: Mutex<Option<TstampRegs>>,
    pub(crate) open_count: AtomicU32,
    pub(crate) connected: AtomicBool,
    pub(crate) data_avail: AtomicBool,
    pub(crate) irq_state: AtomicU8,
    pub(crate) notifiers: Mutex<Vec<Arc<dyn TickNotify>>>,
    /// Set while the USB cyclic worker task is alive
    pub(crate) cyclic_worker_alive: AtomicBool,
    pub(crate) cyclic_worker_stop: AtomicBool,
}

/// Location of the 64 bit timestamp register pair (frac, then sec)
#[derive(Clone)]
pub struct TstampRegs {
    pub regs: Arc<dyn RegIo>,
    pub offs: u32,
}

impl Device {
    pub fn new(host: Arc<dyn HostOs>, type_info: DeviceType) -> Self {
        Self {
            host,
            cfg: RwLock::new(DeviceConfig::new(type_info)),
            io: Mutex::new(DeviceIo::new()),
            cyclic: Mutex::new(CyclicShared::default()),
            tstamp: Mutex::new(None),
            open_count: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            data_avail: AtomicBool::new(false),
            irq_state: AtomicU8::new(0),
            notifiers: Mutex::new(Vec::new()),
            cyclic_worker_alive: AtomicBool::new(false),
            cyclic_worker_stop: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &dyn HostOs {
        &*self.host
    }

    pub fn type_info(&self) -> DeviceType {
        self.cfg.read().type_info
    }

    pub fn name(&self) -> &'static str {
        self.cfg.read().type_info.name
    }

    pub fn sernum(&self) -> heapless::String<SERNUM_SIZE> {
        self.cfg.read().sernum.clone()
    }

    pub fn fw_rev(&self) -> u16 {
        self.cfg.read().fw_rev
    }

    pub fn err_flags(&self) -> ErrorFlags {
        self.cfg.read().err_flags
    }

    pub(crate) fn set_err_flags(&self, flags: ErrorFlags) {
        self.cfg.write().err_flags |= flags;
    }

    pub fn is_usb(&self) -> bool {
        self.cfg.read().type_info.bus.is_usb()
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        if !connected {
            // Wake any blocked readers so they can observe the removal.
            self.wake_waiters();
        }
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn irq_state(&self) -> IrqState {
        IrqState::from_bits_retain(self.irq_state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_irq_state(&self, set: IrqState, clear: IrqState) {
        let mut cur = self.irq_state.load(Ordering::SeqCst);
        loop {
            let new = (cur | set.bits()) & !clear.bits();
            match self.irq_state.compare_exchange(
                cur,
                new,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Hardware access is refused while IRQs are enabled on a device
    /// whose firmware/ASIC combination is known to corrupt transactions.
    pub fn check_access_safe(&self) -> DriverResult<()> {
        let state = self.irq_state();
        if state.contains(IrqState::UNSAFE | IrqState::ENABLED) {
            return Err(DriverError::Busy);
        }
        Ok(())
    }

    pub fn data_available(&self) -> bool {
        self.data_avail.load(Ordering::SeqCst)
    }

    /// True while the USB cyclic reader task is alive
    pub fn cyclic_worker_running(&self) -> bool {
        self.cyclic_worker_alive.load(Ordering::SeqCst)
    }

    /// Publish a fresh tick and wake everyone waiting for it
    pub(crate) fn publish_tick(&self, t: Time) {
        {
            let mut cyc = self.cyclic.lock();
            cyc.last_time = t;
            cyc.tick_stamp_us = self.host.timestamp_us();
        }
        self.data_avail.store(true, Ordering::SeqCst);
        self.wake_waiters();
    }

    pub(crate) fn wake_waiters(&self) {
        let notifiers = self.notifiers.lock();
        for n in notifiers.iter() {
            n.notify();
        }
    }

    pub fn add_notifier(&self, n: Arc<dyn TickNotify>) {
        self.notifiers.lock().push(n);
    }

    pub fn remove_notifiers(&self) {
        self.notifiers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_bus_and_id() {
        let t = lookup_device_type(ProbeBus::Pci, pci_id(RefClass::Gps, 0x06)).unwrap();
        assert_eq!(t.num, TypeNum::Gps180pex);
        assert_eq!(t.bus, BusKind::PciMbgpex);

        let t = lookup_device_type(ProbeBus::Usb, usb_id(USB_CLASS_DCF, 0x02)).unwrap();
        assert_eq!(t.num, TypeNum::Dcf600usb);
        assert_eq!(t.bus, BusKind::UsbV2);

        assert!(lookup_device_type(ProbeBus::Pci, 0x7777).is_none());
    }

    #[test]
    fn test_pci_id_encodes_ref_class() {
        // high byte is the reference clock class, low byte the model index
        let t = device_type_by_num(TypeNum::Tcr511pex);
        assert_eq!(t.dev_id >> 8, RefClass::Irig as u16);
        assert_eq!(t.dev_id & 0xFF, 0x04);
    }

    #[test]
    fn test_asic_version_compare() {
        let v = AsicVersion::decode(0x0000_0309);
        assert_eq!(v.major, 9);
        assert_eq!(v.minor, 3);
        assert!(v.at_least(9, 3));
        assert!(v.at_least(8, 7));
        assert!(!v.at_least(9, 4));
        assert!(!v.at_least(10, 0));
    }
}
