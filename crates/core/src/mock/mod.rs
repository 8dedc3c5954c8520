// Mock hardware for isolated testing
//
// Register- and endpoint-level device models that exercise the real
// transport, probe and dispatch code without hardware.

pub mod amcc_card;
pub mod asic_card;
pub mod model;
pub mod usb_device;

pub use amcc_card::{MockS5920Card, MockS5933Card};
pub use asic_card::{MockAsicCard, MockBridge};
pub use model::ClockModel;
pub use usb_device::MockUsbClock;

use crate::device::{Device, ProbeBus, ResourceRange};
use crate::hal::mock_host::MockHost;
use crate::probe::{self, ProbeOptions, ProbeResources};
use crate::registry::DriverContext;
use alloc::sync::Arc;

/// A probed PCI/PCIe card fixture
pub struct AsicFixture {
    pub ctx: Arc<DriverContext>,
    pub host: Arc<MockHost>,
    pub card: Arc<MockAsicCard>,
    pub bridge: Option<Arc<MockBridge>>,
    pub dev: Arc<Device>,
    pub minor: usize,
}

/// Probe one mock card through the full attach path
pub fn asic_fixture(model: ClockModel) -> AsicFixture {
    let host = Arc::new(MockHost::new());
    let ctx = Arc::new(DriverContext::new(host.clone()));
    let (card, bridge, dev, minor) = attach_card(&ctx, model);
    AsicFixture {
        ctx,
        host,
        card,
        bridge,
        dev,
        minor,
    }
}

/// Attach an additional mock card to an existing context
pub fn attach_card(
    ctx: &Arc<DriverContext>,
    model: ClockModel,
) -> (Arc<MockAsicCard>, Option<Arc<MockBridge>>, Arc<Device>, usize) {
    let type_info = *crate::device::device_type_by_num(model.type_num);
    let dev_id = model.dev_id;
    let card = MockAsicCard::new(model);

    let mut rsrc = ProbeResources::new();
    let mut bridge = None;

    match type_info.bus {
        crate::device::BusKind::PciPex8311 => {
            // Range 0 is the bridge config window, range 1 the data
            // registers; the probe swaps them.
            let b = MockBridge::new();
            b.set_ready(true);
            let _ = rsrc.ports.push(ResourceRange {
                base_raw: 0xC000,
                len: 0x80,
                regs: b.clone(),
            });
            let _ = rsrc.ports.push(ResourceRange {
                base_raw: 0xD000,
                len: 0x40,
                regs: card.clone(),
            });
            bridge = Some(b);
        }
        crate::device::BusKind::PciMbgpex => {
            let _ = rsrc.ports.push(ResourceRange {
                base_raw: 0xD000,
                len: 0x40,
                regs: card.clone(),
            });
            let _ = rsrc.mems.push(ResourceRange {
                base_raw: 0xF000_0000,
                len: 0x1000,
                regs: card.clone(),
            });
        }
        _ => {
            let _ = rsrc.ports.push(ResourceRange {
                base_raw: 0xD000,
                len: 0x40,
                regs: card.clone(),
            });
        }
    }
    rsrc.irq = Some(10);

    let (dev, minor) = probe::attach(ctx, ProbeBus::Pci, dev_id, rsrc, ProbeOptions::default())
        .expect("mock card probe succeeds");
    (card, bridge, dev, minor)
}

/// A probed USB device fixture
pub struct UsbFixture {
    pub ctx: Arc<DriverContext>,
    pub host: Arc<MockHost>,
    pub pipes: Arc<MockUsbClock>,
    pub dev: Arc<Device>,
    pub minor: usize,
}

pub fn usb_fixture(model: ClockModel) -> UsbFixture {
    let host = Arc::new(MockHost::new());
    let ctx = Arc::new(DriverContext::new(host.clone()));
    let dev_id = model.dev_id;
    let pipes = MockUsbClock::new(model);

    let mut rsrc = ProbeResources::new();
    rsrc.usb = Some(pipes.clone());

    let (dev, minor) = probe::attach(&ctx, ProbeBus::Usb, dev_id, rsrc, ProbeOptions::default())
        .expect("mock USB probe succeeds");

    UsbFixture {
        ctx,
        host,
        pipes,
        dev,
        minor,
    }
}

/// Re-attach a replugged USB device to an existing context
pub fn usb_replug(
    ctx: &Arc<DriverContext>,
    pipes: &Arc<MockUsbClock>,
) -> crate::error::DriverResult<(Arc<Device>, usize)> {
    pipes.replug();
    let dev_id = pipes.with_model(|m| m.dev_id);
    let mut rsrc = ProbeResources::new();
    rsrc.usb = Some(pipes.clone());
    probe::attach(ctx, ProbeBus::Usb, dev_id, rsrc, ProbeOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{IrqState, TypeNum};
    use crate::features::PcpsFeatures;

    #[test]
    fn test_gps180pex_probe_features() {
        // GPS180PEX with firmware 0x210 and receiver info bits 13
        // (time scale) and 15 (PTP) set.
        let fix = asic_fixture(ClockModel::gps180pex());
        let cfg = fix.dev.cfg.read();
        assert_eq!(cfg.type_info.num, TypeNum::Gps180pex);
        assert_eq!(cfg.fw_rev, 0x0210);
        assert!(cfg.features.contains(PcpsFeatures::HAS_TIME_SCALE));
        assert!(cfg.features.contains(PcpsFeatures::HAS_UTC_PARM));
        assert!(cfg.features.contains(PcpsFeatures::HAS_PTP));
        assert!(cfg.features.contains(PcpsFeatures::HAS_LAN_INTF));
        assert!(cfg.features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP));
        assert_eq!(cfg.sernum.as_str(), "029511016290");
        // The extended feature bitset advertises the TLV API, so the
        // TLV record must have been read as well.
        assert!(cfg.xfeatures.has_bit(crate::types::XFeatures::TLV_API));
        assert!(cfg.tlv_info.has_feat(crate::types::TlvInfo::FEAT_FW_UPDATE));
    }

    #[test]
    fn test_pci511_firmware_gate() {
        // PCI511 v1.02 is below the 0x103 threshold for HR time.
        let fix = asic_fixture(ClockModel::pci511());
        let cfg = fix.dev.cfg.read();
        assert!(!cfg.features.contains(PcpsFeatures::HAS_HR_TIME));
        assert!(!cfg.features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP));

        // Same card with newer firmware gains the feature.
        let mut newer = ClockModel::pci511();
        newer.fw_id = "PCI511 v1.04".into();
        let fix = asic_fixture(newer);
        assert!(fix
            .dev
            .cfg
            .read()
            .features
            .contains(PcpsFeatures::HAS_HR_TIME));
    }

    #[test]
    fn test_pex511_irq_unsafe_detected() {
        let fix = asic_fixture(ClockModel::pex511_old_firmware());
        assert!(fix.dev.irq_state().contains(IrqState::UNSAFE));
        // The acknowledge register is neutralized on unsafe devices.
        assert!(fix.dev.cfg.read().irq_regs.ack.is_none());
    }

    #[test]
    fn test_usb_probe_selects_endpoints() {
        let fix = usb_fixture(ClockModel::dcf600usb());
        let cfg = fix.dev.cfg.read();
        assert_eq!(cfg.type_info.num, TypeNum::Dcf600usb);
        assert!(cfg.features.contains(PcpsFeatures::HAS_RECEIVER_INFO));
        let io = fix.dev.io.lock();
        let usb = io.usb.as_ref().unwrap();
        assert_eq!(usb.ep_host_in.addr, usb_device::EP_HOST_IN);
        assert_eq!(usb.ep_cyclic_in.addr, usb_device::EP_CYCLIC_IN);
    }

    #[test]
    fn test_usb_with_too_few_endpoints_rejected() {
        let host = Arc::new(MockHost::new());
        let ctx = Arc::new(DriverContext::new(host));
        let model = ClockModel::dcf600usb();
        let dev_id = model.dev_id;
        let pipes = MockUsbClock::new(model);
        pipes.set_full_endpoints(false);

        let mut rsrc = ProbeResources::new();
        rsrc.usb = Some(pipes);
        let rc = probe::attach(&ctx, ProbeBus::Usb, dev_id, rsrc, ProbeOptions::default());
        assert!(rc.is_err());
        assert_eq!(ctx.device_count(), 0);
    }
}
