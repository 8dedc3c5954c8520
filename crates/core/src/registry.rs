//! Device registry
//!
//! One [`DriverContext`] exists per driver instance and owns the fixed
//! table mapping minor numbers to device descriptors, plus the two
//! driver-wide default devices (fast timestamp and user capture).
//! Removal only clears the slot; the descriptor itself stays alive
//! through its remaining `Arc` references until the last open handle is
//! released, which is what makes unplug-while-open safe.

use crate::device::{Device, ProbeBus};
use crate::error::{DriverError, DriverResult};
use crate::features::PcpsFeatures;
use crate::hal::HostOs;
use alloc::sync::Arc;
use spin::Mutex;

/// Default capacity of the device table
pub const MAX_DEVICES: usize = 20;

pub struct DriverContext {
    host: Arc<dyn HostOs>,
    slots: Mutex<[Option<Arc<Device>>; MAX_DEVICES]>,
    default_tstamp_dev: Mutex<Option<Arc<Device>>>,
    default_ucap_dev: Mutex<Option<Arc<Device>>>,
}

impl DriverContext {
    pub fn new(host: Arc<dyn HostOs>) -> Self {
        Self {
            host,
            slots: Mutex::new([const { None }; MAX_DEVICES]),
            default_tstamp_dev: Mutex::new(None),
            default_ucap_dev: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<dyn HostOs> {
        &self.host
    }

    /// Register a probed device; returns its minor number
    pub fn add(&self, dev: Arc<Device>) -> DriverResult<usize> {
        let mut slots = self.slots.lock();
        let idx = slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(DriverError::NoMemory)?;
        slots[idx] = Some(dev.clone());
        drop(slots);

        let features = dev.cfg.read().features;

        if features.contains(PcpsFeatures::HAS_FAST_HR_TSTAMP) {
            let mut d = self.default_tstamp_dev.lock();
            if d.is_none() {
                log::info!(
                    "registry: {} {} is the default device for fast timestamps",
                    dev.name(),
                    dev.sernum()
                );
                *d = Some(dev.clone());
            }
        }

        if features.contains(PcpsFeatures::HAS_UCAP) {
            let mut d = self.default_ucap_dev.lock();
            if d.is_none() {
                log::info!(
                    "registry: {} {} is the default device for capture events",
                    dev.name(),
                    dev.sernum()
                );
                *d = Some(dev.clone());
            }
        }

        Ok(idx)
    }

    /// Clear the table slot of a device. Safe while opens remain; the
    /// descriptor lingers until its last reference is dropped.
    pub fn remove(&self, dev: &Arc<Device>) {
        {
            let mut d = self.default_tstamp_dev.lock();
            if d.as_ref().is_some_and(|c| Arc::ptr_eq(c, dev)) {
                *d = None;
            }
        }
        {
            let mut d = self.default_ucap_dev.lock();
            if d.as_ref().is_some_and(|c| Arc::ptr_eq(c, dev)) {
                *d = None;
            }
        }

        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, dev)) {
                *slot = None;
                return;
            }
        }
    }

    pub fn find_by_minor(&self, minor: usize) -> Option<Arc<Device>> {
        self.slots.lock().get(minor)?.clone()
    }

    /// Minor number of a registered device
    pub fn minor_of(&self, dev: &Arc<Device>) -> Option<usize> {
        self.slots
            .lock()
            .iter()
            .position(|s| s.as_ref().is_some_and(|c| Arc::ptr_eq(c, dev)))
    }

    /// Locate an existing descriptor by bus kind, device id and serial
    /// number; used to re-attach a replugged USB device to a descriptor
    /// that is still held open.
    pub fn find_by_identity(
        &self,
        bus: ProbeBus,
        dev_id: u16,
        serial: &str,
    ) -> Option<Arc<Device>> {
        let slots = self.slots.lock();
        for dev in slots.iter().flatten() {
            let cfg = dev.cfg.read();
            let matches_bus = match bus {
                ProbeBus::Isa => cfg.type_info.bus.is_isa(),
                ProbeBus::Pci => cfg.type_info.bus.is_pci(),
                ProbeBus::Usb => cfg.type_info.bus.is_usb(),
            };
            if matches_bus && cfg.type_info.dev_id == dev_id && cfg.sernum.as_str() == serial {
                return Some(dev.clone());
            }
        }
        None
    }

    pub fn device_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    pub fn default_fast_timestamp_device(&self) -> Option<Arc<Device>> {
        self.default_tstamp_dev.lock().clone()
    }

    pub fn default_ucap_device(&self) -> Option<Arc<Device>> {
        self.default_ucap_dev.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{device_type_by_num, TypeNum};
    use crate::hal::mock_host::MockHost;

    fn ctx() -> DriverContext {
        DriverContext::new(Arc::new(MockHost::new()))
    }

    fn bare_device(ctx: &DriverContext, num: TypeNum) -> Arc<Device> {
        Arc::new(Device::new(ctx.host().clone(), *device_type_by_num(num)))
    }

    #[test]
    fn test_add_assigns_first_free_minor() {
        let ctx = ctx();
        let a = bare_device(&ctx, TypeNum::Gps180pex);
        let b = bare_device(&ctx, TypeNum::Pci511);
        assert_eq!(ctx.add(a.clone()).unwrap(), 0);
        assert_eq!(ctx.add(b.clone()).unwrap(), 1);
        ctx.remove(&a);
        let c = bare_device(&ctx, TypeNum::Tcr511pex);
        assert_eq!(ctx.add(c).unwrap(), 0);
        assert_eq!(ctx.device_count(), 2);
    }

    #[test]
    fn test_registry_full() {
        let ctx = ctx();
        for _ in 0..MAX_DEVICES {
            ctx.add(bare_device(&ctx, TypeNum::Pci511)).unwrap();
        }
        assert_eq!(
            ctx.add(bare_device(&ctx, TypeNum::Pci511)),
            Err(DriverError::NoMemory)
        );
    }

    #[test]
    fn test_descriptor_survives_removal() {
        let ctx = ctx();
        let dev = bare_device(&ctx, TypeNum::Gps180pex);
        ctx.add(dev.clone()).unwrap();
        ctx.remove(&dev);
        assert!(ctx.find_by_minor(0).is_none());
        // The caller's reference keeps the descriptor alive.
        assert_eq!(dev.name(), "GPS180PEX");
    }
}
