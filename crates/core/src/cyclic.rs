//! Cyclic once-per-second event source
//!
//! Plug-in cards raise a hardware interrupt; the handler grabs the
//! current time frame, acknowledges the chip and wakes everyone waiting
//! for a tick. USB devices can't interrupt the host, so a worker task
//! blocks on the cyclic IN endpoint and drives the same wake path.
//!
//! Readers that notice the tick stream has gone stale (no tick for
//! [`crate::timeout::CYCLIC_TIMEOUT_US`]) push the source through one
//! disable/enable cycle to recover.

use crate::device::{Device, IrqState};
use crate::error::DriverResult;
use crate::hal::{EndpointDesc, UsbIo};
use crate::timeout::{Timeout, CYCLIC_TIMEOUT_US};
use crate::transaction;
use crate::transport::usb;
use crate::types::cmd;
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

/// Enable the cyclic source.
///
/// `force == 0` is the lazy form used by `read`/`poll`: it only acts on
/// the first call. `force == 1` re-arms after a device was re-attached.
/// `force > 1` is the recovery form: the source is torn down and
/// brought up again (the kernel's IRQ bookkeeping must not see a second
/// registration, so a plain re-enable is not enough).
pub fn enable(dev: &Arc<Device>, force: u32) -> DriverResult<()> {
    if force == 0 && dev.irq_state().contains(IrqState::ENABLE_CALLED) {
        return Ok(());
    }

    if force > 1 {
        log::warn!(
            "cyclic: re-initializing cyclic events for {} {}",
            dev.name(),
            dev.sernum()
        );
    }

    if dev.irq_state().contains(IrqState::UNSAFE) {
        log::warn!(
            "cyclic: enabling IRQs for {} {} though unsafe",
            dev.name(),
            dev.sernum()
        );
    }

    dev.set_irq_state(IrqState::ENABLE_CALLED, IrqState::empty());

    // Restart the staleness clock so one timeout window passes before
    // anyone decides the source is dead again.
    dev.cyclic.lock().tick_stamp_us = dev.host().timestamp_us();

    if dev.is_usb() {
        enable_usb(dev, force)
    } else {
        enable_irq(dev, force)
    }
}

fn enable_irq(dev: &Arc<Device>, force: u32) -> DriverResult<()> {
    // Tear down first on re-enable; duplicate IRQ registration would
    // corrupt the host's handler list.
    if force > 0 && dev.irq_state().contains(IrqState::ENABLED) {
        disable(dev);
        dev.set_irq_state(IrqState::ENABLE_CALLED, IrqState::empty());
    }

    let irq_num = dev.io.lock().irq_num;
    dev.cfg.read().irq_regs.enable_irq();
    dev.set_irq_state(IrqState::ENABLED, IrqState::empty());

    log::info!(
        "cyclic: enabled IRQ {:?} for {} {} (open count {})",
        irq_num,
        dev.name(),
        dev.sernum(),
        dev.open_count()
    );
    Ok(())
}

fn enable_usb(dev: &Arc<Device>, force: u32) -> DriverResult<()> {
    let (pipes, ep) = {
        let io = dev.io.lock();
        match &io.usb {
            Some(u) => (u.io.clone(), u.ep_cyclic_in),
            None => return Err(crate::error::DriverError::NoDevice),
        }
    };

    if force > 1 {
        let _ = pipes.reset();
    }

    // One worker per device; a stale worker from before an unplug will
    // exit on its own when its pipe errors out.
    if dev
        .cyclic_worker_alive
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        dev.cyclic_worker_stop.store(false, Ordering::SeqCst);
        let worker_dev = dev.clone();
        let spawned = dev.host.spawn(
            "refclk-cyclic",
            Box::new(move || usb_cyclic_worker(worker_dev, pipes, ep)),
        );
        if let Err(e) = spawned {
            dev.cyclic_worker_alive.store(false, Ordering::SeqCst);
            log::warn!(
                "cyclic: failed to start cyclic reader for {} {}: {}",
                dev.name(),
                dev.sernum(),
                e
            );
            return Err(e);
        }
    }

    dev.set_irq_state(IrqState::ENABLED, IrqState::empty());
    transaction::write_cmd(dev, cmd::IRQ_1_SEC)?;
    log::info!(
        "cyclic: enabled cyclic USB messages for {} {}",
        dev.name(),
        dev.sernum()
    );
    Ok(())
}

/// Disable the cyclic source; a no-op when it is not running
pub fn disable(dev: &Arc<Device>) {
    if dev.irq_state().contains(IrqState::ENABLED) {
        if dev.is_usb() {
            if dev.connected() {
                let _ = transaction::write_cmd(dev, cmd::IRQ_NONE);
            }

            if dev.cyclic_worker_alive.load(Ordering::SeqCst) {
                dev.cyclic_worker_stop.store(true, Ordering::SeqCst);
                let t = Timeout::new(dev.host(), 2 * CYCLIC_TIMEOUT_US);
                if !t.wait_with_delay(
                    || !dev.cyclic_worker_alive.load(Ordering::SeqCst),
                    1_000,
                ) {
                    log::warn!(
                        "cyclic: reader for {} {} did not stop in time",
                        dev.name(),
                        dev.sernum()
                    );
                }
            }
        } else {
            dev.cfg.read().irq_regs.disable_irq();
            log::info!(
                "cyclic: disabled IRQ {:?} for {} {}",
                dev.io.lock().irq_num,
                dev.name(),
                dev.sernum()
            );
        }
    }

    dev.set_irq_state(
        IrqState::empty(),
        IrqState::ENABLED | IrqState::ENABLE_CALLED,
    );
}

/// Outcome of one interrupt delivery, mirrored to the host's IRQ return
/// value so shared lines keep working
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqResult {
    Handled,
    NotHandled,
}

/// The interrupt handler body for plug-in cards.
///
/// Wrappers register this with the host for the device's IRQ line
/// (shared for PCI, exclusive for ISA). The handler reads the current
/// time only when no foreground transaction is in flight; the
/// acknowledge is written either way.
pub fn irq_handler(dev: &Device) -> IrqResult {
    if !dev.irq_state().contains(IrqState::ENABLED) {
        return IrqResult::NotHandled;
    }

    let irq_regs = dev.cfg.read().irq_regs.clone();

    // On a shared line the chip tells us whether this device fired.
    if irq_regs.flag.is_some() && !irq_regs.irq_pending() {
        return IrqResult::NotHandled;
    }

    let mut cyc = dev.cyclic.lock();
    cyc.tick_stamp_us = dev.host.timestamp_us();

    // Skip the read when a foreground transaction holds the mutex; that
    // transaction will produce the time instead, and spinning here
    // would deadlock against the interrupted code.
    let time = match dev.io.try_lock() {
        Some(mut io) => transaction::read_time_from_irq(dev, &mut io).ok(),
        None => None,
    };

    irq_regs.ack_irq();

    if let Some(t) = time {
        cyc.last_time = t;
        drop(cyc);
        dev.data_avail.store(true, Ordering::SeqCst);
        dev.wake_waiters();
    }

    IrqResult::Handled
}

/// Worker task emulating the per-second interrupt for USB devices
fn usb_cyclic_worker(dev: Arc<Device>, pipes: Arc<dyn UsbIo>, ep: EndpointDesc) {
    log::debug!(
        "cyclic: reader for {} {} started",
        dev.name(),
        dev.sernum()
    );

    loop {
        if dev.cyclic_worker_stop.load(Ordering::SeqCst) {
            log::debug!(
                "cyclic: reader for {} {} received stop signal",
                dev.name(),
                dev.sernum()
            );
            break;
        }

        match usb::read_cyclic(&*pipes, ep) {
            Ok(t) => {
                // The rendezvous with readers happens inside
                // publish_tick, under the cyclic lock.
                dev.publish_tick(t);
            }
            Err(crate::error::DriverError::Timeout) => {
                // Normal when the device was told to stop sending, or
                // right after enabling; just retry.
                continue;
            }
            Err(e) => {
                log::warn!(
                    "cyclic: reader for {} {} terminated: {}",
                    dev.name(),
                    dev.sernum(),
                    e
                );
                dev.set_irq_state(IrqState::empty(), IrqState::ENABLED);
                break;
            }
        }
    }

    dev.cyclic_worker_alive.store(false, Ordering::SeqCst);
    log::debug!("cyclic: reader for {} {} exits", dev.name(), dev.sernum());
}

/// Staleness recovery used by blocking readers and pollers: if no tick
/// arrived within the cyclic timeout, push the source through one
/// disable/enable cycle.
pub fn check_staleness(dev: &Arc<Device>) {
    let now = dev.host().timestamp_us();
    let at_tick = dev.cyclic.lock().tick_stamp_us;
    let delta = now.saturating_sub(at_tick);

    if delta > CYCLIC_TIMEOUT_US {
        log::warn!(
            "cyclic: timeout on {} {}: {} us since last tick",
            dev.name(),
            dev.sernum(),
            delta
        );
        let _ = enable(dev, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock;
    use crate::types::TimeStatus;

    #[test]
    fn test_enable_is_idempotent() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        enable(&fix.dev, 0).unwrap();
        assert_eq!(fix.card.irq_enable_writes(), 1);
        enable(&fix.dev, 0).unwrap();
        // The second lazy enable must not touch the chip again.
        assert_eq!(fix.card.irq_enable_writes(), 1);
        assert!(fix.dev.irq_state().contains(IrqState::ENABLED));
    }

    #[test]
    fn test_disable_twice_is_noop() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        enable(&fix.dev, 0).unwrap();
        disable(&fix.dev);
        assert!(!fix.dev.irq_state().contains(IrqState::ENABLED));
        let disables = fix.card.irq_disable_writes();
        disable(&fix.dev);
        assert_eq!(fix.card.irq_disable_writes(), disables);
    }

    #[test]
    fn test_irq_handler_publishes_tick() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        enable(&fix.dev, 0).unwrap();
        fix.card.raise_irq();
        assert_eq!(irq_handler(&fix.dev), IrqResult::Handled);
        assert!(fix.dev.data_available());
        let cyc = fix.dev.cyclic.lock();
        assert!(cyc.last_time.status.contains(TimeStatus::SYNCD));
        assert!(fix.card.irq_acked());
    }

    #[test]
    fn test_irq_handler_ignores_foreign_interrupt() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        enable(&fix.dev, 0).unwrap();
        // No pending flag raised: some other device on the shared line.
        assert_eq!(irq_handler(&fix.dev), IrqResult::NotHandled);
        assert!(!fix.dev.data_available());
    }

    #[test]
    fn test_irq_handler_skips_read_during_foreground_access() {
        let fix = mock::asic_fixture(mock::model::ClockModel::gps180pex());
        enable(&fix.dev, 0).unwrap();
        fix.card.raise_irq();
        let _io = fix.dev.io.try_lock().unwrap();
        assert_eq!(irq_handler(&fix.dev), IrqResult::Handled);
        // ACKed, but no data published.
        assert!(fix.card.irq_acked());
        assert!(!fix.dev.data_available());
    }
}
