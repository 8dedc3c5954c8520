//! USB hot plug/unplug scenarios
//!
//! A USB receiver may disappear while an application holds its device
//! node open. The descriptor must survive, blocked readers must wake
//! with an error, and a replug with the same identity must resurrect
//! the very same descriptor so the open handle keeps working.

use refclk_core::chardev::{self, NoInterrupt};
use refclk_core::error::DriverError;
use refclk_core::mock::{self, model::default_time, ClockModel};
use refclk_testing::{init_logging, wait_for};
use std::sync::Arc;

#[test]
fn unplug_while_open_keeps_descriptor() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();
    assert_eq!(fix.dev.open_count(), 1);

    // First read arms the cyclic source lazily; feed it one tick.
    fix.pipes.push_tick(default_time());
    let mut buf = [0u8; 64];
    let n = handle.read(&mut buf, false, &NoInterrupt).unwrap();
    assert_eq!(n, 32);
    assert_eq!(buf[0], 0x02);
    assert_eq!(buf[31], 0x03);
    assert!(fix.pipes.cyclic_enabled());

    // Pull the cable.
    fix.pipes.unplug();
    refclk_core::probe::detach(&fix.ctx, &fix.dev);

    assert!(!fix.dev.connected());
    assert_eq!(fix.dev.open_count(), 1);
    // The slot stays occupied for a possible replug.
    assert!(fix.ctx.find_by_minor(fix.minor).is_some());

    // A blocking read on the unplugged device fails immediately.
    assert_eq!(
        handle.read(&mut buf, false, &NoInterrupt),
        Err(DriverError::Interrupted)
    );

    drop(handle);
    // Last close of a disconnected device finally unregisters it.
    assert!(fix.ctx.find_by_minor(fix.minor).is_none());
}

#[test]
fn replug_reattaches_open_descriptor() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();
    fix.pipes.push_tick(default_time());
    let mut buf = [0u8; 64];
    handle.read(&mut buf, false, &NoInterrupt).unwrap();

    // Unplug; the cyclic worker dies on its broken pipe.
    fix.pipes.unplug();
    refclk_core::probe::detach(&fix.ctx, &fix.dev);
    assert!(wait_for(|| !fix.dev.cyclic_worker_running(), 2_000));

    // Replug with the same product id and serial number.
    let (dev2, minor2) = mock::usb_replug(&fix.ctx, &fix.pipes).unwrap();
    assert!(Arc::ptr_eq(&fix.dev, &dev2));
    assert_eq!(minor2, fix.minor);
    assert!(dev2.connected());

    // The re-attach restarted the cyclic source for the open handle.
    assert!(wait_for(|| fix.pipes.cyclic_enabled(), 2_000));

    fix.pipes.push_tick(default_time());
    let n = handle.read(&mut buf, false, &NoInterrupt).unwrap();
    assert_eq!(n, 32);

    drop(handle);
}

#[test]
fn usb_write_size_mismatch_is_byte_count() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    // A 1-byte configuration write carrying 3 bytes: the device answers
    // with the byte count it expected instead of a completion code.
    let rc = refclk_core::ioctl::dispatch(
        &fix.ctx,
        &fix.dev,
        &refclk_core::ioctl::Caller::admin(),
        refclk_core::ioctl::codes::SET_TZCODE,
        &[0x01, 0x02, 0x03],
        &mut [],
    );
    assert_eq!(rc, Err(DriverError::ByteCount));
}

#[test]
fn open_after_disconnect_is_no_device() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    fix.pipes.unplug();
    refclk_core::probe::detach(&fix.ctx, &fix.dev);

    // Nothing was open, so the device is gone entirely.
    assert_eq!(fix.ctx.device_count(), 0);
    assert!(chardev::open(&fix.ctx, fix.minor).is_err());
}

#[test]
fn reader_blocked_across_unplug_wakes_with_error() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();
    let dev = fix.dev.clone();

    let reader = std::thread::spawn(move || {
        let mut buf = [0u8; 64];
        handle.read(&mut buf, false, &NoInterrupt)
    });

    // Give the reader time to arm the cyclic source and block.
    assert!(wait_for(|| fix.pipes.cyclic_enabled(), 2_000));
    std::thread::sleep(std::time::Duration::from_millis(20));

    fix.pipes.unplug();
    refclk_core::probe::detach(&fix.ctx, &dev);

    let rc = reader.join().unwrap();
    assert_eq!(rc, Err(DriverError::Interrupted));
    // open_count dropped with the handle inside the thread.
    assert_eq!(dev.open_count(), 0);
}
