//! Cyclic event source scenarios: staleness recovery, idempotence, and
//! the rendezvous between readers and the interrupt path

use refclk_core::chardev::{self, NoInterrupt, PollStatus};
use refclk_core::cyclic;
use refclk_core::mock::{self, model::default_time, ClockModel};
use refclk_core::types::cmd;
use refclk_testing::{init_logging, wait_for};

#[test]
fn stale_tick_stream_triggers_one_reenable_cycle() {
    init_logging();
    let fix = mock::asic_fixture(ClockModel::gps180pex());
    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();

    // First poll arms the source.
    assert_eq!(handle.poll(), PollStatus::NotReady);
    assert_eq!(fix.card.irq_enable_writes(), 1);

    // No tick for longer than the cyclic timeout window.
    fix.host.advance_us(3_000_000);
    assert_eq!(handle.poll(), PollStatus::NotReady);
    // Exactly one disable/enable cycle ran.
    assert_eq!(fix.card.irq_disable_writes(), 1);
    assert_eq!(fix.card.irq_enable_writes(), 2);

    // A poll inside the fresh window must not re-trigger recovery.
    assert_eq!(handle.poll(), PollStatus::NotReady);
    assert_eq!(fix.card.irq_enable_writes(), 2);
}

#[test]
fn tick_wakes_poll_and_read() {
    init_logging();
    let fix = mock::asic_fixture(ClockModel::gps180pex());
    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();

    assert_eq!(handle.poll(), PollStatus::NotReady);

    // The card fires its once-per-second interrupt.
    fix.card.raise_irq();
    assert_eq!(cyclic::irq_handler(&fix.dev), cyclic::IrqResult::Handled);

    assert_eq!(handle.poll(), PollStatus::Readable);
    let mut buf = [0u8; 64];
    let n = handle.read(&mut buf, false, &NoInterrupt).unwrap();
    assert_eq!(n, 32);
    assert_eq!(&buf[1..11], b"D:31.12.24");

    // The tick is consumed.
    assert_eq!(handle.poll(), PollStatus::NotReady);
}

#[test]
fn nonblocking_read_without_tick() {
    init_logging();
    let fix = mock::asic_fixture(ClockModel::gps180pex());
    let handle = chardev::open(&fix.ctx, fix.minor).unwrap();

    let mut buf = [0u8; 64];
    assert_eq!(
        handle.read(&mut buf, true, &NoInterrupt),
        Err(refclk_core::error::DriverError::NotReady)
    );
}

#[test]
fn foreground_transactions_race_interrupts() {
    // Interrupt deliveries race a foreground reader hammering the
    // command interface; every transaction must stay coherent and
    // nothing may deadlock.
    init_logging();
    let fix = mock::asic_fixture(ClockModel::gps180pex());
    cyclic::enable(&fix.dev, 0).unwrap();

    let dev = fix.dev.clone();
    let reader = std::thread::spawn(move || {
        for _ in 0..200 {
            let t: refclk_core::types::Time =
                refclk_core::transaction::read_var(&dev, cmd::GIVE_TIME).unwrap();
            assert_eq!(t.mday, 31);
            assert_eq!(t.year, 24);
        }
    });

    for _ in 0..200 {
        fix.card.raise_irq();
        let _ = cyclic::irq_handler(&fix.dev);
        std::thread::yield_now();
    }

    reader.join().unwrap();
}

#[test]
fn usb_worker_delivers_ticks() {
    init_logging();
    let fix = mock::usb_fixture(ClockModel::dcf600usb());

    cyclic::enable(&fix.dev, 0).unwrap();
    assert!(wait_for(|| fix.pipes.cyclic_enabled(), 2_000));
    assert!(fix.dev.cyclic_worker_running());

    fix.pipes.push_tick(default_time());
    assert!(wait_for(|| fix.dev.data_available(), 2_000));

    // Disable stops the device-side stream and joins the worker.
    cyclic::disable(&fix.dev);
    assert!(wait_for(|| !fix.dev.cyclic_worker_running(), 3_000));
    assert!(!fix.pipes.cyclic_enabled());
}
