// Mock host clock and task services for isolated testing

use super::HostOs;
use crate::error::DriverResult;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

/// Host services with a virtual clock.
///
/// `sleep_us` advances the virtual clock instead of blocking, so wait
/// loops bounded by [`crate::timeout::Timeout`] make progress without
/// real delays. `advance_us` lets a test move time forward explicitly,
/// e.g. to trigger staleness detection.
pub struct MockHost {
    now_us: AtomicU64,
    cycles_per_us: u64,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            now_us: AtomicU64::new(1_000),
            cycles_per_us: 1_000, // pretend 1 GHz
        }
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostOs for MockHost {
    fn timestamp_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn cycles(&self) -> u64 {
        self.timestamp_us() * self.cycles_per_us
    }

    fn cycles_frequency(&self) -> u64 {
        self.cycles_per_us * 1_000_000
    }

    fn sleep_us(&self, us: u64) {
        self.advance_us(us);
        std::thread::yield_now();
    }

    fn uptime_secs(&self) -> Option<u64> {
        Some(self.timestamp_us() / 1_000_000)
    }

    fn spawn(&self, name: &'static str, f: Box<dyn FnOnce() + Send + 'static>) -> DriverResult<()> {
        std::thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .map(|_| ())
            .map_err(|_| crate::error::DriverError::NoMemory)
    }
}
