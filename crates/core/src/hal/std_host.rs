// Host services backed by the std runtime, for hosted scenario tests

use super::HostOs;
use crate::error::DriverResult;
use alloc::boxed::Box;
use std::time::Instant;

pub struct StdHost {
    start: Instant,
}

impl StdHost {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostOs for StdHost {
    fn timestamp_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn cycles(&self) -> u64 {
        // A nanosecond counter stands in for the TSC on hosted builds.
        self.start.elapsed().as_nanos() as u64
    }

    fn cycles_frequency(&self) -> u64 {
        1_000_000_000
    }

    fn sleep_us(&self, us: u64) {
        std::thread::sleep(std::time::Duration::from_micros(us));
    }

    fn uptime_secs(&self) -> Option<u64> {
        Some(self.start.elapsed().as_secs())
    }

    fn spawn(&self, name: &'static str, f: Box<dyn FnOnce() + Send + 'static>) -> DriverResult<()> {
        std::thread::Builder::new()
            .name(name.into())
            .spawn(f)
            .map(|_| ())
            .map_err(|_| crate::error::DriverError::NoMemory)
    }
}
