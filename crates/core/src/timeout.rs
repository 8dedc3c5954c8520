//! Timeout utilities for hardware wait operations
//!
//! Every hardware wait loop in the engine is bounded by one of these
//! helpers to prevent infinite loops and hangs when a device misbehaves
//! or disappears from the bus.

use crate::hal::HostOs;

/// Default timeout for a command/response transaction (200 ms)
pub const DEFAULT_TIMEOUT_US: u64 = 200_000;

/// Timeout for the cyclic once-per-second event source (2 s)
pub const CYCLIC_TIMEOUT_US: u64 = 2_000_000;

/// Timeout for a single cyclic USB bulk read (1.2 s)
pub const USB_CYCLIC_TIMEOUT_MS: u32 = 1_200;

/// Timeout for a USB command or response bulk transfer (1 s)
pub const USB_TIMEOUT_MS: u32 = 1_000;

/// Timeout context for tracking elapsed time
pub struct Timeout<'a> {
    host: &'a dyn HostOs,
    start_us: u64,
    timeout_us: u64,
}

impl<'a> Timeout<'a> {
    /// Create a new timeout context
    pub fn new(host: &'a dyn HostOs, timeout_us: u64) -> Self {
        Self {
            host,
            start_us: host.timestamp_us(),
            timeout_us,
        }
    }

    /// Create a timeout with the default transaction duration
    pub fn transaction(host: &'a dyn HostOs) -> Self {
        Self::new(host, DEFAULT_TIMEOUT_US)
    }

    /// Check if the timeout has expired
    pub fn is_expired(&self) -> bool {
        self.elapsed_us() >= self.timeout_us
    }

    /// Get elapsed time in microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.host.timestamp_us().saturating_sub(self.start_us)
    }

    /// Wait until condition is true or timeout expires
    ///
    /// Returns `true` if the condition was met, `false` on expiry.
    pub fn wait<F>(&self, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        while !condition() {
            if self.is_expired() {
                return false;
            }
            core::hint::spin_loop();
        }
        true
    }

    /// Wait with a host sleep between condition checks
    pub fn wait_with_delay<F>(&self, mut condition: F, delay_us: u64) -> bool
    where
        F: FnMut() -> bool,
    {
        while !condition() {
            if self.is_expired() {
                return false;
            }
            self.host.sleep_us(delay_us);
        }
        true
    }

    /// Reset the timeout to start from now
    pub fn reset(&mut self) {
        self.start_us = self.host.timestamp_us();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock_host::MockHost;

    #[test]
    fn test_timeout_expiry() {
        let host = MockHost::new();
        let timeout = Timeout::new(&host, 100);
        host.advance_us(150);
        assert!(timeout.is_expired());
    }

    #[test]
    fn test_timeout_wait_success() {
        let host = MockHost::new();
        let mut ready = false;
        let ok = Timeout::new(&host, 1_000_000).wait(|| {
            ready = true;
            ready
        });
        assert!(ok);
    }

    #[test]
    fn test_timeout_wait_failure() {
        let host = MockHost::new();
        // MockHost auto-advances on sleep, so an always-false condition expires.
        let ok = Timeout::new(&host, 100).wait_with_delay(|| false, 10);
        assert!(!ok);
    }
}
