//! Character device surface
//!
//! The glue between a host file handle and one device descriptor:
//! open/release accounting, the blocking text-mode `read`, `poll`,
//! asynchronous tick notification and the memory map window. Node
//! creation and actual user-space copies live in the OS wrapper.
//!
//! The text frame returned by `read` is a wire contract consumed by an
//! external time synchronization daemon: exactly 33 bytes including the
//! trailing NUL, STX/ETX framed.

use crate::cyclic;
use crate::device::{Device, TickNotify};
use crate::error::{DriverError, DriverResult};
use crate::registry::DriverContext;
use crate::timeout::{Timeout, CYCLIC_TIMEOUT_US};
use crate::types::{Time, TimeStatus};
use alloc::sync::Arc;
use core::fmt::Write as _;
use core::sync::atomic::Ordering;

/// Size of the framed time string buffer incl. the terminating NUL
pub const TIME_STR_SIZE: usize = 33;

/// Poll interval of the blocking read path
const READ_POLL_US: u64 = 1_000;

/// Result of a `poll` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A tick has landed; `read` will not block
    Readable,
    NotReady,
    /// Device is gone; the handle only returns errors from now on
    Error,
}

/// Caller-supplied interruption check for blocking waits (signal
/// delivery in a kernel wrapper)
pub trait WaitHook {
    fn interrupted(&self) -> bool;
}

/// A hook that never interrupts, for callers without signal semantics
pub struct NoInterrupt;

impl WaitHook for NoInterrupt {
    fn interrupted(&self) -> bool {
        false
    }
}

/// Format one time frame as the 33 byte framed text telegram.
///
/// Layout: STX, date, day-of-week, time, four status indicators, ETX,
/// NUL. An invalid time is reported as free-running and never as
/// synchronized.
pub fn format_time_str(t: &Time, pretend_sync: bool) -> [u8; TIME_STR_SIZE] {
    let mut status = t.status;
    if status.contains(TimeStatus::INVT) {
        status |= TimeStatus::FREER;
        status &= !TimeStatus::SYNCD;
    }

    let synced = if pretend_sync || status.contains(TimeStatus::SYNCD) {
        ' '
    } else {
        '#'
    };
    let utc_or_dst = if t.offs_utc == 0 {
        'U'
    } else if status.contains(TimeStatus::DL_ENB) {
        'S'
    } else {
        ' '
    };
    let freer = if !pretend_sync && status.contains(TimeStatus::FREER) {
        '*'
    } else {
        ' '
    };
    let announce = if status.contains(TimeStatus::DL_ANN) {
        '!'
    } else if status.contains(TimeStatus::LS_ANN) {
        'A'
    } else {
        ' '
    };

    let mut s: heapless::String<TIME_STR_SIZE> = heapless::String::new();
    let _ = write!(
        s,
        "\x02D:{:02}.{:02}.{:02};T:{};U:{:02}:{:02}:{:02};{}{}{}{}\x03",
        t.mday,
        t.month,
        t.year,
        t.wday,
        t.hour,
        t.min,
        t.sec,
        synced,
        utc_or_dst,
        freer,
        announce
    );

    let mut out = [0u8; TIME_STR_SIZE];
    out[..s.len()].copy_from_slice(s.as_bytes());
    out
}

/// Physical window a wrapper may map into user space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapWindow {
    pub phys_base: u64,
    pub len: u64,
}

/// Page size of the mapped register window
pub const MAP_PAGE_SIZE: u64 = 4096;

/// One open file handle on a clock device
pub struct FileHandle {
    ctx: Arc<DriverContext>,
    dev: Arc<Device>,
}

/// Open the device with the given minor number
pub fn open(ctx: &Arc<DriverContext>, minor: usize) -> DriverResult<FileHandle> {
    let dev = ctx.find_by_minor(minor).ok_or(DriverError::NoDevice)?;
    if !dev.connected() {
        return Err(DriverError::NoDevice);
    }
    dev.open_count.fetch_add(1, Ordering::SeqCst);
    log::debug!(
        "chardev: open minor {}: {} {}, open count {}",
        minor,
        dev.name(),
        dev.sernum(),
        dev.open_count()
    );
    Ok(FileHandle {
        ctx: ctx.clone(),
        dev,
    })
}

impl FileHandle {
    pub fn device(&self) -> &Arc<Device> {
        &self.dev
    }

    /// Blocking read of the framed time string.
    ///
    /// The first read lazily enables the cyclic source. The caller gets
    /// `min(buf.len(), 32)` bytes of the frame. A non-blocking call
    /// without a pending tick returns [`DriverError::NotReady`], which
    /// the wrapper maps to its try-again errno.
    pub fn read(
        &self,
        buf: &mut [u8],
        nonblocking: bool,
        hook: &dyn WaitHook,
    ) -> DriverResult<usize> {
        let dev = &self.dev;

        if !dev.connected() {
            return Err(DriverError::Interrupted);
        }

        cyclic::enable(dev, 0)?;

        if buf.len() < TIME_STR_SIZE {
            log::debug!(
                "chardev: read buffer ({}) smaller than a full frame ({})",
                buf.len(),
                TIME_STR_SIZE
            );
        }

        let mut window = Timeout::new(dev.host(), CYCLIC_TIMEOUT_US);
        while !dev.data_available() {
            if !dev.connected() {
                return Err(DriverError::Interrupted);
            }
            if nonblocking {
                return Err(DriverError::NotReady);
            }
            if hook.interrupted() {
                return Err(DriverError::Interrupted);
            }
            if window.is_expired() {
                // No tick for a full timeout window; the cyclic source
                // may have died, push it through a re-enable.
                cyclic::check_staleness(dev);
                window.reset();
            }
            dev.host().sleep_us(READ_POLL_US);
        }

        let t = {
            let cyc = dev.cyclic.lock();
            dev.data_avail.store(false, Ordering::SeqCst);
            cyc.last_time
        };

        let frame = format_time_str(&t, false);
        let n = buf.len().min(TIME_STR_SIZE - 1);
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }

    /// Readiness check; runs the same lazy-enable and staleness
    /// detection as the blocking read
    pub fn poll(&self) -> PollStatus {
        let dev = &self.dev;

        if !dev.connected() {
            return PollStatus::Error;
        }

        if cyclic::enable(dev, 0).is_err() {
            return PollStatus::Error;
        }

        if dev.data_available() {
            PollStatus::Readable
        } else {
            cyclic::check_staleness(dev);
            PollStatus::NotReady
        }
    }

    /// Discard a pending tick
    pub fn flush(&self) {
        self.dev.data_avail.store(false, Ordering::SeqCst);
    }

    /// Register a notify target called on every tick (SIGIO delivery in
    /// a kernel wrapper)
    pub fn set_async_notify(&self, target: Arc<dyn TickNotify>) {
        self.dev.add_notifier(target);
    }

    /// The physical window a wrapper may map for user space: one page
    /// of memory range 0 past the interface register block
    pub fn map_window(&self) -> DriverResult<MapWindow> {
        let cfg = self.dev.cfg.read();
        if cfg.mem0_len == 0 {
            return Err(DriverError::InvalidParameter);
        }
        Ok(MapWindow {
            phys_base: cfg.mem0_base_raw,
            len: MAP_PAGE_SIZE,
        })
    }

    /// Close the handle; equivalent to dropping it
    pub fn release(self) {}
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let dev = &self.dev;
        let remaining = dev.open_count.fetch_sub(1, Ordering::SeqCst) - 1;
        log::debug!(
            "chardev: release {} {}, open count {}",
            dev.name(),
            dev.sernum(),
            remaining
        );

        if remaining == 0 {
            dev.remove_notifiers();
            if dev.connected() {
                cyclic::disable(dev);
            } else {
                // Last close of an unplugged device: now the descriptor
                // can finally go away.
                self.ctx.remove(dev);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_str_frame() {
        // Literal frame check: this is a wire contract.
        let t = Time {
            sec100: 0,
            sec: 59,
            min: 59,
            hour: 23,
            mday: 31,
            wday: 3,
            month: 12,
            year: 24,
            status: TimeStatus::SYNCD | TimeStatus::UTC,
            signal: 64,
            offs_utc: 0,
        };
        let frame = format_time_str(&t, false);
        assert_eq!(&frame[..], b"\x02D:31.12.24;T:3;U:23:59:59; U  \x03\0");
        assert_eq!(frame.len(), 33);
        assert_eq!(frame[0], 0x02);
        assert_eq!(frame[31], 0x03);
    }

    #[test]
    fn test_time_str_unsynced_and_dst() {
        let t = Time {
            sec100: 0,
            sec: 1,
            min: 2,
            hour: 3,
            mday: 4,
            wday: 5,
            month: 6,
            year: 25,
            status: TimeStatus::FREER | TimeStatus::DL_ENB | TimeStatus::DL_ANN,
            signal: 30,
            offs_utc: 2,
        };
        let frame = format_time_str(&t, false);
        assert_eq!(&frame[..], b"\x02D:04.06.25;T:5;U:03:02:01;#S*!\x03\0");
    }

    #[test]
    fn test_invalid_time_reported_free_running() {
        let t = Time {
            status: TimeStatus::SYNCD | TimeStatus::INVT,
            offs_utc: 1,
            ..Default::default()
        };
        let frame = format_time_str(&t, false);
        // INVT forces '#' (not synced) and '*' (free running).
        assert_eq!(frame[27], b'#');
        assert_eq!(frame[29], b'*');
    }
}
