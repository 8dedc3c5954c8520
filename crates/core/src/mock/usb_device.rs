// Mock USB clock device
//
// Implements the three bulk endpoints of a real device: host-out
// commands feed the firmware model, host-in serves its responses, and
// the cyclic endpoint blocks on a tick queue with real timeout
// semantics so the cyclic worker task can be tested end to end.

use super::model::ClockModel;
use crate::error::{DriverError, DriverResult};
use crate::hal::{EndpointDesc, UsbIo};
use crate::types::{Time, Wire};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub const EP_HOST_IN: u8 = 0x81;
pub const EP_HOST_OUT: u8 = 0x02;
pub const EP_CYCLIC_IN: u8 = 0x83;

pub struct MockUsbClock {
    model: Mutex<ClockModel>,
    response: Mutex<Vec<u8>>,
    ticks: Mutex<VecDeque<Time>>,
    tick_cond: Condvar,
    connected: AtomicBool,
    /// When false the device only advertises two endpoints
    full_endpoints: AtomicBool,
    cyclic_enabled: AtomicBool,
}

impl MockUsbClock {
    pub fn new(model: ClockModel) -> Arc<Self> {
        Arc::new(Self {
            model: Mutex::new(model),
            response: Mutex::new(Vec::new()),
            ticks: Mutex::new(VecDeque::new()),
            tick_cond: Condvar::new(),
            connected: AtomicBool::new(true),
            full_endpoints: AtomicBool::new(true),
            cyclic_enabled: AtomicBool::new(false),
        })
    }

    /// Simulate pulling the cable: all transfers fail from now on
    pub fn unplug(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.tick_cond.notify_all();
    }

    pub fn replug(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn set_full_endpoints(&self, full: bool) {
        self.full_endpoints.store(full, Ordering::SeqCst);
    }

    /// True after the host sent the enable command for cyclic messages
    pub fn cyclic_enabled(&self) -> bool {
        self.cyclic_enabled.load(Ordering::SeqCst)
    }

    /// Queue one unsolicited cyclic time message
    pub fn push_tick(&self, t: Time) {
        self.ticks.lock().unwrap().push_back(t);
        self.tick_cond.notify_all();
    }

    pub fn with_model<R>(&self, f: impl FnOnce(&mut ClockModel) -> R) -> R {
        f(&mut self.model.lock().unwrap())
    }
}

impl UsbIo for MockUsbClock {
    fn endpoints(&self) -> DriverResult<heapless::Vec<EndpointDesc, 8>> {
        let mut eps = heapless::Vec::new();
        let _ = eps.push(EndpointDesc {
            addr: EP_HOST_IN,
            attrib: 0x02,
            max_packet_size: 64,
        });
        let _ = eps.push(EndpointDesc {
            addr: EP_HOST_OUT,
            attrib: 0x02,
            max_packet_size: 64,
        });
        if self.full_endpoints.load(Ordering::SeqCst) {
            let _ = eps.push(EndpointDesc {
                addr: EP_CYCLIC_IN,
                attrib: 0x02,
                max_packet_size: 64,
            });
        }
        Ok(eps)
    }

    fn bulk_out(&self, ep_addr: u8, data: &[u8], _timeout_ms: u32) -> DriverResult<usize> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::DeviceAccessFailed);
        }
        if ep_addr != EP_HOST_OUT {
            return Err(DriverError::InvalidParameter);
        }

        match data.first().copied() {
            Some(crate::types::cmd::IRQ_1_SEC) if data.len() == 1 => {
                self.cyclic_enabled.store(true, Ordering::SeqCst);
            }
            Some(crate::types::cmd::IRQ_NONE) if data.len() == 1 => {
                self.cyclic_enabled.store(false, Ordering::SeqCst);
                // Release a reader blocked on the cyclic endpoint.
                self.tick_cond.notify_all();
            }
            _ => {
                let resp = self.model.lock().unwrap().exec_usb_out(data);
                *self.response.lock().unwrap() = resp;
            }
        }

        Ok(data.len())
    }

    fn bulk_in(&self, ep_addr: u8, buf: &mut [u8], timeout_ms: u32) -> DriverResult<usize> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::DeviceAccessFailed);
        }

        match ep_addr {
            EP_HOST_IN => {
                let resp = core::mem::take(&mut *self.response.lock().unwrap());
                let n = resp.len().min(buf.len());
                buf[..n].copy_from_slice(&resp[..n]);
                Ok(n)
            }

            EP_CYCLIC_IN => {
                if !self.cyclic_enabled.load(Ordering::SeqCst) {
                    // Nothing will arrive until the host enables cyclic
                    // messages; behave like a quiet endpoint.
                    std::thread::sleep(Duration::from_millis(10));
                    return Err(DriverError::Timeout);
                }

                let deadline = Duration::from_millis(timeout_ms as u64);
                let ticks = self.ticks.lock().unwrap();
                let (mut ticks, timeout) = self
                    .tick_cond
                    .wait_timeout_while(ticks, deadline, |t| {
                        t.is_empty()
                            && self.connected.load(Ordering::SeqCst)
                            && self.cyclic_enabled.load(Ordering::SeqCst)
                    })
                    .map_err(|_| DriverError::DeviceAccessFailed)?;

                if !self.connected.load(Ordering::SeqCst) {
                    return Err(DriverError::DeviceAccessFailed);
                }
                if timeout.timed_out() && ticks.is_empty() {
                    return Err(DriverError::Timeout);
                }

                let t = ticks.pop_front().ok_or(DriverError::Timeout)?;
                if buf.len() < Time::SIZE {
                    return Err(DriverError::ByteCount);
                }
                t.to_wire(&mut buf[..Time::SIZE]);
                Ok(Time::SIZE)
            }

            _ => Err(DriverError::InvalidParameter),
        }
    }

    fn serial(&self) -> Option<heapless::String<32>> {
        let model = self.model.lock().unwrap();
        let mut s = heapless::String::new();
        let _ = s.push_str(&model.serial);
        Some(s)
    }

    fn reset(&self) -> DriverResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverError::DeviceAccessFailed);
        }
        Ok(())
    }
}
