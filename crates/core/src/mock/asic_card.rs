// Register-level mock of a PCI card with the interface ASIC
//
// Implements `RegIo` over the ASIC register block so the real transport
// code is exercised: the command write to `pci_data`, the BUSY poll on
// the status port, sequential response reads from `addon_data`, the IRQ
// bits of `control_status`, and the timestamp register pair behind the
// block.

use super::model::ClockModel;
use crate::hal::RegIo;
use crate::transport::asic;
use crate::types::{status_port, TimeStamp};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use spin::Mutex;

type StatusHook = Box<dyn Fn() + Send + Sync>;

struct CardState {
    model: ClockModel,
    response: Vec<u8>,
    control_status: u32,
    tstamp: TimeStamp,
}

pub struct MockAsicCard {
    state: Mutex<CardState>,
    status_reads: AtomicU32,
    commands: AtomicU32,
    irq_enable_writes: AtomicU32,
    irq_disable_writes: AtomicU32,
    irq_acked: AtomicBool,
    busy_polls: AtomicU32,
    busy_forever: AtomicBool,
    status_hook: Mutex<Option<StatusHook>>,
}

impl MockAsicCard {
    pub fn new(model: ClockModel) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CardState {
                model,
                response: Vec::new(),
                control_status: 0,
                tstamp: TimeStamp {
                    sec: 1_735_689_599,
                    frac: 0x4000_0000,
                },
            }),
            status_reads: AtomicU32::new(0),
            commands: AtomicU32::new(0),
            irq_enable_writes: AtomicU32::new(0),
            irq_disable_writes: AtomicU32::new(0),
            irq_acked: AtomicBool::new(false),
            busy_polls: AtomicU32::new(0),
            busy_forever: AtomicBool::new(false),
            status_hook: Mutex::new(None),
        })
    }

    /// Make the next `n` status reads report BUSY
    pub fn set_busy_polls(&self, n: u32) {
        self.busy_polls.store(n, Ordering::SeqCst);
    }

    /// Make the BUSY flag stick forever, to provoke timeouts
    pub fn set_busy_forever(&self, stuck: bool) {
        self.busy_forever.store(stuck, Ordering::SeqCst);
    }

    /// Hook invoked on every status read; tests use it to advance a
    /// virtual clock while the driver busy-polls
    pub fn set_status_read_hook(&self, hook: StatusHook) {
        *self.status_hook.lock() = Some(hook);
    }

    pub fn status_reads(&self) -> u32 {
        self.status_reads.load(Ordering::SeqCst)
    }

    /// Number of commands written to the command register
    pub fn command_count(&self) -> u32 {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn irq_enable_writes(&self) -> u32 {
        self.irq_enable_writes.load(Ordering::SeqCst)
    }

    pub fn irq_disable_writes(&self) -> u32 {
        self.irq_disable_writes.load(Ordering::SeqCst)
    }

    pub fn irq_acked(&self) -> bool {
        self.irq_acked.load(Ordering::SeqCst)
    }

    /// Latch the IRQ flag, as the hardware does once per second
    pub fn raise_irq(&self) {
        self.state.lock().control_status |= asic::CTL_IRQ_FLAG;
    }

    pub fn irq_enabled(&self) -> bool {
        self.state.lock().control_status & asic::CTL_IRQ_ENABLE != 0
    }

    pub fn set_tstamp(&self, t: TimeStamp) {
        self.state.lock().tstamp = t;
    }

    /// Direct access to the simulated firmware
    pub fn with_model<R>(&self, f: impl FnOnce(&mut ClockModel) -> R) -> R {
        f(&mut self.state.lock().model)
    }

    fn read_status(&self) -> u8 {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &*self.status_hook.lock() {
            hook();
        }
        if self.busy_forever.load(Ordering::SeqCst) {
            return status_port::BUSY;
        }
        let remaining = self.busy_polls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.busy_polls.store(remaining - 1, Ordering::SeqCst);
            return status_port::BUSY;
        }
        0
    }

    fn response_word(&self, offs: u32, width: usize) -> u64 {
        let state = self.state.lock();
        let start = offs.saturating_sub(asic::ADDON_DATA) as usize;
        let mut word = 0u64;
        for i in 0..width {
            let b = state.response.get(start + i).copied().unwrap_or(0);
            word |= (b as u64) << (8 * i);
        }
        word
    }
}

impl RegIo for MockAsicCard {
    fn read8(&self, offs: u32) -> u8 {
        match offs {
            asic::STATUS_PORT => self.read_status(),
            o if o >= asic::ADDON_DATA && o < asic::ADDON_DATA + 16 => {
                self.response_word(o, 1) as u8
            }
            _ => 0,
        }
    }

    fn read16(&self, offs: u32) -> u16 {
        match offs {
            o if o >= asic::ADDON_DATA && o < asic::ADDON_DATA + 16 => {
                (self.response_word(o, 2) as u16).to_le()
            }
            _ => 0,
        }
    }

    fn read32(&self, offs: u32) -> u32 {
        match offs {
            asic::CONTROL_STATUS => self.state.lock().control_status.to_le(),
            asic::RAW_VERSION => self.state.lock().model.asic_raw_version.to_le(),
            asic::FEATURES => self.state.lock().model.asic_features.to_le(),
            o if o >= asic::ADDON_DATA && o < asic::ADDON_DATA + 16 => {
                (self.response_word(o, 4) as u32).to_le()
            }
            asic::TSTAMP_OFFS => self.state.lock().tstamp.frac.to_le(),
            o if o == asic::TSTAMP_OFFS + 4 => self.state.lock().tstamp.sec.to_le(),
            _ => 0,
        }
    }

    fn write8(&self, _offs: u32, _val: u8) {}

    fn write16(&self, _offs: u32, _val: u16) {}

    fn write32(&self, offs: u32, val: u32) {
        let val = u32::from_le(val);
        match offs {
            asic::PCI_DATA => {
                self.commands.fetch_add(1, Ordering::SeqCst);
                let mut state = self.state.lock();
                state.response = state.model.exec(val as u8);
            }
            asic::CONTROL_STATUS => {
                let mut state = self.state.lock();
                let old = state.control_status;

                if val & asic::CTL_IRQ_ENABLE != 0 && old & asic::CTL_IRQ_ENABLE == 0 {
                    self.irq_enable_writes.fetch_add(1, Ordering::SeqCst);
                }
                if val & asic::CTL_IRQ_ENABLE == 0 && old & asic::CTL_IRQ_ENABLE != 0 {
                    self.irq_disable_writes.fetch_add(1, Ordering::SeqCst);
                }

                // The flag bit is write-1-to-acknowledge; it stays
                // latched unless explicitly acked.
                let mut new = val & !asic::CTL_IRQ_FLAG;
                if val & asic::CTL_IRQ_FLAG != 0 {
                    self.irq_acked.store(true, Ordering::SeqCst);
                } else {
                    new |= old & asic::CTL_IRQ_FLAG;
                }

                state.control_status = new;
            }
            _ => {}
        }
    }
}

/// Mock PEX8311 bridge configuration window: plain storage plus the
/// boot-ready GPIO
pub struct MockBridge {
    regs: Mutex<alloc::collections::BTreeMap<u32, u32>>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            regs: Mutex::new(alloc::collections::BTreeMap::new()),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        let mut regs = self.regs.lock();
        let v = regs.get(&crate::transport::plx::LCS_GPIOC).copied().unwrap_or(0);
        let v = if ready {
            v | crate::transport::plx::GPIOC_READY
        } else {
            v & !crate::transport::plx::GPIOC_READY
        };
        regs.insert(crate::transport::plx::LCS_GPIOC, v);
    }

    pub fn reg(&self, offs: u32) -> u32 {
        self.regs.lock().get(&offs).copied().unwrap_or(0)
    }
}

impl RegIo for MockBridge {
    fn read8(&self, offs: u32) -> u8 {
        self.reg(offs & !3) as u8
    }

    fn read16(&self, offs: u32) -> u16 {
        self.reg(offs & !3) as u16
    }

    fn read32(&self, offs: u32) -> u32 {
        self.reg(offs).to_le()
    }

    fn write8(&self, _offs: u32, _val: u8) {}

    fn write16(&self, _offs: u32, _val: u16) {}

    fn write32(&self, offs: u32, val: u32) {
        self.regs.lock().insert(offs, u32::from_le(val));
    }
}
