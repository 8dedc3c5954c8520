// Register-level mocks of the AMCC-based PCI generations
//
// The S5933 serves responses byte-wise from a FIFO with an empty flag;
// the S5920 has its command mailbox in range 0 and a 32 bit data
// window in range 1. Both reuse the shared firmware model.

use super::model::ClockModel;
use crate::hal::RegIo;
use crate::transport::amcc::{s5920, s5933, STATUS_PORT};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

struct FifoState {
    model: ClockModel,
    response: Vec<u8>,
    read_pos: usize,
}

/// Mock S5933 card: command via outgoing mailbox 1, response from the
/// byte-lane FIFO
pub struct MockS5933Card {
    state: Mutex<FifoState>,
}

impl MockS5933Card {
    pub fn new(model: ClockModel) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FifoState {
                model,
                response: Vec::new(),
                read_pos: 0,
            }),
        })
    }
}

impl RegIo for MockS5933Card {
    fn read8(&self, offs: u32) -> u8 {
        if offs == STATUS_PORT {
            return 0; // never busy
        }
        if (s5933::FIFO..s5933::FIFO + 4).contains(&offs) {
            let mut state = self.state.lock();
            let b = state.response.get(state.read_pos).copied().unwrap_or(0);
            state.read_pos += 1;
            return b;
        }
        0
    }

    fn read16(&self, offs: u32) -> u16 {
        if offs == s5933::MCSR {
            let state = self.state.lock();
            if state.read_pos >= state.response.len() {
                return s5933::MCSR_FIFO_EMPTY.to_le();
            }
            return 0;
        }
        0
    }

    fn read32(&self, _offs: u32) -> u32 {
        0
    }

    fn write8(&self, offs: u32, val: u8) {
        if offs == s5933::OMB1 {
            let mut state = self.state.lock();
            state.response = state.model.exec(val);
            state.read_pos = 0;
        }
        // Mailbox/FIFO reset and INTCSR setup writes need no modeling.
    }

    fn write16(&self, _offs: u32, _val: u16) {}

    fn write32(&self, _offs: u32, _val: u32) {}
}

struct S5920Shared {
    model: ClockModel,
    response: Vec<u8>,
    read_pos: usize,
}

/// Mock S5920 card; [`MockS5920Card::data_port`] yields the second
/// port range serving the 32 bit data window
pub struct MockS5920Card {
    shared: Arc<Mutex<S5920Shared>>,
}

pub struct S5920DataPort {
    shared: Arc<Mutex<S5920Shared>>,
}

impl MockS5920Card {
    pub fn new(model: ClockModel) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Mutex::new(S5920Shared {
                model,
                response: Vec::new(),
                read_pos: 0,
            })),
        })
    }

    pub fn data_port(&self) -> Arc<S5920DataPort> {
        Arc::new(S5920DataPort {
            shared: self.shared.clone(),
        })
    }
}

impl RegIo for MockS5920Card {
    fn read8(&self, offs: u32) -> u8 {
        if offs == STATUS_PORT {
            return 0; // never busy
        }
        0
    }

    fn read16(&self, _offs: u32) -> u16 {
        0
    }

    fn read32(&self, _offs: u32) -> u32 {
        0
    }

    fn write8(&self, offs: u32, val: u8) {
        if offs == s5920::OMB {
            let mut shared = self.shared.lock();
            shared.response = shared.model.exec(val);
            shared.read_pos = 0;
        }
    }

    fn write16(&self, _offs: u32, _val: u16) {}

    fn write32(&self, _offs: u32, _val: u32) {}
}

impl RegIo for S5920DataPort {
    fn read8(&self, _offs: u32) -> u8 {
        0
    }

    fn read16(&self, _offs: u32) -> u16 {
        0
    }

    fn read32(&self, _offs: u32) -> u32 {
        // Each read pops the next little-endian word of the response;
        // surplus lanes of the last word read as zero.
        let mut shared = self.shared.lock();
        let mut word = 0u32;
        for i in 0..4 {
            let b = shared.response.get(shared.read_pos + i).copied().unwrap_or(0);
            word |= (b as u32) << (8 * i);
        }
        shared.read_pos += 4;
        word.to_le()
    }

    fn write8(&self, _offs: u32, _val: u8) {}

    fn write16(&self, _offs: u32, _val: u16) {}

    fn write32(&self, _offs: u32, _val: u32) {}
}
