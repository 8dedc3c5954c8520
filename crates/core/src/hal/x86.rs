//! Port I/O backend for x86_64 hosts

use super::RegIo;
use x86_64::instructions::port::Port;

/// One I/O port range starting at `base`
pub struct X86PortRange {
    base: u16,
}

impl X86PortRange {
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    fn port(&self, offs: u32) -> u16 {
        self.base.wrapping_add(offs as u16)
    }
}

impl RegIo for X86PortRange {
    fn read8(&self, offs: u32) -> u8 {
        unsafe { Port::<u8>::new(self.port(offs)).read() }
    }

    fn read16(&self, offs: u32) -> u16 {
        unsafe { Port::<u16>::new(self.port(offs)).read() }
    }

    fn read32(&self, offs: u32) -> u32 {
        unsafe { Port::<u32>::new(self.port(offs)).read() }
    }

    fn write8(&self, offs: u32, val: u8) {
        unsafe { Port::<u8>::new(self.port(offs)).write(val) }
    }

    fn write16(&self, offs: u32, val: u16) {
        unsafe { Port::<u16>::new(self.port(offs)).write(val) }
    }

    fn write32(&self, offs: u32, val: u32) {
        unsafe { Port::<u32>::new(self.port(offs)).write(val) }
    }
}
