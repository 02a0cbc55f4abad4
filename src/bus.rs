//! Register Interface
//!
//! The engine talks to the cell through [`HostBus`], a typed accessor over
//! the fixed-size 16-bit register window. The two hardware attachments
//! (companion multi-function chip vs. general peripheral-interconnect cell)
//! differ only in base offset and address stride; [`BusVariant`] resolves
//! that difference once at construction so the rest of the engine is written
//! against one addressing scheme.

/// Ordered access to the cell's 16-bit register window.
///
/// Every operation is a direct access: no caching, no retries. Reads may
/// have side effects (the data port pops the FIFO), hence `&mut self` on
/// both directions.
pub trait HostBus {
    /// Read a 16-bit register at a symbolic offset from `crate::regs`.
    fn read16(&mut self, offset: u16) -> u16;

    /// Write a 16-bit register at a symbolic offset from `crate::regs`.
    fn write16(&mut self, offset: u16, value: u16);

    /// Read a 32-bit value spread over two consecutive registers,
    /// low half first.
    fn read32(&mut self, offset: u16) -> u32 {
        let lo = self.read16(offset) as u32;
        let hi = self.read16(offset + 2) as u32;
        lo | (hi << 16)
    }

    /// Write a 32-bit value over two consecutive registers, low half first.
    fn write32(&mut self, offset: u16, value: u32) {
        self.write16(offset, value as u16);
        self.write16(offset + 2, (value >> 16) as u16);
    }
}

/// Address translation for one hardware attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusVariant {
    /// Byte offset of the register window within the mapping
    pub base: u32,
    /// Left shift applied to every register offset
    pub shift: u8,
}

impl BusVariant {
    /// The cell behind the companion multi-function chip: registers are
    /// spread on a 4-byte stride.
    pub const COMPANION: BusVariant = BusVariant { base: 0, shift: 1 };

    /// The directly attached peripheral-interconnect cell: natural 2-byte
    /// stride.
    pub const CELL: BusVariant = BusVariant { base: 0, shift: 0 };

    /// Resolve a symbolic register offset to a byte offset in the mapping.
    #[inline]
    pub const fn resolve(&self, offset: u16) -> u32 {
        self.base + ((offset as u32) << self.shift)
    }
}

/// Memory-mapped implementation of [`HostBus`].
pub struct Mmio {
    mmio_base: *mut u8,
    variant: BusVariant,
}

// Safety: Mmio holds a raw pointer but all access goes through &mut self;
// the embedder serializes contexts per controller (see crate docs).
unsafe impl Send for Mmio {}

impl Mmio {
    /// Create an accessor over a mapped register window.
    ///
    /// # Safety
    ///
    /// `mmio_base` must point to a live mapping of the cell's register
    /// window, valid for the lifetime of the returned value, and no other
    /// code may access the window while it exists.
    pub unsafe fn new(mmio_base: *mut u8, variant: BusVariant) -> Self {
        Self { mmio_base, variant }
    }
}

impl HostBus for Mmio {
    fn read16(&mut self, offset: u16) -> u16 {
        let addr = self.variant.resolve(offset) as usize;
        unsafe { core::ptr::read_volatile(self.mmio_base.add(addr) as *const u16) }
    }

    fn write16(&mut self, offset: u16, value: u16) {
        let addr = self.variant.resolve(offset) as usize;
        unsafe { core::ptr::write_volatile(self.mmio_base.add(addr) as *mut u16, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::CTL_DATA_PORT;

    #[test]
    fn variant_resolution() {
        assert_eq!(BusVariant::CELL.resolve(CTL_DATA_PORT), 0x30);
        assert_eq!(BusVariant::COMPANION.resolve(CTL_DATA_PORT), 0x60);

        let offset_window = BusVariant { base: 0x800, shift: 1 };
        assert_eq!(offset_window.resolve(CTL_DATA_PORT), 0x800 + 0x60);
    }
}
