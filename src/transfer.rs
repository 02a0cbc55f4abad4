//! Data Transfer Engine
//!
//! Pumps bytes between a scatter-gather buffer list and the cell's single
//! data port, exactly one block per buffer-ready event. The cursor is
//! byte-precise: a 16-bit port unit may straddle a segment boundary, and the
//! engine continues in the next segment without losing or duplicating a
//! byte. Transfer geometry is validated at construction, so the cursor can
//! never run past the scatter-gather list mid-transfer.

use alloc::vec::Vec;

use crate::bus::HostBus;
use crate::regs::CTL_DATA_PORT;

/// Transfer direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Card to host
    Read,
    /// Host to card
    Write,
}

/// Rejected transfer geometry, reported synchronously at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    /// Block size or block count is zero
    ZeroLength,
    /// A scatter-gather segment is empty
    EmptySegment,
    /// Segment lengths do not sum to block_size * block_count
    LengthMismatch,
}

/// A scatter-gather block transfer with its cursor state.
///
/// Segments are owned for the lifetime of the request and handed back to
/// the caller in the completion, so the engine never borrows caller memory
/// across interrupt contexts.
pub struct DataTransfer {
    direction: Direction,
    block_size: u16,
    block_count: u16,
    segments: Vec<Vec<u8>>,
    seg_index: usize,
    seg_offset: usize,
    remaining: usize,
}

impl DataTransfer {
    /// Create a card-to-host transfer.
    pub fn read(
        block_size: u16,
        block_count: u16,
        segments: Vec<Vec<u8>>,
    ) -> Result<Self, GeometryError> {
        Self::new(Direction::Read, block_size, block_count, segments)
    }

    /// Create a host-to-card transfer.
    pub fn write(
        block_size: u16,
        block_count: u16,
        segments: Vec<Vec<u8>>,
    ) -> Result<Self, GeometryError> {
        Self::new(Direction::Write, block_size, block_count, segments)
    }

    fn new(
        direction: Direction,
        block_size: u16,
        block_count: u16,
        segments: Vec<Vec<u8>>,
    ) -> Result<Self, GeometryError> {
        if block_size == 0 || block_count == 0 {
            return Err(GeometryError::ZeroLength);
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(GeometryError::EmptySegment);
        }
        let total = block_size as usize * block_count as usize;
        if segments.iter().map(|s| s.len()).sum::<usize>() != total {
            return Err(GeometryError::LengthMismatch);
        }
        Ok(Self {
            direction,
            block_size,
            block_count,
            segments,
            seg_index: 0,
            seg_offset: 0,
            remaining: total,
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    pub fn block_count(&self) -> u16 {
        self.block_count
    }

    /// Bytes still to cross the data port.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Bytes successfully transferred. Partial progress is tracked
    /// internally but never reported as success: this is the full transfer
    /// length once complete, zero before that.
    pub fn bytes_transferred(&self) -> usize {
        if self.is_complete() {
            self.block_size as usize * self.block_count as usize
        } else {
            0
        }
    }

    /// Borrow the scatter-gather segments.
    pub fn segments(&self) -> &[Vec<u8>] {
        &self.segments
    }

    /// Consume the transfer, handing the buffers back.
    pub fn into_segments(self) -> Vec<Vec<u8>> {
        self.segments
    }

    /// Pump exactly one block between the scatter-gather list and the data
    /// port, in 16-bit units. Never drains more than `block_size` bytes
    /// even if the FIFO reports more; the cell re-raises buffer-ready for
    /// the next block. No-op once the transfer is complete.
    pub fn pump_block<B: HostBus>(&mut self, bus: &mut B) {
        let len = (self.block_size as usize).min(self.remaining);
        let mut done = 0;
        match self.direction {
            Direction::Read => {
                while done < len {
                    let unit = bus.read16(CTL_DATA_PORT);
                    self.store_byte(unit as u8);
                    done += 1;
                    if done < len {
                        self.store_byte((unit >> 8) as u8);
                        done += 1;
                    }
                }
            }
            Direction::Write => {
                while done < len {
                    let lo = self.take_byte();
                    done += 1;
                    let hi = if done < len {
                        done += 1;
                        self.take_byte()
                    } else {
                        0
                    };
                    bus.write16(CTL_DATA_PORT, lo as u16 | ((hi as u16) << 8));
                }
            }
        }
    }

    // Cursor invariant: while remaining > 0, (seg_index, seg_offset) names
    // a valid byte. Geometry validation at construction guarantees the
    // segment list covers the programmed total.

    fn store_byte(&mut self, byte: u8) {
        debug_assert!(self.remaining > 0);
        self.segments[self.seg_index][self.seg_offset] = byte;
        self.advance();
    }

    fn take_byte(&mut self) -> u8 {
        debug_assert!(self.remaining > 0);
        let byte = self.segments[self.seg_index][self.seg_offset];
        self.advance();
        byte
    }

    fn advance(&mut self) {
        self.remaining -= 1;
        self.seg_offset += 1;
        if self.seg_offset == self.segments[self.seg_index].len() && self.remaining > 0 {
            self.seg_index += 1;
            self.seg_offset = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// A bare FIFO standing in for the data port.
    struct Fifo {
        rx: Vec<u16>,
        tx: Vec<u16>,
        pos: usize,
    }

    impl HostBus for Fifo {
        fn read16(&mut self, offset: u16) -> u16 {
            assert_eq!(offset, CTL_DATA_PORT);
            let unit = self.rx[self.pos];
            self.pos += 1;
            unit
        }

        fn write16(&mut self, offset: u16, value: u16) {
            assert_eq!(offset, CTL_DATA_PORT);
            self.tx.push(value);
        }
    }

    fn units(bytes: &[u8]) -> Vec<u16> {
        bytes
            .chunks(2)
            .map(|c| c[0] as u16 | ((*c.get(1).unwrap_or(&0) as u16) << 8))
            .collect()
    }

    #[test]
    fn geometry_is_validated() {
        assert_eq!(
            DataTransfer::read(0, 1, vec![vec![0; 4]]).err(),
            Some(GeometryError::ZeroLength)
        );
        assert_eq!(
            DataTransfer::read(4, 1, vec![vec![0; 2], vec![]]).err(),
            Some(GeometryError::EmptySegment)
        );
        assert_eq!(
            DataTransfer::read(4, 2, vec![vec![0; 7]]).err(),
            Some(GeometryError::LengthMismatch)
        );
        assert!(DataTransfer::read(4, 2, vec![vec![0; 3], vec![0; 5]]).is_ok());
    }

    #[test]
    fn read_crosses_segment_boundaries_mid_unit() {
        // 8 bytes in segments of 3 + 5: the second port unit straddles the
        // boundary.
        let pattern: &[u8] = &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        let mut fifo = Fifo { rx: units(pattern), tx: Vec::new(), pos: 0 };
        let mut xfer = DataTransfer::read(8, 1, vec![vec![0; 3], vec![0; 5]]).unwrap();

        xfer.pump_block(&mut fifo);
        assert!(xfer.is_complete());
        assert_eq!(xfer.segments()[0], &pattern[..3]);
        assert_eq!(xfer.segments()[1], &pattern[3..]);
    }

    #[test]
    fn write_crosses_segment_boundaries_mid_unit() {
        let pattern: &[u8] = &[0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];
        let mut fifo = Fifo { rx: Vec::new(), tx: Vec::new(), pos: 0 };
        let segs = vec![pattern[..1].to_vec(), pattern[1..6].to_vec()];
        let mut xfer = DataTransfer::write(6, 1, segs).unwrap();

        xfer.pump_block(&mut fifo);
        assert!(xfer.is_complete());
        assert_eq!(fifo.tx, units(pattern));
    }

    #[test]
    fn one_block_per_pump_never_more() {
        let data: Vec<u8> = (0..16u8).collect();
        let mut fifo = Fifo { rx: units(&data), tx: Vec::new(), pos: 0 };
        let mut xfer = DataTransfer::read(4, 4, vec![vec![0; 16]]).unwrap();

        xfer.pump_block(&mut fifo);
        assert_eq!(xfer.remaining(), 12);
        // Partial progress is not reported as success.
        assert_eq!(xfer.bytes_transferred(), 0);

        for _ in 0..3 {
            xfer.pump_block(&mut fifo);
        }
        assert_eq!(xfer.bytes_transferred(), 16);
        assert_eq!(xfer.segments()[0], data);

        // Further pumps are no-ops.
        xfer.pump_block(&mut fifo);
        assert_eq!(fifo.pos, 8);
    }

    #[test]
    fn odd_block_size_uses_low_byte_of_final_unit() {
        let mut fifo = Fifo { rx: vec![0x2211, 0x0033], tx: Vec::new(), pos: 0 };
        let mut xfer = DataTransfer::read(3, 1, vec![vec![0; 3]]).unwrap();
        xfer.pump_block(&mut fifo);
        assert_eq!(xfer.segments()[0], &[0x11, 0x22, 0x33]);

        let mut fifo = Fifo { rx: Vec::new(), tx: Vec::new(), pos: 0 };
        let mut xfer = DataTransfer::write(3, 1, vec![vec![0x11, 0x22, 0x33]]).unwrap();
        xfer.pump_block(&mut fifo);
        // High byte of the trailing unit is padded with zero.
        assert_eq!(fifo.tx, vec![0x2211, 0x0033]);
    }
}
