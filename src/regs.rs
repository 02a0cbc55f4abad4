//! Register Definitions
//!
//! This module defines the 16-bit register window of the SD/MMC host cell:
//! symbolic offsets, typed bitflag sets for the status/control registers,
//! and the command-word bit layout.
//!
//! Offsets are byte offsets relative to the per-variant base; the
//! companion-chip attachment additionally shifts every offset left by one
//! (see [`crate::bus::BusVariant`]).

use bitflags::bitflags;

// ============================================================================
// Register Offsets (before variant address shift)
// ============================================================================

/// Command Register
pub const CTL_CMD: u16 = 0x00;

/// Argument Register, low half of the 32-bit argument
pub const CTL_ARG_LOW: u16 = 0x04;

/// Argument Register, high half of the 32-bit argument
pub const CTL_ARG_HIGH: u16 = 0x06;

/// Stop Internal Action Register
pub const CTL_STOP_ACTION: u16 = 0x08;

/// Transfer Block Count Register
pub const CTL_BLOCK_COUNT: u16 = 0x0A;

/// Response Registers (8 consecutive 16-bit words: 0x0C..=0x1A)
pub const CTL_RESPONSE: u16 = 0x0C;

/// Card Status Register (R/W1C event bits plus signal-level bits)
pub const CTL_CARD_STATUS: u16 = 0x1C;

/// Buffer Status Register (R/W1C error and buffer-ready bits)
pub const CTL_BUFFER_STATUS: u16 = 0x1E;

/// Card Interrupt Mask Register (1 = masked)
pub const CTL_CARD_IRQ_MASK: u16 = 0x20;

/// Buffer Interrupt Mask Register (1 = masked)
pub const CTL_BUFFER_IRQ_MASK: u16 = 0x22;

/// Card Clock Control Register
pub const CTL_CLOCK_CTL: u16 = 0x24;

/// Data Length Register (block size in bytes)
pub const CTL_BLOCK_LEN: u16 = 0x26;

/// Data Port Register (FIFO-style, one 16-bit unit per access)
pub const CTL_DATA_PORT: u16 = 0x30;

/// Software Reset Register (0 = hold in reset, 1 = release)
pub const CTL_RESET: u16 = 0xE0;

// ============================================================================
// Command Register (0x00) Bitfields
// ============================================================================

/// Command opcode mask (bits 5:0)
pub const CMD_OPCODE_MASK: u16 = 0x003F;

/// Command type: normal
pub const CMD_TYPE_NORMAL: u16 = 0x0000;

/// Command type: application command (preceded by CMD55)
pub const CMD_TYPE_APP: u16 = 0x0040;

/// Command type: authentication (secure) command
pub const CMD_TYPE_AUTH: u16 = 0x0080;

/// Response class mask (bits 10:8)
pub const CMD_RESP_MASK: u16 = 0x0700;

/// No response expected
pub const CMD_RESP_NONE: u16 = 0x0300;

/// Short (48-bit) response
pub const CMD_RESP_SHORT: u16 = 0x0400;

/// Short (48-bit) response with busy signaling on DAT0
pub const CMD_RESP_SHORT_BUSY: u16 = 0x0500;

/// Long (136-bit) response, CID/CSD class
pub const CMD_RESP_LONG: u16 = 0x0600;

/// Short response without CRC protection (OCR class)
pub const CMD_RESP_SHORT_NOCRC: u16 = 0x0700;

/// Data transfer follows the command
pub const CMD_DATA_PRESENT: u16 = 0x0800;

/// Data transfer direction (1 = read from card)
pub const CMD_READ_TRANSFER: u16 = 0x1000;

/// Multi-block transfer
pub const CMD_MULTI_BLOCK: u16 = 0x2000;

/// Create a command register value from opcode and flag bits
#[inline]
pub const fn make_cmd(opcode: u8, flags: u16) -> u16 {
    (opcode as u16 & CMD_OPCODE_MASK) | (flags & !CMD_OPCODE_MASK)
}

/// Extract the opcode from a command register value
#[inline]
pub const fn cmd_opcode(cmd: u16) -> u8 {
    (cmd & CMD_OPCODE_MASK) as u8
}

// ============================================================================
// Stop Internal Action Register (0x08) Bitfields
// ============================================================================

bitflags! {
    /// Stop Internal Action Register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StopAction: u16 {
        /// Issue a stop-transmission on the bus now
        const ISSUE_NOW = 1 << 0;
        /// Let the controller auto-issue the stop after the last block
        const AUTO_ISSUE = 1 << 8;
    }
}

// ============================================================================
// Card Status Register (0x1C) Bitfields
// ============================================================================

bitflags! {
    /// Card Status Register bits
    ///
    /// Event bits are write-1-to-clear; `SIGNAL_PRESENT` and `WRITE_PROTECT`
    /// reflect the debounced pin level and are read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CardStatus: u16 {
        /// Command response has arrived
        const RESPONSE_END = 1 << 0;
        /// Read/write data transfer has finished
        const DATA_END = 1 << 2;
        /// Card removal detected
        const CARD_REMOVE = 1 << 3;
        /// Card insertion detected
        const CARD_INSERT = 1 << 4;
        /// Debounced card-detect signal level (1 = card present)
        const SIGNAL_PRESENT = 1 << 5;
        /// Write-protect switch level (1 = protected)
        const WRITE_PROTECT = 1 << 7;
    }
}

impl CardStatus {
    /// Event bits, excluding the signal-level bits
    pub const EVENTS: CardStatus = CardStatus::RESPONSE_END
        .union(CardStatus::DATA_END)
        .union(CardStatus::CARD_REMOVE)
        .union(CardStatus::CARD_INSERT);
}

// ============================================================================
// Buffer Status Register (0x1E) Bitfields
// ============================================================================

bitflags! {
    /// Buffer Status Register bits
    ///
    /// All bits except `CMD_BUSY` are write-1-to-clear events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferStatus: u16 {
        /// Response opcode did not match the issued command
        const CMD_INDEX_ERR = 1 << 0;
        /// CRC check failed (command or data phase)
        const CRC_FAIL = 1 << 1;
        /// Stop bit error on the bus
        const STOP_BIT_ERR = 1 << 2;
        /// Data phase timed out
        const DATA_TIMEOUT = 1 << 3;
        /// Receive FIFO overflowed
        const RX_OVERFLOW = 1 << 4;
        /// Transmit FIFO underran
        const TX_UNDERRUN = 1 << 5;
        /// Command phase timed out
        const CMD_TIMEOUT = 1 << 6;
        /// Receive FIFO holds one block, ready to read
        const READ_READY = 1 << 8;
        /// Transmit FIFO has room for one block
        const WRITE_READY = 1 << 9;
        /// Command sequencer busy (level, not an event)
        const CMD_BUSY = 1 << 14;
        /// Register access violated the cell's sequencing rules
        const ILLEGAL_ACCESS = 1 << 15;
    }
}

impl BufferStatus {
    /// All error bits
    pub const ERRORS: BufferStatus = BufferStatus::CMD_INDEX_ERR
        .union(BufferStatus::CRC_FAIL)
        .union(BufferStatus::STOP_BIT_ERR)
        .union(BufferStatus::DATA_TIMEOUT)
        .union(BufferStatus::RX_OVERFLOW)
        .union(BufferStatus::TX_UNDERRUN)
        .union(BufferStatus::CMD_TIMEOUT)
        .union(BufferStatus::ILLEGAL_ACCESS);

    /// Event bits, excluding the busy level bit
    pub const EVENTS: BufferStatus = BufferStatus::ERRORS
        .union(BufferStatus::READ_READY)
        .union(BufferStatus::WRITE_READY);
}

// ============================================================================
// Card Clock Control Register (0x24) Bitfields
// ============================================================================

bitflags! {
    /// Card Clock Control Register bits
    ///
    /// The divisor field is one-hot: bit k selects base_clock / 2^(k+1),
    /// covering ÷2 through ÷512.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClockCtl: u16 {
        const DIV_2 = 1 << 0;
        const DIV_4 = 1 << 1;
        const DIV_8 = 1 << 2;
        const DIV_16 = 1 << 3;
        const DIV_32 = 1 << 4;
        const DIV_64 = 1 << 5;
        const DIV_128 = 1 << 6;
        const DIV_256 = 1 << 7;
        const DIV_512 = 1 << 8;
        /// Gate the card clock on
        const ENABLE = 1 << 9;
        /// SD-mode clocking (as opposed to MMC identification mode)
        const FOR_SD = 1 << 10;
    }
}

impl ClockCtl {
    /// Divisor field mask
    pub const DIV_MASK: ClockCtl = ClockCtl::from_bits_retain(0x01FF);

    /// One-hot divisor bit for 2^(k+1), k in 0..=8
    #[inline]
    pub const fn div_bit(k: u8) -> ClockCtl {
        ClockCtl::from_bits_retain(1u16 << k)
    }
}

// ============================================================================
// Interrupt Mask Registers (0x20, 0x22)
// ============================================================================

/// All events masked (1 = masked)
pub const IRQ_MASK_ALL: u16 = 0xFFFF;

// ============================================================================
// Software Reset Register (0xE0)
// ============================================================================

/// Release the cell from reset
pub const RESET_RELEASE: u16 = 0x0001;

/// Hold the cell in reset
pub const RESET_HOLD: u16 = 0x0000;

// ============================================================================
// SD/MMC Commands
// ============================================================================

/// GO_IDLE_STATE - Resets all cards to idle state
pub const MMC_CMD_GO_IDLE_STATE: u8 = 0;

/// ALL_SEND_CID - Asks all cards to send their CID
pub const MMC_CMD_ALL_SEND_CID: u8 = 2;

/// SELECT/DESELECT_CARD - Toggles card between stand-by and transfer states
pub const MMC_CMD_SELECT_CARD: u8 = 7;

/// SEND_CSD - Asks card to send its CSD
pub const MMC_CMD_SEND_CSD: u8 = 9;

/// SEND_CID - Asks card to send its CID
pub const MMC_CMD_SEND_CID: u8 = 10;

/// STOP_TRANSMISSION - Forces card to stop transmission
pub const MMC_CMD_STOP_TRANSMISSION: u8 = 12;

/// SEND_STATUS - Asks card to send its status
pub const MMC_CMD_SEND_STATUS: u8 = 13;

/// SET_BLOCKLEN - Sets block length for block commands
pub const MMC_CMD_SET_BLOCKLEN: u8 = 16;

/// READ_SINGLE_BLOCK - Reads a single block
pub const MMC_CMD_READ_SINGLE_BLOCK: u8 = 17;

/// READ_MULTIPLE_BLOCK - Continuously reads blocks until STOP_TRANSMISSION
pub const MMC_CMD_READ_MULTIPLE_BLOCK: u8 = 18;

/// WRITE_SINGLE_BLOCK - Writes a single block
pub const MMC_CMD_WRITE_SINGLE_BLOCK: u8 = 24;

/// WRITE_MULTIPLE_BLOCK - Continuously writes blocks until STOP_TRANSMISSION
pub const MMC_CMD_WRITE_MULTIPLE_BLOCK: u8 = 25;

/// APP_CMD - Indicates next command is application specific
pub const MMC_CMD_APP_CMD: u8 = 55;
