//! Command Encoder / Response Decoder
//!
//! Translates a logical command into the cell's command register bit
//! pattern and normalizes the raw response registers back into 32-bit
//! response words. The Long (136-bit) response class needs a one-byte
//! realignment because the cell delivers the CRC-stripped response one byte
//! short of natural 32-bit alignment; see [`decode_response`].

use crate::regs::*;
use crate::transfer::Direction;

/// Normalized response words. For Short classes only word 0 is meaningful;
/// for the Long class all four words carry the realigned 120-bit payload.
pub type ResponseWords = [u32; 4];

/// Expected response class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// No response (e.g. CMD0)
    None,
    /// 48-bit response (R1/R6/R7)
    Short,
    /// 48-bit response with busy signaling (R1b)
    ShortBusy,
    /// 136-bit CID/CSD response (R2)
    Long,
    /// 48-bit response without CRC (R3, OCR)
    ShortNoCrc,
}

impl ResponseKind {
    /// Whether the hardware CRC check applies to this class.
    pub fn crc_checked(self) -> bool {
        !matches!(self, ResponseKind::None | ResponseKind::ShortNoCrc)
    }

    fn flag_bits(self) -> u16 {
        match self {
            ResponseKind::None => CMD_RESP_NONE,
            ResponseKind::Short => CMD_RESP_SHORT,
            ResponseKind::ShortBusy => CMD_RESP_SHORT_BUSY,
            ResponseKind::Long => CMD_RESP_LONG,
            ResponseKind::ShortNoCrc => CMD_RESP_SHORT_NOCRC,
        }
    }
}

/// Whether an opcode must bypass the command register and go through the
/// StopInternal register instead. The cell tracks the open multi-block
/// transfer itself, so no bus transaction is encoded for it here.
#[inline]
pub fn is_stop_transmission(opcode: u8) -> bool {
    opcode == MMC_CMD_STOP_TRANSMISSION
}

/// Encode a command register value.
///
/// `data` describes an attached transfer: direction and whether more than
/// one block is programmed. Callers must not pass the stop-transmission
/// opcode here (checked via `debug_assert`); it has no command-register
/// encoding.
pub fn encode(
    opcode: u8,
    app: bool,
    kind: ResponseKind,
    data: Option<(Direction, bool)>,
) -> u16 {
    debug_assert!(!is_stop_transmission(opcode));

    let mut flags = kind.flag_bits();
    flags |= if app { CMD_TYPE_APP } else { CMD_TYPE_NORMAL };

    if let Some((direction, multi)) = data {
        flags |= CMD_DATA_PRESENT;
        if direction == Direction::Read {
            flags |= CMD_READ_TRANSFER;
        }
        if multi {
            flags |= CMD_MULTI_BLOCK;
        }
    }

    make_cmd(opcode, flags)
}

/// The canned response reported for a locally issued stop-transmission.
/// The cell completes the bus transaction itself and latches no response
/// words for it.
pub fn synthesized_stop_response() -> ResponseWords {
    [0; 4]
}

/// Decode the eight raw 16-bit response register reads into normalized
/// response words.
///
/// The raw words are given in ascending register order. Consecutive pairs
/// concatenate little-end first into four 32-bit words. For the Long class
/// the cell delivers the 120-bit CRC-stripped payload one byte short of
/// 32-bit alignment, so the reassembled array is shifted left by one byte,
/// splicing in the top byte of the following word; the final word's low
/// byte ends up zero. For the no-CRC (OCR) class only the last read word is
/// significant and returned as word 0.
pub fn decode_response(raw: [u16; 8], kind: ResponseKind) -> ResponseWords {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = raw[2 * i] as u32 | ((raw[2 * i + 1] as u32) << 16);
    }

    match kind {
        ResponseKind::None => [0; 4],
        ResponseKind::Long => [
            (words[0] << 8) | (words[1] >> 24),
            (words[1] << 8) | (words[2] >> 24),
            (words[2] << 8) | (words[3] >> 24),
            words[3] << 8,
        ],
        ResponseKind::ShortNoCrc => [words[3], 0, 0, 0],
        ResponseKind::Short | ResponseKind::ShortBusy => [words[0], 0, 0, 0],
    }
}
