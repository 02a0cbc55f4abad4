//! Interrupt Status Reducer/Dispatcher
//!
//! One scheduling opportunity = one call to [`Host::handle_interrupt`].
//! Each pass reads both status registers and both masks, computes
//! `unmasked = status & !mask`, acknowledges the pending event bits (W1C),
//! and dispatches them; it then re-reads and repeats while any unmasked
//! event remains, because the cell can re-raise faster than one dispatch
//! cycle can clear. A bounded iteration count turns a stuck or mis-wired
//! controller into a reported fatal condition instead of a hang.
//!
//! Fixed dispatch order within a pass:
//! 1. card presence changes (insert/remove)
//! 2. buffer error bits
//! 3. response-end
//! 4. buffer-ready (read/write)
//! 5. data-end
//!
//! Errors are ranked before response handling so a command that both
//! latched a response and flagged a CRC failure is failed regardless of the
//! decoded content. Data-end is ranked last so a same-pass buffer-ready is
//! queued before completion is considered.

use crate::bus::HostBus;
use crate::command;
use crate::host::{Delay, Error, Host, Phase, Work};
use crate::regs::*;

/// Reduction passes allowed before the controller is declared stuck.
const MAX_DISPATCH_LOOPS: u32 = 32;

impl<B: HostBus, D: Delay> Host<B, D> {
    /// Run the interrupt reduction loop until no unmasked event remains.
    ///
    /// The bulk data pump is deferred: buffer-ready events only enqueue
    /// work, and the caller drains it with [`Host::run_deferred`] from a
    /// context allowed to spend per-block time.
    pub fn handle_interrupt(&mut self) {
        for _ in 0..MAX_DISPATCH_LOOPS {
            let card = CardStatus::from_bits_truncate(self.bus.read16(CTL_CARD_STATUS));
            let card_mask = CardStatus::from_bits_truncate(self.bus.read16(CTL_CARD_IRQ_MASK));
            let buf = BufferStatus::from_bits_truncate(self.bus.read16(CTL_BUFFER_STATUS));
            let buf_mask = BufferStatus::from_bits_truncate(self.bus.read16(CTL_BUFFER_IRQ_MASK));

            let card_ev = card.difference(card_mask).intersection(CardStatus::EVENTS);
            let buf_ev = buf.difference(buf_mask).intersection(BufferStatus::EVENTS);
            if card_ev.is_empty() && buf_ev.is_empty() {
                return;
            }

            // Acknowledge what this pass will dispatch; bits raised after
            // this read are caught by the next pass.
            self.bus.write16(CTL_CARD_STATUS, card_ev.bits());
            self.bus.write16(CTL_BUFFER_STATUS, buf_ev.bits());

            self.dispatch_pass(card, card_ev, buf_ev);
        }
        self.report_stuck();
    }

    fn dispatch_pass(&mut self, levels: CardStatus, card_ev: CardStatus, buf_ev: BufferStatus) {
        if card_ev.intersects(CardStatus::CARD_INSERT | CardStatus::CARD_REMOVE) {
            self.on_presence_change(levels, card_ev);
        }
        if buf_ev.intersects(BufferStatus::ERRORS) {
            self.on_error_bits(buf_ev);
        }
        if card_ev.contains(CardStatus::RESPONSE_END) {
            self.on_response_end();
        }
        if buf_ev.intersects(BufferStatus::READ_READY | BufferStatus::WRITE_READY) {
            self.on_buffer_ready();
        }
        if card_ev.contains(CardStatus::DATA_END) {
            self.on_data_end();
        }
    }

    /// Insert/remove events, debounced by the hardware signal-state bit.
    /// Removal with a request in flight forces a synthetic error
    /// completion rather than leaving the request pending forever.
    fn on_presence_change(&mut self, levels: CardStatus, card_ev: CardStatus) {
        let present = levels.contains(CardStatus::SIGNAL_PRESENT);
        log::info!("sdhost: card {}", if present { "inserted" } else { "removed" });
        if let Some(callback) = self.presence.as_mut() {
            callback(present);
        }
        if card_ev.contains(CardStatus::CARD_REMOVE) && self.active.is_some() {
            let error = match self.phase {
                Phase::CommandSent => Error::CommandTimeout,
                _ => Error::DataTimeout,
            };
            log::warn!("sdhost: card removed with a request active");
            self.fail_active(error);
        }
    }

    /// Map hardware error bits to the request taxonomy and short-circuit.
    ///
    /// The CRC-fail bit covers both phases; the lifecycle phase decides
    /// which category it lands in. In the command phase the check only
    /// applies to response classes that carry a CRC: the OCR class has
    /// none, so a CRC flag raised for it is acknowledged and ignored.
    /// Index and stop-bit errors are response and data integrity failures
    /// and map to the matching CRC category.
    fn on_error_bits(&mut self, buf_ev: BufferStatus) {
        let in_command_phase = self.phase == Phase::CommandSent;
        let mut errors = buf_ev.intersection(BufferStatus::ERRORS);

        if in_command_phase && errors.contains(BufferStatus::CRC_FAIL) {
            let crc_checked = self
                .active
                .as_ref()
                .map(|a| a.response_kind.crc_checked())
                .unwrap_or(true);
            if !crc_checked {
                log::trace!("sdhost: ignoring CRC flag on a no-CRC response class");
                errors.remove(BufferStatus::CRC_FAIL);
            }
        }
        if errors.is_empty() {
            return;
        }

        let error = if errors.contains(BufferStatus::CMD_TIMEOUT) {
            Error::CommandTimeout
        } else if errors.contains(BufferStatus::CRC_FAIL) {
            if in_command_phase {
                Error::CommandCrc
            } else {
                Error::DataCrc
            }
        } else if errors.contains(BufferStatus::CMD_INDEX_ERR) {
            Error::CommandCrc
        } else if errors.contains(BufferStatus::DATA_TIMEOUT) {
            Error::DataTimeout
        } else if errors.contains(BufferStatus::STOP_BIT_ERR) {
            Error::DataCrc
        } else if errors.contains(BufferStatus::RX_OVERFLOW) {
            Error::BufferOverflow
        } else if errors.contains(BufferStatus::TX_UNDERRUN) {
            Error::BufferUnderflow
        } else {
            Error::IllegalAccess
        };

        if self.active.is_some() {
            self.fail_active(error);
        } else {
            log::warn!("sdhost: stray error status {:?} with no request active", errors);
        }
    }

    /// Response arrived. A command-phase error has already completed the
    /// request earlier in the pass, in which case no decode is attempted.
    fn on_response_end(&mut self) {
        if self.phase != Phase::CommandSent {
            return;
        }

        let mut raw = [0u16; 8];
        for (i, word) in raw.iter_mut().enumerate() {
            *word = self.bus.read16(CTL_RESPONSE + (2 * i) as u16);
        }

        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.response = command::decode_response(raw, active.response_kind);
        let direction = active.data.as_ref().map(|d| d.direction());

        match direction {
            Some(direction) => {
                self.phase = Phase::DataPending;
                self.arm_data_events(direction);
            }
            None => self.complete_active(),
        }
    }

    /// One block is ready in the FIFO (read) or the FIFO has room for one
    /// (write). The pump itself is deferred to bound time spent here.
    fn on_buffer_ready(&mut self) {
        if self.phase != Phase::DataPending {
            return;
        }
        if self.work.push_back(Work::PumpBlock).is_err() {
            // The cell raises one ready event per un-drained block, so the
            // queue can only overflow if deferred work is never being run.
            log::error!("sdhost: deferred pump queue overflow, dropping block event");
        }
    }

    fn on_data_end(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.data_end_seen = true;
        self.maybe_finish_data();
    }

    /// The controller never quiesced within the iteration bound. Reported
    /// once, then the controller is masked and the active request failed;
    /// never retried indefinitely.
    fn report_stuck(&mut self) {
        if self.stuck_reported {
            return;
        }
        self.stuck_reported = true;
        log::error!(
            "sdhost: status bits still pending after {} reduction passes, masking controller",
            MAX_DISPATCH_LOOPS
        );
        self.bus.write16(CTL_CARD_IRQ_MASK, IRQ_MASK_ALL);
        self.bus.write16(CTL_BUFFER_IRQ_MASK, IRQ_MASK_ALL);
        if self.active.is_some() {
            let error = match self.phase {
                Phase::CommandSent => Error::CommandTimeout,
                _ => Error::DataTimeout,
            };
            self.fail_active(error);
        }
    }
}
