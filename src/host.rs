//! Request Lifecycle Manager and Clock/Power Configurator
//!
//! [`Host`] owns one controller instance: the register window, the single
//! in-flight request, and the clock/power settings that persist across
//! requests. The engine is reactive; it advances only on [`Host::submit`]
//! and on [`Host::handle_interrupt`] (see the `irq` module), with the bulk
//! data pump deferrable to [`Host::run_deferred`].
//!
//! Exclusivity: every entry point takes `&mut self`, so a single context
//! cannot interleave submit and dispatch. Across contexts (caller thread
//! vs. interrupt handler), wrap the host in a `spin::Mutex` — one lock per
//! controller instance, no two instances share state.

use alloc::boxed::Box;
use heapless::Deque;

use crate::bus::HostBus;
use crate::command::{self, ResponseKind, ResponseWords};
use crate::regs::*;
use crate::transfer::{DataTransfer, Direction};

/// Depth of the deferred-work queue. One pump token per buffer-ready event;
/// the cell raises at most one per un-drained block.
const WORK_QUEUE_DEPTH: usize = 8;

/// Settling delay after releasing the cell from soft reset (ms)
const RESET_SETTLE_MS: u32 = 10;

/// Settling delay for the power rail ramp (ms)
const POWER_RAMP_MS: u32 = 10;

/// Millisecond delay capability, injected at attach time.
///
/// The engine has no software watchdog; this is used only for the mandated
/// reset/power settling waits.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Per-request error taxonomy. Maps 1:1 to hardware status bits; the engine
/// invents no additional categories. Sticky per request: the first error
/// recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    CommandTimeout,
    CommandCrc,
    DataCrc,
    DataTimeout,
    BufferOverflow,
    BufferUnderflow,
    IllegalAccess,
}

/// Synchronous `submit` contract violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Another request is already in flight on this controller
    Busy,
    /// Bus power is off or still ramping
    PowerOff,
    /// No card present on the bus
    NoCard,
}

/// Bus power state. `RampingUp` is internal to the Off→On sequence and is
/// never a request-serviceable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    RampingUp,
    On,
}

/// A caller-owned command, consumed by the engine for its lifetime.
pub struct Request {
    pub opcode: u8,
    pub arg: u32,
    /// Application command (ACMD, preceded by CMD55)
    pub app: bool,
    pub response: ResponseKind,
    pub data: Option<DataTransfer>,
    /// Issue a stop-transmission after the data phase. Auto-generated for
    /// multi-block transfers by [`Request::transfer`].
    pub auto_stop: bool,
}

impl Request {
    /// A plain command with no data phase.
    pub fn command(opcode: u8, arg: u32, response: ResponseKind) -> Self {
        Self { opcode, arg, app: false, response, data: None, auto_stop: false }
    }

    /// An application command (ACMD) with no data phase.
    pub fn app_command(opcode: u8, arg: u32, response: ResponseKind) -> Self {
        Self { app: true, ..Self::command(opcode, arg, response) }
    }

    /// A command with an attached block transfer. Multi-block transfers get
    /// an auto-generated stop-transmission.
    pub fn transfer(opcode: u8, arg: u32, response: ResponseKind, data: DataTransfer) -> Self {
        let auto_stop = data.block_count() > 1;
        Self {
            opcode,
            arg,
            app: false,
            response,
            data: Some(data),
            auto_stop,
        }
    }
}

/// Final outcome of a request, delivered through the completion callback
/// exactly once.
pub struct Completion {
    pub response: ResponseWords,
    pub bytes_transferred: usize,
    pub error: Option<Error>,
    /// The data transfer, handing the scatter-gather buffers back.
    pub data: Option<DataTransfer>,
}

/// Completion callback; consumed on invocation so it cannot fire twice.
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send>;

/// Card-presence-changed callback (argument: card now present).
pub type PresenceFn = Box<dyn FnMut(bool) + Send>;

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    CommandSent,
    DataPending,
    StopPending,
    Completing,
}

/// Deferred bottom-half work, queued by the top-half dispatcher.
pub(crate) enum Work {
    PumpBlock,
}

pub(crate) struct Active {
    pub opcode: u8,
    pub response_kind: ResponseKind,
    pub auto_stop: bool,
    pub data: Option<DataTransfer>,
    pub response: ResponseWords,
    pub error: Option<Error>,
    pub data_started: bool,
    pub data_end_seen: bool,
    pub complete: Option<CompletionFn>,
}

/// One SD/MMC host controller instance.
pub struct Host<B: HostBus, D: Delay> {
    pub(crate) bus: B,
    delay: D,
    base_clock_hz: u32,
    power: PowerState,
    clock_ctl: ClockCtl,
    pub(crate) phase: Phase,
    pub(crate) active: Option<Active>,
    pub(crate) work: Deque<Work, WORK_QUEUE_DEPTH>,
    pub(crate) presence: Option<PresenceFn>,
    pub(crate) stuck_reported: bool,
}

impl<B: HostBus, D: Delay> Host<B, D> {
    /// Attach to a controller: soft-reset the cell, mask and clear all
    /// events, and leave clock and power off.
    pub fn attach(bus: B, delay: D, base_clock_hz: u32) -> Self {
        let mut host = Self {
            bus,
            delay,
            base_clock_hz,
            power: PowerState::Off,
            clock_ctl: ClockCtl::empty(),
            phase: Phase::Idle,
            active: None,
            work: Deque::new(),
            presence: None,
            stuck_reported: false,
        };

        host.bus.write16(CTL_RESET, RESET_HOLD);
        host.delay.delay_ms(RESET_SETTLE_MS);
        host.bus.write16(CTL_RESET, RESET_RELEASE);
        host.delay.delay_ms(RESET_SETTLE_MS);

        // Quiesce: clock gated, everything masked, stale events cleared.
        host.bus.write16(CTL_CLOCK_CTL, 0);
        host.bus.write16(CTL_CARD_STATUS, CardStatus::EVENTS.bits());
        host.bus.write16(CTL_BUFFER_STATUS, BufferStatus::EVENTS.bits());
        host.apply_idle_masks();

        log::info!(
            "sdhost: attached, base clock {} kHz, card {}",
            base_clock_hz / 1000,
            if host.card_present() { "present" } else { "absent" }
        );
        host
    }

    /// Detach: mask everything, gate the clock, hand the bus back.
    pub fn detach(mut self) -> B {
        self.bus.write16(CTL_CARD_IRQ_MASK, IRQ_MASK_ALL);
        self.bus.write16(CTL_BUFFER_IRQ_MASK, IRQ_MASK_ALL);
        self.bus.write16(CTL_CLOCK_CTL, 0);
        self.bus
    }

    /// Register the card-presence-changed callback.
    pub fn on_card_presence_changed(&mut self, callback: PresenceFn) {
        self.presence = Some(callback);
    }

    /// Debounced card-detect signal level.
    pub fn card_present(&mut self) -> bool {
        CardStatus::from_bits_truncate(self.bus.read16(CTL_CARD_STATUS))
            .contains(CardStatus::SIGNAL_PRESENT)
    }

    /// Write-protect switch level.
    pub fn write_protected(&mut self) -> bool {
        CardStatus::from_bits_truncate(self.bus.read16(CTL_CARD_STATUS))
            .contains(CardStatus::WRITE_PROTECT)
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    // ------------------------------------------------------------------
    // Clock/Power Configurator
    // ------------------------------------------------------------------

    /// Sequence the bus power rail. Off→On passes through `RampingUp` with
    /// the mandated settling delay; no request can be submitted until the
    /// sequence has finished (`submit` checks for `On`).
    pub fn set_power(&mut self, target: PowerState) {
        match (self.power, target) {
            (PowerState::On, PowerState::On) | (PowerState::Off, PowerState::Off) => {}
            (_, PowerState::RampingUp) => {
                log::warn!("sdhost: RampingUp is not an externally requestable power state");
            }
            (PowerState::Off | PowerState::RampingUp, PowerState::On) => {
                self.power = PowerState::RampingUp;
                self.delay.delay_ms(POWER_RAMP_MS);
                self.power = PowerState::On;
                log::debug!("sdhost: bus power on");
            }
            (_, PowerState::Off) => {
                self.bus.write16(CTL_CLOCK_CTL, 0);
                self.clock_ctl = ClockCtl::empty();
                self.power = PowerState::Off;
                log::debug!("sdhost: bus power off");
            }
        }
    }

    /// Program the card clock to the fastest divided rate not exceeding
    /// `hz`: the smallest power-of-two divisor (÷2…÷512) with
    /// `base_clock / div <= hz`. The register is rewritten only when the
    /// encoded value actually changes.
    pub fn set_clock(&mut self, hz: u32) {
        let mut k = 0u8;
        while k < 8 && self.base_clock_hz >> (k + 1) > hz {
            k += 1;
        }
        if self.base_clock_hz >> (k + 1) > hz {
            log::warn!(
                "sdhost: {} Hz below minimum rate {} Hz, clamping to /512",
                hz,
                self.base_clock_hz >> 9
            );
        }

        let ctl = ClockCtl::div_bit(k) | ClockCtl::ENABLE | ClockCtl::FOR_SD;
        if ctl == self.clock_ctl {
            log::trace!("sdhost: clock setting unchanged, skipping rewrite");
            return;
        }

        // Gate the clock off across the divisor change.
        self.bus
            .write16(CTL_CLOCK_CTL, ctl.difference(ClockCtl::ENABLE).bits());
        self.bus.write16(CTL_CLOCK_CTL, ctl.bits());
        self.clock_ctl = ctl;

        log::debug!(
            "sdhost: clock set to {} Hz (requested {} Hz, /{})",
            self.base_clock_hz >> (k + 1),
            hz,
            1u32 << (k + 1)
        );
    }

    // ------------------------------------------------------------------
    // Request Lifecycle Manager
    // ------------------------------------------------------------------

    /// Submit a request. At most one request may be in flight per
    /// controller; a second submission fails synchronously with
    /// [`SubmitError::Busy`] and the new request is dropped, callback
    /// unfired.
    pub fn submit(&mut self, req: Request, complete: CompletionFn) -> Result<(), SubmitError> {
        if self.active.is_some() {
            log::debug!("sdhost: submit while CMD{} in flight",
                self.active.as_ref().map(|a| a.opcode).unwrap_or(0));
            return Err(SubmitError::Busy);
        }
        if self.power != PowerState::On {
            return Err(SubmitError::PowerOff);
        }
        if !self.card_present() {
            return Err(SubmitError::NoCard);
        }

        // Stop-transmission goes through the stop-internal register; the
        // cell tracks the open transfer itself and no bus command is
        // encoded. The response is synthesized locally and the request
        // completes before submit returns.
        if command::is_stop_transmission(req.opcode) {
            self.bus
                .write16(CTL_STOP_ACTION, StopAction::ISSUE_NOW.bits());
            log::debug!("sdhost: CMD12 issued via stop-internal");
            complete(Completion {
                response: command::synthesized_stop_response(),
                bytes_transferred: 0,
                error: None,
                data: None,
            });
            return Ok(());
        }

        let cmd = command::encode(
            req.opcode,
            req.app,
            req.response,
            req.data
                .as_ref()
                .map(|d| (d.direction(), d.block_count() > 1)),
        );

        if let Some(data) = req.data.as_ref() {
            self.bus.write16(CTL_BLOCK_LEN, data.block_size());
            self.bus.write16(CTL_BLOCK_COUNT, data.block_count());
        }

        self.active = Some(Active {
            opcode: req.opcode,
            response_kind: req.response,
            auto_stop: req.auto_stop,
            data: req.data,
            response: [0; 4],
            error: None,
            data_started: false,
            data_end_seen: false,
            complete: Some(complete),
        });
        self.phase = Phase::CommandSent;

        self.set_card_mask(Self::IDLE_CARD_EVENTS | CardStatus::RESPONSE_END);
        self.set_buffer_mask(BufferStatus::ERRORS);

        self.bus.write32(CTL_ARG_LOW, req.arg);
        self.bus.write16(CTL_CMD, cmd);
        log::debug!("sdhost: CMD{} arg={:#010x}", req.opcode, req.arg);
        Ok(())
    }

    /// Drain the deferred-work queue: the bottom-half data pump. Call from
    /// a context allowed to spend per-block time; interruptible between
    /// blocks without leaving the cursor inconsistent.
    pub fn run_deferred(&mut self) {
        while let Some(work) = self.work.pop_front() {
            match work {
                Work::PumpBlock => self.pump_one_block(),
            }
        }
    }

    fn pump_one_block(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // A command-phase error means the data port is never touched.
        if active.error.is_some() {
            return;
        }
        let Some(data) = active.data.as_mut() else {
            return;
        };
        data.pump_block(&mut self.bus);
        let remaining = data.remaining();
        active.data_started = true;
        log::trace!("sdhost: pumped block, {} bytes remaining", remaining);
        self.maybe_finish_data();
    }

    /// Advance out of the data phase once both conditions hold: the cursor
    /// has covered the programmed total and the cell has signaled data-end.
    /// Gating on both keeps top-half/bottom-half ordering from completing a
    /// request before the FIFO is drained.
    pub(crate) fn maybe_finish_data(&mut self) {
        if self.phase != Phase::DataPending {
            return;
        }
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let drained = active.data.as_ref().map(|d| d.is_complete()).unwrap_or(true);
        if !(drained && active.data_end_seen) {
            return;
        }
        if active.auto_stop {
            self.issue_stop();
        }
        self.complete_active();
    }

    /// Issue the auto-generated stop through the stop-internal register.
    /// The cell completes the bus transaction itself, so the state machine
    /// passes through StopPending without waiting for an event.
    pub(crate) fn issue_stop(&mut self) {
        self.phase = Phase::StopPending;
        self.bus
            .write16(CTL_STOP_ACTION, StopAction::ISSUE_NOW.bits());
        log::debug!("sdhost: auto-stop issued");
    }

    /// Record an error (first one wins) and short-circuit to completion,
    /// still issuing a pending stop if the data phase had started.
    pub(crate) fn fail_active(&mut self, error: Error) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.error.is_none() {
            active.error = Some(error);
            log::debug!("sdhost: CMD{} failed: {:?}", active.opcode, error);
        }
        // Drop queued pump work; the data phase is abandoned.
        self.work.clear();
        if self.phase == Phase::DataPending && active.data_started && active.auto_stop {
            self.issue_stop();
        }
        self.complete_active();
    }

    /// Invoke the completion callback exactly once and return to Idle.
    pub(crate) fn complete_active(&mut self) {
        self.phase = Phase::Completing;
        let Some(mut active) = self.active.take() else {
            self.phase = Phase::Idle;
            return;
        };
        self.apply_idle_masks();

        let bytes = active
            .data
            .as_ref()
            .map(|d| d.bytes_transferred())
            .unwrap_or(0);
        log::debug!(
            "sdhost: CMD{} complete, {} bytes, error {:?}",
            active.opcode,
            bytes,
            active.error
        );
        if let Some(complete) = active.complete.take() {
            complete(Completion {
                response: active.response,
                bytes_transferred: bytes,
                error: active.error,
                data: active.data,
            });
        }
        self.phase = Phase::Idle;
    }

    // ------------------------------------------------------------------
    // Interrupt mask management
    // ------------------------------------------------------------------

    /// Card events that stay unmasked while idle: presence changes only.
    pub(crate) const IDLE_CARD_EVENTS: CardStatus =
        CardStatus::CARD_INSERT.union(CardStatus::CARD_REMOVE);

    pub(crate) fn apply_idle_masks(&mut self) {
        self.set_card_mask(Self::IDLE_CARD_EVENTS);
        self.set_buffer_mask(BufferStatus::empty());
    }

    /// Arm the buffer-ready event for the transfer direction and the
    /// data-end event; called on entering the data phase.
    pub(crate) fn arm_data_events(&mut self, direction: Direction) {
        let ready = match direction {
            Direction::Read => BufferStatus::READ_READY,
            Direction::Write => BufferStatus::WRITE_READY,
        };
        self.set_card_mask(
            Self::IDLE_CARD_EVENTS | CardStatus::RESPONSE_END | CardStatus::DATA_END,
        );
        self.set_buffer_mask(BufferStatus::ERRORS | ready);
    }

    fn set_card_mask(&mut self, unmasked: CardStatus) {
        self.bus.write16(CTL_CARD_IRQ_MASK, !unmasked.bits());
    }

    fn set_buffer_mask(&mut self, unmasked: BufferStatus) {
        self.bus.write16(CTL_BUFFER_IRQ_MASK, !unmasked.bits());
    }
}
