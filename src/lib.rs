//! sdhost - SD/MMC host controller command/data engine
//!
//! This library drives the synchronous command/response phase and the
//! asynchronous block-data phase of the SD/MMC bus protocol on a 16-bit
//! register-mapped host cell. The same cell appears behind two hardware
//! attachments (a companion multi-function chip and a general
//! peripheral-interconnect cell); the engine is written once against the
//! [`bus::HostBus`] trait and the per-variant address translation in
//! [`bus::BusVariant`].
//!
//! The engine is reactive: it advances on [`host::Host::submit`] and on
//! [`host::Host::handle_interrupt`], with the per-block FIFO pump
//! deferrable to [`host::Host::run_deferred`] so the highest-priority
//! context stays bounded. Board clock/power sequencing, IRQ wiring and the
//! upper block-storage stack are the embedder's concern.
//!
//! Logging goes through the `log` facade; install whatever logger the
//! platform provides.

#![no_std]

extern crate alloc;

pub mod bus;
pub mod command;
pub mod host;
pub mod irq;
pub mod regs;
pub mod transfer;

pub use bus::{BusVariant, HostBus, Mmio};
pub use command::{ResponseKind, ResponseWords};
pub use host::{
    Completion, CompletionFn, Delay, Error, Host, PowerState, PresenceFn, Request, SubmitError,
};
pub use transfer::{DataTransfer, Direction, GeometryError};

/// A controller shared between the caller context and the interrupt
/// handler: one lock per controller instance, taken for the whole entry
/// point (`submit`, `handle_interrupt`, `run_deferred`).
pub type SharedHost<B, D> = spin::Mutex<host::Host<B, D>>;
