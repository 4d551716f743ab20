//! The settlement state machine.
//!
//! One settlement at a time per wallet ([`gate`]), one nonce writer for
//! the custodial key ([`sequencer`]), receipt polling with explicit
//! policies ([`confirm`]), composed per chat command by the
//! [`orchestrator`].

pub mod confirm;
pub mod gate;
pub mod orchestrator;
pub mod sequencer;

pub use confirm::{await_confirmation, ConfirmError, PollPolicy};
pub use gate::{AccountGate, GateGuard};
pub use orchestrator::{Command, CommandOutcome, OutcomeSource, SettlementCore};
pub use sequencer::{IntentKind, SequencerError, TransactionIntent, TxSequencer};
