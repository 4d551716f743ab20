//! Deterministic core primitives.
//!
//! Everything in this module is pure: no I/O, no clocks, no shared state.
//! The payout table is replayed for auditing, so identical inputs must
//! produce identical outputs on every platform.

pub mod payout;

pub use payout::{payout, GameKind};
