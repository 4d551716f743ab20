//! # Casino Settlement Core
//!
//! Settlement engine for a token-casino chat bot. Wagers are settled by
//! moving fungible tokens between a player's wallet and a custodial pool
//! wallet through a smart contract; this crate owns everything between a
//! logical intent ("debit 10 tokens", "credit 23 tokens", "withdraw N
//! tokens to ETH") and a confirmed on-chain transaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 CASINO SETTLEMENT CORE                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── payout.rs   - Game tables, pure payout function         │
//! │                                                              │
//! │  chain/          - Chain boundary (non-deterministic)        │
//! │  ├── types.rs    - Addresses, hashes, receipts               │
//! │  ├── abi.rs      - Contract call encoding                    │
//! │  ├── tx.rs       - EIP-155 transaction signing               │
//! │  ├── client.rs   - ChainClient port + JSON-RPC adapter       │
//! │  └── mock.rs     - In-memory chain for demo and tests        │
//! │                                                              │
//! │  identity/       - Wallet ownership verification             │
//! │  ├── store.rs    - Durable identity -> address table         │
//! │  └── verifier.rs - Challenge/response signing proof          │
//! │                                                              │
//! │  settlement/     - The settlement state machine              │
//! │  ├── gate.rs     - Per-wallet mutual exclusion               │
//! │  ├── sequencer.rs- Nonce ownership, sign + broadcast         │
//! │  ├── confirm.rs  - Receipt polling                           │
//! │  └── orchestrator.rs - Command -> settled outcome            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Correctness properties
//!
//! - The account gate admits at most one in-flight settlement per wallet;
//!   every successful acquire is released on every exit path (RAII guard).
//! - The sequencer is the only writer of the custodial key's nonce; nonces
//!   strictly increase by one per submitted transaction and are never
//!   reused, even when a broadcast is rejected.
//! - Stake debits fail closed: an on-chain revert aborts the wager before
//!   any outcome is drawn. Prize credits and withdrawals retry until a
//!   success receipt exists, so a communicated win is always paid.
//! - The payout calculator is a pure integer function, replayable for audit.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod chain;
pub mod config;
pub mod core;
pub mod identity;
pub mod settlement;

// Re-export the types a transport layer needs
pub use crate::chain::client::ChainClient;
pub use crate::chain::types::{Address, Receipt, TxHash};
pub use crate::core::payout::{payout, GameKind};
pub use crate::settlement::orchestrator::{Command, CommandOutcome, OutcomeSource, SettlementCore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed stake per roll, in whole tokens.
pub const TOKENS_PER_ROLL: u128 = 10;

/// Length of the registration challenge string (62-symbol alphabet).
pub const CHALLENGE_LEN: usize = 16;
