//! Chain boundary.
//!
//! Everything that touches the Ethereum node lives here: address and
//! receipt types, contract call encoding, EIP-155 transaction signing,
//! and the [`client::ChainClient`] port with its JSON-RPC adapter.
//! The settlement layer only ever sees the port, never raw RPC.

pub mod abi;
pub mod client;
pub mod mock;
pub mod tx;
pub mod types;

pub use client::{ChainClient, ChainError, HttpChainClient};
pub use types::{Address, AddressError, Receipt, TxHash};
