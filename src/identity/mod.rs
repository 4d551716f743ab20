//! Identity verification.
//!
//! A chat identity is bound to a wallet by a challenge/response proof:
//! the user signs a server-chosen random message with their wallet key,
//! and the server recovers the signer address. Successful bindings are
//! durably persisted before success is acknowledged.

pub mod store;
pub mod verifier;

pub use store::{StoreError, WalletStore};
pub use verifier::{IdentityVerifier, VerifyError};
