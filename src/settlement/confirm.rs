//! Confirmation Poller
//!
//! Blocks the calling task until a submitted transaction reaches a
//! terminal on-chain state. Receipt-not-found and transient node
//! errors are swallowed and retried on an interval; the transaction
//! may simply not be indexed yet. An on-chain revert is reported, never
//! retried here: the same call would revert identically.

use std::time::Duration;

use tracing::{debug, warn};

use crate::chain::client::ChainClient;
use crate::chain::types::{Receipt, TxHash};

use thiserror::Error;

/// How long to keep polling for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPolicy {
    /// Poll until a receipt exists, however long that takes.
    Unbounded,
    /// Give up with [`ConfirmError::Timeout`] after this many polls.
    BoundedAttempts(u32),
}

/// Errors from awaiting confirmation.
#[derive(Debug, Error)]
pub enum ConfirmError {
    /// The transaction was included but reverted on-chain.
    #[error("transaction {hash} reverted on-chain")]
    Reverted {
        /// Hash of the reverted transaction.
        hash: TxHash,
    },
    /// No receipt appeared within the bounded attempt budget.
    #[error("no receipt for {hash} after {attempts} polls")]
    Timeout {
        /// Hash that never produced a receipt.
        hash: TxHash,
        /// Polls performed before giving up.
        attempts: u32,
    },
}

/// Default interval between receipt queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll until `hash` has a terminal receipt.
///
/// Success (`status == 1`) yields the receipt; a revert yields
/// [`ConfirmError::Reverted`]. Transient query failures are retried
/// silently within the policy's bounds.
pub async fn await_confirmation(
    client: &dyn ChainClient,
    hash: TxHash,
    policy: PollPolicy,
    interval: Duration,
) -> Result<Receipt, ConfirmError> {
    let mut attempts: u32 = 0;
    loop {
        match client.transaction_receipt(hash).await {
            Ok(Some(receipt)) => {
                if receipt.is_success() {
                    debug!(tx = %hash, block = ?receipt.block_number, "transaction confirmed");
                    return Ok(receipt);
                }
                warn!(tx = %hash, status = receipt.status, "transaction reverted");
                return Err(ConfirmError::Reverted { hash });
            }
            Ok(None) => {
                debug!(tx = %hash, attempts, "receipt not yet indexed");
            }
            Err(e) => {
                // Node flake; the transaction may still confirm.
                debug!(tx = %hash, error = %e, "receipt query failed, will retry");
            }
        }

        attempts += 1;
        if let PollPolicy::BoundedAttempts(max) = policy {
            if attempts >= max {
                return Err(ConfirmError::Timeout { hash, attempts });
            }
        }
        tokio::time::sleep(interval).await;
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi;
    use crate::chain::mock::InMemoryChain;
    use crate::chain::tx::{sign_legacy, TxParams};
    use crate::chain::types::Address;
    use k256::ecdsa::SigningKey;

    const INTERVAL: Duration = Duration::from_millis(1);

    fn pool_key() -> SigningKey {
        SigningKey::from_slice(&[0x17; 32]).unwrap()
    }

    async fn submitted_transfer(chain: &InMemoryChain, amount: u128) -> TxHash {
        use crate::chain::client::ChainClient;
        let owner = Address::from_verifying_key(pool_key().verifying_key());
        let player = Address([0x01; 20]);
        let raw = sign_legacy(
            &TxParams {
                nonce: chain.transaction_count(owner).await.unwrap(),
                gas_price: 1,
                gas_limit: 100_000,
                to: Address([0xcc; 20]),
                value: 0,
                data: abi::privileged_transfer(player, owner, amount),
                chain_id: 31337,
            },
            &pool_key(),
        )
        .unwrap()
        .raw;
        chain.send_raw_transaction(&raw).await.unwrap()
    }

    fn funded_chain() -> InMemoryChain {
        let owner = Address::from_verifying_key(pool_key().verifying_key());
        let chain = InMemoryChain::new(owner, 1, 31337);
        chain.credit_balance(Address([0x01; 20]), 100);
        chain
    }

    #[tokio::test]
    async fn success_receipt_terminates_poll() {
        let chain = funded_chain();
        let hash = submitted_transfer(&chain, 10).await;

        let receipt = await_confirmation(&chain, hash, PollPolicy::Unbounded, INTERVAL)
            .await
            .unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.tx_hash, hash);
    }

    #[tokio::test]
    async fn revert_is_reported_not_retried() {
        let chain = funded_chain();
        // More than the player holds: the transfer reverts.
        let hash = submitted_transfer(&chain, 1000).await;

        let err = await_confirmation(&chain, hash, PollPolicy::Unbounded, INTERVAL)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::Reverted { hash: h } if h == hash));
    }

    #[tokio::test]
    async fn not_yet_indexed_is_retried() {
        let chain = funded_chain();
        let hash = submitted_transfer(&chain, 10).await;
        chain.delay_receipts(3);

        let receipt = await_confirmation(&chain, hash, PollPolicy::Unbounded, INTERVAL)
            .await
            .unwrap();
        assert!(receipt.is_success());
    }

    #[tokio::test]
    async fn bounded_policy_times_out_on_unknown_hash() {
        let chain = funded_chain();
        let unknown = TxHash([0xde; 32]);

        let err = await_confirmation(&chain, unknown, PollPolicy::BoundedAttempts(3), INTERVAL)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmError::Timeout { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn bounded_policy_succeeds_within_budget() {
        let chain = funded_chain();
        let hash = submitted_transfer(&chain, 10).await;
        chain.delay_receipts(2);

        let receipt = await_confirmation(&chain, hash, PollPolicy::BoundedAttempts(5), INTERVAL)
            .await
            .unwrap();
        assert!(receipt.is_success());
    }
}
