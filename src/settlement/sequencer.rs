//! Transaction Sequencer
//!
//! Owns the custodial signing key's nonce. Every outbound transaction
//! passes through [`TxSequencer::submit`], whose critical section
//! (read nonce, increment, sign, broadcast) is serialized behind one
//! async mutex. The lock is never held across a confirmation wait, so
//! slow blocks do not serialize unrelated wagers.
//!
//! Nonce consumption is optimistic: the nonce advances as soon as it is
//! assigned, before the broadcast outcome is known. A rejected broadcast
//! is a fatal sequencer fault: the nonce is not reused automatically,
//! because a second in-flight transaction with the same nonce can
//! silently replace the first.

use std::sync::Arc;

use k256::ecdsa::SigningKey;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::chain::abi;
use crate::chain::client::{ChainClient, ChainError};
use crate::chain::tx::{sign_legacy, TxError, TxParams};
use crate::chain::types::{Address, TxHash};

/// What a settlement intends a transaction to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// Take the wager stake from the player into the pool.
    Debit,
    /// Pay a prize from the pool to the player.
    Credit,
    /// Burn the player's tokens and send them the equivalent ETH.
    Withdraw,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentKind::Debit => "debit",
            IntentKind::Credit => "credit",
            IntentKind::Withdraw => "withdraw",
        };
        f.write_str(s)
    }
}

/// A logical token movement, before it becomes a transaction.
#[derive(Debug, Clone, Copy)]
pub struct TransactionIntent {
    /// What this movement is for.
    pub kind: IntentKind,
    /// Source of the tokens.
    pub from: Address,
    /// Destination of the tokens (or of the ETH, for a withdrawal).
    pub to: Address,
    /// Whole tokens to move.
    pub amount: u128,
}

/// Errors from submitting a transaction.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// Could not query the node while constructing the sequencer.
    #[error("sequencer startup query failed: {0}")]
    Startup(#[from] ChainError),
    /// Transaction could not be signed.
    #[error("could not sign {kind} transaction at nonce {nonce}: {source}")]
    Signing {
        /// Intent kind being signed.
        kind: IntentKind,
        /// Nonce that was assigned.
        nonce: u64,
        /// Underlying signing failure.
        source: TxError,
    },
    /// The node refused the broadcast. The assigned nonce is consumed
    /// and will not be reused; operator intervention is required.
    #[error("node rejected {kind} broadcast at nonce {nonce}: {source}")]
    Broadcast {
        /// Intent kind being broadcast.
        kind: IntentKind,
        /// Nonce the rejected transaction consumed.
        nonce: u64,
        /// Node-side rejection.
        source: ChainError,
    },
}

/// Gas parameters pinned per sequencer rather than estimated per call,
/// so a signed payload is a pure function of intent, nonce and config.
#[derive(Debug, Clone, Copy)]
pub struct GasConfig {
    /// Gas limit for contract calls.
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: u128,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            gas_limit: 200_000,
            gas_price: 1_000_000_000, // 1 gwei
        }
    }
}

struct SequencerState {
    next_nonce: u64,
}

/// The single writer of the custodial key's transaction sequence.
pub struct TxSequencer {
    client: Arc<dyn ChainClient>,
    key: SigningKey,
    /// Address the key controls; transactions are sent from here.
    pool: Address,
    /// The token contract all calls target.
    contract: Address,
    chain_id: u64,
    gas: GasConfig,
    state: Mutex<SequencerState>,
}

impl TxSequencer {
    /// Construct a sequencer, seeding the nonce from the node's view of
    /// the custodial address.
    pub async fn connect(
        client: Arc<dyn ChainClient>,
        key: SigningKey,
        contract: Address,
        gas: GasConfig,
    ) -> Result<Self, SequencerError> {
        let pool = Address::from_verifying_key(key.verifying_key());
        let chain_id = client.chain_id().await?;
        let next_nonce = client.transaction_count(pool).await?;

        info!(pool = %pool, chain_id, next_nonce, "sequencer connected");
        Ok(Self {
            client,
            key,
            pool,
            contract,
            chain_id,
            gas,
            state: Mutex::new(SequencerState { next_nonce }),
        })
    }

    /// The custodial pool address this sequencer signs for.
    pub fn pool(&self) -> Address {
        self.pool
    }

    /// The nonce the next submission will consume.
    pub async fn next_nonce(&self) -> u64 {
        self.state.lock().await.next_nonce
    }

    /// Sign and broadcast a transaction for `intent`.
    ///
    /// Returns the transaction hash immediately after broadcast; it
    /// does not wait for confirmation.
    pub async fn submit(&self, intent: &TransactionIntent) -> Result<TxHash, SequencerError> {
        let data = match intent.kind {
            IntentKind::Debit | IntentKind::Credit => {
                abi::privileged_transfer(intent.from, intent.to, intent.amount)
            }
            IntentKind::Withdraw => abi::exchange_tokens(intent.amount, intent.to),
        };

        let mut state = self.state.lock().await;
        let nonce = state.next_nonce;
        // Consumed now, before the broadcast outcome is known.
        state.next_nonce += 1;

        let signed = sign_legacy(
            &TxParams {
                nonce,
                gas_price: self.gas.gas_price,
                gas_limit: self.gas.gas_limit,
                to: self.contract,
                value: 0,
                data,
                chain_id: self.chain_id,
            },
            &self.key,
        )
        .map_err(|source| SequencerError::Signing {
            kind: intent.kind,
            nonce,
            source,
        })?;

        match self.client.send_raw_transaction(&signed.raw).await {
            Ok(hash) => {
                info!(
                    kind = %intent.kind,
                    nonce,
                    amount = intent.amount,
                    from = %intent.from,
                    to = %intent.to,
                    tx = %hash,
                    "transaction broadcast"
                );
                Ok(hash)
            }
            Err(source) => {
                error!(
                    kind = %intent.kind,
                    nonce,
                    from = %intent.from,
                    to = %intent.to,
                    %source,
                    "broadcast rejected; nonce consumed, operator intervention required"
                );
                Err(SequencerError::Broadcast {
                    kind: intent.kind,
                    nonce,
                    source,
                })
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::InMemoryChain;

    fn pool_key() -> SigningKey {
        SigningKey::from_slice(&[0x17; 32]).unwrap()
    }

    async fn sequencer_with_chain() -> (TxSequencer, Arc<InMemoryChain>) {
        let owner = Address::from_verifying_key(pool_key().verifying_key());
        let chain = Arc::new(InMemoryChain::new(owner, 1, 31337));
        let sequencer = TxSequencer::connect(
            chain.clone(),
            pool_key(),
            Address([0xcc; 20]),
            GasConfig::default(),
        )
        .await
        .unwrap();
        (sequencer, chain)
    }

    fn debit(player: Address, pool: Address, amount: u128) -> TransactionIntent {
        TransactionIntent {
            kind: IntentKind::Debit,
            from: player,
            to: pool,
            amount,
        }
    }

    #[tokio::test]
    async fn nonces_are_consecutive_with_no_gaps() {
        let (sequencer, chain) = sequencer_with_chain().await;
        let player = Address([0x01; 20]);
        chain.credit_balance(player, 1000);

        for _ in 0..5 {
            sequencer
                .submit(&debit(player, sequencer.pool(), 10))
                .await
                .unwrap();
        }

        assert_eq!(chain.seen_nonces(), vec![0, 1, 2, 3, 4]);
        assert_eq!(sequencer.next_nonce().await, 5);
    }

    #[tokio::test]
    async fn concurrent_submissions_never_share_a_nonce() {
        let (sequencer, chain) = sequencer_with_chain().await;
        let sequencer = Arc::new(sequencer);
        let player = Address([0x01; 20]);
        chain.credit_balance(player, 10_000);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sequencer = Arc::clone(&sequencer);
            handles.push(tokio::spawn(async move {
                sequencer
                    .submit(&debit(player, sequencer.pool(), 10))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut nonces = chain.seen_nonces();
        nonces.sort_unstable();
        assert_eq!(nonces, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn broadcast_rejection_is_fatal_and_consumes_the_nonce() {
        let (sequencer, chain) = sequencer_with_chain().await;
        let player = Address([0x01; 20]);
        chain.credit_balance(player, 1000);

        chain.fail_next_broadcasts(1);
        let err = sequencer
            .submit(&debit(player, sequencer.pool(), 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SequencerError::Broadcast { nonce: 0, .. }));

        // The next submission moves on to nonce 1; nonce 0 is burned.
        assert_eq!(sequencer.next_nonce().await, 1);
    }

    #[tokio::test]
    async fn nonce_seeded_from_node_transaction_count() {
        let owner = Address::from_verifying_key(pool_key().verifying_key());
        let chain = Arc::new(InMemoryChain::new(owner, 1, 31337));
        let player = Address([0x01; 20]);
        chain.credit_balance(player, 1000);

        // Consume nonces 0..3 with a first sequencer.
        let first = TxSequencer::connect(
            chain.clone(),
            pool_key(),
            Address([0xcc; 20]),
            GasConfig::default(),
        )
        .await
        .unwrap();
        for _ in 0..3 {
            first.submit(&debit(player, owner, 10)).await.unwrap();
        }

        // A restarted sequencer resumes at the node-reported count.
        let second = TxSequencer::connect(
            chain.clone(),
            pool_key(),
            Address([0xcc; 20]),
            GasConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(second.next_nonce().await, 3);
    }

    #[tokio::test]
    async fn submitted_transactions_recover_to_the_pool_key() {
        // The mock chain rejects privilegedTransfer from non-owner
        // senders, so a success receipt proves the signature recovered
        // to the custodial address.
        let (sequencer, chain) = sequencer_with_chain().await;
        let player = Address([0x01; 20]);
        chain.credit_balance(player, 100);

        let hash = sequencer
            .submit(&debit(player, sequencer.pool(), 10))
            .await
            .unwrap();
        let receipt = chain.transaction_receipt(hash).await.unwrap().unwrap();
        assert!(receipt.is_success());
    }
}
