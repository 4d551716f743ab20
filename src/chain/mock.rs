//! In-memory chain.
//!
//! Executes the same calldata the sequencer signs: raw transactions are
//! RLP-decoded, the sender is recovered, and `privilegedTransfer` /
//! `exchangeTokens` are applied to an in-memory balance table. Used by
//! the demo binary and the settlement tests; failure injection knobs
//! simulate reverts, rejected broadcasts, and slow receipt indexing.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha3::{Digest, Keccak256};

use super::abi;
use super::client::{ChainClient, ChainError};
use super::tx::{decode_legacy, recover_sender};
use super::types::{Address, Receipt, TxHash};

struct ChainState {
    balances: HashMap<Address, u128>,
    owner: Address,
    rate: u128,
    tx_counts: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    seen_nonces: Vec<u64>,
    forced_reverts: u32,
    broadcast_failures: u32,
    receipt_delay: u32,
    block: u64,
}

/// An in-memory stand-in for the node plus the token contract.
pub struct InMemoryChain {
    chain_id: u64,
    inner: Mutex<ChainState>,
}

impl InMemoryChain {
    /// Create a chain with the given pool owner and exchange rate.
    pub fn new(owner: Address, rate: u128, chain_id: u64) -> Self {
        Self {
            chain_id,
            inner: Mutex::new(ChainState {
                balances: HashMap::new(),
                owner,
                rate,
                tx_counts: HashMap::new(),
                receipts: HashMap::new(),
                seen_nonces: Vec::new(),
                forced_reverts: 0,
                broadcast_failures: 0,
                receipt_delay: 0,
                block: 0,
            }),
        }
    }

    /// Mint tokens to an address.
    pub fn credit_balance(&self, address: Address, amount: u128) {
        let mut state = self.lock();
        *state.balances.entry(address).or_insert(0) += amount;
    }

    /// Current token balance of an address.
    pub fn balance(&self, address: Address) -> u128 {
        self.lock().balances.get(&address).copied().unwrap_or(0)
    }

    /// Force the next `n` submitted transactions to revert on-chain.
    pub fn force_revert_next(&self, n: u32) {
        self.lock().forced_reverts = n;
    }

    /// Reject the next `n` broadcasts at the node (never enter the pool).
    pub fn fail_next_broadcasts(&self, n: u32) {
        self.lock().broadcast_failures = n;
    }

    /// Answer the next `n` receipt queries with "not yet indexed".
    pub fn delay_receipts(&self, n: u32) {
        self.lock().receipt_delay = n;
    }

    /// Nonces of every accepted transaction, in broadcast order.
    pub fn seen_nonces(&self) -> Vec<u64> {
        self.lock().seen_nonces.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a contract call, returning the execution status.
    fn execute(state: &mut ChainState, sender: Address, data: &[u8]) -> u64 {
        if data.len() < 4 {
            return 0;
        }
        let (selector, args) = data.split_at(4);

        if selector == &abi::privileged_transfer(state.owner, state.owner, 0)[..4] {
            // Only the contract owner may move other wallets' tokens.
            if sender != state.owner || args.len() != 96 {
                return 0;
            }
            let from = match abi::decode_address(&args[..32]) {
                Ok(a) => a,
                Err(_) => return 0,
            };
            let to = match abi::decode_address(&args[32..64]) {
                Ok(a) => a,
                Err(_) => return 0,
            };
            let amount = match abi::decode_uint(&args[64..]) {
                Some(v) => v,
                None => return 0,
            };
            let from_balance = state.balances.get(&from).copied().unwrap_or(0);
            if from_balance < amount {
                return 0;
            }
            state.balances.insert(from, from_balance - amount);
            *state.balances.entry(to).or_insert(0) += amount;
            1
        } else if selector == &abi::exchange_tokens(0, state.owner)[..4] {
            if sender != state.owner || args.len() != 64 {
                return 0;
            }
            let amount = match abi::decode_uint(&args[..32]) {
                Some(v) => v,
                None => return 0,
            };
            let to = match abi::decode_address(&args[32..]) {
                Ok(a) => a,
                Err(_) => return 0,
            };
            let balance = state.balances.get(&to).copied().unwrap_or(0);
            if balance < amount {
                return 0;
            }
            state.balances.insert(to, balance - amount);
            1
        } else {
            0
        }
    }
}

#[async_trait]
impl ChainClient for InMemoryChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.chain_id)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        Ok(self.lock().tx_counts.get(&address).copied().unwrap_or(0))
    }

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError> {
        Ok(self.balance(address))
    }

    async fn owner(&self) -> Result<Address, ChainError> {
        Ok(self.lock().owner)
    }

    async fn exchange_rate(&self) -> Result<u128, ChainError> {
        Ok(self.lock().rate)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError> {
        let mut state = self.lock();

        if state.broadcast_failures > 0 {
            state.broadcast_failures -= 1;
            return Err(ChainError::Rpc {
                code: -32000,
                message: "transaction rejected by node".into(),
            });
        }

        let decoded = decode_legacy(raw)
            .map_err(|e| ChainError::Rpc { code: -32000, message: e.to_string() })?;
        let sender = recover_sender(&decoded)
            .map_err(|e| ChainError::Rpc { code: -32000, message: e.to_string() })?;

        let expected = state.tx_counts.get(&sender).copied().unwrap_or(0);
        if decoded.nonce < expected {
            return Err(ChainError::Rpc {
                code: -32000,
                message: format!("nonce too low: got {}, expected {}", decoded.nonce, expected),
            });
        }
        state.tx_counts.insert(sender, decoded.nonce + 1);
        state.seen_nonces.push(decoded.nonce);

        let status = if state.forced_reverts > 0 {
            state.forced_reverts -= 1;
            0
        } else {
            Self::execute(&mut state, sender, &decoded.data)
        };

        state.block += 1;
        let hash = TxHash(Keccak256::digest(raw).into());
        let block = state.block;
        state.receipts.insert(
            hash,
            Receipt {
                tx_hash: hash,
                status,
                block_number: Some(block),
            },
        );
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ChainError> {
        let mut state = self.lock();
        if state.receipt_delay > 0 {
            state.receipt_delay -= 1;
            return Ok(None);
        }
        Ok(state.receipts.get(&hash).cloned())
    }
}

// =============================================================================
// TESTS
// =============================================================================
