//! EIP-155 transaction signing.
//!
//! The sequencer signs legacy (pre-typed) transactions: an RLP list of
//! `[nonce, gasPrice, gasLimit, to, value, data, v, r, s]` where
//! `v = chain_id * 2 + 35 + recovery_parity`. Decoding exists for the
//! in-memory chain, which executes the calldata it is handed.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use super::types::{Address, TxHash};

/// Errors from building, signing, or decoding a transaction.
#[derive(Debug, Error)]
pub enum TxError {
    /// The ECDSA signing operation failed.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The raw bytes are not a well-formed legacy transaction.
    #[error("malformed transaction: {0}")]
    Malformed(&'static str),
    /// Signature recovery failed.
    #[error("could not recover sender: {0}")]
    Recovery(String),
}

/// Unsigned fields of a legacy contract call.
#[derive(Debug, Clone)]
pub struct TxParams {
    /// Sender nonce.
    pub nonce: u64,
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// Destination contract.
    pub to: Address,
    /// ETH value (always zero for token calls).
    pub value: u128,
    /// ABI-encoded calldata.
    pub data: Vec<u8>,
    /// EIP-155 chain id.
    pub chain_id: u64,
}

/// A signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// RLP-encoded signed payload.
    pub raw: Vec<u8>,
    /// Keccak-256 of `raw`; the identifier the node reports back.
    pub hash: TxHash,
}

/// Sign a legacy transaction with EIP-155 replay protection.
pub fn sign_legacy(params: &TxParams, key: &SigningKey) -> Result<SignedTransaction, TxError> {
    let sighash = signing_hash(params);
    let (signature, recovery_id): (Signature, RecoveryId) = key
        .sign_prehash_recoverable(&sighash)
        .map_err(|e| TxError::Signing(e.to_string()))?;

    let v = params.chain_id * 2 + 35 + recovery_id.to_byte() as u64;
    let sig_bytes = signature.to_bytes();
    let (r, s) = sig_bytes.split_at(32);

    let mut payload = Vec::new();
    encode_fields(&mut payload, params);
    rlp_uint(&mut payload, v as u128);
    rlp_bytes(&mut payload, strip_leading_zeros(r));
    rlp_bytes(&mut payload, strip_leading_zeros(s));
    let raw = rlp_list(payload);

    let hash = TxHash(Keccak256::digest(&raw).into());
    Ok(SignedTransaction { raw, hash })
}

/// The Keccak-256 digest the sender signs:
/// `keccak(rlp([nonce, gasPrice, gasLimit, to, value, data, chain_id, 0, 0]))`.
fn signing_hash(params: &TxParams) -> [u8; 32] {
    let mut payload = Vec::new();
    encode_fields(&mut payload, params);
    rlp_uint(&mut payload, params.chain_id as u128);
    rlp_uint(&mut payload, 0);
    rlp_uint(&mut payload, 0);
    Keccak256::digest(rlp_list(payload)).into()
}

fn encode_fields(out: &mut Vec<u8>, params: &TxParams) {
    rlp_uint(out, params.nonce as u128);
    rlp_uint(out, params.gas_price);
    rlp_uint(out, params.gas_limit as u128);
    rlp_bytes(out, params.to.as_bytes());
    rlp_uint(out, params.value);
    rlp_bytes(out, &params.data);
}

/// A decoded legacy transaction, as seen by the in-memory chain.
#[derive(Debug, Clone)]
pub struct DecodedTx {
    /// Sender nonce.
    pub nonce: u64,
    /// Destination contract.
    pub to: Address,
    /// ABI-encoded calldata.
    pub data: Vec<u8>,
    /// EIP-155 v value.
    pub v: u64,
    /// Signature r component (32 bytes, left-padded).
    pub r: [u8; 32],
    /// Signature s component (32 bytes, left-padded).
    pub s: [u8; 32],
    /// Gas price in wei.
    pub gas_price: u128,
    /// Gas limit.
    pub gas_limit: u64,
    /// ETH value.
    pub value: u128,
}

impl DecodedTx {
    /// Chain id encoded in `v`, if EIP-155 protected.
    pub fn chain_id(&self) -> Option<u64> {
        if self.v >= 35 {
            Some((self.v - 35) / 2)
        } else {
            None
        }
    }
}

/// Decode a raw legacy transaction.
pub fn decode_legacy(raw: &[u8]) -> Result<DecodedTx, TxError> {
    let (items, rest) = rlp_decode_list(raw)?;
    if !rest.is_empty() {
        return Err(TxError::Malformed("trailing bytes after transaction"));
    }
    if items.len() != 9 {
        return Err(TxError::Malformed("expected 9 fields"));
    }

    let to_bytes: [u8; 20] = items[3]
        .as_slice()
        .try_into()
        .map_err(|_| TxError::Malformed("to is not 20 bytes"))?;

    Ok(DecodedTx {
        nonce: decode_uint(&items[0])? as u64,
        gas_price: decode_uint(&items[1])?,
        gas_limit: decode_uint(&items[2])? as u64,
        to: Address(to_bytes),
        value: decode_uint(&items[4])?,
        data: items[5].clone(),
        v: decode_uint(&items[6])? as u64,
        r: pad32(&items[7])?,
        s: pad32(&items[8])?,
    })
}

/// Recover the sender address of a decoded EIP-155 transaction.
pub fn recover_sender(tx: &DecodedTx) -> Result<Address, TxError> {
    let chain_id = tx
        .chain_id()
        .ok_or(TxError::Malformed("missing EIP-155 chain id"))?;
    let parity = (tx.v - 35 - chain_id * 2) as u8;

    let params = TxParams {
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: tx.to,
        value: tx.value,
        data: tx.data.clone(),
        chain_id,
    };
    let sighash = signing_hash(&params);

    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(&tx.r);
    sig_bytes[32..].copy_from_slice(&tx.s);
    let signature =
        Signature::try_from(&sig_bytes[..]).map_err(|e| TxError::Recovery(e.to_string()))?;
    let recovery_id =
        RecoveryId::try_from(parity).map_err(|e| TxError::Recovery(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(&sighash, &signature, recovery_id)
        .map_err(|e| TxError::Recovery(e.to_string()))?;
    Ok(Address::from_verifying_key(&key))
}

// =============================================================================
// RLP
// =============================================================================

fn rlp_bytes(out: &mut Vec<u8>, data: &[u8]) {
    if data.len() == 1 && data[0] < 0x80 {
        out.push(data[0]);
    } else if data.len() < 56 {
        out.push(0x80 + data.len() as u8);
        out.extend_from_slice(data);
    } else {
        let len_be = (data.len() as u64).to_be_bytes();
        let len_bytes = strip_leading_zeros(&len_be);
        out.push(0xb7 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
        out.extend_from_slice(data);
    }
}

fn rlp_uint(out: &mut Vec<u8>, value: u128) {
    rlp_bytes(out, strip_leading_zeros(&value.to_be_bytes()));
}

fn rlp_list(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 9);
    if payload.len() < 56 {
        out.push(0xc0 + payload.len() as u8);
    } else {
        let len_be = (payload.len() as u64).to_be_bytes();
        let len_bytes = strip_leading_zeros(&len_be);
        out.push(0xf7 + len_bytes.len() as u8);
        out.extend_from_slice(len_bytes);
    }
    out.extend_from_slice(&payload);
    out
}

/// Minimal big-endian representation; zero encodes as the empty string.
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

fn pad32(bytes: &[u8]) -> Result<[u8; 32], TxError> {
    if bytes.len() > 32 {
        return Err(TxError::Malformed("signature component too long"));
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

fn decode_uint(bytes: &[u8]) -> Result<u128, TxError> {
    if bytes.len() > 16 {
        return Err(TxError::Malformed("integer field too long"));
    }
    let mut out = [0u8; 16];
    out[16 - bytes.len()..].copy_from_slice(bytes);
    Ok(u128::from_be_bytes(out))
}

/// Decode the outer RLP list into its item payloads.
fn rlp_decode_list(raw: &[u8]) -> Result<(Vec<Vec<u8>>, &[u8]), TxError> {
    if raw.is_empty() {
        return Err(TxError::Malformed("empty input"));
    }
    let prefix = raw[0];
    let (payload_len, header_len) = if (0xc0..=0xf7).contains(&prefix) {
        ((prefix - 0xc0) as usize, 1)
    } else if prefix > 0xf7 {
        let len_len = (prefix - 0xf7) as usize;
        if raw.len() < 1 + len_len {
            return Err(TxError::Malformed("truncated list length"));
        }
        let mut len = 0usize;
        for b in &raw[1..1 + len_len] {
            len = len << 8 | *b as usize;
        }
        (len, 1 + len_len)
    } else {
        return Err(TxError::Malformed("not a list"));
    };

    if raw.len() < header_len + payload_len {
        return Err(TxError::Malformed("truncated list payload"));
    }
    let mut payload = &raw[header_len..header_len + payload_len];
    let rest = &raw[header_len + payload_len..];

    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, remaining) = rlp_decode_item(payload)?;
        items.push(item);
        payload = remaining;
    }
    Ok((items, rest))
}

/// Decode one RLP string item.
fn rlp_decode_item(raw: &[u8]) -> Result<(Vec<u8>, &[u8]), TxError> {
    let prefix = raw[0];
    if prefix < 0x80 {
        return Ok((vec![prefix], &raw[1..]));
    }
    if prefix <= 0xb7 {
        let len = (prefix - 0x80) as usize;
        if raw.len() < 1 + len {
            return Err(TxError::Malformed("truncated string"));
        }
        return Ok((raw[1..1 + len].to_vec(), &raw[1 + len..]));
    }
    if prefix <= 0xbf {
        let len_len = (prefix - 0xb7) as usize;
        if raw.len() < 1 + len_len {
            return Err(TxError::Malformed("truncated string length"));
        }
        let mut len = 0usize;
        for b in &raw[1..1 + len_len] {
            len = len << 8 | *b as usize;
        }
        if raw.len() < 1 + len_len + len {
            return Err(TxError::Malformed("truncated string"));
        }
        return Ok((raw[1 + len_len..1 + len_len + len].to_vec(), &raw[1 + len_len + len..]));
    }
    Err(TxError::Malformed("nested list in transaction field"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi;

    fn test_key() -> SigningKey {
        SigningKey::from_slice(
            &hex::decode("ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80")
                .unwrap(),
        )
        .unwrap()
    }

    fn test_params() -> TxParams {
        TxParams {
            nonce: 7,
            gas_price: 1_000_000_000,
            gas_limit: 200_000,
            to: Address([0x42; 20]),
            value: 0,
            data: abi::privileged_transfer(Address([0x11; 20]), Address([0x22; 20]), 10),
            chain_id: 11155111, // sepolia
        }
    }

    #[test]
    fn sign_decode_round_trip() {
        let key = test_key();
        let signed = sign_legacy(&test_params(), &key).unwrap();
        let decoded = decode_legacy(&signed.raw).unwrap();

        assert_eq!(decoded.nonce, 7);
        assert_eq!(decoded.to, Address([0x42; 20]));
        assert_eq!(decoded.data, test_params().data);
        assert_eq!(decoded.chain_id(), Some(11155111));
    }

    #[test]
    fn sender_recovers_to_signing_key() {
        let key = test_key();
        let expected = Address::from_verifying_key(key.verifying_key());

        let signed = sign_legacy(&test_params(), &key).unwrap();
        let decoded = decode_legacy(&signed.raw).unwrap();
        assert_eq!(recover_sender(&decoded).unwrap(), expected);
    }

    #[test]
    fn hash_is_keccak_of_raw() {
        let signed = sign_legacy(&test_params(), &test_key()).unwrap();
        let digest: [u8; 32] = Keccak256::digest(&signed.raw).into();
        assert_eq!(signed.hash, TxHash(digest));
    }

    #[test]
    fn different_nonces_produce_different_hashes() {
        let key = test_key();
        let mut params = test_params();
        let first = sign_legacy(&params, &key).unwrap();
        params.nonce += 1;
        let second = sign_legacy(&params, &key).unwrap();
        assert_ne!(first.hash, second.hash);
    }

    #[test]
    fn rlp_uint_zero_is_empty_string() {
        let mut out = Vec::new();
        rlp_uint(&mut out, 0);
        assert_eq!(out, vec![0x80]);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_legacy(&[]).is_err());
        assert!(decode_legacy(&[0x01, 0x02]).is_err());
        assert!(decode_legacy(&[0xc3, 0x01, 0x02, 0x03]).is_err()); // 3 fields
    }
}
