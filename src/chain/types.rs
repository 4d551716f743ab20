//! Chain primitive types.
//!
//! Addresses carry the EIP-55 mixed-case checksum; user-supplied
//! addresses are rejected unless the checksum is exact, matching the
//! registration flow's strictness.

use k256::ecdsa::VerifyingKey;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors from parsing an address string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// Missing `0x` prefix or wrong length.
    #[error("address must be 0x followed by 40 hex characters")]
    Malformed,
    /// Contains a non-hex character.
    #[error("address contains invalid hex")]
    InvalidHex,
    /// Hex is valid but the EIP-55 mixed-case checksum does not match.
    #[error("address checksum mismatch (EIP-55 mixed-case form required)")]
    BadChecksum,
}

/// A 20-byte Ethereum address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(
    /// Raw address bytes.
    pub [u8; 20],
);

impl Address {
    /// Parse a user-supplied address, requiring a valid EIP-55 checksum.
    pub fn parse_checksummed(s: &str) -> Result<Self, AddressError> {
        let addr = Self::parse_any(s)?;
        if addr.to_checksum() != s {
            return Err(AddressError::BadChecksum);
        }
        Ok(addr)
    }

    /// Parse an address in any case, without checksum validation.
    ///
    /// Used for node-reported addresses, which arrive lowercase.
    pub fn parse_any(s: &str) -> Result<Self, AddressError> {
        let hex_part = s.strip_prefix("0x").ok_or(AddressError::Malformed)?;
        if hex_part.len() != 40 {
            return Err(AddressError::Malformed);
        }
        let bytes = hex::decode(hex_part).map_err(|_| AddressError::InvalidHex)?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Address(out))
    }

    /// Derive the address controlled by an ECDSA key: the last 20 bytes
    /// of the Keccak-256 of the uncompressed public key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let encoded = key.to_encoded_point(false);
        // Skip the 0x04 uncompressed-point tag.
        let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// Render the EIP-55 mixed-case checksummed form.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = (digest[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_any(s)
    }
}

/// A 32-byte transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(
    /// Raw hash bytes.
    pub [u8; 32],
);

impl TxHash {
    /// Parse a `0x`-prefixed 64-character hex string.
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix("0x")?;
        let bytes = hex::decode(hex_part).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(TxHash(out))
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A transaction receipt, as reported by the node.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Hash of the transaction this receipt attests.
    pub tx_hash: TxHash,
    /// Execution status: 1 for success, 0 for revert.
    pub status: u64,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
}

impl Receipt {
    /// Whether the transaction executed without reverting.
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

// =============================================================================
// TESTS
// =============================================================================
