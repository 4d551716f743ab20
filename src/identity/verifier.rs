//! Challenge/response wallet verification.
//!
//! `begin_verification` hands the user a random message; the user signs
//! it with their wallet (EIP-191 personal-sign) and sends the signature
//! back. `complete_verification` recovers the signer and, on a match,
//! durably records the identity -> address binding before reporting
//! success.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tracing::info;

use crate::chain::types::{Address, AddressError};
use crate::identity::store::{StoreError, WalletStore};
use crate::CHALLENGE_LEN;

/// Errors from the verification flow.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The claimed address is not a checksum-valid Ethereum address.
    #[error("invalid wallet address: {0}")]
    InvalidAddress(#[from] AddressError),
    /// `complete_verification` called with no challenge outstanding.
    #[error("no pending verification for this identity")]
    NoPendingChallenge,
    /// The signature parsed, but recovers to a different address.
    #[error("signature does not match the claimed wallet address")]
    SignatureMismatch,
    /// The signature could not be parsed at all.
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
    /// Persisting the binding failed; the registration is not complete.
    #[error("could not persist registration: {0}")]
    Store(#[from] StoreError),
}

/// A successfully verified identity -> wallet binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Chat identity (e.g. a username).
    pub identity: String,
    /// The wallet the identity proved control of.
    pub wallet: Address,
}

struct PendingVerification {
    wallet: Address,
    challenge: String,
}

/// The verifier: pending challenges plus the durable wallet table.
pub struct IdentityVerifier {
    store: Arc<WalletStore>,
    pending: Mutex<HashMap<String, PendingVerification>>,
}

impl IdentityVerifier {
    /// Create a verifier over an existing wallet store.
    pub fn new(store: Arc<WalletStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) verification for an identity.
    ///
    /// Validates the claimed address strictly (EIP-55 mixed-case
    /// checksum) and returns the challenge message the user must sign.
    /// Any previous pending challenge for this identity is replaced.
    pub fn begin_verification(
        &self,
        identity: &str,
        claimed_address: &str,
    ) -> Result<String, VerifyError> {
        let wallet = Address::parse_checksummed(claimed_address)?;

        let challenge: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(CHALLENGE_LEN)
            .map(char::from)
            .collect();

        self.lock_pending().insert(
            identity.to_string(),
            PendingVerification {
                wallet,
                challenge: challenge.clone(),
            },
        );

        info!(identity, wallet = %wallet, "verification challenge issued");
        Ok(challenge)
    }

    /// Complete verification with the user-supplied signature.
    ///
    /// On success the binding is persisted before the pending entry is
    /// discarded, so an acknowledged registration always survives a
    /// crash. On mismatch the pending entry is kept and the user may
    /// retry with the same challenge.
    pub fn complete_verification(
        &self,
        identity: &str,
        signature: &str,
    ) -> Result<Account, VerifyError> {
        let (wallet, challenge) = {
            let pending = self.lock_pending();
            let entry = pending.get(identity).ok_or(VerifyError::NoPendingChallenge)?;
            (entry.wallet, entry.challenge.clone())
        };

        let recovered = recover_personal_signer(&challenge, signature)?;
        if recovered != wallet {
            return Err(VerifyError::SignatureMismatch);
        }

        // Durable write first; only then is the challenge consumed.
        self.store.insert(identity, wallet)?;
        self.lock_pending().remove(identity);

        info!(identity, wallet = %wallet, "wallet registered");
        Ok(Account {
            identity: identity.to_string(),
            wallet,
        })
    }

    /// The registered wallet of an identity, if any.
    pub fn lookup(&self, identity: &str) -> Option<Address> {
        self.store.get(identity)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingVerification>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Recover the address that personal-signed `message`.
///
/// The signature is the usual 65-byte `r || s || v` hex blob, with `v`
/// accepted as 0/1 or 27/28.
fn recover_personal_signer(message: &str, signature: &str) -> Result<Address, VerifyError> {
    let bytes = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| VerifyError::MalformedSignature(format!("invalid hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(VerifyError::MalformedSignature(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }

    let parity = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        0 | 1 => bytes[64],
        other => {
            return Err(VerifyError::MalformedSignature(format!(
                "recovery id must be 0/1 or 27/28, got {other}"
            )))
        }
    };
    let recovery_id = RecoveryId::try_from(parity)
        .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
    let sig = Signature::try_from(&bytes[..64])
        .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;

    let prehash = personal_sign_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
    Ok(Address::from_verifying_key(&key))
}

/// EIP-191 personal-sign digest:
/// `keccak("\x19Ethereum Signed Message:\n" + len(message) + message)`.
fn personal_sign_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use tempfile::tempdir;

    fn new_verifier() -> (IdentityVerifier, Arc<WalletStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(WalletStore::load(dir.path().join("users.json")).unwrap());
        (IdentityVerifier::new(store.clone()), store, dir)
    }

    fn sign_personal(key: &SigningKey, message: &str) -> String {
        let prehash = personal_sign_hash(message);
        let (sig, recid) = key.sign_prehash_recoverable(&prehash).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }

    fn wallet_of(key: &SigningKey) -> Address {
        Address::from_verifying_key(key.verifying_key())
    }

    #[test]
    fn full_verification_round_trip() {
        let (verifier, store, _dir) = new_verifier();
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let wallet = wallet_of(&key);

        let challenge = verifier
            .begin_verification("alice", &wallet.to_checksum())
            .unwrap();
        assert_eq!(challenge.len(), CHALLENGE_LEN);
        assert!(challenge.chars().all(|c| c.is_ascii_alphanumeric()));

        let account = verifier
            .complete_verification("alice", &sign_personal(&key, &challenge))
            .unwrap();
        assert_eq!(account.wallet, wallet);
        assert_eq!(store.get("alice"), Some(wallet));

        // Challenge consumed: a second attempt has nothing pending.
        assert!(matches!(
            verifier.complete_verification("alice", &sign_personal(&key, &challenge)),
            Err(VerifyError::NoPendingChallenge)
        ));
    }

    #[test]
    fn wrong_key_is_a_mismatch_and_challenge_survives() {
        let (verifier, store, _dir) = new_verifier();
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let intruder = SigningKey::from_slice(&[0x22; 32]).unwrap();
        let wallet = wallet_of(&key);

        let challenge = verifier
            .begin_verification("alice", &wallet.to_checksum())
            .unwrap();

        let result =
            verifier.complete_verification("alice", &sign_personal(&intruder, &challenge));
        assert!(matches!(result, Err(VerifyError::SignatureMismatch)));
        assert_eq!(store.get("alice"), None);

        // The user can retry with the correct key against the same challenge.
        assert!(verifier
            .complete_verification("alice", &sign_personal(&key, &challenge))
            .is_ok());
    }

    #[test]
    fn cross_challenge_signature_fails() {
        let (verifier, _store, _dir) = new_verifier();
        let alice_key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let bob_key = SigningKey::from_slice(&[0x22; 32]).unwrap();

        let alice_challenge = verifier
            .begin_verification("alice", &wallet_of(&alice_key).to_checksum())
            .unwrap();
        let _bob_challenge = verifier
            .begin_verification("bob", &wallet_of(&bob_key).to_checksum())
            .unwrap();

        // Bob signs Alice's challenge; it must not verify Bob.
        let result =
            verifier.complete_verification("bob", &sign_personal(&bob_key, &alice_challenge));
        assert!(matches!(result, Err(VerifyError::SignatureMismatch)));
    }

    #[test]
    fn malformed_signatures_are_distinct_from_mismatch() {
        let (verifier, _store, _dir) = new_verifier();
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        verifier
            .begin_verification("alice", &wallet_of(&key).to_checksum())
            .unwrap();

        for bad in ["nonsense", "0x1234", &format!("0x{}", "ab".repeat(64))] {
            assert!(matches!(
                verifier.complete_verification("alice", bad),
                Err(VerifyError::MalformedSignature(_))
            ));
        }
    }

    #[test]
    fn new_registration_replaces_pending_challenge() {
        let (verifier, _store, _dir) = new_verifier();
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let wallet = wallet_of(&key).to_checksum();

        let first = verifier.begin_verification("alice", &wallet).unwrap();
        let second = verifier.begin_verification("alice", &wallet).unwrap();
        assert_ne!(first, second);

        // Only the latest challenge verifies.
        assert!(matches!(
            verifier.complete_verification("alice", &sign_personal(&key, &first)),
            Err(VerifyError::SignatureMismatch)
        ));
        assert!(verifier
            .complete_verification("alice", &sign_personal(&key, &second))
            .is_ok());
    }

    #[test]
    fn bad_address_rejected_at_begin() {
        let (verifier, _store, _dir) = new_verifier();
        assert!(matches!(
            verifier.begin_verification("alice", "not-an-address"),
            Err(VerifyError::InvalidAddress(_))
        ));
        let key = SigningKey::from_slice(&[0x21; 32]).unwrap();
        let lower = wallet_of(&key).to_checksum().to_lowercase();
        assert!(matches!(
            verifier.begin_verification("alice", &lower),
            Err(VerifyError::InvalidAddress(AddressError::BadChecksum))
        ));
    }

    #[test]
    fn complete_without_begin_is_no_pending() {
        let (verifier, _store, _dir) = new_verifier();
        assert!(matches!(
            verifier.complete_verification("nobody", "0x00"),
            Err(VerifyError::NoPendingChallenge)
        ));
    }
}
