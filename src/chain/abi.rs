//! Contract call encoding.
//!
//! The settlement core calls five functions on the casino token contract:
//! `balanceOf`, `owner`, `exchangeRate` (reads) and `privilegedTransfer`,
//! `exchangeTokens` (writes). Arguments are the standard ABI encoding:
//! a 4-byte Keccak selector followed by 32-byte big-endian words.

use sha3::{Digest, Keccak256};

use super::types::{Address, AddressError};

/// First four bytes of the Keccak-256 of a function signature.
fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Left-pad an address to a 32-byte word.
fn address_word(addr: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

/// Encode an amount as a 32-byte big-endian word.
fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// `balanceOf(address)` calldata.
pub fn balance_of(holder: Address) -> Vec<u8> {
    let mut data = selector("balanceOf(address)").to_vec();
    data.extend_from_slice(&address_word(holder));
    data
}

/// `owner()` calldata.
pub fn owner() -> Vec<u8> {
    selector("owner()").to_vec()
}

/// `exchangeRate()` calldata.
pub fn exchange_rate() -> Vec<u8> {
    selector("exchangeRate()").to_vec()
}

/// `privilegedTransfer(address,address,uint256)` calldata: move tokens
/// between a player and the pool without an allowance.
pub fn privileged_transfer(from: Address, to: Address, amount: u128) -> Vec<u8> {
    let mut data = selector("privilegedTransfer(address,address,uint256)").to_vec();
    data.extend_from_slice(&address_word(from));
    data.extend_from_slice(&address_word(to));
    data.extend_from_slice(&uint_word(amount));
    data
}

/// `exchangeTokens(uint256,address)` calldata: burn tokens and send the
/// equivalent ETH to `to`.
pub fn exchange_tokens(amount: u128, to: Address) -> Vec<u8> {
    let mut data = selector("exchangeTokens(uint256,address)").to_vec();
    data.extend_from_slice(&uint_word(amount));
    data.extend_from_slice(&address_word(to));
    data
}

/// Decode a 32-byte return word as an amount.
///
/// Values beyond `u128::MAX` are not representable as token balances in
/// this system and are reported as a decode failure by the caller.
pub fn decode_uint(word: &[u8]) -> Option<u128> {
    if word.len() != 32 || word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&word[16..]);
    Some(u128::from_be_bytes(bytes))
}

/// Decode a 32-byte return word as an address.
pub fn decode_address(word: &[u8]) -> Result<Address, AddressError> {
    if word.len() != 32 || word[..12].iter().any(|b| *b != 0) {
        return Err(AddressError::Malformed);
    }
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..]);
    Ok(Address(bytes))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[test]
    fn balance_of_selector_matches_erc20() {
        // Standard ERC-20 selector, independently known.
        assert_eq!(&balance_of(addr(0))[..4], &[0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn owner_selector_matches_ownable() {
        assert_eq!(owner(), vec![0x8d, 0xa5, 0xcb, 0x5b]);
    }

    #[test]
    fn privileged_transfer_layout() {
        let data = privileged_transfer(addr(0x11), addr(0x22), 1000);
        assert_eq!(data.len(), 4 + 32 * 3);
        // from word: 12 zero bytes then the address
        assert_eq!(&data[4..16], &[0u8; 12]);
        assert_eq!(&data[16..36], &[0x11; 20]);
        assert_eq!(&data[36..48], &[0u8; 12]);
        assert_eq!(&data[48..68], &[0x22; 20]);
        assert_eq!(decode_uint(&data[68..]), Some(1000));
    }

    #[test]
    fn exchange_tokens_layout() {
        let data = exchange_tokens(55, addr(0x33));
        assert_eq!(data.len(), 4 + 32 * 2);
        assert_eq!(decode_uint(&data[4..36]), Some(55));
        assert_eq!(decode_address(&data[36..]).unwrap(), addr(0x33));
    }

    #[test]
    fn decode_uint_rejects_oversized() {
        let mut word = [0u8; 32];
        word[0] = 1; // beyond u128
        assert_eq!(decode_uint(&word), None);
        assert_eq!(decode_uint(&[0u8; 16]), None);
    }

    #[test]
    fn decode_address_rejects_dirty_padding() {
        let mut word = [0u8; 32];
        word[0] = 1;
        assert!(decode_address(&word).is_err());
    }
}
