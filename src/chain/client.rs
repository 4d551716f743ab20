//! Chain client port.
//!
//! [`ChainClient`] is the only surface the settlement layer sees. The
//! production adapter speaks JSON-RPC over HTTP to an Ethereum node; the
//! in-memory adapter in [`crate::chain::mock`] backs the demo and tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use super::abi;
use super::types::{Address, Receipt, TxHash};

/// Errors from querying or submitting to the chain node.
#[derive(Debug, Error)]
pub enum ChainError {
    /// HTTP or connection-level failure. Usually transient.
    #[error("node transport error: {0}")]
    Transport(String),
    /// The node answered with a JSON-RPC error object.
    #[error("node rejected request: {message} (code {code})")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Node-supplied message.
        message: String,
    },
    /// The node's response could not be interpreted.
    #[error("unexpected node response: {0}")]
    Decode(String),
}

impl ChainError {
    /// Whether retrying the same request later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// Read and write access to the casino token contract and its node.
///
/// One implementation per environment: JSON-RPC for production, the
/// in-memory chain for tests and the demo binary.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// EIP-155 chain id.
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Number of transactions ever sent from `address` (the next nonce).
    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError>;

    /// `balanceOf(address)` on the token contract.
    async fn balance_of(&self, address: Address) -> Result<u128, ChainError>;

    /// `owner()` on the token contract, i.e. the custodial pool wallet.
    async fn owner(&self) -> Result<Address, ChainError>;

    /// `exchangeRate()` on the token contract, in wei per token.
    async fn exchange_rate(&self) -> Result<u128, ChainError>;

    /// Broadcast a signed transaction. Returns the node-accepted hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError>;

    /// Receipt for a transaction, or `None` if not yet indexed.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ChainError>;
}

/// JSON-RPC adapter over HTTP.
pub struct HttpChainClient {
    http: reqwest::Client,
    url: String,
    contract: Address,
}

impl HttpChainClient {
    /// Create a client for the node at `url` and the token contract.
    pub fn new(url: impl Into<String>, contract: Address) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            contract,
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        if let Some(err) = response.get("error") {
            return Err(ChainError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode("response missing result".into()))
    }

    /// `eth_call` against the token contract, returning the raw words.
    async fn call(&self, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let result = self
            .request(
                "eth_call",
                json!([
                    { "to": self.contract.to_checksum(), "data": format!("0x{}", hex::encode(data)) },
                    "latest",
                ]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::Decode("eth_call result is not a string".into()))?;
        hex::decode(text.trim_start_matches("0x"))
            .map_err(|e| ChainError::Decode(format!("eth_call returned invalid hex: {e}")))
    }
}

/// Parse a `0x`-prefixed hex quantity.
fn parse_quantity(value: &Value) -> Result<u128, ChainError> {
    let text = value
        .as_str()
        .ok_or_else(|| ChainError::Decode("quantity is not a string".into()))?;
    u128::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {text:?}: {e}")))
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(parse_quantity(&self.request("eth_chainId", json!([])).await?)? as u64)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, ChainError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([address.to_checksum(), "latest"]),
            )
            .await?;
        Ok(parse_quantity(&result)? as u64)
    }

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError> {
        let words = self.call(abi::balance_of(address)).await?;
        abi::decode_uint(&words)
            .ok_or_else(|| ChainError::Decode("balanceOf returned malformed word".into()))
    }

    async fn owner(&self) -> Result<Address, ChainError> {
        let words = self.call(abi::owner()).await?;
        abi::decode_address(&words)
            .map_err(|e| ChainError::Decode(format!("owner returned malformed word: {e}")))
    }

    async fn exchange_rate(&self) -> Result<u128, ChainError> {
        let words = self.call(abi::exchange_rate()).await?;
        abi::decode_uint(&words)
            .ok_or_else(|| ChainError::Decode("exchangeRate returned malformed word".into()))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, ChainError> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::Decode("tx hash is not a string".into()))?;
        TxHash::parse(text).ok_or_else(|| ChainError::Decode(format!("invalid tx hash {text:?}")))
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, ChainError> {
        let result = self
            .request("eth_getTransactionReceipt", json!([hash.to_string()]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }

        let status = result
            .get("status")
            .map(parse_quantity)
            .transpose()?
            .ok_or_else(|| ChainError::Decode("receipt missing status".into()))?;
        let block_number = result
            .get("blockNumber")
            .filter(|v| !v.is_null())
            .map(parse_quantity)
            .transpose()?;

        Ok(Some(Receipt {
            tx_hash: hash,
            status: status as u64,
            block_number: block_number.map(|n| n as u64),
        }))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantity_handles_hex() {
        assert_eq!(parse_quantity(&json!("0x1")).unwrap(), 1);
        assert_eq!(parse_quantity(&json!("0xde")).unwrap(), 222);
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn transport_errors_are_transient() {
        assert!(ChainError::Transport("timeout".into()).is_transient());
        assert!(!ChainError::Rpc { code: -32000, message: "nonce too low".into() }.is_transient());
        assert!(!ChainError::Decode("bad".into()).is_transient());
    }
}
