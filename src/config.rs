//! Environment-driven configuration.
//!
//! Variable names follow the original bot deployment: `ETH_NODE_URL`,
//! `CONTRACT_ADDRESS`, `BOT_PRIVATE_KEY`, `BALANCE_STORAGE`.

use std::time::Duration;

use crate::settlement::sequencer::GasConfig;

/// Runtime configuration for the settlement core.
#[derive(Clone, Debug)]
pub struct Config {
    /// JSON-RPC endpoint of the Ethereum node.
    pub node_url: Option<String>,
    /// Checksummed address of the casino token contract.
    pub contract_address: Option<String>,
    /// Hex private key of the custodial pool wallet.
    pub private_key: Option<String>,
    /// Path of the identity -> address JSON file.
    pub store_path: String,
    /// Interval between receipt polls.
    pub poll_interval: Duration,
    /// Gas limit for contract calls.
    pub gas_limit: u64,
    /// Gas price in wei.
    pub gas_price: u128,
}

impl Default for Config {
    fn default() -> Self {
        let gas = GasConfig::default();
        Self {
            node_url: None,
            contract_address: None,
            private_key: None,
            store_path: "users.json".into(),
            poll_interval: Duration::from_millis(100),
            gas_limit: gas.gas_limit,
            gas_price: gas.gas_price,
        }
    }
}

impl Config {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            node_url: std::env::var("ETH_NODE_URL").ok(),
            contract_address: std::env::var("CONTRACT_ADDRESS").ok(),
            private_key: std::env::var("BOT_PRIVATE_KEY").ok(),
            store_path: std::env::var("BALANCE_STORAGE")
                .unwrap_or(defaults.store_path),
            poll_interval: std::env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            gas_limit: std::env::var("GAS_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.gas_limit),
            gas_price: std::env::var("GAS_PRICE_WEI")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.gas_price),
        }
    }

    /// Whether enough is configured to reach a real node.
    pub fn is_configured(&self) -> bool {
        self.node_url.is_some() && self.contract_address.is_some() && self.private_key.is_some()
    }

    /// Gas parameters for the sequencer.
    pub fn gas(&self) -> GasConfig {
        GasConfig {
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_not_configured() {
        let config = Config::default();
        assert!(!config.is_configured());
        assert_eq!(config.store_path, "users.json");
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn gas_round_trips_to_sequencer_config() {
        let config = Config {
            gas_limit: 300_000,
            gas_price: 42,
            ..Config::default()
        };
        let gas = config.gas();
        assert_eq!(gas.gas_limit, 300_000);
        assert_eq!(gas.gas_price, 42);
    }
}
