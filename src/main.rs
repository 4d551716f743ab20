//! Casino Settlement Core
//!
//! Binary entry point. With chain credentials in the environment it
//! connects to the node and reports the contract owner and exchange
//! rate, the same startup probe the production bot performs. Without
//! credentials it runs a scripted demo settlement against the in-memory
//! chain so the full wager path can be observed end to end.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use casino_settlement::chain::client::{ChainClient, HttpChainClient};
use casino_settlement::chain::mock::InMemoryChain;
use casino_settlement::chain::types::Address;
use casino_settlement::config::Config;
use casino_settlement::core::payout::GameKind;
use casino_settlement::identity::store::WalletStore;
use casino_settlement::settlement::orchestrator::{
    Command, CommandOutcome, DrawError, OutcomeSource, SettlementCore,
};
use casino_settlement::settlement::sequencer::TxSequencer;
use casino_settlement::{TOKENS_PER_ROLL, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Casino Settlement Core v{}", VERSION);
    info!("Stake per roll: {} tokens", TOKENS_PER_ROLL);

    let config = Config::from_env();
    if config.is_configured() {
        startup_probe(&config).await
    } else {
        info!("No chain credentials in environment, running demo settlement");
        demo_settlement(&config).await
    }
}

/// Connect to the configured node and report contract state.
async fn startup_probe(config: &Config) -> Result<()> {
    let node_url = config.node_url.as_deref().context("node URL missing")?;
    let contract = Address::parse_any(
        config
            .contract_address
            .as_deref()
            .context("contract address missing")?,
    )
    .context("CONTRACT_ADDRESS is not a valid address")?;

    let client = Arc::new(HttpChainClient::new(node_url, contract));
    let owner = client.owner().await.context("owner() query failed")?;
    let rate = client
        .exchange_rate()
        .await
        .context("exchangeRate() query failed")?;
    let chain_id = client.chain_id().await.context("chainId query failed")?;

    info!(%owner, rate, chain_id, contract = %contract, "contract reachable");
    info!("Settlement core ready; attach a chat transport to serve commands.");
    Ok(())
}

/// Fixed draws for the demo: one win, one breakeven, one loss.
struct DemoDraws {
    ranks: std::sync::Mutex<Vec<u8>>,
}

#[async_trait]
impl OutcomeSource for DemoDraws {
    async fn draw(&self, _game: GameKind) -> Result<u8, DrawError> {
        self.ranks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| DrawError("demo ran out of draws".into()))
    }
}

/// Run register, verify, balance, three wagers and a withdrawal against
/// the in-memory chain.
async fn demo_settlement(config: &Config) -> Result<()> {
    info!("=== Demo Settlement ===");

    let pool_key = SigningKey::from_slice(&[0x17; 32])?;
    let pool = Address::from_verifying_key(pool_key.verifying_key());
    let player_key = SigningKey::from_slice(&[0x21; 32])?;
    let player = Address::from_verifying_key(player_key.verifying_key());

    let chain = Arc::new(InMemoryChain::new(pool, 5_000_000_000_000_000, 31337));
    chain.credit_balance(player, 100);
    chain.credit_balance(pool, 1000);
    info!(pool = %pool, player = %player, "in-memory chain seeded");

    let sequencer = TxSequencer::connect(
        chain.clone() as Arc<dyn ChainClient>,
        pool_key,
        Address([0xcc; 20]),
        config.gas(),
    )
    .await?;

    let store_dir = tempfile_dir()?;
    let store = Arc::new(WalletStore::load(store_dir.join("users.json"))?);
    // Draws are popped from the back: rank 6 (win), 4 (breakeven), 1 (loss).
    let outcomes = Arc::new(DemoDraws {
        ranks: std::sync::Mutex::new(vec![1, 4, 6]),
    });

    let core = SettlementCore::new(
        chain.clone() as Arc<dyn ChainClient>,
        sequencer,
        store,
        outcomes,
    )
    .with_poll_interval(config.poll_interval);

    // Register + verify with the player's key.
    let reply = core
        .handle("demo_player", Command::Register { address: player.to_checksum() })
        .await;
    let challenge = match &reply {
        CommandOutcome::Ok(message) => message.lines().last().unwrap_or("").to_string(),
        other => anyhow::bail!("registration failed: {other:?}"),
    };
    info!("challenge issued: {}", challenge);

    let signature = sign_challenge(&player_key, &challenge)?;
    report(core.handle("demo_player", Command::Verify { signature }).await);

    report(core.handle("demo_player", Command::Balance).await);
    for _ in 0..3 {
        report(core.handle("demo_player", Command::Wager { game: GameKind::Dice }).await);
    }
    report(core.handle("demo_player", Command::Withdraw { amount: 50 }).await);
    report(core.handle("demo_player", Command::Balance).await);

    info!(
        nonces = ?chain.seen_nonces(),
        player_balance = chain.balance(player),
        pool_balance = chain.balance(pool),
        "=== Demo complete ==="
    );
    Ok(())
}

fn report(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Ok(message) => info!("reply: {}", message),
        CommandOutcome::UserError(message) => info!("user error: {}", message),
        CommandOutcome::FatalAlarm(message) => info!("ALARM: {}", message),
    }
}

/// EIP-191 personal-sign of the challenge, as a wallet would produce.
fn sign_challenge(key: &SigningKey, challenge: &str) -> Result<String> {
    use sha3::{Digest, Keccak256};
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", challenge.len()).as_bytes());
    hasher.update(challenge.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();

    let (sig, recid) = key.sign_prehash_recoverable(&digest)?;
    let mut bytes = sig.to_bytes().to_vec();
    bytes.push(recid.to_byte() + 27);
    Ok(format!("0x{}", hex::encode(bytes)))
}

/// A scratch directory for the demo's wallet store.
fn tempfile_dir() -> Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("casino-settlement-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
