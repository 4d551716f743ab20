//! Settlement Orchestrator
//!
//! Composes the gate, sequencer, poller, verifier and payout table into
//! one end-to-end operation per chat command. This is the only
//! component with side effects visible to the chat transport; the
//! transport hands in a [`Command`] and renders the returned
//! [`CommandOutcome`] as a reply.
//!
//! Wager state machine:
//! `gate acquired -> balance checked -> debit submitted -> debit
//! confirmed -> outcome drawn -> payout submitted (if > 0) -> settled`.
//! The outcome is drawn strictly after the debit confirms, so a losing
//! wager can never be abandoned after seeing the result. Debits fail
//! closed; prize credits and withdrawals are resubmitted through the
//! sequencer until a success receipt exists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::chain::client::{ChainClient, ChainError};
use crate::chain::types::{Address, Receipt};
use crate::core::payout::{payout, GameKind};
use crate::identity::store::WalletStore;
use crate::identity::verifier::{IdentityVerifier, VerifyError};
use crate::settlement::confirm::{
    await_confirmation, ConfirmError, PollPolicy, DEFAULT_POLL_INTERVAL,
};
use crate::settlement::gate::AccountGate;
use crate::settlement::sequencer::{
    IntentKind, SequencerError, TransactionIntent, TxSequencer,
};
use crate::TOKENS_PER_ROLL;

/// A structured command from the chat transport.
#[derive(Debug, Clone)]
pub enum Command {
    /// `/register <address>`: start wallet verification.
    Register {
        /// The claimed wallet address, as typed by the user.
        address: String,
    },
    /// `/verify <signature>`: finish wallet verification.
    Verify {
        /// Hex signature over the outstanding challenge.
        signature: String,
    },
    /// `/balance`: report token balance and rolls remaining.
    Balance,
    /// `/roll <emoji>`: wager one stake on a game.
    Wager {
        /// Which game table to roll against.
        game: GameKind,
    },
    /// `/withdraw <amount>`: exchange tokens back to ETH.
    Withdraw {
        /// Whole tokens to withdraw.
        amount: u128,
    },
}

/// What the transport should tell the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command settled; reply with this message.
    Ok(String),
    /// The user did something recoverable; reply and move on.
    UserError(String),
    /// Settlement hit a condition needing operator attention. The reply
    /// is still shown to the user, but the log carries the alarm.
    FatalAlarm(String),
}

/// Failure while obtaining the external dice draw.
#[derive(Debug, Error)]
#[error("outcome draw failed: {0}")]
pub struct DrawError(
    /// Transport-reported reason.
    pub String,
);

/// Source of the random outcome for a wager.
///
/// The draw is opaque to the core: in production it is the chat
/// platform's dice message, requested only after the stake debit has
/// confirmed.
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    /// Draw a 1-based outcome rank within `game`'s domain.
    async fn draw(&self, game: GameKind) -> Result<u8, DrawError>;
}

/// Whether a failed confirmation abandons or resubmits the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmitPolicy {
    /// One attempt; a revert aborts the settlement. Used for stake
    /// debits, which may fail closed.
    FailClosed,
    /// Resubmit through the sequencer on revert, indefinitely. Used for
    /// prize credits and withdrawals: a communicated win must be paid.
    RetryUntilConfirmed,
}

/// Internal settlement failure, mapped to a [`CommandOutcome`] at the
/// command boundary.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The identity has no registered wallet.
    #[error("identity is not registered")]
    NotRegistered,
    /// Another settlement for this wallet is in flight.
    #[error("settlement already in flight for {wallet}")]
    Busy {
        /// The gated wallet.
        wallet: Address,
    },
    /// Balance cannot cover the operation.
    #[error("insufficient balance: have {balance}, need {needed}")]
    InsufficientFunds {
        /// Current token balance.
        balance: u128,
        /// Tokens the operation requires.
        needed: u128,
    },
    /// A withdraw amount of zero.
    #[error("withdraw amount must be positive")]
    InvalidAmount,
    /// Verification-flow failure.
    #[error(transparent)]
    Verify(#[from] VerifyError),
    /// A chain read failed.
    #[error("chain query failed: {0}")]
    Chain(#[from] ChainError),
    /// The sequencer could not sign or broadcast.
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    /// A submitted transaction did not confirm successfully.
    #[error("{kind} transaction failed: {source}")]
    Confirm {
        /// Which intent failed.
        kind: IntentKind,
        /// How confirmation failed.
        source: ConfirmError,
    },
    /// The external draw could not be obtained after the debit.
    #[error(transparent)]
    Draw(#[from] DrawError),
}

/// The settlement core: everything between a chat command and a
/// confirmed on-chain settlement.
pub struct SettlementCore {
    chain: Arc<dyn ChainClient>,
    sequencer: TxSequencer,
    verifier: IdentityVerifier,
    store: Arc<WalletStore>,
    outcomes: Arc<dyn OutcomeSource>,
    gate: AccountGate,
    poll_interval: Duration,
}

impl SettlementCore {
    /// Assemble the core from its parts.
    pub fn new(
        chain: Arc<dyn ChainClient>,
        sequencer: TxSequencer,
        store: Arc<WalletStore>,
        outcomes: Arc<dyn OutcomeSource>,
    ) -> Self {
        Self {
            chain,
            sequencer,
            verifier: IdentityVerifier::new(Arc::clone(&store)),
            store,
            outcomes,
            gate: AccountGate::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the receipt poll interval (tests use a short one).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle one chat command end to end.
    pub async fn handle(&self, identity: &str, command: Command) -> CommandOutcome {
        let result = match command {
            Command::Register { address } => self.register(identity, &address),
            Command::Verify { signature } => self.verify(identity, &signature),
            Command::Balance => self.balance(identity).await,
            Command::Wager { game } => self.wager(identity, game).await,
            Command::Withdraw { amount } => self.withdraw(identity, amount).await,
        };
        self.render(identity, result)
    }

    fn register(&self, identity: &str, address: &str) -> Result<String, SettlementError> {
        let challenge = self.verifier.begin_verification(identity, address)?;
        Ok(format!(
            "To verify ownership of the wallet, sign this message and send the \
             signature back with the verify command:\n\n{challenge}"
        ))
    }

    fn verify(&self, identity: &str, signature: &str) -> Result<String, SettlementError> {
        let account = self.verifier.complete_verification(identity, signature)?;
        Ok(format!(
            "Verification successful! Your wallet address {} has been registered.",
            account.wallet
        ))
    }

    async fn balance(&self, identity: &str) -> Result<String, SettlementError> {
        let wallet = self.login(identity)?;
        let balance = self.chain.balance_of(wallet).await?;
        let rate = self.chain.exchange_rate().await?;
        Ok(format!(
            "Your balance: {} tokens ({} rolls at {} tokens per roll).\n\
             Exchange rate: {} wei per token.",
            balance,
            balance / TOKENS_PER_ROLL,
            TOKENS_PER_ROLL,
            rate
        ))
    }

    async fn wager(&self, identity: &str, game: GameKind) -> Result<String, SettlementError> {
        let wallet = self.login(identity)?;
        let _guard = self
            .gate
            .try_acquire(wallet)
            .ok_or(SettlementError::Busy { wallet })?;

        let balance = self.chain.balance_of(wallet).await?;
        if balance < TOKENS_PER_ROLL {
            return Err(SettlementError::InsufficientFunds {
                balance,
                needed: TOKENS_PER_ROLL,
            });
        }

        // Stake first. A revert here aborts the wager before any
        // outcome exists, so there is nothing to pay out.
        let pool = self.sequencer.pool();
        self.submit_and_confirm(
            &TransactionIntent {
                kind: IntentKind::Debit,
                from: wallet,
                to: pool,
                amount: TOKENS_PER_ROLL,
            },
            SubmitPolicy::FailClosed,
        )
        .await?;

        // Only now is the dice thrown.
        let rank = self.outcomes.draw(game).await?;
        let prize = payout(game, rank, TOKENS_PER_ROLL);
        info!(identity, wallet = %wallet, game = ?game, rank, prize, "outcome drawn");

        if prize == 0 {
            return Ok(format!(
                "You rolled {} rank {rank}. No payout this time, better luck next roll!",
                game.emoji()
            ));
        }

        let receipt = self
            .submit_and_confirm(
                &TransactionIntent {
                    kind: IntentKind::Credit,
                    from: pool,
                    to: wallet,
                    amount: prize,
                },
                SubmitPolicy::RetryUntilConfirmed,
            )
            .await?;

        Ok(format!(
            "You rolled {} rank {rank} and win {prize} tokens! tx {}",
            game.emoji(),
            receipt.tx_hash
        ))
    }

    async fn withdraw(&self, identity: &str, amount: u128) -> Result<String, SettlementError> {
        if amount == 0 {
            return Err(SettlementError::InvalidAmount);
        }
        let wallet = self.login(identity)?;
        let _guard = self
            .gate
            .try_acquire(wallet)
            .ok_or(SettlementError::Busy { wallet })?;

        let balance = self.chain.balance_of(wallet).await?;
        if balance < amount {
            return Err(SettlementError::InsufficientFunds {
                balance,
                needed: amount,
            });
        }

        let receipt = self
            .submit_and_confirm(
                &TransactionIntent {
                    kind: IntentKind::Withdraw,
                    from: wallet,
                    to: wallet,
                    amount,
                },
                SubmitPolicy::RetryUntilConfirmed,
            )
            .await?;

        Ok(format!(
            "Withdraw settled! {amount} tokens exchanged; the ETH is on its way. tx {}",
            receipt.tx_hash
        ))
    }

    fn login(&self, identity: &str) -> Result<Address, SettlementError> {
        self.store
            .get(identity)
            .ok_or(SettlementError::NotRegistered)
    }

    /// Submit an intent and await its confirmation under `policy`.
    ///
    /// Under [`SubmitPolicy::RetryUntilConfirmed`] a reverted
    /// transaction is resubmitted through the sequencer (consuming a
    /// fresh nonce) until a success receipt is obtained. Broadcast
    /// rejection is fatal under either policy.
    async fn submit_and_confirm(
        &self,
        intent: &TransactionIntent,
        policy: SubmitPolicy,
    ) -> Result<Receipt, SettlementError> {
        loop {
            let hash = self.sequencer.submit(intent).await?;
            match await_confirmation(
                self.chain.as_ref(),
                hash,
                PollPolicy::Unbounded,
                self.poll_interval,
            )
            .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(ConfirmError::Reverted { hash })
                    if policy == SubmitPolicy::RetryUntilConfirmed =>
                {
                    warn!(
                        kind = %intent.kind,
                        amount = intent.amount,
                        to = %intent.to,
                        tx = %hash,
                        "settlement transaction reverted, resubmitting"
                    );
                }
                Err(source) => {
                    return Err(SettlementError::Confirm {
                        kind: intent.kind,
                        source,
                    })
                }
            }
        }
    }

    /// Map an internal error to what the transport tells the user.
    fn render(&self, identity: &str, result: Result<String, SettlementError>) -> CommandOutcome {
        let err = match result {
            Ok(message) => return CommandOutcome::Ok(message),
            Err(e) => e,
        };

        match &err {
            SettlementError::NotRegistered => CommandOutcome::UserError(
                "You have not registered your wallet address. \
                 Use the register command to start."
                    .into(),
            ),
            SettlementError::Busy { .. } => CommandOutcome::UserError(
                "Please do not hurry, previous transaction is running...".into(),
            ),
            SettlementError::InsufficientFunds { balance, needed } => {
                CommandOutcome::UserError(format!(
                    "Not enough tokens: you have {balance}, this needs {needed}. \
                     Deposit more ETH to play!"
                ))
            }
            SettlementError::InvalidAmount => {
                CommandOutcome::UserError("Amount of tokens must be a positive integer.".into())
            }
            SettlementError::Verify(e) => CommandOutcome::UserError(format!("{e}")),
            SettlementError::Chain(e) => {
                warn!(identity, error = %e, "chain query failed");
                CommandOutcome::UserError(
                    "Could not reach the chain node, please try again later.".into(),
                )
            }
            SettlementError::Draw(e) => {
                error!(identity, error = %e, "draw failed after debit was taken");
                CommandOutcome::FatalAlarm(format!(
                    "!!! alarm, could not obtain the dice outcome: {e} !!!"
                ))
            }
            SettlementError::Sequencer(_) | SettlementError::Confirm { .. } => {
                error!(identity, error = %err, "settlement alarm");
                CommandOutcome::FatalAlarm("!!! alarm, previous transaction failed !!!".into())
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
