//! The charge coordinator: one state machine per point-of-sale charge,
//! driving amount entry -> scan -> verify -> confirm to a terminal
//! committed or aborted state.
//!
//! The machine owns no shared state. The balance store and journal are the
//! shared resources; everything the coordinator does to them goes through
//! the `debit` / `open` / `commit` / `void` seams, and every remote call
//! is bounded by the configured timeout so a charge can never hang the
//! operator's device.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::{
    AccountDirectory, AccountId, BalanceStore, ChargeReceipt, Error, Journal, MerchantId, Money,
    TransactionId, VoidReason,
};
use crate::identity::IdentityResolver;

/// Data carried while the operator decides. The shortfall, when present,
/// disables confirmation; the authoritative funds check still happens
/// inside the debit, closing the race against concurrent spends elsewhere.
#[derive(Debug, Clone)]
pub struct ConfirmingState {
    pub amount: Money,
    pub account_id: AccountId,
    pub display_name: String,
    pub available: Money,
    pub shortfall: Option<Money>,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone)]
pub enum ChargeState {
    AmountEntry,
    Scanning { amount: Money },
    Confirming(ConfirmingState),
    Committed(ChargeReceipt),
    Aborted { reason: VoidReason },
}

impl ChargeState {
    pub fn name(&self) -> &'static str {
        match self {
            ChargeState::AmountEntry => "amount entry",
            ChargeState::Scanning { .. } => "scanning",
            ChargeState::Confirming(_) => "confirming",
            ChargeState::Committed(_) => "committed",
            ChargeState::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChargeState::Committed(_) | ChargeState::Aborted { .. })
    }
}

async fn bounded<T>(
    what: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(what)),
    }
}

/// One charge. Terminal states are terminal: a new charge is a new
/// machine with a new transaction id, never a reused one.
pub struct Charge<D, B, J> {
    merchant_id: MerchantId,
    resolver: IdentityResolver<D>,
    balance: Arc<B>,
    journal: Arc<J>,
    config: Config,
    state: ChargeState,
}

impl<D, B, J> Charge<D, B, J>
where
    D: AccountDirectory,
    B: BalanceStore,
    J: Journal,
{
    pub fn new(
        merchant_id: MerchantId,
        resolver: IdentityResolver<D>,
        balance: Arc<B>,
        journal: Arc<J>,
        config: Config,
    ) -> Self {
        Self {
            merchant_id,
            resolver,
            balance,
            journal,
            config,
            state: ChargeState::AmountEntry,
        }
    }

    pub fn state(&self) -> &ChargeState {
        &self.state
    }

    pub fn merchant_id(&self) -> &MerchantId {
        &self.merchant_id
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        match &self.state {
            ChargeState::Confirming(c) => Some(c.transaction_id),
            ChargeState::Committed(receipt) => Some(receipt.transaction_id),
            _ => None,
        }
    }

    fn invalid(&self, action: &'static str) -> Error {
        Error::InvalidTransition {
            state: self.state.name(),
            action,
        }
    }

    /// `AmountEntry -> Scanning` once a positive amount within the
    /// per-transaction ceiling is supplied. Out-of-range amounts are
    /// rejected without a state change.
    pub fn enter_amount(&mut self, amount: Money) -> Result<&ChargeState, Error> {
        if !matches!(self.state, ChargeState::AmountEntry) {
            return Err(self.invalid("enter amount"));
        }
        if !amount.is_positive() || amount > self.config.max_charge {
            return Err(Error::AmountOutOfRange {
                max: self.config.max_charge,
            });
        }
        self.state = ChargeState::Scanning { amount };
        Ok(&self.state)
    }

    /// `Scanning -> Confirming`, passing through verification. On a
    /// malformed or unknown payload the machine stays in `Scanning` with
    /// the amount preserved; scanning may be retried indefinitely. A scan
    /// once past `Scanning` is refused, which is all the double-scan
    /// guard there is to need.
    pub async fn scan(&mut self, payload: &str) -> Result<&ChargeState, Error> {
        let amount = match &self.state {
            ChargeState::Scanning { amount } => *amount,
            _ => return Err(self.invalid("scan")),
        };
        let limit = self.config.call_timeout();

        let account_id =
            bounded("identity resolution", limit, self.resolver.resolve(payload)).await?;

        // Verifying: fetch what the clerk sees before confirming.
        let info = bounded(
            "balance lookup",
            limit,
            self.balance.account_info(&account_id),
        )
        .await?;

        // Amount and identity are known, so the journal entry opens here;
        // its id is what the confirm/abort API addresses.
        let tx = bounded(
            "journal open",
            limit,
            self.journal
                .open(account_id.clone(), self.merchant_id.clone(), amount),
        )
        .await?;

        let shortfall = (amount > info.balance).then(|| amount.saturating_sub(info.balance));
        if let Some(short) = shortfall {
            debug!(%account_id, %amount, available = %info.balance, %short, "shortfall flagged");
        }
        self.state = ChargeState::Confirming(ConfirmingState {
            amount,
            account_id,
            display_name: info.display_name,
            available: info.balance,
            shortfall,
            transaction_id: tx.transaction_id,
        });
        Ok(&self.state)
    }

    /// `Confirming -> Committed`: debit with the transaction id as the
    /// idempotency key, then commit the journal entry.
    ///
    /// A timed-out step leaves the machine in `Confirming`; retrying
    /// reuses the same transaction id, so the debit lands at most once and
    /// an already-landed commit reads back as success. Definitive
    /// failures void the entry and abort. Confirming an already-committed
    /// charge returns the same receipt (a double-tap commits once).
    pub async fn confirm(&mut self) -> Result<&ChargeState, Error> {
        let c = match &self.state {
            ChargeState::Confirming(c) => c.clone(),
            ChargeState::Committed(_) => return Ok(&self.state),
            _ => return Err(self.invalid("confirm")),
        };
        if c.shortfall.is_some() {
            return Err(Error::InsufficientFunds {
                available: c.available,
                requested: c.amount,
            });
        }
        let limit = self.config.call_timeout();
        let tx_id = c.transaction_id;

        let outcome = match bounded(
            "balance debit",
            limit,
            self.balance.debit(&c.account_id, c.amount, tx_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(err @ Error::Timeout(_)) => return Err(err),
            Err(err @ Error::InsufficientFunds { .. }) => {
                // Authoritative check lost to a concurrent spend.
                self.void_and_abort(&c, VoidReason::InsufficientFunds).await;
                return Err(err);
            }
            Err(err) => {
                self.void_and_abort(&c, VoidReason::DebitFailed).await;
                return Err(err);
            }
        };
        let new_balance = outcome.new_balance();

        match bounded("journal commit", limit, self.journal.commit(&tx_id)).await {
            Ok(tx) => {
                self.state = ChargeState::Committed(ChargeReceipt {
                    transaction_id: tx_id,
                    account_id: c.account_id,
                    merchant_id: self.merchant_id.clone(),
                    amount: c.amount,
                    new_balance,
                    committed_at: tx.committed_at.unwrap_or_else(Utc::now),
                });
                Ok(&self.state)
            }
            Err(Error::AlreadyCommitted(_)) => {
                // A retried commit had already landed; success-equivalent.
                let committed_at = match self.journal.get(&tx_id).await {
                    Some(tx) => tx.committed_at.unwrap_or_else(Utc::now),
                    None => Utc::now(),
                };
                self.state = ChargeState::Committed(ChargeReceipt {
                    transaction_id: tx_id,
                    account_id: c.account_id,
                    merchant_id: self.merchant_id.clone(),
                    amount: c.amount,
                    new_balance,
                    committed_at,
                });
                Ok(&self.state)
            }
            Err(err @ Error::Timeout(_)) => Err(err),
            Err(Error::AlreadyVoided(_)) => {
                // The recovery sweep voided the entry before the commit
                // landed; the debit must not stand.
                if let Err(revert_err) = bounded(
                    "balance revert",
                    limit,
                    self.balance.revert(&c.account_id, &tx_id),
                )
                .await
                {
                    warn!(%tx_id, error = %revert_err, "revert after losing void race failed");
                }
                self.state = ChargeState::Aborted {
                    reason: VoidReason::Conflict,
                };
                Err(Error::Conflict(tx_id))
            }
            Err(err) => {
                if let Err(revert_err) = bounded(
                    "balance revert",
                    limit,
                    self.balance.revert(&c.account_id, &tx_id),
                )
                .await
                {
                    warn!(%tx_id, error = %revert_err, "revert after failed commit failed");
                }
                self.state = ChargeState::Aborted {
                    reason: VoidReason::DebitFailed,
                };
                Err(err)
            }
        }
    }

    /// Operator cancel, allowed from any non-terminal state. Once a
    /// journal entry exists the void is mandatory cleanup, and a debit
    /// that landed during an ambiguous retry is reverted with it. If the
    /// void itself fails transiently the machine stays in `Confirming` so
    /// the operator retries; the sweep is the backstop either way.
    pub async fn abort(&mut self) -> Result<&ChargeState, Error> {
        let c = match &self.state {
            ChargeState::Aborted { .. } => return Ok(&self.state),
            ChargeState::Committed(_) => return Err(self.invalid("abort")),
            ChargeState::AmountEntry | ChargeState::Scanning { .. } => {
                self.state = ChargeState::Aborted {
                    reason: VoidReason::OperatorCancel,
                };
                return Ok(&self.state);
            }
            ChargeState::Confirming(c) => c.clone(),
        };
        let limit = self.config.call_timeout();

        match bounded(
            "journal void",
            limit,
            self.journal
                .void(&c.transaction_id, VoidReason::OperatorCancel),
        )
        .await
        {
            Ok(_) | Err(Error::AlreadyVoided(_)) => {
                match bounded(
                    "balance revert",
                    limit,
                    self.balance.revert(&c.account_id, &c.transaction_id),
                )
                .await
                {
                    Ok(_) | Err(Error::NotApplied(_)) => {}
                    Err(err) => {
                        warn!(transaction_id = %c.transaction_id, error = %err, "revert on abort failed")
                    }
                }
                self.state = ChargeState::Aborted {
                    reason: VoidReason::OperatorCancel,
                };
                Ok(&self.state)
            }
            Err(Error::AlreadyCommitted(_)) => {
                // The ambiguous commit actually landed; report the truth
                // instead of pretending the charge aborted.
                let committed_at = match self.journal.get(&c.transaction_id).await {
                    Some(tx) => tx.committed_at.unwrap_or_else(Utc::now),
                    None => Utc::now(),
                };
                let new_balance = match bounded(
                    "balance lookup",
                    limit,
                    self.balance.get_balance(&c.account_id),
                )
                .await
                {
                    Ok(balance) => balance,
                    Err(_) => c.available.saturating_sub(c.amount),
                };
                self.state = ChargeState::Committed(ChargeReceipt {
                    transaction_id: c.transaction_id,
                    account_id: c.account_id,
                    merchant_id: self.merchant_id.clone(),
                    amount: c.amount,
                    new_balance,
                    committed_at,
                });
                Ok(&self.state)
            }
            Err(err) => {
                warn!(transaction_id = %c.transaction_id, error = %err, "void on abort failed; still confirming");
                Err(err)
            }
        }
    }

    async fn void_and_abort(&mut self, c: &ConfirmingState, reason: VoidReason) {
        if let Err(err) = bounded(
            "journal void",
            self.config.call_timeout(),
            self.journal.void(&c.transaction_id, reason),
        )
        .await
        {
            // The sweep resolves anything left pending here.
            warn!(transaction_id = %c.transaction_id, error = %err, "void failed");
        }
        self.state = ChargeState::Aborted { reason };
    }
}
