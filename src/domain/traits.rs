use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::domain::{
    Account, AccountId, ChargeReceipt, Error, MerchantAccount, MerchantId, Money, Transaction,
    TransactionId, VoidReason,
};

/// Lookup used by the identity resolver. Pure: resolving never creates
/// accounts.
pub trait AccountDirectory {
    async fn exists(&self, account_id: &AccountId) -> bool;
}

/// Merchant registry consulted before a charge may open.
pub trait MerchantDirectory {
    async fn merchant(&self, merchant_id: &MerchantId) -> Option<MerchantAccount>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit landed now; carries the balance after it.
    Applied(Money),
    /// This transaction id was debited earlier; carries the balance as it
    /// was right after that debit. Success-equivalent on retry.
    AlreadyApplied(Money),
}

impl DebitOutcome {
    pub fn new_balance(&self) -> Money {
        match self {
            DebitOutcome::Applied(b) | DebitOutcome::AlreadyApplied(b) => *b,
        }
    }
}

/// The authoritative projection of spendable balances.
///
/// `debit` and `revert` are the only mutators. `debit` checks and
/// decrements under the account's own lock, keyed by transaction id so a
/// replay after a network ambiguity can never debit twice.
pub trait BalanceStore {
    async fn get_balance(&self, account_id: &AccountId) -> Result<Money, Error>;

    /// Customer record shown to the clerk during verification.
    async fn account_info(&self, account_id: &AccountId) -> Result<Account, Error>;

    async fn debit(
        &self,
        account_id: &AccountId,
        amount: Money,
        transaction_id: TransactionId,
    ) -> Result<DebitOutcome, Error>;

    /// Whether a debit keyed by this transaction id has been applied.
    /// Read-only; the recovery sweep uses it to pick roll-forward or void.
    async fn debit_applied(
        &self,
        account_id: &AccountId,
        transaction_id: &TransactionId,
    ) -> Result<bool, Error>;

    /// Compensating credit for a debit whose transaction is being voided.
    async fn revert(
        &self,
        account_id: &AccountId,
        transaction_id: &TransactionId,
    ) -> Result<Money, Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryParty {
    Account(AccountId),
    Merchant(MerchantId),
}

/// Selects journal entries by party and an optional closed-open time range.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub party: Option<HistoryParty>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn account(account_id: AccountId) -> Self {
        Self {
            party: Some(HistoryParty::Account(account_id)),
            ..Self::default()
        }
    }

    pub fn merchant(merchant_id: MerchantId) -> Self {
        Self {
            party: Some(HistoryParty::Merchant(merchant_id)),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        let party_ok = match &self.party {
            None => true,
            Some(HistoryParty::Account(id)) => &tx.account_id == id,
            Some(HistoryParty::Merchant(id)) => &tx.merchant_id == id,
        };
        party_ok
            && self.from.is_none_or(|from| tx.created_at >= from)
            && self.to.is_none_or(|to| tx.created_at < to)
    }
}

/// Append-only record of every charge; the system's source of truth.
pub trait Journal {
    /// Appends a pending entry. The transaction id it assigns is the
    /// idempotency key for the debit that follows.
    async fn open(
        &self,
        account_id: AccountId,
        merchant_id: MerchantId,
        amount: Money,
    ) -> Result<Transaction, Error>;

    async fn commit(&self, transaction_id: &TransactionId) -> Result<Transaction, Error>;

    async fn void(
        &self,
        transaction_id: &TransactionId,
        reason: VoidReason,
    ) -> Result<Transaction, Error>;

    async fn get(&self, transaction_id: &TransactionId) -> Option<Transaction>;

    /// Lazy, finite, restartable: every call yields a fresh stream over a
    /// snapshot taken at call time.
    fn history_for(&self, filter: HistoryFilter) -> BoxStream<'static, Transaction>;

    /// Pending entries created before `older_than`; the sweep's worklist.
    async fn stale_pending(&self, older_than: DateTime<Utc>) -> Vec<Transaction>;
}

/// Fire-and-forget commit notification. Failure must never affect the
/// charge outcome; callers log and move on.
pub trait Notifier {
    fn notify_commit(&self, receipt: &ChargeReceipt) -> Result<(), Error>;
}
