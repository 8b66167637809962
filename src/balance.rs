//! In-memory balance store: the materialized projection of spendable
//! balances, plus the account/merchant registries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::domain::{
    Account, AccountDirectory, AccountId, BalanceStore, DebitOutcome, Error, MerchantAccount,
    MerchantDirectory, MerchantId, Money, TransactionId,
};

#[derive(Debug, Clone, Copy)]
struct AppliedDebit {
    amount: Money,
    balance_after: Money,
}

#[derive(Debug)]
struct AccountRecord {
    account: Account,
    /// Debits applied to this account, keyed by transaction id; replaying
    /// one returns the balance it left behind instead of debiting again.
    applied: HashMap<TransactionId, AppliedDebit>,
}

/// Each account sits behind its own mutex, so the check-and-decrement in
/// `debit` is atomic per account while unrelated accounts proceed in
/// parallel. The outer map lock is held only to fetch the record handle.
#[derive(Default)]
pub struct InMemoryBalanceStore {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<AccountRecord>>>>,
    merchants: RwLock<HashMap<MerchantId, MerchantAccount>>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account with its opening balance. This is the crate's
    /// stand-in for the externally-authorized funding event; charges can
    /// only ever decrease the balance from here. Returns false if the
    /// account already exists (never re-funds).
    pub fn open_account(&self, account: Account) -> bool {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&account.account_id) {
            return false;
        }
        let id = account.account_id.clone();
        accounts.insert(
            id,
            Arc::new(Mutex::new(AccountRecord {
                account,
                applied: HashMap::new(),
            })),
        );
        true
    }

    pub fn register_merchant(&self, merchant: MerchantAccount) -> bool {
        let mut merchants = self.merchants.write();
        if merchants.contains_key(&merchant.merchant_id) {
            return false;
        }
        merchants.insert(merchant.merchant_id.clone(), merchant);
        true
    }

    /// Accounts sorted by id, for end-of-run reporting.
    pub fn accounts_snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .accounts
            .read()
            .values()
            .map(|rec| rec.lock().account.clone())
            .collect();
        accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        accounts
    }

    pub fn merchants_snapshot(&self) -> Vec<MerchantAccount> {
        let mut merchants: Vec<MerchantAccount> =
            self.merchants.read().values().cloned().collect();
        merchants.sort_by(|a, b| a.merchant_id.cmp(&b.merchant_id));
        merchants
    }

    fn record(&self, account_id: &AccountId) -> Result<Arc<Mutex<AccountRecord>>, Error> {
        self.accounts
            .read()
            .get(account_id)
            .cloned()
            .ok_or_else(|| Error::AccountNotFound(account_id.clone()))
    }
}

impl AccountDirectory for InMemoryBalanceStore {
    async fn exists(&self, account_id: &AccountId) -> bool {
        self.accounts.read().contains_key(account_id)
    }
}

impl MerchantDirectory for InMemoryBalanceStore {
    async fn merchant(&self, merchant_id: &MerchantId) -> Option<MerchantAccount> {
        self.merchants.read().get(merchant_id).cloned()
    }
}

impl BalanceStore for InMemoryBalanceStore {
    async fn get_balance(&self, account_id: &AccountId) -> Result<Money, Error> {
        Ok(self.record(account_id)?.lock().account.balance)
    }

    async fn account_info(&self, account_id: &AccountId) -> Result<Account, Error> {
        Ok(self.record(account_id)?.lock().account.clone())
    }

    async fn debit(
        &self,
        account_id: &AccountId,
        amount: Money,
        transaction_id: TransactionId,
    ) -> Result<DebitOutcome, Error> {
        let record = self.record(account_id)?;
        let mut record = record.lock();

        if let Some(prior) = record.applied.get(&transaction_id) {
            return Ok(DebitOutcome::AlreadyApplied(prior.balance_after));
        }

        let available = record.account.balance;
        if amount > available {
            return Err(Error::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        let new_balance = available.checked_sub(amount).ok_or(Error::Overflow)?;
        record.account.balance = new_balance;
        record.applied.insert(
            transaction_id,
            AppliedDebit {
                amount,
                balance_after: new_balance,
            },
        );
        debug!(%account_id, %amount, %transaction_id, %new_balance, "debit applied");
        Ok(DebitOutcome::Applied(new_balance))
    }

    async fn debit_applied(
        &self,
        account_id: &AccountId,
        transaction_id: &TransactionId,
    ) -> Result<bool, Error> {
        Ok(self
            .record(account_id)?
            .lock()
            .applied
            .contains_key(transaction_id))
    }

    async fn revert(
        &self,
        account_id: &AccountId,
        transaction_id: &TransactionId,
    ) -> Result<Money, Error> {
        let record = self.record(account_id)?;
        let mut record = record.lock();

        let debit = record
            .applied
            .remove(transaction_id)
            .ok_or(Error::NotApplied(*transaction_id))?;
        let new_balance = record
            .account
            .balance
            .checked_add(debit.amount)
            .ok_or(Error::Overflow)?;
        record.account.balance = new_balance;
        debug!(%account_id, amount = %debit.amount, %transaction_id, "debit reverted");
        Ok(new_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(id: &str, cents: i64) -> (Arc<InMemoryBalanceStore>, AccountId) {
        let store = Arc::new(InMemoryBalanceStore::new());
        let account_id = AccountId::parse(id).unwrap();
        store.open_account(Account::new(
            account_id.clone(),
            "Alice",
            Money::from_cents(cents),
        ));
        (store, account_id)
    }

    #[tokio::test]
    async fn debit_decrements_and_reports_new_balance() {
        let (store, id) = store_with("ACC-1", 5000);
        let outcome = store
            .debit(&id, Money::from_cents(2000), TransactionId::new())
            .await
            .unwrap();
        assert_eq!(outcome, DebitOutcome::Applied(Money::from_cents(3000)));
        assert_eq!(store.get_balance(&id).await.unwrap(), Money::from_cents(3000));
    }

    #[tokio::test]
    async fn replayed_debit_never_debits_twice() {
        let (store, id) = store_with("ACC-1", 5000);
        let tx = TransactionId::new();
        let amount = Money::from_cents(2000);

        store.debit(&id, amount, tx).await.unwrap();
        for _ in 0..5 {
            let outcome = store.debit(&id, amount, tx).await.unwrap();
            assert_eq!(outcome, DebitOutcome::AlreadyApplied(Money::from_cents(3000)));
        }
        assert_eq!(store.get_balance(&id).await.unwrap(), Money::from_cents(3000));
    }

    #[tokio::test]
    async fn insufficient_funds_reports_available_and_requested() {
        let (store, id) = store_with("ACC-1", 500);
        let err = store
            .debit(&id, Money::from_cents(2000), TransactionId::new())
            .await
            .unwrap_err();
        match err {
            Error::InsufficientFunds {
                available,
                requested,
            } => {
                assert_eq!(available, Money::from_cents(500));
                assert_eq!(requested, Money::from_cents(2000));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_balance(&id).await.unwrap(), Money::from_cents(500));
    }

    #[tokio::test]
    async fn concurrent_overdraw_debits_admit_at_most_one_winner() {
        // Two 30.00 debits against 50.00, raced on separate tasks. Their
        // sum exceeds the balance, so exactly one may land.
        for _ in 0..50 {
            let (store, id) = store_with("ACC-1", 5000);
            let amount = Money::from_cents(3000);

            let a = tokio::spawn({
                let store = store.clone();
                let id = id.clone();
                async move { store.debit(&id, amount, TransactionId::new()).await }
            });
            let b = tokio::spawn({
                let store = store.clone();
                let id = id.clone();
                async move { store.debit(&id, amount, TransactionId::new()).await }
            });

            let (a, b) = (a.await.unwrap(), b.await.unwrap());
            let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1, "a={a:?} b={b:?}");
            assert_eq!(store.get_balance(&id).await.unwrap(), Money::from_cents(2000));
        }
    }

    #[tokio::test]
    async fn revert_restores_balance_once() {
        let (store, id) = store_with("ACC-1", 5000);
        let tx = TransactionId::new();
        store.debit(&id, Money::from_cents(2000), tx).await.unwrap();

        let restored = store.revert(&id, &tx).await.unwrap();
        assert_eq!(restored, Money::from_cents(5000));
        assert!(matches!(
            store.revert(&id, &tx).await,
            Err(Error::NotApplied(_))
        ));
    }

    #[tokio::test]
    async fn accounts_are_funded_once() {
        let (store, id) = store_with("ACC-1", 5000);
        let refunded = store.open_account(Account::new(
            id.clone(),
            "Alice again",
            Money::from_cents(9999),
        ));
        assert!(!refunded);
        assert_eq!(store.get_balance(&id).await.unwrap(), Money::from_cents(5000));
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let store = InMemoryBalanceStore::new();
        let id = AccountId::parse("ACC-404").unwrap();
        assert!(matches!(
            store.get_balance(&id).await,
            Err(Error::AccountNotFound(_))
        ));
    }
}
