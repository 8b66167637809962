//! Append-only charge journal. Entries transition status exactly once;
//! everything else in the system is a projection of what lands here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::RwLock;
use tracing::info;

use crate::domain::{
    AccountId, Error, HistoryFilter, Journal, MerchantId, Money, Transaction, TransactionId,
    TransactionStatus, VoidReason,
};

#[derive(Default)]
struct JournalInner {
    entries: Vec<Transaction>,
    index: HashMap<TransactionId, usize>,
}

#[derive(Default)]
pub struct InMemoryJournal {
    inner: RwLock<JournalInner>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries ever appended (entries are never removed).
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl Journal for InMemoryJournal {
    async fn open(
        &self,
        account_id: AccountId,
        merchant_id: MerchantId,
        amount: Money,
    ) -> Result<Transaction, Error> {
        if !amount.is_positive() {
            return Err(Error::NonPositiveAmount);
        }
        let tx = Transaction::open(account_id, merchant_id, amount);
        let mut inner = self.inner.write();
        let idx = inner.entries.len();
        inner.index.insert(tx.transaction_id, idx);
        inner.entries.push(tx.clone());
        Ok(tx)
    }

    async fn commit(&self, transaction_id: &TransactionId) -> Result<Transaction, Error> {
        let mut inner = self.inner.write();
        let idx = *inner
            .index
            .get(transaction_id)
            .ok_or(Error::TransactionNotFound(*transaction_id))?;
        let entry = &mut inner.entries[idx];
        match entry.status {
            TransactionStatus::Pending => {
                entry.status = TransactionStatus::Committed;
                entry.committed_at = Some(Utc::now());
                info!(%transaction_id, amount = %entry.amount, merchant = %entry.merchant_id, "charge committed");
                Ok(entry.clone())
            }
            TransactionStatus::Committed => Err(Error::AlreadyCommitted(*transaction_id)),
            TransactionStatus::Voided => Err(Error::AlreadyVoided(*transaction_id)),
        }
    }

    async fn void(
        &self,
        transaction_id: &TransactionId,
        reason: VoidReason,
    ) -> Result<Transaction, Error> {
        let mut inner = self.inner.write();
        let idx = *inner
            .index
            .get(transaction_id)
            .ok_or(Error::TransactionNotFound(*transaction_id))?;
        let entry = &mut inner.entries[idx];
        match entry.status {
            TransactionStatus::Pending => {
                entry.status = TransactionStatus::Voided;
                entry.voided_at = Some(Utc::now());
                entry.void_reason = Some(reason);
                info!(%transaction_id, %reason, "charge voided");
                Ok(entry.clone())
            }
            TransactionStatus::Committed => Err(Error::AlreadyCommitted(*transaction_id)),
            TransactionStatus::Voided => Err(Error::AlreadyVoided(*transaction_id)),
        }
    }

    async fn get(&self, transaction_id: &TransactionId) -> Option<Transaction> {
        let inner = self.inner.read();
        inner
            .index
            .get(transaction_id)
            .map(|&idx| inner.entries[idx].clone())
    }

    fn history_for(&self, filter: HistoryFilter) -> BoxStream<'static, Transaction> {
        let snapshot: Vec<Transaction> = self
            .inner
            .read()
            .entries
            .iter()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        stream::iter(snapshot).boxed()
    }

    async fn stale_pending(&self, older_than: DateTime<Utc>) -> Vec<Transaction> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at < older_than)
            .cloned()
            .collect()
    }
}
