//! Merchant accrual read model: how much each shop has collected.
//!
//! Purely derived from the journal. The cache here is updated on every
//! commit and consulted for display, but it is never the authority; it
//! can be dropped and rebuilt from `Journal::history_for` at any time,
//! and reconciliation always recomputes.

use std::collections::{HashMap, HashSet};

use futures::StreamExt;
use parking_lot::RwLock;
use tracing::warn;

use crate::domain::{Error, HistoryFilter, Journal, MerchantId, Money, Transaction, TransactionId};

#[derive(Debug, Default)]
struct MerchantStats {
    total: Money,
    /// Committed charges in commit order; newest read from the back.
    charges: Vec<Transaction>,
    seen: HashSet<TransactionId>,
}

#[derive(Default)]
pub struct MerchantAccrualView {
    stats: RwLock<HashMap<MerchantId, MerchantStats>>,
}

/// Outcome of checking the cache against the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub cached: Money,
    pub recomputed: Money,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.recomputed
    }
}

impl MerchantAccrualView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremental update on commit. Ignores non-committed entries and
    /// replays of transactions already recorded, so a retried decision
    /// cannot inflate the total.
    pub fn record(&self, tx: &Transaction) {
        if !tx.is_committed() {
            return;
        }
        let mut stats = self.stats.write();
        let entry = stats.entry(tx.merchant_id.clone()).or_default();
        if !entry.seen.insert(tx.transaction_id) {
            return;
        }
        match entry.total.checked_add(tx.amount) {
            Some(total) => entry.total = total,
            None => {
                warn!(merchant_id = %tx.merchant_id, "accrued total overflow; cache needs rebuild");
                return;
            }
        }
        entry.charges.push(tx.clone());
    }

    pub fn accrued_total(&self, merchant_id: &MerchantId) -> Money {
        self.stats
            .read()
            .get(merchant_id)
            .map(|s| s.total)
            .unwrap_or(Money::ZERO)
    }

    /// The merchant's latest committed charges, most recent first.
    pub fn recent(&self, merchant_id: &MerchantId, n: usize) -> Vec<Transaction> {
        self.stats
            .read()
            .get(merchant_id)
            .map(|s| s.charges.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    /// Drops the cache and recomputes everything from the journal.
    pub async fn rebuild<J: Journal>(&self, journal: &J) {
        let mut fresh: HashMap<MerchantId, MerchantStats> = HashMap::new();
        let mut history = journal.history_for(HistoryFilter::all());
        while let Some(tx) = history.next().await {
            if !tx.is_committed() {
                continue;
            }
            let entry = fresh.entry(tx.merchant_id.clone()).or_default();
            if !entry.seen.insert(tx.transaction_id) {
                continue;
            }
            entry.total = entry.total.checked_add(tx.amount).unwrap_or(entry.total);
            entry.charges.push(tx);
        }
        *self.stats.write() = fresh;
    }

    /// Recomputes one merchant's total from the journal and compares it
    /// with the cache. Disputes are settled by the recomputed figure.
    pub async fn reconcile<J: Journal>(
        &self,
        journal: &J,
        merchant_id: &MerchantId,
    ) -> Result<Reconciliation, Error> {
        let mut recomputed = Money::ZERO;
        let mut history = journal.history_for(HistoryFilter::merchant(merchant_id.clone()));
        while let Some(tx) = history.next().await {
            if tx.is_committed() {
                recomputed = recomputed.checked_add(tx.amount).ok_or(Error::Overflow)?;
            }
        }
        Ok(Reconciliation {
            cached: self.accrued_total(merchant_id),
            recomputed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, VoidReason};
    use crate::journal::InMemoryJournal;

    fn ids() -> (AccountId, MerchantId) {
        (
            AccountId::parse("ACC-1").unwrap(),
            MerchantId::parse("SHOP-1").unwrap(),
        )
    }

    async fn committed(journal: &InMemoryJournal, merchant: &MerchantId, cents: i64) -> Transaction {
        let (account, _) = ids();
        let tx = journal
            .open(account, merchant.clone(), Money::from_cents(cents))
            .await
            .unwrap();
        journal.commit(&tx.transaction_id).await.unwrap()
    }

    #[tokio::test]
    async fn records_commits_and_ignores_replays() {
        let journal = InMemoryJournal::new();
        let (_, merchant) = ids();
        let view = MerchantAccrualView::new();

        let tx = committed(&journal, &merchant, 2000).await;
        view.record(&tx);
        view.record(&tx); // double-tap replay

        assert_eq!(view.accrued_total(&merchant), Money::from_cents(2000));
        assert_eq!(view.recent(&merchant, 10).len(), 1);
    }

    #[tokio::test]
    async fn pending_and_voided_entries_accrue_nothing() {
        let journal = InMemoryJournal::new();
        let (account, merchant) = ids();
        let view = MerchantAccrualView::new();

        let pending = journal
            .open(account.clone(), merchant.clone(), Money::from_cents(900))
            .await
            .unwrap();
        view.record(&pending);

        let voided = journal
            .open(account, merchant.clone(), Money::from_cents(900))
            .await
            .unwrap();
        let voided = journal
            .void(&voided.transaction_id, VoidReason::OperatorCancel)
            .await
            .unwrap();
        view.record(&voided);

        assert_eq!(view.accrued_total(&merchant), Money::ZERO);
    }

    #[tokio::test]
    async fn recent_is_most_recent_first() {
        let journal = InMemoryJournal::new();
        let (_, merchant) = ids();
        let view = MerchantAccrualView::new();

        for cents in [100, 200, 300] {
            view.record(&committed(&journal, &merchant, cents).await);
        }

        let recent = view.recent(&merchant, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].amount, Money::from_cents(300));
        assert_eq!(recent[1].amount, Money::from_cents(200));
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_updates() {
        let journal = InMemoryJournal::new();
        let (_, merchant) = ids();
        let other = MerchantId::parse("SHOP-2").unwrap();

        let incremental = MerchantAccrualView::new();
        for (m, cents) in [(&merchant, 2000), (&other, 700), (&merchant, 1500)] {
            incremental.record(&committed(&journal, m, cents).await);
        }

        let rebuilt = MerchantAccrualView::new();
        rebuilt.rebuild(&journal).await;

        for m in [&merchant, &other] {
            assert_eq!(rebuilt.accrued_total(m), incremental.accrued_total(m));
        }
        assert_eq!(rebuilt.accrued_total(&merchant), Money::from_cents(3500));
    }

    #[tokio::test]
    async fn reconcile_detects_a_poisoned_cache() {
        let journal = InMemoryJournal::new();
        let (_, merchant) = ids();
        let view = MerchantAccrualView::new();

        view.record(&committed(&journal, &merchant, 2000).await);
        let clean = view.reconcile(&journal, &merchant).await.unwrap();
        assert!(clean.is_consistent());

        // A commit the cache never saw: recomputation is the authority.
        committed(&journal, &merchant, 500).await;
        let stale = view.reconcile(&journal, &merchant).await.unwrap();
        assert!(!stale.is_consistent());
        assert_eq!(stale.recomputed, Money::from_cents(2500));

        view.rebuild(&journal).await;
        let healed = view.reconcile(&journal, &merchant).await.unwrap();
        assert!(healed.is_consistent());
    }
}
