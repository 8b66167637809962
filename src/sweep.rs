//! Recovery sweep: resolves journal entries left pending beyond the
//! recovery window, after crashes or abandoned charge sessions.
//!
//! The rule is the saga's: if the idempotent debit for a stale entry is
//! recorded as applied, the money already moved and the entry rolls
//! forward to committed; otherwise nothing moved and the entry is voided
//! as expired. Either way no entry stays pending past the window and the
//! balance never disagrees with the journal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{BalanceStore, Error, Journal, VoidReason};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rolled_forward: usize,
    pub voided: usize,
}

pub struct RecoverySweep<B, J> {
    balance: Arc<B>,
    journal: Arc<J>,
    pending_ttl: Duration,
}

impl<B, J> RecoverySweep<B, J>
where
    B: BalanceStore,
    J: Journal,
{
    pub fn new(balance: Arc<B>, journal: Arc<J>, pending_ttl: Duration) -> Self {
        Self {
            balance,
            journal,
            pending_ttl,
        }
    }

    pub async fn run_once(&self) -> SweepReport {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.pending_ttl.as_millis() as i64);
        let mut report = SweepReport::default();

        for tx in self.journal.stale_pending(cutoff).await {
            let id = tx.transaction_id;
            let applied = match self.balance.debit_applied(&tx.account_id, &id).await {
                Ok(applied) => applied,
                Err(err) => {
                    warn!(transaction_id = %id, error = %err, "sweep could not inspect debit");
                    continue;
                }
            };

            let result = if applied {
                self.journal.commit(&id).await.map(|_| {
                    report.rolled_forward += 1;
                })
            } else {
                self.journal.void(&id, VoidReason::Expired).await.map(|_| {
                    report.voided += 1;
                })
            };
            match result {
                Ok(())
                | Err(Error::AlreadyCommitted(_))
                | Err(Error::AlreadyVoided(_)) => {} // a live charge got there first
                Err(err) => warn!(transaction_id = %id, error = %err, "sweep failed to resolve entry"),
            }
        }

        if report != SweepReport::default() {
            info!(
                rolled_forward = report.rolled_forward,
                voided = report.voided,
                "recovery sweep resolved stale entries"
            );
        }
        report
    }

    /// Sweep on an interval until dropped; callers spawn this.
    pub async fn run_forever(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::InMemoryBalanceStore;
    use crate::domain::{
        Account, AccountId, MerchantId, Money, TransactionStatus,
    };
    use crate::journal::InMemoryJournal;

    fn fixture(cents: i64) -> (Arc<InMemoryBalanceStore>, Arc<InMemoryJournal>, AccountId, MerchantId) {
        let store = Arc::new(InMemoryBalanceStore::new());
        let journal = Arc::new(InMemoryJournal::new());
        let account_id = AccountId::parse("ACC-1").unwrap();
        store.open_account(Account::new(
            account_id.clone(),
            "Alice",
            Money::from_cents(cents),
        ));
        (store, journal, account_id, MerchantId::parse("SHOP-1").unwrap())
    }

    #[tokio::test]
    async fn abandoned_pending_entry_is_voided_as_expired() {
        let (store, journal, account_id, merchant_id) = fixture(5000);
        let tx = journal
            .open(account_id.clone(), merchant_id, Money::from_cents(2000))
            .await
            .unwrap();

        // Zero TTL: everything pending is already stale.
        let sweep = RecoverySweep::new(store.clone(), journal.clone(), Duration::ZERO);
        let report = sweep.run_once().await;

        assert_eq!(report, SweepReport { rolled_forward: 0, voided: 1 });
        let entry = journal.get(&tx.transaction_id).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Voided);
        assert_eq!(entry.void_reason, Some(VoidReason::Expired));
        // The debit never happened, so the balance is untouched.
        assert_eq!(
            store.get_balance(&account_id).await.unwrap(),
            Money::from_cents(5000)
        );
    }

    #[tokio::test]
    async fn crash_between_debit_and_commit_rolls_forward() {
        let (store, journal, account_id, merchant_id) = fixture(5000);
        let tx = journal
            .open(account_id.clone(), merchant_id, Money::from_cents(2000))
            .await
            .unwrap();
        // The debit landed; the process died before the commit call.
        store
            .debit(&account_id, tx.amount, tx.transaction_id)
            .await
            .unwrap();

        let sweep = RecoverySweep::new(store.clone(), journal.clone(), Duration::ZERO);
        let report = sweep.run_once().await;

        assert_eq!(report, SweepReport { rolled_forward: 1, voided: 0 });
        let entry = journal.get(&tx.transaction_id).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Committed);
        // Committed and the balance reflects it: no permanent mismatch.
        assert_eq!(
            store.get_balance(&account_id).await.unwrap(),
            Money::from_cents(3000)
        );
    }

    #[tokio::test]
    async fn fresh_pending_entries_are_left_alone() {
        let (store, journal, account_id, merchant_id) = fixture(5000);
        let tx = journal
            .open(account_id, merchant_id, Money::from_cents(2000))
            .await
            .unwrap();

        let sweep = RecoverySweep::new(store, journal.clone(), Duration::from_secs(3600));
        let report = sweep.run_once().await;

        assert_eq!(report, SweepReport::default());
        let entry = journal.get(&tx.transaction_id).await.unwrap();
        assert_eq!(entry.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let (store, journal, account_id, merchant_id) = fixture(5000);
        journal
            .open(account_id, merchant_id, Money::from_cents(2000))
            .await
            .unwrap();

        let sweep = RecoverySweep::new(store, journal, Duration::ZERO);
        assert_eq!(sweep.run_once().await.voided, 1);
        assert_eq!(sweep.run_once().await, SweepReport::default());
    }
}
