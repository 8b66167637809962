//! Inbound request-response surface the clerk's device drives. Transport
//! is someone else's problem; these are the typed requests and responses,
//! the session map, and the wiring from committed charges into the
//! accrual view and the notification hook.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::accrual::MerchantAccrualView;
use crate::config::Config;
use crate::coordinator::{Charge, ChargeState};
use crate::domain::{
    AccountDirectory, BalanceStore, ChargeId, ChargeReceipt, Error, Journal, MerchantDirectory,
    MerchantId, Money, Notifier, Transaction, TransactionId, VoidReason,
};
use crate::identity::IdentityResolver;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct OpenChargeRequest {
    pub merchant_id: MerchantId,
    pub amount: Money,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub charge_id: ChargeId,
    pub scanned_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecideRequest {
    pub transaction_id: TransactionId,
    pub confirm: bool,
}

/// Client-facing rendering of the coordinator state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChargeStateDto {
    Scanning {
        amount: Money,
    },
    Confirming {
        transaction_id: TransactionId,
        customer_name: String,
        amount: Money,
        available: Money,
        shortfall: Option<Money>,
        confirm_enabled: bool,
    },
    Committed {
        transaction_id: TransactionId,
        account_id: String,
        amount: Money,
        new_balance: Money,
        merchant_accrued: Money,
    },
    Aborted {
        reason: VoidReason,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ChargeResponse {
    pub charge_id: ChargeId,
    #[serde(flatten)]
    pub state: ChargeStateDto,
}

#[derive(Debug, Clone, Serialize)]
pub struct MerchantSummary {
    pub merchant_id: MerchantId,
    pub accrued_total: Money,
    pub recent: Vec<Transaction>,
}

/// Default notification hook: a log line stands in for the push gateway.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_commit(&self, receipt: &ChargeReceipt) -> Result<(), Error> {
        info!(
            transaction_id = %receipt.transaction_id,
            account_id = %receipt.account_id,
            amount = %receipt.amount,
            "charge committed; customer notified"
        );
        Ok(())
    }
}

type SharedCharge<S, J> = Arc<Mutex<Charge<S, S, J>>>;

#[derive(Default)]
struct Sessions<S, J> {
    charges: HashMap<ChargeId, SharedCharge<S, J>>,
    by_transaction: HashMap<TransactionId, ChargeId>,
}

pub struct ChargeService<S, J, N> {
    store: Arc<S>,
    journal: Arc<J>,
    notifier: N,
    accrual: MerchantAccrualView,
    config: Config,
    sessions: parking_lot::Mutex<Sessions<S, J>>,
}

impl<S, J, N> ChargeService<S, J, N>
where
    S: BalanceStore + AccountDirectory + MerchantDirectory,
    J: Journal,
    N: Notifier,
{
    pub fn new(store: Arc<S>, journal: Arc<J>, notifier: N, config: Config) -> Self {
        Self {
            store,
            journal,
            notifier,
            accrual: MerchantAccrualView::new(),
            config,
            sessions: parking_lot::Mutex::new(Sessions {
                charges: HashMap::new(),
                by_transaction: HashMap::new(),
            }),
        }
    }

    pub fn accrual(&self) -> &MerchantAccrualView {
        &self.accrual
    }

    /// Opens a fresh charge for an enrolled merchant and applies the
    /// amount. Each call is a new machine; nothing is shared with earlier
    /// charges.
    pub async fn open_charge(&self, req: OpenChargeRequest) -> Result<ChargeResponse, Error> {
        let merchant = self
            .store
            .merchant(&req.merchant_id)
            .await
            .ok_or_else(|| Error::MerchantNotFound(req.merchant_id.clone()))?;
        if !merchant.accepts_charges {
            return Err(Error::MerchantNotEnrolled(merchant.merchant_id));
        }

        let mut charge = Charge::new(
            req.merchant_id,
            IdentityResolver::new(self.store.clone()),
            self.store.clone(),
            self.journal.clone(),
            self.config.clone(),
        );
        charge.enter_amount(req.amount)?;

        let charge_id = ChargeId::new();
        let dto = self.render(&charge);
        self.sessions
            .lock()
            .charges
            .insert(charge_id, Arc::new(Mutex::new(charge)));
        Ok(ChargeResponse {
            charge_id,
            state: dto,
        })
    }

    pub async fn scan(&self, req: ScanRequest) -> Result<ChargeResponse, Error> {
        let charge = self.charge(&req.charge_id)?;
        let mut charge = charge.lock().await;
        charge.scan(&req.scanned_payload).await?;

        if let Some(transaction_id) = charge.transaction_id() {
            self.sessions
                .lock()
                .by_transaction
                .insert(transaction_id, req.charge_id);
        }
        Ok(ChargeResponse {
            charge_id: req.charge_id,
            state: self.render(&charge),
        })
    }

    /// Commit or abort by transaction id. Retried confirms resolve to the
    /// same receipt; the accrual update is replay-proof on top of that.
    pub async fn decide(&self, req: DecideRequest) -> Result<ChargeResponse, Error> {
        let charge_id = self
            .sessions
            .lock()
            .by_transaction
            .get(&req.transaction_id)
            .copied()
            .ok_or(Error::TransactionNotFound(req.transaction_id))?;
        let charge = self.charge(&charge_id)?;
        let mut charge = charge.lock().await;

        if req.confirm {
            charge.confirm().await?;
            if let ChargeState::Committed(receipt) = charge.state() {
                if let Some(tx) = self.journal.get(&receipt.transaction_id).await {
                    self.accrual.record(&tx);
                }
                // Fire-and-forget: a failed notification never unwinds a
                // committed charge.
                if let Err(err) = self.notifier.notify_commit(receipt) {
                    warn!(transaction_id = %receipt.transaction_id, error = %err, "commit notification failed");
                }
            }
        } else {
            charge.abort().await?;
        }
        Ok(ChargeResponse {
            charge_id,
            state: self.render(&charge),
        })
    }

    pub async fn merchant_summary(&self, merchant_id: &MerchantId) -> Result<MerchantSummary, Error> {
        self.store
            .merchant(merchant_id)
            .await
            .ok_or_else(|| Error::MerchantNotFound(merchant_id.clone()))?;
        Ok(MerchantSummary {
            merchant_id: merchant_id.clone(),
            accrued_total: self.accrual.accrued_total(merchant_id),
            recent: self.accrual.recent(merchant_id, 10),
        })
    }

    fn charge(&self, charge_id: &ChargeId) -> Result<SharedCharge<S, J>, Error> {
        self.sessions
            .lock()
            .charges
            .get(charge_id)
            .cloned()
            .ok_or(Error::ChargeNotFound(*charge_id))
    }

    fn render(&self, charge: &Charge<S, S, J>) -> ChargeStateDto {
        match charge.state() {
            ChargeState::AmountEntry | ChargeState::Scanning { .. } => {
                let amount = match charge.state() {
                    ChargeState::Scanning { amount } => *amount,
                    _ => Money::ZERO,
                };
                ChargeStateDto::Scanning { amount }
            }
            ChargeState::Confirming(c) => ChargeStateDto::Confirming {
                transaction_id: c.transaction_id,
                customer_name: c.display_name.clone(),
                amount: c.amount,
                available: c.available,
                shortfall: c.shortfall,
                confirm_enabled: c.shortfall.is_none(),
            },
            ChargeState::Committed(receipt) => ChargeStateDto::Committed {
                transaction_id: receipt.transaction_id,
                account_id: receipt.account_id.to_string(),
                amount: receipt.amount,
                new_balance: receipt.new_balance,
                merchant_accrued: self.accrual.accrued_total(&receipt.merchant_id),
            },
            ChargeState::Aborted { reason } => ChargeStateDto::Aborted { reason: *reason },
        }
    }
}
