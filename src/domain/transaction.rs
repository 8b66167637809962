use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccountId, MerchantId, Money};

/// Journal entry id, doubling as the debit idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one charge attempt (one run of the coordinator machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChargeId(Uuid);

impl ChargeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChargeId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ChargeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Voided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidReason {
    OperatorCancel,
    InsufficientFunds,
    /// Left pending beyond the recovery window; voided by the sweep.
    Expired,
    DebitFailed,
    /// Lost a race against the sweep or a concurrent decision.
    Conflict,
}

impl core::fmt::Display for VoidReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            VoidReason::OperatorCancel => "operator cancel",
            VoidReason::InsufficientFunds => "insufficient funds",
            VoidReason::Expired => "expired",
            VoidReason::DebitFailed => "debit failed",
            VoidReason::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// One charge as the journal records it. Immutable once terminal: the only
/// permitted mutation is the single `pending -> committed` or
/// `pending -> voided` transition, applied inside the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub merchant_id: MerchantId,
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<VoidReason>,
}

impl Transaction {
    pub fn open(account_id: AccountId, merchant_id: MerchantId, amount: Money) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            account_id,
            merchant_id,
            amount,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            committed_at: None,
            voided_at: None,
            void_reason: None,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}

impl core::fmt::Display for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:?},account={},merchant={},amount={}",
            self.status, self.account_id, self.merchant_id, self.amount
        )
    }
}

/// What the operator walks away with after a committed charge.
#[derive(Debug, Clone, Serialize)]
pub struct ChargeReceipt {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub merchant_id: MerchantId,
    pub amount: Money,
    pub new_balance: Money,
    pub committed_at: DateTime<Utc>,
}
