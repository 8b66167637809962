use crate::domain::{AccountId, ChargeId, MerchantId, Money, TransactionId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed identity payload: {0}")]
    Malformed(String),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("merchant {0} not found")]
    MerchantNotFound(MerchantId),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("charge {0} not found")]
    ChargeNotFound(ChargeId),

    #[error("merchant {0} does not accept gift-card charges")]
    MerchantNotEnrolled(MerchantId),

    #[error("amount must be positive and at most {max}")]
    AmountOutOfRange { max: Money },

    #[error("charge amount must be positive")]
    NonPositiveAmount,

    #[error("insufficient funds: {available} available, {requested} requested")]
    InsufficientFunds { available: Money, requested: Money },

    #[error("transaction {0} already committed")]
    AlreadyCommitted(TransactionId),

    #[error("transaction {0} already voided")]
    AlreadyVoided(TransactionId),

    #[error("no applied debit to revert for transaction {0}")]
    NotApplied(TransactionId),

    #[error("charge is {state}, cannot {action}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("transaction {0} lost a concurrent update race")]
    Conflict(TransactionId),

    #[error("amount arithmetic overflow")]
    Overflow,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("script error: {0}")]
    Script(String),
}

impl Error {
    /// Transient failures the operator may retry without aborting the
    /// charge; everything else needs a decision.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Conflict(_))
    }
}
