pub mod account;
pub mod error;
pub mod money;
pub mod traits;
pub mod transaction;

pub use account::{Account, AccountId, MerchantAccount, MerchantId};
pub use error::Error;
pub use money::Money;
pub use traits::{
    AccountDirectory, BalanceStore, DebitOutcome, HistoryFilter, HistoryParty, Journal,
    MerchantDirectory, Notifier,
};
pub use transaction::{
    ChargeId, ChargeReceipt, Transaction, TransactionId, TransactionStatus, VoidReason,
};
