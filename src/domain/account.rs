use serde::{Deserialize, Serialize};

use crate::domain::Money;

/// Opaque customer identifier carried inside a member QR code.
///
/// Valid ids are 1..=64 characters of uppercase letters, digits, `-` or `_`
/// (the shape of issued member codes). Anything else is syntactically
/// malformed, which keeps a mis-scanned barcode from looking like a
/// plausible-but-unknown account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(s: &str) -> Option<Self> {
        if is_valid_id(s) { Some(Self(s.to_owned())) } else { None }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MerchantId(String);

impl MerchantId {
    pub fn parse(s: &str) -> Option<Self> {
        if is_valid_id(s) { Some(Self(s.to_owned())) } else { None }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for MerchantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// A customer with a spendable gift-card balance.
///
/// The balance only ever decreases, and only through a committed charge
/// (or the compensating revert of a voided one). Funding happens outside
/// this subsystem and shows up here as the opening balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub balance: Money,
    pub display_name: String,
    pub contact_email: String,
}

impl Account {
    pub fn new(account_id: AccountId, display_name: impl Into<String>, balance: Money) -> Self {
        Self {
            account_id,
            balance,
            display_name: display_name.into(),
            contact_email: String::new(),
        }
    }
}

/// A participating shop. The accrued total is deliberately absent: it is a
/// projection of the journal (see `accrual`), not a field to mutate here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantAccount {
    pub merchant_id: MerchantId,
    pub display_name: String,
    /// Shops opt in before they may charge gift cards.
    pub accepts_charges: bool,
}

impl MerchantAccount {
    pub fn new(merchant_id: MerchantId, display_name: impl Into<String>) -> Self {
        Self {
            merchant_id,
            display_name: display_name.into(),
            accepts_charges: true,
        }
    }
}
