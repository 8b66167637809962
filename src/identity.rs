//! Maps a scanned QR payload to a canonical account id.

use std::sync::Arc;

use crate::domain::{AccountDirectory, AccountId, Error};

/// Scheme prefix used by the membership app's QR codes.
pub const MEMBER_SCHEME: &str = "MEMBER";

/// Extracts the candidate account id from a scanned payload.
///
/// Accepted shapes: a bare id (`"ACC-1"`) or the prefixed form
/// (`"MEMBER:ACC-1"`). Unknown schemes and ids that do not look like
/// member codes are malformed, which the caller surfaces differently from
/// a well-formed id that simply does not exist.
pub fn parse_payload(payload: &str) -> Result<AccountId, Error> {
    let trimmed = payload.trim();
    let candidate = match trimmed.split_once(':') {
        Some((MEMBER_SCHEME, rest)) => rest,
        Some((scheme, _)) => {
            return Err(Error::Malformed(format!("unknown scheme {scheme:?}")));
        }
        None => trimmed,
    };
    AccountId::parse(candidate)
        .ok_or_else(|| Error::Malformed(format!("not a member code: {candidate:?}")))
}

pub struct IdentityResolver<D> {
    directory: Arc<D>,
}

impl<D> IdentityResolver<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }
}

impl<D: AccountDirectory> IdentityResolver<D> {
    /// Pure lookup: parse, then check the directory. Never creates an
    /// account.
    pub async fn resolve(&self, payload: &str) -> Result<AccountId, Error> {
        let account_id = parse_payload(payload)?;
        if self.directory.exists(&account_id).await {
            Ok(account_id)
        } else {
            Err(Error::AccountNotFound(account_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::InMemoryBalanceStore;
    use crate::domain::{Account, Money};

    fn directory_with(id: &str) -> Arc<InMemoryBalanceStore> {
        let store = Arc::new(InMemoryBalanceStore::new());
        store.open_account(Account::new(
            AccountId::parse(id).unwrap(),
            "Alice",
            Money::from_cents(5000),
        ));
        store
    }

    #[test]
    fn accepts_bare_and_prefixed_payloads() {
        assert_eq!(
            parse_payload("ACC-1").unwrap(),
            AccountId::parse("ACC-1").unwrap()
        );
        assert_eq!(
            parse_payload("MEMBER:ACC-1").unwrap(),
            AccountId::parse("ACC-1").unwrap()
        );
    }

    #[test]
    fn unknown_scheme_and_garbage_are_malformed() {
        assert!(matches!(parse_payload("OTHER:ACC-1"), Err(Error::Malformed(_))));
        assert!(matches!(parse_payload("garbage"), Err(Error::Malformed(_))));
        assert!(matches!(parse_payload("MEMBER:"), Err(Error::Malformed(_))));
        assert!(matches!(parse_payload(""), Err(Error::Malformed(_))));
    }

    #[tokio::test]
    async fn resolves_known_account() {
        let resolver = IdentityResolver::new(directory_with("ACC-1"));
        let id = resolver.resolve("MEMBER:ACC-1").await.unwrap();
        assert_eq!(id.as_str(), "ACC-1");
    }

    #[tokio::test]
    async fn valid_looking_unknown_id_is_not_found_not_malformed() {
        let resolver = IdentityResolver::new(directory_with("ACC-1"));
        assert!(matches!(
            resolver.resolve("ACC-999").await,
            Err(Error::AccountNotFound(_))
        ));
    }
}
