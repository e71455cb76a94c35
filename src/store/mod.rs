//! Credential store gateway: the contract the orchestrator drives against
//! account records, and the row types it exchanges.
//!
//! The store is the sole serialization point for the engine. Every
//! multi-statement sequence that must be atomic (registration's
//! uniqueness-check-then-insert, handshake-token redeem-and-mark-used) is a
//! single transaction or a single atomic statement behind this trait.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable")]
    Unavailable(#[source] anyhow::Error),
    /// The caller-supplied deadline elapsed; transient, retryable.
    #[error("credential store timed out")]
    Timeout,
}

/// Account role, stored as a lowercase string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Basic,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "basic" => Some(Self::Basic),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    /// Opaque PHC string; only `crate::password` interprets it.
    pub password_hash: String,
    pub role: Role,
    /// Present iff the account is enrolled in two-factor authentication.
    pub second_factor_secret: Option<String>,
    pub last_authenticated: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

#[derive(Debug)]
pub struct NewProfile<'a> {
    pub first_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub last_name: &'a str,
}

/// Outcome of the transactional account+profile insert.
#[derive(Debug)]
pub enum InsertOutcome {
    Created(Uuid),
    EmailTaken,
}

#[allow(async_fn_in_trait)]
pub trait CredentialStore: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Inserts the account and its profile row in one transaction, re-checking
    /// email uniqueness inside that transaction. Concurrent duplicates must
    /// resolve to exactly one `Created` and one `EmailTaken`.
    async fn insert_account_and_profile(
        &self,
        account: NewAccount<'_>,
        profile: NewProfile<'_>,
    ) -> Result<InsertOutcome, StoreError>;

    /// Returns the number of rows updated; zero means the account vanished.
    async fn update_password_hash(&self, id: Uuid, password_hash: &str)
        -> Result<u64, StoreError>;

    /// `None` clears the secret (two-factor disable).
    async fn update_second_factor_secret(
        &self,
        id: Uuid,
        secret: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// Atomic conditional enrollment: sets the secret only where none is
    /// present. Zero rows means the account is missing or already enrolled;
    /// concurrent enrollments of one account must resolve to one winner.
    async fn enroll_second_factor_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<u64, StoreError>;

    async fn update_last_authenticated(&self, id: Uuid) -> Result<(), StoreError>;

    /// Persists a handshake token row (`used = false`,
    /// `expires_at = now + ttl`). Old tokens for the same account are left
    /// alone; redemption order enforces single-use, not issuance.
    async fn insert_handshake_token(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        ttl_seconds: i64,
    ) -> Result<(), StoreError>;

    /// Atomic check-and-set: marks the token used and returns its account id
    /// iff it exists, is unused, and is unexpired. Concurrent redemptions of
    /// one token must yield exactly one `Some`.
    async fn redeem_handshake_token(&self, token_hash: &[u8])
        -> Result<Option<Uuid>, StoreError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<T> {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        (**self).find_account_by_email(email).await
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        (**self).find_account_by_id(id).await
    }

    async fn insert_account_and_profile(
        &self,
        account: NewAccount<'_>,
        profile: NewProfile<'_>,
    ) -> Result<InsertOutcome, StoreError> {
        (**self).insert_account_and_profile(account, profile).await
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        (**self).update_password_hash(id, password_hash).await
    }

    async fn update_second_factor_secret(
        &self,
        id: Uuid,
        secret: Option<&str>,
    ) -> Result<u64, StoreError> {
        (**self).update_second_factor_secret(id, secret).await
    }

    async fn enroll_second_factor_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<u64, StoreError> {
        (**self).enroll_second_factor_secret(id, secret).await
    }

    async fn update_last_authenticated(&self, id: Uuid) -> Result<(), StoreError> {
        (**self).update_last_authenticated(id).await
    }

    async fn insert_handshake_token(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        (**self)
            .insert_handshake_token(token_hash, account_id, ttl_seconds)
            .await
    }

    async fn redeem_handshake_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Uuid>, StoreError> {
        (**self).redeem_handshake_token(token_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::{InsertOutcome, Role};
    use uuid::Uuid;

    #[test]
    fn role_maps_to_and_from_strings() {
        assert_eq!(Role::Basic.as_str(), "basic");
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::parse("basic"), Some(Role::Basic));
        assert_eq!(Role::parse(" admin "), Some(Role::Admin));
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn insert_outcome_debug_names() {
        assert_eq!(
            format!("{:?}", InsertOutcome::Created(Uuid::nil())),
            format!("Created({})", Uuid::nil())
        );
        assert_eq!(format!("{:?}", InsertOutcome::EmailTaken), "EmailTaken");
    }
}
