//! In-memory credential store for tests and local development.
//!
//! A single mutex guards all state, so the redeem-then-mark-used sequence is
//! atomic here for the same reason a single `UPDATE ... RETURNING` is atomic
//! against Postgres.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Account, CredentialStore, InsertOutcome, NewAccount, NewProfile, StoreError};

#[derive(Clone, Debug)]
pub struct Profile {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
}

#[derive(Debug)]
struct HandshakeRow {
    account_id: Uuid,
    expires_at: DateTime<Utc>,
    used: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    profiles: HashMap<Uuid, Profile>,
    tokens: HashMap<Vec<u8>, HandshakeRow>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Inner>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn account(&self, id: Uuid) -> Option<Account> {
        self.inner.lock().await.accounts.get(&id).cloned()
    }

    pub async fn profile(&self, account_id: Uuid) -> Option<Profile> {
        self.inner.lock().await.profiles.get(&account_id).cloned()
    }

    pub async fn account_count(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    pub async fn handshake_token_count(&self) -> usize {
        self.inner.lock().await.tokens.len()
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.lock().await.accounts.get(&id).cloned())
    }

    async fn insert_account_and_profile(
        &self,
        account: NewAccount<'_>,
        profile: NewProfile<'_>,
    ) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.values().any(|row| row.email == account.email) {
            return Ok(InsertOutcome::EmailTaken);
        }
        let id = Uuid::new_v4();
        inner.accounts.insert(
            id,
            Account {
                id,
                email: account.email.to_string(),
                password_hash: account.password_hash.to_string(),
                role: account.role,
                second_factor_secret: None,
                last_authenticated: None,
            },
        );
        inner.profiles.insert(
            id,
            Profile {
                first_name: profile.first_name.to_string(),
                middle_name: profile.middle_name.map(str::to_string),
                last_name: profile.last_name.to_string(),
            },
        );
        Ok(InsertOutcome::Created(id))
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get_mut(&id) {
            Some(account) => {
                account.password_hash = password_hash.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_second_factor_secret(
        &self,
        id: Uuid,
        secret: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get_mut(&id) {
            Some(account) => {
                account.second_factor_secret = secret.map(str::to_string);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn enroll_second_factor_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.accounts.get_mut(&id) {
            Some(account) if account.second_factor_secret.is_none() => {
                account.second_factor_secret = Some(secret.to_string());
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_last_authenticated(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.get_mut(&id) {
            account.last_authenticated = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_handshake_token(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(
            token_hash.to_vec(),
            HandshakeRow {
                account_id,
                expires_at: Utc::now() + Duration::seconds(ttl_seconds),
                used: false,
            },
        );
        Ok(())
    }

    async fn redeem_handshake_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Uuid>, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        match inner.tokens.get_mut(token_hash) {
            Some(row) if !row.used && row.expires_at > now => {
                row.used = true;
                Ok(Some(row.account_id))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;
    use anyhow::Result;

    fn new_account(email: &str) -> NewAccount<'_> {
        NewAccount {
            email,
            password_hash: "$argon2id$stub",
            role: Role::Basic,
        }
    }

    fn new_profile() -> NewProfile<'static> {
        NewProfile {
            first_name: "Alice",
            middle_name: None,
            last_name: "Doe",
        }
    }

    #[tokio::test]
    async fn insert_then_lookup_by_email_and_id() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let outcome = store
            .insert_account_and_profile(new_account("alice@example.com"), new_profile())
            .await?;
        let InsertOutcome::Created(id) = outcome else {
            panic!("expected Created, got {outcome:?}");
        };

        let by_email = store.find_account_by_email("alice@example.com").await?;
        assert_eq!(by_email.map(|account| account.id), Some(id));
        let by_id = store.find_account_by_id(id).await?;
        assert_eq!(by_id.map(|account| account.email), Some("alice@example.com".to_string()));
        assert_eq!(store.profile(id).await.map(|p| p.first_name), Some("Alice".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() -> Result<()> {
        let store = MemoryCredentialStore::new();
        store
            .insert_account_and_profile(new_account("alice@example.com"), new_profile())
            .await?;
        let outcome = store
            .insert_account_and_profile(new_account("alice@example.com"), new_profile())
            .await?;
        assert!(matches!(outcome, InsertOutcome::EmailTaken));
        assert_eq!(store.account_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn enrollment_sets_the_secret_only_when_absent() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let outcome = store
            .insert_account_and_profile(new_account("alice@example.com"), new_profile())
            .await?;
        let InsertOutcome::Created(id) = outcome else {
            panic!("expected Created, got {outcome:?}");
        };

        assert_eq!(store.enroll_second_factor_secret(id, "first").await?, 1);
        assert_eq!(store.enroll_second_factor_secret(id, "second").await?, 0);
        let stored = store
            .account(id)
            .await
            .and_then(|account| account.second_factor_secret);
        assert_eq!(stored.as_deref(), Some("first"));

        assert_eq!(
            store
                .enroll_second_factor_secret(Uuid::new_v4(), "x")
                .await?,
            0
        );
        Ok(())
    }

    #[tokio::test]
    async fn handshake_token_redeems_exactly_once() -> Result<()> {
        let store = MemoryCredentialStore::new();
        let account_id = Uuid::new_v4();
        store
            .insert_handshake_token(b"hash", account_id, 300)
            .await?;

        assert_eq!(
            store.redeem_handshake_token(b"hash").await?,
            Some(account_id)
        );
        assert_eq!(store.redeem_handshake_token(b"hash").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_handshake_token_is_rejected() -> Result<()> {
        let store = MemoryCredentialStore::new();
        store
            .insert_handshake_token(b"hash", Uuid::new_v4(), 0)
            .await?;
        assert_eq!(store.redeem_handshake_token(b"hash").await?, None);
        Ok(())
    }
}
