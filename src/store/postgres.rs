//! Postgres-backed credential store.
//!
//! Every statement is parameterized and runs under a `db.query` span. Calls
//! are bounded by the configured store timeout so a stalled database surfaces
//! as a transient [`StoreError::Timeout`] rather than hanging the login path.

use anyhow::anyhow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::{Account, CredentialStore, InsertOutcome, NewAccount, NewProfile, Role, StoreError};

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

fn unavailable(err: sqlx::Error, what: &'static str) -> StoreError {
    StoreError::Unavailable(anyhow::Error::new(err).context(what))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<Account, StoreError> {
    let role: String = row.get("role");
    let role = Role::parse(&role)
        .ok_or_else(|| StoreError::Unavailable(anyhow!("unknown role in accounts row: {role}")))?;
    Ok(Account {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role,
        second_factor_secret: row.get("second_factor_secret"),
        last_authenticated: row.get("last_authenticated"),
    })
}

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, role, second_factor_secret, last_authenticated";

impl CredentialStore for PgCredentialStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            );
            let row = sqlx::query(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to lookup account by email"))?;
            row.as_ref().map(account_from_row).transpose()
        })
        .await
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            );
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to lookup account by id"))?;
            row.as_ref().map(account_from_row).transpose()
        })
        .await
    }

    async fn insert_account_and_profile(
        &self,
        account: NewAccount<'_>,
        profile: NewProfile<'_>,
    ) -> Result<InsertOutcome, StoreError> {
        self.bounded(async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|err| unavailable(err, "failed to begin registration transaction"))?;

            // Re-check uniqueness inside the transaction; the unique
            // constraint below still decides concurrent races.
            let query = "SELECT 1 FROM accounts WHERE email = $1";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            let taken = sqlx::query(query)
                .bind(account.email)
                .fetch_optional(&mut *tx)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to check email uniqueness"))?;
            if taken.is_some() {
                let _ = tx.rollback().await;
                return Ok(InsertOutcome::EmailTaken);
            }

            let query = r"
                INSERT INTO accounts (email, password_hash, role)
                VALUES ($1, $2, $3)
                RETURNING id
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(account.email)
                .bind(account.password_hash)
                .bind(account.role.as_str())
                .fetch_one(&mut *tx)
                .instrument(span)
                .await;

            let account_id: Uuid = match row {
                Ok(row) => row.get("id"),
                Err(err) if is_unique_violation(&err) => {
                    let _ = tx.rollback().await;
                    return Ok(InsertOutcome::EmailTaken);
                }
                Err(err) => return Err(unavailable(err, "failed to insert account")),
            };

            let query = r"
                INSERT INTO profiles (account_id, first_name, middle_name, last_name)
                VALUES ($1, $2, $3, $4)
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(account_id)
                .bind(profile.first_name)
                .bind(profile.middle_name)
                .bind(profile.last_name)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to insert profile"))?;

            tx.commit()
                .await
                .map_err(|err| unavailable(err, "failed to commit registration"))?;

            Ok(InsertOutcome::Created(account_id))
        })
        .await
    }

    async fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<u64, StoreError> {
        let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to update password hash"))?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn update_second_factor_secret(
        &self,
        id: Uuid,
        secret: Option<&str>,
    ) -> Result<u64, StoreError> {
        let query = "UPDATE accounts SET second_factor_secret = $2 WHERE id = $1";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(id)
                .bind(secret)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to update second-factor secret"))?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn enroll_second_factor_secret(
        &self,
        id: Uuid,
        secret: &str,
    ) -> Result<u64, StoreError> {
        // Conditional set; concurrent enrollments of one account resolve to
        // a single updated row.
        let query = r"
            UPDATE accounts
            SET second_factor_secret = $2
            WHERE id = $1
              AND second_factor_secret IS NULL
        ";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(id)
                .bind(secret)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to enroll second-factor secret"))?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn update_last_authenticated(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE accounts SET last_authenticated = NOW() WHERE id = $1";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to update last-authenticated"))?;
            Ok(())
        })
        .await
    }

    async fn insert_handshake_token(
        &self,
        token_hash: &[u8],
        account_id: Uuid,
        ttl_seconds: i64,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO handshake_tokens (token_hash, account_id, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(token_hash)
                .bind(account_id)
                .bind(ttl_seconds)
                .execute(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to insert handshake token"))?;
            Ok(())
        })
        .await
    }

    async fn redeem_handshake_token(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<Uuid>, StoreError> {
        // Single atomic check-and-set; concurrent redemptions of one token
        // resolve to exactly one returned row.
        let query = r"
            UPDATE handshake_tokens
            SET used = TRUE
            WHERE token_hash = $1
              AND NOT used
              AND expires_at > NOW()
            RETURNING account_id
        ";
        self.bounded(async {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .map_err(|err| unavailable(err, "failed to redeem handshake token"))?;
            Ok(row.map(|row| row.get("account_id")))
        })
        .await
    }
}
