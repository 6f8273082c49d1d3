use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{FailureOutcome, LockoutPolicy, LockoutState, SuccessOutcome};
use crate::db::models::{Account, RefreshToken};
use crate::db::store::{AccountStore, RefreshTokenStore};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

/// Postgres-backed account and refresh-token storage.
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| AppError::DatabaseError(DatabaseError::ConnectionError(e.to_string())))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    async fn lock_account_counters(
        transaction: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<LockoutState> {
        let row: Option<(i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT failed_attempts, lock_time FROM accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut **transaction)
        .await?;

        let (failed_attempts, lock_time) =
            row.ok_or(AppError::AuthError(AuthError::AccountNotFound))?;
        Ok(LockoutState {
            failed_attempts,
            lock_time,
        })
    }

    async fn write_account_counters(
        transaction: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        state: &LockoutState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET failed_attempts = $2, lock_time = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(account_id)
        .bind(state.failed_attempts)
        .bind(state.lock_time)
        .bind(now)
        .execute(&mut **transaction)
        .await?;

        Ok(())
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
}

/// Run an idempotent read, retrying once on connection-level failures.
async fn read_with_retry<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match op().await {
        Err(e) if is_transient(&e) => {
            warn!("Retrying read after transient database error: {}", e);
            Ok(op().await?)
        }
        other => Ok(other?),
    }
}

async fn insert_token<'e, E>(executor: E, token: &RefreshToken) -> std::result::Result<RefreshToken, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, RefreshToken>(
        r#"
        INSERT INTO refresh_tokens (id, account_id, token, expiry_date, revoked, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, account_id, token, expiry_date, revoked, created_at
        "#,
    )
    .bind(token.id)
    .bind(token.account_id)
    .bind(&token.token)
    .bind(token.expiry_date)
    .bind(token.revoked)
    .bind(token.created_at)
    .fetch_one(executor)
    .await
}

#[async_trait]
impl AccountStore for DbOperations {
    async fn create_account(
        &self,
        account: &Account,
        initial_token: &RefreshToken,
    ) -> Result<(Account, RefreshToken)> {
        let mut transaction = self.begin_transaction().await?;

        let result = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (id, email, display_name, password_hash, enabled, failed_attempts, lock_time, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, email, display_name, password_hash, enabled, failed_attempts, lock_time, created_at, updated_at
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.display_name)
        .bind(&account.password_hash)
        .bind(account.enabled)
        .bind(account.failed_attempts)
        .bind(account.lock_time)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&mut *transaction)
        .await;

        let account = match result {
            Ok(account) => account,
            Err(e) => {
                transaction.rollback().await?;
                return match AppError::from(e) {
                    AppError::DatabaseError(DatabaseError::Duplicate) => {
                        Err(AuthError::EmailAlreadyExists.into())
                    }
                    other => Err(other),
                };
            }
        };

        match insert_token(&mut *transaction, initial_token).await {
            Ok(token) => {
                transaction.commit().await?;
                Ok((account, token))
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        read_with_retry(move || {
            sqlx::query_as::<_, Account>(
                "SELECT id, email, display_name, password_hash, enabled, failed_attempts, lock_time, created_at, updated_at FROM accounts WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(self.pool.as_ref())
        })
        .await
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        read_with_retry(move || {
            sqlx::query_as::<_, Account>(
                "SELECT id, email, display_name, password_hash, enabled, failed_attempts, lock_time, created_at, updated_at FROM accounts WHERE email = $1",
            )
            .bind(email)
            .fetch_optional(self.pool.as_ref())
        })
        .await
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        read_with_retry(move || {
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM accounts WHERE email = $1)")
                .bind(email)
                .fetch_one(self.pool.as_ref())
        })
        .await
    }

    async fn record_failed_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut transaction = self.begin_transaction().await?;

        let current = Self::lock_account_counters(&mut transaction, account_id).await?;
        let outcome = policy.on_failure(&current, now);
        Self::write_account_counters(&mut transaction, account_id, &outcome.state, now).await?;

        transaction.commit().await?;
        Ok(outcome)
    }

    async fn record_successful_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome> {
        let mut transaction = self.begin_transaction().await?;

        let current = Self::lock_account_counters(&mut transaction, account_id).await?;
        let outcome = policy.on_success(&current, now);
        if let SuccessOutcome::Reset(state) = &outcome {
            Self::write_account_counters(&mut transaction, account_id, state, now).await?;
        }

        transaction.commit().await?;
        Ok(outcome)
    }
}

#[async_trait]
impl RefreshTokenStore for DbOperations {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken> {
        Ok(insert_token(self.pool.as_ref(), token).await?)
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        read_with_retry(move || {
            sqlx::query_as::<_, RefreshToken>(
                "SELECT id, account_id, token, expiry_date, revoked, created_at FROM refresh_tokens WHERE token = $1",
            )
            .bind(token)
            .fetch_optional(self.pool.as_ref())
        })
        .await
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE WHERE token = $1 AND revoked = FALSE",
        )
        .bind(token)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM refresh_tokens WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn delete_refresh_tokens_for_account(&self, account_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE account_id = $1")
            .bind(account_id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut transaction = self.begin_transaction().await?;

        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expiry_date <= $1")
            .bind(now)
            .execute(&mut *transaction)
            .await;

        match result {
            Ok(result) => {
                transaction.commit().await?;
                Ok(result.rows_affected())
            }
            Err(e) => {
                transaction.rollback().await?;
                Err(e.into())
            }
        }
    }
}
