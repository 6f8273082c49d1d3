//! Storage seams for the authentication core.
//!
//! Lockout bookkeeping is expressed as whole read-modify-write operations so an
//! implementation can run them under a row lock instead of exposing a racy
//! read-then-update pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{FailureOutcome, LockoutPolicy, SuccessOutcome};
use crate::db::models::{Account, RefreshToken};
use crate::Result;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account together with its first refresh token. Either both
    /// rows are written or neither is. A taken email yields
    /// `AuthError::EmailAlreadyExists`.
    async fn create_account(
        &self,
        account: &Account,
        initial_token: &RefreshToken,
    ) -> Result<(Account, RefreshToken)>;

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>>;

    /// Exact-match lookup.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    /// Atomically apply a failed password check to the account's counters.
    async fn record_failed_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome>;

    /// Atomically apply a successful password check to the account's counters.
    /// Writes only when the counters actually change.
    async fn record_successful_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken>;

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Flip `revoked` from false to true. Returns whether this call did the flip.
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool>;

    async fn delete_refresh_token(&self, id: Uuid) -> Result<()>;

    async fn delete_refresh_tokens_for_account(&self, account_id: Uuid) -> Result<u64>;

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64>;
}
