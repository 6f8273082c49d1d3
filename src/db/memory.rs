//! In-process storage for tests and local runs without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{FailureOutcome, LockoutPolicy, SuccessOutcome};
use crate::db::models::{Account, RefreshToken};
use crate::db::store::{AccountStore, RefreshTokenStore};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::Result;

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

/// Both stores behind one lock. Every trait method holds the write lock for
/// its whole read-modify-write, which is what row locks give the Postgres store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn account_count(&self) -> usize {
        self.tables.read().await.accounts.len()
    }

    pub async fn refresh_token_count(&self) -> usize {
        self.tables.read().await.refresh_tokens.len()
    }

    /// Refresh tokens owned by an account, oldest first.
    pub async fn refresh_tokens_for(&self, account_id: Uuid) -> Vec<RefreshToken> {
        let tables = self.tables.read().await;
        let mut tokens: Vec<RefreshToken> = tables
            .refresh_tokens
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.created_at);
        tokens
    }

    /// Overwrite an account row as-is.
    pub async fn put_account(&self, account: Account) {
        self.tables.write().await.accounts.insert(account.id, account);
    }
}

fn unknown_owner() -> AppError {
    AppError::DatabaseError(DatabaseError::QueryError(
        "refresh token references an unknown account".into(),
    ))
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(
        &self,
        account: &Account,
        initial_token: &RefreshToken,
    ) -> Result<(Account, RefreshToken)> {
        let mut tables = self.tables.write().await;
        if tables.accounts.values().any(|a| a.email == account.email) {
            return Err(AuthError::EmailAlreadyExists.into());
        }
        if tables.accounts.contains_key(&account.id) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        // Checked before either row is written
        if initial_token.account_id != account.id {
            return Err(unknown_owner());
        }
        if tables.refresh_tokens.contains_key(&initial_token.token) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }

        tables.accounts.insert(account.id, account.clone());
        tables
            .refresh_tokens
            .insert(initial_token.token.clone(), initial_token.clone());
        Ok((account.clone(), initial_token.clone()))
    }

    async fn find_account_by_id(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.values().any(|a| a.email == email))
    }

    async fn record_failed_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or(AppError::AuthError(AuthError::AccountNotFound))?;

        let outcome = policy.on_failure(&account.lockout_state(), now);
        account.apply_lockout_state(outcome.state, now);
        Ok(outcome)
    }

    async fn record_successful_attempt(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<SuccessOutcome> {
        let mut tables = self.tables.write().await;
        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or(AppError::AuthError(AuthError::AccountNotFound))?;

        let outcome = policy.on_success(&account.lockout_state(), now);
        if let SuccessOutcome::Reset(state) = outcome {
            account.apply_lockout_state(state, now);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<RefreshToken> {
        let mut tables = self.tables.write().await;
        if !tables.accounts.contains_key(&token.account_id) {
            return Err(unknown_owner());
        }
        if tables.refresh_tokens.contains_key(&token.token) {
            return Err(AppError::DatabaseError(DatabaseError::Duplicate));
        }
        tables.refresh_tokens.insert(token.token.clone(), token.clone());
        Ok(token.clone())
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        Ok(self.tables.read().await.refresh_tokens.get(token).cloned())
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.refresh_tokens.get_mut(token) {
            Some(t) if !t.revoked => {
                t.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_refresh_token(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.refresh_tokens.retain(|_, t| t.id != id);
        Ok(())
    }

    async fn delete_refresh_tokens_for_account(&self, account_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| t.account_id != account_id);
        Ok((before - tables.refresh_tokens.len()) as u64)
    }

    async fn delete_expired_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| !t.is_expired_at(now));
        Ok((before - tables.refresh_tokens.len()) as u64)
    }
}
