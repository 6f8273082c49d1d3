use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{RefreshToken, RefreshTokenStore};
use crate::error::AuthError;
use crate::Result;

const TOKEN_BYTES: usize = 32;

/// Lifecycle of the long-lived opaque refresh tokens.
#[derive(Clone)]
pub struct RefreshTokenManager {
    store: Arc<dyn RefreshTokenStore>,
    lifetime: Duration,
}

impl RefreshTokenManager {
    pub fn new(store: Arc<dyn RefreshTokenStore>, lifetime: Duration) -> Self {
        Self { store, lifetime }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Persist a brand new token for the account. Existing tokens are untouched.
    pub async fn issue(&self, account_id: Uuid) -> Result<RefreshToken> {
        self.issue_at(account_id, Utc::now()).await
    }

    pub async fn issue_at(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<RefreshToken> {
        let token = self.mint_at(account_id, now);
        let token = self.store.insert_refresh_token(&token).await?;
        debug!("Issued refresh token {} for account {}", token.id, account_id);
        Ok(token)
    }

    /// Build a token without storing it, for callers that persist it as part
    /// of a larger write.
    pub fn mint_at(&self, account_id: Uuid, now: DateTime<Utc>) -> RefreshToken {
        RefreshToken::new(account_id, Self::generate_token(), self.lifetime, now)
    }

    pub async fn lookup(&self, token: &str) -> Result<Option<RefreshToken>> {
        self.store.find_refresh_token(token).await
    }

    pub async fn verify(&self, token: RefreshToken) -> Result<RefreshToken> {
        self.verify_at(token, Utc::now()).await
    }

    /// Expired tokens are deleted on the way out.
    pub async fn verify_at(&self, token: RefreshToken, now: DateTime<Utc>) -> Result<RefreshToken> {
        if token.is_usable_at(now) {
            return Ok(token);
        }
        if token.is_expired_at(now) {
            self.store.delete_refresh_token(token.id).await?;
            info!("Purged expired refresh token {} of account {}", token.id, token.account_id);
            return Err(AuthError::TokenExpired.into());
        }
        Err(AuthError::TokenRevoked.into())
    }

    /// Revoke the presented token and hand out its successor.
    ///
    /// Only one caller can win the revocation, so a token replayed
    /// concurrently yields a single successor.
    pub async fn rotate_at(&self, token: &RefreshToken, now: DateTime<Utc>) -> Result<RefreshToken> {
        if !self.store.revoke_refresh_token(&token.token).await? {
            return Err(AuthError::TokenRevoked.into());
        }
        self.issue_at(token.account_id, now).await
    }

    /// Idempotent; unknown tokens are ignored.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        if self.store.revoke_refresh_token(token).await? {
            debug!("Refresh token revoked");
        }
        Ok(())
    }

    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64> {
        let removed = self.store.delete_refresh_tokens_for_account(account_id).await?;
        info!("Removed {} refresh tokens of account {}", removed, account_id);
        Ok(removed)
    }

    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.delete_expired_refresh_tokens(Utc::now()).await
    }
}
