use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::lockout::{LockoutPolicy, SuccessOutcome};
use crate::auth::password::PasswordVerifier;
use crate::auth::refresh::RefreshTokenManager;
use crate::auth::token::{AccessToken, AccessTokenIssuer, Claims};
use crate::config::AuthConfig;
use crate::db::{Account, AccountProfile, AccountStore, RefreshToken, RefreshTokenStore};
use crate::error::AuthError;
use crate::Result;

/// Progress of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    Start,
    AccountLookedUp,
    LockChecked,
    CredentialVerified,
    TokensIssued,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginStage::Start => "start",
            LoginStage::AccountLookedUp => "account_looked_up",
            LoginStage::LockChecked => "lock_checked",
            LoginStage::CredentialVerified => "credential_verified",
            LoginStage::TokensIssued => "tokens_issued",
        };
        f.write_str(name)
    }
}

/// Token pair plus the profile of the account it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub token_type: &'static str,
    pub account: AccountProfile,
}

impl Session {
    fn new(access: AccessToken, refresh: RefreshToken, account: &Account) -> Self {
        Self {
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expires_at: refresh.expiry_date,
            token_type: "Bearer",
            account: account.profile(),
        }
    }
}

/// Register, login, refresh and logout flows over the auth components.
pub struct SessionService {
    accounts: Arc<dyn AccountStore>,
    passwords: PasswordVerifier,
    lockout: LockoutPolicy,
    access_tokens: AccessTokenIssuer,
    refresh_tokens: RefreshTokenManager,
    rotate_refresh_tokens: bool,
}

impl SessionService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        refresh_store: Arc<dyn RefreshTokenStore>,
        config: &AuthConfig,
    ) -> Result<Self> {
        Ok(Self {
            accounts,
            passwords: PasswordVerifier::new(&config.password)?,
            lockout: config.lockout_policy(),
            access_tokens: AccessTokenIssuer::from_config(config)?,
            refresh_tokens: RefreshTokenManager::new(refresh_store, config.refresh_token_lifetime()),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        })
    }

    pub fn refresh_tokens(&self) -> &RefreshTokenManager {
        &self.refresh_tokens
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session> {
        if self.accounts.email_exists(email).await? {
            warn!("Registration rejected, email already exists: {}", email);
            return Err(AuthError::EmailAlreadyExists.into());
        }

        let password_hash = self.passwords.hash(password).await?;
        let account = Account::new(email.to_string(), display_name.to_string(), password_hash);

        let now = Utc::now();
        let access = self.access_tokens.issue_at(account.id, now)?;
        let refresh = self.refresh_tokens.mint_at(account.id, now);

        // The unique constraint still catches a concurrent registration
        let (account, refresh) = self.accounts.create_account(&account, &refresh).await?;
        info!("Account registered successfully: {}", account.email);

        Ok(Session::new(access, refresh, &account))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.login_at(email, password, Utc::now()).await
    }

    pub async fn login_at(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        debug!(stage = %LoginStage::Start, "Login attempt for {}", email);

        let account = match self.accounts.find_account_by_email(email).await? {
            Some(account) => account,
            None => {
                self.passwords.verify_dummy(password).await?;
                warn!("Login attempt for unknown email: {}", email);
                return Err(AuthError::AccountNotFound.into());
            }
        };
        debug!(stage = %LoginStage::AccountLookedUp, account_id = %account.id, "Account found");

        if self.lockout.is_locked(&account.lockout_state(), now) {
            warn!("Login attempt for locked account: {}", email);
            return Err(AuthError::AccountLocked.into());
        }
        if !account.enabled {
            warn!("Login attempt for disabled account: {}", email);
            return Err(AuthError::AccountDisabled.into());
        }
        debug!(stage = %LoginStage::LockChecked, account_id = %account.id, "Lock gate passed");

        if !self.passwords.verify(password, &account.password_hash).await? {
            let outcome = self
                .accounts
                .record_failed_attempt(account.id, &self.lockout, now)
                .await?;

            if outcome.locked {
                warn!(
                    "Account locked for {} after {} failed attempts",
                    email, outcome.state.failed_attempts
                );
                return Err(AuthError::AccountLocked.into());
            }
            warn!(
                "Invalid password for {} ({} of {} attempts)",
                email,
                outcome.state.failed_attempts,
                self.lockout.max_failed_attempts()
            );
            return Err(AuthError::InvalidCredentials.into());
        }

        if let SuccessOutcome::Locked = self
            .accounts
            .record_successful_attempt(account.id, &self.lockout, now)
            .await?
        {
            warn!("Account {} was locked while its login was in flight", email);
            return Err(AuthError::AccountLocked.into());
        }
        debug!(stage = %LoginStage::CredentialVerified, account_id = %account.id, "Password verified");

        let session = self.start_session(&account, now).await?;
        debug!(stage = %LoginStage::TokensIssued, account_id = %account.id, "Session started");
        info!("User authenticated successfully: {}", email);

        Ok(session)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.refresh_at(refresh_token, Utc::now()).await
    }

    /// Exchange a refresh token for a new access token, rotating the refresh
    /// token when configured to.
    pub async fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<Session> {
        let token = self
            .refresh_tokens
            .lookup(refresh_token)
            .await?
            .ok_or(AuthError::TokenNotFound)?;
        let token = self.refresh_tokens.verify_at(token, now).await?;

        let account = self
            .accounts
            .find_account_by_id(token.account_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if !account.enabled {
            return Err(AuthError::AccountDisabled.into());
        }

        let refresh = if self.rotate_refresh_tokens {
            self.refresh_tokens.rotate_at(&token, now).await?
        } else {
            token
        };
        let access = self.access_tokens.issue_at(account.id, now)?;
        debug!("Access token refreshed for account {}", account.id);

        Ok(Session::new(access, refresh, &account))
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<()> {
        self.refresh_tokens.revoke(refresh_token).await
    }

    /// Drop every refresh token of the account.
    pub async fn logout_everywhere(&self, account_id: Uuid) -> Result<u64> {
        self.refresh_tokens.revoke_all(account_id).await
    }

    pub fn authenticate(&self, access_token: &str) -> Result<Claims> {
        self.access_tokens.verify(access_token)
    }

    async fn start_session(&self, account: &Account, now: DateTime<Utc>) -> Result<Session> {
        let access = self.access_tokens.issue_at(account.id, now)?;
        let refresh = self.refresh_tokens.issue_at(account.id, now).await?;
        Ok(Session::new(access, refresh, account))
    }
}
