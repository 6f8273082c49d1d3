//! Authentication module for the FinTrack server
//!
//! This module handles password verification, account lockout,
//! access-token issuance and refresh-token lifecycle.

pub mod extractor;
pub mod handlers;
mod lockout;
mod password;
mod refresh;
mod service;
mod token;

pub use extractor::AuthenticatedAccount;
pub use lockout::{FailureOutcome, LockoutPolicy, LockoutState, SuccessOutcome};
pub use password::PasswordVerifier;
pub use refresh::RefreshTokenManager;
pub use service::{LoginStage, Session, SessionService};
pub use token::{AccessToken, AccessTokenIssuer, Claims};
