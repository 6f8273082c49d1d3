use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{AppError, AuthError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // Account ID
    pub exp: i64,     // Expiration time
    pub iat: i64,     // Issued at
}

impl Claims {
    pub fn account_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::AuthError(AuthError::InvalidToken))
    }
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints and checks self-contained HMAC-signed access tokens.
#[derive(Clone)]
pub struct AccessTokenIssuer {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
}

impl AccessTokenIssuer {
    pub fn new(secret: &[u8], algorithm: Algorithm, lifetime: Duration) -> Result<Self, AppError> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AppError::ConfigError(format!(
                "unsupported access token algorithm {:?}, expected an HMAC algorithm",
                algorithm
            )));
        }
        if secret.is_empty() {
            return Err(AppError::ConfigError("access token secret must not be empty".into()));
        }

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            lifetime,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AppError> {
        let algorithm = config.jwt_algorithm.parse::<Algorithm>().map_err(|_| {
            AppError::ConfigError(format!("unknown jwt algorithm: {}", config.jwt_algorithm))
        })?;
        Self::new(config.jwt_secret.as_bytes(), algorithm, config.access_token_lifetime())
    }

    pub fn issue_at(&self, account_id: Uuid, now: DateTime<Utc>) -> Result<AccessToken, AppError> {
        let expires_at = now + self.lifetime;
        let claims = Claims {
            sub: account_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;

        Ok(AccessToken {
            token,
            // Round to what the claim actually carries
            expires_at: Utc.timestamp_opt(claims.exp, 0).single().unwrap_or(expires_at),
        })
    }

    /// Check signature and expiry. No storage is consulted.
    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
