use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString},
};
use tokio::task;

use crate::config::PasswordConfig;
use crate::error::AppError;

/// Argon2id hashing and verification.
///
/// Both directions are CPU bound and run on the blocking pool.
#[derive(Clone)]
pub struct PasswordVerifier {
    params: Params,
    // Verified against when the account does not exist, so unknown emails cost
    // the same as wrong passwords
    dummy_hash: String,
}

impl PasswordVerifier {
    pub fn new(config: &PasswordConfig) -> Result<Self, AppError> {
        let params = Params::new(config.memory_cost_kib, config.time_cost, config.parallelism, None)
            .map_err(|e| AppError::ConfigError(format!("invalid argon2 parameters: {}", e)))?;
        let dummy_hash = hash_with(&params, "fintrack-dummy-password")?;

        Ok(Self { params, dummy_hash })
    }

    fn argon2(params: &Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone())
    }

    /// Hash a password into a PHC string with a fresh random salt.
    pub async fn hash(&self, password: &str) -> Result<String, AppError> {
        let params = self.params.clone();
        let password = password.to_string();
        task::spawn_blocking(move || hash_with(&params, &password)).await?
    }

    /// Check a password against a stored PHC string.
    ///
    /// A mismatch is `Ok(false)`; only a corrupt stored hash is an error.
    /// The parameters embedded in the stored hash are used, so hashes made with
    /// older cost settings keep verifying.
    pub async fn verify(&self, password: &str, stored_hash: &str) -> Result<bool, AppError> {
        let password = password.to_string();
        let stored_hash = stored_hash.to_string();
        task::spawn_blocking(move || verify_with(&password, &stored_hash)).await?
    }

    /// Spend one verification without a real account behind it.
    pub async fn verify_dummy(&self, password: &str) -> Result<(), AppError> {
        self.verify(password, &self.dummy_hash).await.map(|_| ())
    }
}

fn hash_with(params: &Params, password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = PasswordVerifier::argon2(params).hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn verify_with(password: &str, stored_hash: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored_hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
