// src/services/password.rs
//! One-way salted hashing for passwords and API key secrets (Argon2id)

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Failed to hash secret: {0}")]
    HashingFailed(String),

    #[error("Hashing worker unavailable: {0}")]
    Unavailable(String),
}

/// Runs Argon2 off the async workers with a cap on concurrent derivations
///
/// Every hash or verify holds a permit for the duration of the blocking
/// task, so a burst of login or API key attempts queues instead of
/// starving the executor.
#[derive(Debug, Clone)]
pub struct SecretHasher {
    permits: Arc<Semaphore>,
}

impl Default for SecretHasher {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(workers)
    }
}

impl SecretHasher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    async fn run<T, F>(&self, work: F) -> Result<T, HashError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| HashError::Unavailable(e.to_string()))?;

        tokio::task::spawn_blocking(work).await.map_err(|e| {
            error!(error = %e, "Argon2 task failed");
            HashError::Unavailable(e.to_string())
        })
    }

    pub async fn hash(&self, secret: &str) -> Result<String, HashError> {
        let secret = secret.to_string();
        self.run(move || hash_secret(&secret)).await?
    }

    pub async fn verify(&self, hash: &str, secret: &str) -> Result<bool, HashError> {
        let (hash, secret) = (hash.to_string(), secret.to_string());
        self.run(move || verify_secret(&hash, &secret)).await
    }

    /// Index of the first hash in `hashes` that `secret` matches
    ///
    /// All candidates are checked inside one blocking task under one permit.
    pub async fn find_match(
        &self,
        hashes: Vec<String>,
        secret: &str,
    ) -> Result<Option<usize>, HashError> {
        let secret = secret.to_string();
        self.run(move || hashes.iter().position(|hash| verify_secret(hash, &secret)))
            .await
    }
}

/// Hash a secret into a PHC string with a fresh random salt
fn hash_secret(secret: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashingFailed(e.to_string()))
}

/// Check a secret against a stored PHC hash
///
/// Malformed hashes verify as `false`.
fn verify_secret(hash: &str, secret: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
