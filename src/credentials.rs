// ABOUTME: Credential and token codec - hashing, constant-time comparison, secret generation
// ABOUTME: bcrypt for passwords, SHA-256 at rest for bearer secrets, ring RNG for token material
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Credential primitives.
//!
//! Passwords are bcrypt-hashed; bcrypt is CPU-bound so async call sites
//! use the `*_blocking` wrappers which offload to the blocking pool.
//! Access tokens, refresh tokens, and client secrets are stored as
//! SHA-256 hex digests and compared in constant time.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hashing and secret generation with a configured bcrypt cost.
#[derive(Clone)]
pub struct CredentialManager {
    bcrypt_cost: u32,
}

impl CredentialManager {
    #[must_use]
    pub const fn new(bcrypt_cost: u32) -> Self {
        Self { bcrypt_cost }
    }

    /// Hash a password with bcrypt.
    ///
    /// # Errors
    ///
    /// Returns an error if bcrypt fails (cost out of range).
    pub fn hash_password(&self, password: &str) -> Result<String> {
        bcrypt::hash(password, self.bcrypt_cost).context("bcrypt hashing failed")
    }

    /// Verify a password against a bcrypt hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored hash is malformed.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        bcrypt::verify(password, hash).context("bcrypt verification failed")
    }

    /// [`Self::hash_password`] on the blocking pool, for async call sites.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails or the blocking task is cancelled.
    pub async fn hash_password_blocking(&self, password: &str) -> Result<String> {
        let manager = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || manager.hash_password(&password))
            .await
            .context("password hashing task failed")?
    }

    /// [`Self::verify_password`] on the blocking pool, for async call sites.
    ///
    /// # Errors
    ///
    /// Returns an error if verification fails or the blocking task is
    /// cancelled.
    pub async fn verify_password_blocking(&self, password: &str, hash: &str) -> Result<bool> {
        let manager = self.clone();
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || manager.verify_password(&password, &hash))
            .await
            .context("password verification task failed")?
    }

    /// SHA-256 hex digest of a token or secret, for storage at rest.
    #[must_use]
    pub fn hash_token(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Hash `presented` and compare to `stored_hash` in constant time.
    #[must_use]
    pub fn token_matches(&self, presented: &str, stored_hash: &str) -> bool {
        let presented_hash = self.hash_token(presented);
        presented_hash
            .as_bytes()
            .ct_eq(stored_hash.as_bytes())
            .into()
    }

    /// Generate a bearer token: 32 random bytes, base64 URL-safe no-pad.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails - a critical security
    /// failure; the server cannot operate securely without working RNG.
    pub fn generate_token(&self) -> Result<String> {
        Self::generate_random_string(32)
    }

    /// Generate a single-use authorization code.
    ///
    /// # Errors
    ///
    /// Returns an error if the system RNG fails.
    pub fn generate_authorization_code(&self) -> Result<String> {
        Self::generate_random_string(32)
    }

    /// Generate a client id: `ck_` plus 16 alphanumeric characters.
    #[must_use]
    pub fn generate_client_id(&self) -> String {
        format!("ck_{}", Self::alphanumeric(16))
    }

    /// Generate a client secret: `cs_` plus 32 alphanumeric characters.
    /// The plaintext is returned to the developer exactly once; only its
    /// hash is stored.
    #[must_use]
    pub fn generate_client_secret(&self) -> String {
        format!("cs_{}", Self::alphanumeric(32))
    }

    fn alphanumeric(length: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }

    fn generate_random_string(length: usize) -> Result<String> {
        let rng = SystemRandom::new();
        let mut bytes = vec![0u8; length];
        rng.fill(&mut bytes).map_err(|e| {
            tracing::error!("CRITICAL: SystemRandom failed: {e}");
            anyhow!("system RNG failure - server cannot operate securely")
        })?;
        Ok(URL_SAFE_NO_PAD.encode(&bytes))
    }
}
