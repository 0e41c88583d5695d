// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables and runtime configuration parsing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Environment-based configuration management for production deployment.

use crate::constants::limits;
use anyhow::{Context, Result};
use std::env;

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite:latchkey.db` or `sqlite::memory:`.
    pub url: String,
}

/// Credential and token lifetime settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// bcrypt cost for password hashing.
    pub bcrypt_cost: u32,
    /// Access-token lifetime in seconds.
    pub access_token_ttl_secs: i64,
    /// Authorization-code lifetime in seconds.
    pub auth_code_ttl_secs: i64,
}

/// Per-event attempt counter settings for the authorize endpoint.
#[derive(Debug, Clone)]
pub struct AttemptConfig {
    /// Failed attempts tolerated per (client, username) key.
    pub limit: u32,
    /// Sliding window in seconds.
    pub window_secs: u64,
}

/// Top-level server configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub http_port: u16,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub attempts: AttemptConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable fails to parse as its expected
    /// type. Unset variables fall back to defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            http_port: parse_env("HTTP_PORT", 8081)?,
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:latchkey.db".into()),
            },
            auth: AuthConfig {
                bcrypt_cost: parse_env("BCRYPT_COST", limits::DEFAULT_BCRYPT_COST)?,
                access_token_ttl_secs: parse_env(
                    "ACCESS_TOKEN_TTL_SECS",
                    limits::DEFAULT_ACCESS_TOKEN_TTL_SECS,
                )?,
                auth_code_ttl_secs: parse_env(
                    "AUTH_CODE_TTL_SECS",
                    limits::DEFAULT_AUTH_CODE_TTL_SECS,
                )?,
            },
            attempts: AttemptConfig {
                limit: parse_env(
                    "AUTHORIZE_ATTEMPT_LIMIT",
                    limits::DEFAULT_AUTHORIZE_ATTEMPT_LIMIT,
                )?,
                window_secs: parse_env(
                    "AUTHORIZE_ATTEMPT_WINDOW_SECS",
                    limits::DEFAULT_AUTHORIZE_ATTEMPT_WINDOW_SECS,
                )?,
            },
        })
    }

    /// One-line configuration summary for startup logging. Never includes
    /// secrets.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "port={} database={} bcrypt_cost={} access_token_ttl={}s auth_code_ttl={}s attempt_limit={}/{}s",
            self.http_port,
            self.database.url,
            self.auth.bcrypt_cost,
            self.auth.access_token_ttl_secs,
            self.auth.auth_code_ttl_secs,
            self.attempts.limit,
            self.attempts.window_secs,
        )
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {name}: {value}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        // Relies on the test process not exporting these.
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.auth.auth_code_ttl_secs, 600);
        assert_eq!(config.attempts.limit, 10);
    }

    #[test]
    fn summary_mentions_port_and_database() {
        let config = ServerConfig::from_env().unwrap();
        let summary = config.summary();
        assert!(summary.contains("port="));
        assert!(summary.contains("database="));
    }
}
