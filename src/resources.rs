// ABOUTME: Shared server resources container passed to all route handlers
// ABOUTME: Bundles database, credential manager, attempt counter, and configuration behind one Arc
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use crate::config::ServerConfig;
use crate::credentials::CredentialManager;
use crate::database::Database;
use crate::oauth::attempts::AttemptCounter;
use std::sync::Arc;
use std::time::Duration;

/// Centralized server resources. Constructed once at startup and shared
/// across all routes via a single `Arc`.
pub struct ServerResources {
    pub database: Database,
    pub credentials: CredentialManager,
    pub attempts: AttemptCounter,
    pub config: ServerConfig,
}

impl ServerResources {
    #[must_use]
    pub fn new(database: Database, config: ServerConfig) -> Arc<Self> {
        let credentials = CredentialManager::new(config.auth.bcrypt_cost);
        let attempts = AttemptCounter::new(
            config.attempts.limit,
            Duration::from_secs(config.attempts.window_secs),
        );
        Arc::new(Self {
            database,
            credentials,
            attempts,
            config,
        })
    }
}
