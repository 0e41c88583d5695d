// ABOUTME: Database module organization and connection management
// ABOUTME: SQLite-backed store with per-concern impl blocks and JSON-encoded reference sets
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Persistence layer.
//!
//! Denormalized reference sets (owned sub-entity ids, authorized client
//! ids, shared snapshots) are stored as JSON `TEXT` columns; repository
//! methods return assembled aggregates. Conditional single-row updates
//! with rows-affected checks provide the compare-and-set semantics the
//! token lifecycle relies on. Deletes are idempotent: deleting an absent
//! row is a no-op.

mod access_tokens;
mod authorizations;
mod clients;
mod hooks;
mod redirection_uris;
mod sharing;
mod users;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite-backed entity store.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool
    /// cannot connect.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        // In-memory databases are per-connection; a pool larger than one
        // would hand out empty databases.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Run all schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if any table or index creation fails.
    pub async fn migrate(&self) -> Result<()> {
        self.migrate_users().await?;
        self.migrate_clients().await?;
        self.migrate_redirection_uris().await?;
        self.migrate_hooks().await?;
        self.migrate_authorizations().await?;
        self.migrate_access_tokens().await?;
        self.migrate_sharing().await?;
        Ok(())
    }
}

/// Serialize a list of ids for a JSON TEXT column.
pub(crate) fn uuids_to_json(ids: &[Uuid]) -> Result<String> {
    serde_json::to_string(ids).context("failed to serialize id list")
}

/// Deserialize a JSON TEXT column into a list of ids.
pub(crate) fn uuids_from_json(json: &str) -> Result<Vec<Uuid>> {
    serde_json::from_str(json).context("failed to deserialize id list")
}

/// Serialize a list of strings for a JSON TEXT column.
pub(crate) fn strings_to_json(values: &[String]) -> Result<String> {
    serde_json::to_string(values).context("failed to serialize string list")
}

/// Deserialize a JSON TEXT column into a list of strings.
pub(crate) fn strings_from_json(json: &str) -> Result<Vec<String>> {
    serde_json::from_str(json).context("failed to deserialize string list")
}

/// Serialize the kind-to-address-id snapshot map.
pub(crate) fn uuid_map_to_json(map: &BTreeMap<String, Uuid>) -> Result<String> {
    serde_json::to_string(map).context("failed to serialize id map")
}

/// Deserialize the kind-to-address-id snapshot map.
pub(crate) fn uuid_map_from_json(json: &str) -> Result<BTreeMap<String, Uuid>> {
    serde_json::from_str(json).context("failed to deserialize id map")
}
