// ABOUTME: Redirection URI database operations
// ABOUTME: Stores normalized URIs with their negotiated scope and installed-app classification
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::Database;
use crate::models::{RedirectionUri, ResponseType};
use crate::scopes::{ScopeFlagSet, ScopeSet};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the redirection_uris table.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_redirection_uris(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS redirection_uris (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                uri TEXT NOT NULL,
                response_type TEXT NOT NULL CHECK (response_type IN ('code', 'token')),
                scope TEXT NOT NULL DEFAULT '',
                scope_flags TEXT NOT NULL DEFAULT '',
                needs_client_secret BOOLEAN NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_redirection_uris_client ON redirection_uris(client_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a redirection URI. The URI must already be normalized.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_redirection_uri(&self, uri: &RedirectionUri) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO redirection_uris (
                id, client_id, uri, response_type, scope, scope_flags,
                needs_client_secret, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(uri.id.to_string())
        .bind(&uri.client_id)
        .bind(&uri.uri)
        .bind(uri.response_type.as_str())
        .bind(uri.scope.to_string())
        .bind(uri.scope_flags.to_string())
        .bind(uri.needs_client_secret)
        .bind(uri.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a redirection URI by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_redirection_uri(&self, uri_id: Uuid) -> Result<Option<RedirectionUri>> {
        let row = sqlx::query(
            r"
            SELECT id, client_id, uri, response_type, scope, scope_flags,
                   needs_client_secret, created_at
            FROM redirection_uris WHERE id = $1
            ",
        )
        .bind(uri_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_redirection_uri(&row)).transpose()
    }

    /// List a client's registered redirection URIs in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_redirection_uris_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<RedirectionUri>> {
        let rows = sqlx::query(
            r"
            SELECT id, client_id, uri, response_type, scope, scope_flags,
                   needs_client_secret, created_at
            FROM redirection_uris WHERE client_id = $1 ORDER BY created_at
            ",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_redirection_uri).collect()
    }

    fn row_to_redirection_uri(row: &sqlx::sqlite::SqliteRow) -> Result<RedirectionUri> {
        let id: String = row.get("id");
        let response_type: String = row.get("response_type");
        let scope: String = row.get("scope");
        let scope_flags: String = row.get("scope_flags");

        Ok(RedirectionUri {
            id: Uuid::parse_str(&id)?,
            client_id: row.get("client_id"),
            uri: row.get("uri"),
            response_type: response_type
                .parse::<ResponseType>()
                .map_err(|e| anyhow!(e))?,
            scope: ScopeSet::parse(&scope)?,
            scope_flags: ScopeFlagSet::parse(&scope_flags)?,
            needs_client_secret: row.get("needs_client_secret"),
            created_at: row.get("created_at"),
        })
    }

    /// Update a redirection URI in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_redirection_uri(&self, uri: &RedirectionUri) -> Result<()> {
        sqlx::query(
            r"
            UPDATE redirection_uris SET uri = $2, response_type = $3, scope = $4,
                   scope_flags = $5, needs_client_secret = $6
            WHERE id = $1
            ",
        )
        .bind(uri.id.to_string())
        .bind(&uri.uri)
        .bind(uri.response_type.as_str())
        .bind(uri.scope.to_string())
        .bind(uri.scope_flags.to_string())
        .bind(uri.needs_client_secret)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete one redirection URI. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_redirection_uri(&self, uri_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM redirection_uris WHERE id = $1")
            .bind(uri_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every redirection URI of a client. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_redirection_uris_for_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM redirection_uris WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
