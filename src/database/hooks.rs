// ABOUTME: Client webhook registration database operations
// ABOUTME: Enforces the single personal-information hook per client at the query level
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::Database;
use crate::models::{Hook, HookEvent};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the hooks table.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_hooks(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS hooks (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                event_type TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_hooks_client ON hooks(client_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Create a hook. Uniqueness of the personal-information hook per
    /// client is enforced by the caller before insertion.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_hook(&self, hook: &Hook) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO hooks (id, client_id, url, event_type, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(hook.id.to_string())
        .bind(&hook.client_id)
        .bind(&hook.url)
        .bind(hook.event_type.as_str())
        .bind(hook.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a hook by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_hook(&self, hook_id: Uuid) -> Result<Option<Hook>> {
        let row = sqlx::query(
            "SELECT id, client_id, url, event_type, created_at FROM hooks WHERE id = $1",
        )
        .bind(hook_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_hook(&row)).transpose()
    }

    /// List a client's hooks in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_hooks_for_client(&self, client_id: &str) -> Result<Vec<Hook>> {
        let rows = sqlx::query(
            r"
            SELECT id, client_id, url, event_type, created_at
            FROM hooks WHERE client_id = $1 ORDER BY created_at
            ",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_hook).collect()
    }

    /// Find a client's hook for one event type, if registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_hook_for_event(
        &self,
        client_id: &str,
        event_type: HookEvent,
    ) -> Result<Option<Hook>> {
        let row = sqlx::query(
            r"
            SELECT id, client_id, url, event_type, created_at
            FROM hooks WHERE client_id = $1 AND event_type = $2
            ",
        )
        .bind(client_id)
        .bind(event_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_hook(&row)).transpose()
    }

    fn row_to_hook(row: &sqlx::sqlite::SqliteRow) -> Result<Hook> {
        let id: String = row.get("id");
        let event_type: String = row.get("event_type");
        Ok(Hook {
            id: Uuid::parse_str(&id)?,
            client_id: row.get("client_id"),
            url: row.get("url"),
            event_type: event_type.parse::<HookEvent>().map_err(|e| anyhow!(e))?,
            created_at: row.get("created_at"),
        })
    }

    /// Update a hook's URL and event type.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_hook(&self, hook: &Hook) -> Result<()> {
        sqlx::query("UPDATE hooks SET url = $2, event_type = $3 WHERE id = $1")
            .bind(hook.id.to_string())
            .bind(&hook.url)
            .bind(hook.event_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a hook. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_hook(&self, hook_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM hooks WHERE id = $1")
            .bind(hook_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every hook of a client. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_hooks_for_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM hooks WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
