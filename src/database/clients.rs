// ABOUTME: OAuth client database operations
// ABOUTME: Handles client rows including the derived update-notification-handler column
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::Database;
use crate::models::Client;
use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the clients table.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_clients(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                secret_hash TEXT NOT NULL,
                name TEXT NOT NULL,
                developer_id TEXT NOT NULL,
                authorize_test_accounts BOOLEAN NOT NULL DEFAULT 0,
                first_party BOOLEAN NOT NULL DEFAULT 0,
                update_notification_handler TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clients_developer ON clients(developer_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_client(&self, client: &Client) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO clients (
                id, secret_hash, name, developer_id, authorize_test_accounts,
                first_party, update_notification_handler, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&client.id)
        .bind(&client.secret_hash)
        .bind(&client.name)
        .bind(client.developer_id.to_string())
        .bind(client.authorize_test_accounts)
        .bind(client.first_party)
        .bind(&client.update_notification_handler)
        .bind(client.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a client by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_client(&self, client_id: &str) -> Result<Option<Client>> {
        let row = sqlx::query(
            r"
            SELECT id, secret_hash, name, developer_id, authorize_test_accounts,
                   first_party, update_notification_handler, created_at
            FROM clients WHERE id = $1
            ",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_client(&row)).transpose()
    }

    /// Get the privileged first-party client, if one has been seeded.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_first_party_client(&self) -> Result<Option<Client>> {
        let row = sqlx::query(
            r"
            SELECT id, secret_hash, name, developer_id, authorize_test_accounts,
                   first_party, update_notification_handler, created_at
            FROM clients WHERE first_party = 1 LIMIT 1
            ",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_client(&row)).transpose()
    }

    /// List clients owned by a developer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_clients_for_developer(&self, developer_id: Uuid) -> Result<Vec<Client>> {
        let rows = sqlx::query(
            r"
            SELECT id, secret_hash, name, developer_id, authorize_test_accounts,
                   first_party, update_notification_handler, created_at
            FROM clients WHERE developer_id = $1 ORDER BY created_at
            ",
        )
        .bind(developer_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_client).collect()
    }

    fn row_to_client(row: &sqlx::sqlite::SqliteRow) -> Result<Client> {
        let developer_id: String = row.get("developer_id");
        Ok(Client {
            id: row.get("id"),
            secret_hash: row.get("secret_hash"),
            name: row.get("name"),
            developer_id: Uuid::parse_str(&developer_id)?,
            authorize_test_accounts: row.get("authorize_test_accounts"),
            first_party: row.get("first_party"),
            update_notification_handler: row.get("update_notification_handler"),
            created_at: row.get("created_at"),
        })
    }

    /// Update a client's editable fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_client(
        &self,
        client_id: &str,
        name: &str,
        authorize_test_accounts: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE clients SET name = $2, authorize_test_accounts = $3 WHERE id = $1")
            .bind(client_id)
            .bind(name)
            .bind(authorize_test_accounts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Overwrite the derived notification-handler mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_update_notification_handler(
        &self,
        client_id: &str,
        handler: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE clients SET update_notification_handler = $2 WHERE id = $1")
            .bind(client_id)
            .bind(handler)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a client row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_client(&self, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
