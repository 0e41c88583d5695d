// ABOUTME: Sharing ledger database operations for user_authorizations and user_statuses
// ABOUTME: Per-user-per-client rows tracking shared sub-entities and unobserved changes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::{strings_from_json, strings_to_json, uuids_from_json, uuids_to_json, Database};
use crate::models::{UserAuthorization, UserStatus, UserStatusKind};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the sharing ledger tables.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_sharing(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_authorizations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                addresses TEXT NOT NULL DEFAULT '[]',
                emails TEXT NOT NULL DEFAULT '[]',
                phone_numbers TEXT NOT NULL DEFAULT '[]',
                UNIQUE (user_id, client_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_statuses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'new',
                updated_fields TEXT NOT NULL DEFAULT '[]',
                updated_addresses TEXT NOT NULL DEFAULT '[]',
                updated_emails TEXT NOT NULL DEFAULT '[]',
                updated_phone_numbers TEXT NOT NULL DEFAULT '[]',
                UNIQUE (user_id, client_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or overwrite the sharing ledger row for a (user, client)
    /// pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_user_authorization(&self, ledger: &UserAuthorization) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO user_authorizations (
                id, user_id, client_id, addresses, emails, phone_numbers
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, client_id) DO UPDATE SET
                addresses = excluded.addresses,
                emails = excluded.emails,
                phone_numbers = excluded.phone_numbers
            ",
        )
        .bind(ledger.id.to_string())
        .bind(ledger.user_id.to_string())
        .bind(&ledger.client_id)
        .bind(uuids_to_json(&ledger.addresses)?)
        .bind(uuids_to_json(&ledger.emails)?)
        .bind(uuids_to_json(&ledger.phone_numbers)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the sharing ledger for a (user, client) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_user_authorization(
        &self,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<Option<UserAuthorization>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, client_id, addresses, emails, phone_numbers
            FROM user_authorizations WHERE user_id = $1 AND client_id = $2
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_user_authorization(&row)).transpose()
    }

    /// List every sharing ledger of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_user_authorizations_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserAuthorization>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, client_id, addresses, emails, phone_numbers
            FROM user_authorizations WHERE user_id = $1
            ",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_user_authorization).collect()
    }

    /// List every sharing ledger of a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_user_authorizations_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<UserAuthorization>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, client_id, addresses, emails, phone_numbers
            FROM user_authorizations WHERE client_id = $1
            ",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_user_authorization).collect()
    }

    /// Delete the sharing ledger for a (user, client) pair. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_user_authorization(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_authorizations WHERE user_id = $1 AND client_id = $2")
            .bind(user_id.to_string())
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every sharing ledger of a user. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_user_authorizations_for_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM user_authorizations WHERE user_id = $1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_user_authorization(row: &sqlx::sqlite::SqliteRow) -> Result<UserAuthorization> {
        let id: String = row.get("id");
        let user_id: String = row.get("user_id");
        let addresses: String = row.get("addresses");
        let emails: String = row.get("emails");
        let phone_numbers: String = row.get("phone_numbers");
        Ok(UserAuthorization {
            id: Uuid::parse_str(&id)?,
            user_id: Uuid::parse_str(&user_id)?,
            client_id: row.get("client_id"),
            addresses: uuids_from_json(&addresses)?,
            emails: uuids_from_json(&emails)?,
            phone_numbers: uuids_from_json(&phone_numbers)?,
        })
    }

    /// Insert or overwrite the change-tracking row for a (user, client)
    /// pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn upsert_user_status(&self, status: &UserStatus) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO user_statuses (
                id, user_id, client_id, status, updated_fields,
                updated_addresses, updated_emails, updated_phone_numbers
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, client_id) DO UPDATE SET
                status = excluded.status,
                updated_fields = excluded.updated_fields,
                updated_addresses = excluded.updated_addresses,
                updated_emails = excluded.updated_emails,
                updated_phone_numbers = excluded.updated_phone_numbers
            ",
        )
        .bind(status.id.to_string())
        .bind(status.user_id.to_string())
        .bind(&status.client_id)
        .bind(status.status.as_str())
        .bind(strings_to_json(&status.updated_fields)?)
        .bind(uuids_to_json(&status.updated_addresses)?)
        .bind(uuids_to_json(&status.updated_emails)?)
        .bind(uuids_to_json(&status.updated_phone_numbers)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get the change-tracking row for a (user, client) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_user_status(
        &self,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<Option<UserStatus>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, client_id, status, updated_fields,
                   updated_addresses, updated_emails, updated_phone_numbers
            FROM user_statuses WHERE user_id = $1 AND client_id = $2
            ",
        )
        .bind(user_id.to_string())
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_user_status(&row)).transpose()
    }

    /// List every change-tracking row of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_user_statuses_for_user(&self, user_id: Uuid) -> Result<Vec<UserStatus>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, client_id, status, updated_fields,
                   updated_addresses, updated_emails, updated_phone_numbers
            FROM user_statuses WHERE user_id = $1
            ",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_user_status).collect()
    }

    /// Delete the change-tracking row for a (user, client) pair.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_user_status(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM user_statuses WHERE user_id = $1 AND client_id = $2")
            .bind(user_id.to_string())
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every change-tracking row of a user. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_user_statuses_for_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM user_statuses WHERE user_id = $1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_user_status(row: &sqlx::sqlite::SqliteRow) -> Result<UserStatus> {
        let id: String = row.get("id");
        let user_id: String = row.get("user_id");
        let status: String = row.get("status");
        let updated_fields: String = row.get("updated_fields");
        let updated_addresses: String = row.get("updated_addresses");
        let updated_emails: String = row.get("updated_emails");
        let updated_phone_numbers: String = row.get("updated_phone_numbers");
        Ok(UserStatus {
            id: Uuid::parse_str(&id)?,
            user_id: Uuid::parse_str(&user_id)?,
            client_id: row.get("client_id"),
            status: status.parse::<UserStatusKind>().map_err(|e| anyhow!(e))?,
            updated_fields: strings_from_json(&updated_fields)?,
            updated_addresses: uuids_from_json(&updated_addresses)?,
            updated_emails: uuids_from_json(&updated_emails)?,
            updated_phone_numbers: uuids_from_json(&updated_phone_numbers)?,
        })
    }
}
