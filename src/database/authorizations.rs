// ABOUTME: Authorization (consent grant) database operations
// ABOUTME: Atomic single-use code redemption via conditional update and rows-affected checks
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::{uuid_map_from_json, uuid_map_to_json, uuids_from_json, uuids_to_json, Database};
use crate::models::{Authorization, AuthorizationCode, AuthorizationType};
use crate::scopes::{ScopeFlagSet, ScopeSet};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the authorizations table.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_authorizations(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS authorizations (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
                auth_type TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT '',
                scope_flags TEXT NOT NULL DEFAULT '',
                needs_client_secret BOOLEAN NOT NULL DEFAULT 1,
                code_value TEXT UNIQUE,
                code_is_used BOOLEAN NOT NULL DEFAULT 0,
                code_expires_at DATETIME,
                shared_addresses TEXT NOT NULL DEFAULT '{}',
                shared_emails TEXT NOT NULL DEFAULT '[]',
                shared_phone_numbers TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_authorizations_user_client
             ON authorizations(user_id, client_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create an authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_authorization(&self, auth: &Authorization) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO authorizations (
                id, user_id, client_id, auth_type, scope, scope_flags,
                needs_client_secret, code_value, code_is_used, code_expires_at,
                shared_addresses, shared_emails, shared_phone_numbers,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(auth.id.to_string())
        .bind(auth.user_id.map(|id| id.to_string()))
        .bind(&auth.client_id)
        .bind(auth.auth_type.as_str())
        .bind(auth.scope.to_string())
        .bind(auth.scope_flags.to_string())
        .bind(auth.needs_client_secret)
        .bind(auth.code.as_ref().map(|c| c.value.clone()))
        .bind(auth.code.as_ref().is_some_and(|c| c.is_used))
        .bind(auth.code.as_ref().map(|c| c.expires_at))
        .bind(uuid_map_to_json(&auth.shared_addresses)?)
        .bind(uuids_to_json(&auth.shared_emails)?)
        .bind(uuids_to_json(&auth.shared_phone_numbers)?)
        .bind(auth.created_at)
        .bind(auth.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get an authorization by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_authorization(&self, auth_id: Uuid) -> Result<Option<Authorization>> {
        let row = sqlx::query(&select_authorizations("WHERE id = $1"))
            .bind(auth_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_authorization(&row)).transpose()
    }

    /// Get the authorization between one user and one client, if any.
    /// At most one exists; re-authorization unions scope onto it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_authorization_for_user_client(
        &self,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<Option<Authorization>> {
        let row = sqlx::query(&select_authorizations("WHERE user_id = $1 AND client_id = $2"))
            .bind(user_id.to_string())
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_authorization(&row)).transpose()
    }

    /// Get a client's user-less client_credentials authorization, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_client_credentials_authorization(
        &self,
        client_id: &str,
    ) -> Result<Option<Authorization>> {
        let row = sqlx::query(&select_authorizations(
            "WHERE client_id = $1 AND user_id IS NULL AND auth_type = 'client_credentials'",
        ))
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_authorization(&row)).transpose()
    }

    /// List all of a user's authorizations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_authorizations_for_user(&self, user_id: Uuid) -> Result<Vec<Authorization>> {
        let rows = sqlx::query(&select_authorizations("WHERE user_id = $1 ORDER BY created_at"))
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_authorization).collect()
    }

    /// List all of a client's authorizations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_authorizations_for_client(
        &self,
        client_id: &str,
    ) -> Result<Vec<Authorization>> {
        let rows = sqlx::query(&select_authorizations("WHERE client_id = $1 ORDER BY created_at"))
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_authorization).collect()
    }

    /// Atomically claim the single-use authorization code. The conditional
    /// update flips `code_is_used` exactly once; a second redemption, an
    /// expired code, an unknown code, or a code issued to another client
    /// all fail the predicate and return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn consume_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Authorization>> {
        let result = sqlx::query(
            r"
            UPDATE authorizations SET code_is_used = 1, updated_at = $3
            WHERE code_value = $1 AND client_id = $2
              AND code_is_used = 0 AND code_expires_at > $3
            ",
        )
        .bind(code)
        .bind(client_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(&select_authorizations("WHERE code_value = $1"))
            .bind(code)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(Self::row_to_authorization(&row)?))
    }

    /// Look up the authorization holding a code, regardless of the code's
    /// state. Used after a failed consume to distinguish expiry (which
    /// clears the code) from an unknown code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_authorization_by_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> Result<Option<Authorization>> {
        let row = sqlx::query(&select_authorizations("WHERE code_value = $1 AND client_id = $2"))
            .bind(code)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_authorization(&row)).transpose()
    }

    /// Attach a fresh single-use code to an authorization, replacing any
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn set_authorization_code(
        &self,
        auth_id: Uuid,
        code: &AuthorizationCode,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE authorizations SET code_value = $2, code_is_used = $3,
                   code_expires_at = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(auth_id.to_string())
        .bind(&code.value)
        .bind(code.is_used)
        .bind(code.expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Detach the code from a redeemed authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn clear_authorization_code(&self, auth_id: Uuid) -> Result<()> {
        sqlx::query(
            r"
            UPDATE authorizations SET code_value = NULL, code_is_used = 0,
                   code_expires_at = NULL, updated_at = $2
            WHERE id = $1
            ",
        )
        .bind(auth_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite an authorization's negotiated scope after a consent
    /// union.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_authorization_scope(
        &self,
        auth_id: Uuid,
        scope: &ScopeSet,
        scope_flags: &ScopeFlagSet,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE authorizations SET scope = $2, scope_flags = $3, updated_at = $4
            WHERE id = $1
            ",
        )
        .bind(auth_id.to_string())
        .bind(scope.to_string())
        .bind(scope_flags.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Overwrite an authorization's shared-entity snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_authorization_snapshot(&self, auth: &Authorization) -> Result<()> {
        sqlx::query(
            r"
            UPDATE authorizations SET shared_addresses = $2, shared_emails = $3,
                   shared_phone_numbers = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(auth.id.to_string())
        .bind(uuid_map_to_json(&auth.shared_addresses)?)
        .bind(uuids_to_json(&auth.shared_emails)?)
        .bind(uuids_to_json(&auth.shared_phone_numbers)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an authorization. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_authorization(&self, auth_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM authorizations WHERE id = $1")
            .bind(auth_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_authorization(row: &sqlx::sqlite::SqliteRow) -> Result<Authorization> {
        let id: String = row.get("id");
        let user_id: Option<String> = row.get("user_id");
        let auth_type: String = row.get("auth_type");
        let scope: String = row.get("scope");
        let scope_flags: String = row.get("scope_flags");
        let code_value: Option<String> = row.get("code_value");
        let shared_addresses: String = row.get("shared_addresses");
        let shared_emails: String = row.get("shared_emails");
        let shared_phone_numbers: String = row.get("shared_phone_numbers");

        let code = match code_value {
            Some(value) => {
                let expires_at: Option<DateTime<Utc>> = row.get("code_expires_at");
                Some(AuthorizationCode {
                    value,
                    is_used: row.get("code_is_used"),
                    expires_at: expires_at
                        .ok_or_else(|| anyhow!("authorization code without expiry"))?,
                })
            }
            None => None,
        };

        Ok(Authorization {
            id: Uuid::parse_str(&id)?,
            user_id: user_id.as_deref().map(Uuid::parse_str).transpose()?,
            client_id: row.get("client_id"),
            auth_type: auth_type.parse::<AuthorizationType>().map_err(|e| anyhow!(e))?,
            scope: ScopeSet::parse(&scope)?,
            scope_flags: ScopeFlagSet::parse(&scope_flags)?,
            needs_client_secret: row.get("needs_client_secret"),
            code,
            shared_addresses: uuid_map_from_json(&shared_addresses)?,
            shared_emails: uuids_from_json(&shared_emails)?,
            shared_phone_numbers: uuids_from_json(&shared_phone_numbers)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

fn select_authorizations(clause: &str) -> String {
    format!(
        r"
        SELECT id, user_id, client_id, auth_type, scope, scope_flags,
               needs_client_secret, code_value, code_is_used, code_expires_at,
               shared_addresses, shared_emails, shared_phone_numbers,
               created_at, updated_at
        FROM authorizations {clause}
        "
    )
}
