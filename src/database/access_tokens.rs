// ABOUTME: Access token database operations over hashed token values
// ABOUTME: Refresh rotation claims the old row with a guarded delete before minting
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::Database;
use crate::models::AccessToken;
use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create the access_tokens table.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_access_tokens(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS access_tokens (
                id TEXT PRIMARY KEY,
                token_hash TEXT NOT NULL UNIQUE,
                refresh_token_hash TEXT UNIQUE,
                authorization_id TEXT NOT NULL
                    REFERENCES authorizations(id) ON DELETE CASCADE,
                expires_at DATETIME NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_access_tokens_authorization
             ON access_tokens(authorization_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a minted token pair. Only hashes ever reach this table.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_access_token(&self, token: &AccessToken) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO access_tokens (
                id, token_hash, refresh_token_hash, authorization_id,
                expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(token.id.to_string())
        .bind(&token.token_hash)
        .bind(&token.refresh_token_hash)
        .bind(token.authorization_id.to_string())
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up a token row by the hash of the presented access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_access_token_by_hash(&self, token_hash: &str) -> Result<Option<AccessToken>> {
        let row = sqlx::query(
            r"
            SELECT id, token_hash, refresh_token_hash, authorization_id,
                   expires_at, created_at
            FROM access_tokens WHERE token_hash = $1
            ",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_access_token(&row)).transpose()
    }

    /// Claim the token row holding a refresh token for rotation. The
    /// guarded delete makes the claim exclusive: whichever caller removes
    /// the row mints the replacement, every other concurrent caller gets
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn claim_refresh_token(
        &self,
        refresh_token_hash: &str,
    ) -> Result<Option<AccessToken>> {
        let row = sqlx::query(
            r"
            SELECT id, token_hash, refresh_token_hash, authorization_id,
                   expires_at, created_at
            FROM access_tokens WHERE refresh_token_hash = $1
            ",
        )
        .bind(refresh_token_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let token = Self::row_to_access_token(&row)?;

        let result =
            sqlx::query("DELETE FROM access_tokens WHERE id = $1 AND refresh_token_hash = $2")
                .bind(token.id.to_string())
                .bind(refresh_token_hash)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(token))
    }

    /// Delete a token row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_access_token(&self, token_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM access_tokens WHERE id = $1")
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every token minted under an authorization. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_access_tokens_for_authorization(&self, auth_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM access_tokens WHERE authorization_id = $1")
            .bind(auth_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_access_token(row: &sqlx::sqlite::SqliteRow) -> Result<AccessToken> {
        let id: String = row.get("id");
        let authorization_id: String = row.get("authorization_id");
        Ok(AccessToken {
            id: Uuid::parse_str(&id)?,
            token_hash: row.get("token_hash"),
            refresh_token_hash: row.get("refresh_token_hash"),
            authorization_id: Uuid::parse_str(&authorization_id)?,
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        })
    }
}
