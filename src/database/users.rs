// ABOUTME: User account database operations
// ABOUTME: Handles user rows and their denormalized reference sets (clients, sub-entities)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use super::{strings_from_json, strings_to_json, uuids_from_json, uuids_to_json, Database};
use crate::models::{Address, Email, PhoneNumber, User};
use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    /// Create users and sub-entity tables.
    ///
    /// # Errors
    ///
    /// Returns an error if table or index creation fails.
    pub(super) async fn migrate_users(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                timezone TEXT NOT NULL DEFAULT 'UTC',
                is_developer BOOLEAN NOT NULL DEFAULT 0,
                is_test_account BOOLEAN NOT NULL DEFAULT 0,
                developer_clients TEXT NOT NULL DEFAULT '[]',
                authorized_clients TEXT NOT NULL DEFAULT '[]',
                addresses TEXT NOT NULL DEFAULT '[]',
                emails TEXT NOT NULL DEFAULT '[]',
                phone_numbers TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS addresses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient TEXT NOT NULL,
                street TEXT NOT NULL,
                city TEXT NOT NULL,
                postal_code TEXT NOT NULL,
                country TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS emails (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                address TEXT NOT NULL,
                is_main_address BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS phone_numbers (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                number TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the username is already taken or the insert
    /// fails.
    pub async fn create_user(&self, user: &User) -> Result<Uuid> {
        if self.get_user_by_username(&user.username).await?.is_some() {
            return Err(anyhow!("username already in use: {}", user.username));
        }

        sqlx::query(
            r"
            INSERT INTO users (
                id, username, password_hash, first_name, last_name, timezone,
                is_developer, is_test_account, developer_clients, authorized_clients,
                addresses, emails, phone_numbers, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.timezone)
        .bind(user.is_developer)
        .bind(user.is_test_account)
        .bind(strings_to_json(&user.developer_clients)?)
        .bind(strings_to_json(&user.authorized_clients)?)
        .bind(uuids_to_json(&user.addresses)?)
        .bind(uuids_to_json(&user.emails)?)
        .bind(uuids_to_json(&user.phone_numbers)?)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(user.id)
    }

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.get_user_impl("id", &user_id.to_string()).await
    }

    /// Get a user by username (login identifier).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.get_user_impl("username", username).await
    }

    async fn get_user_impl(&self, field: &str, value: &str) -> Result<Option<User>> {
        let query = format!(
            r"
            SELECT id, username, password_hash, first_name, last_name, timezone,
                   is_developer, is_test_account, developer_clients, authorized_clients,
                   addresses, emails, phone_numbers, created_at
            FROM users WHERE {field} = $1
            "
        );

        let row = sqlx::query(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| Self::row_to_user(&row)).transpose()
    }

    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User> {
        let id: String = row.get("id");
        let developer_clients: String = row.get("developer_clients");
        let authorized_clients: String = row.get("authorized_clients");
        let addresses: String = row.get("addresses");
        let emails: String = row.get("emails");
        let phone_numbers: String = row.get("phone_numbers");

        Ok(User {
            id: Uuid::parse_str(&id)?,
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            timezone: row.get("timezone"),
            is_developer: row.get("is_developer"),
            is_test_account: row.get("is_test_account"),
            developer_clients: strings_from_json(&developer_clients)?,
            authorized_clients: strings_from_json(&authorized_clients)?,
            addresses: uuids_from_json(&addresses)?,
            emails: uuids_from_json(&emails)?,
            phone_numbers: uuids_from_json(&phone_numbers)?,
            created_at: row.get("created_at"),
        })
    }

    /// Update a user's editable profile fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_user_profile(
        &self,
        user_id: Uuid,
        first_name: &str,
        last_name: &str,
        timezone: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET first_name = $2, last_name = $3, timezone = $4 WHERE id = $1",
        )
        .bind(user_id.to_string())
        .bind(first_name)
        .bind(last_name)
        .bind(timezone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replace a user's password hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_user_password_hash(&self, user_id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id.to_string())
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a user row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Add a client id to the developer's owned-client set.
    ///
    /// # Errors
    ///
    /// Returns an error if the user is absent or the update fails.
    pub async fn add_developer_client(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        self.mutate_string_set(user_id, "developer_clients", client_id, true)
            .await
    }

    /// Remove a client id from the developer's owned-client set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn remove_developer_client(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        self.mutate_string_set(user_id, "developer_clients", client_id, false)
            .await
    }

    /// Add a client id to the user's authorized-client set.
    ///
    /// # Errors
    ///
    /// Returns an error if the user is absent or the update fails.
    pub async fn add_authorized_client(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        self.mutate_string_set(user_id, "authorized_clients", client_id, true)
            .await
    }

    /// Remove a client id from the user's authorized-client set. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn remove_authorized_client(&self, user_id: Uuid, client_id: &str) -> Result<()> {
        self.mutate_string_set(user_id, "authorized_clients", client_id, false)
            .await
    }

    async fn mutate_string_set(
        &self,
        user_id: Uuid,
        column: &str,
        value: &str,
        add: bool,
    ) -> Result<()> {
        let query = format!("SELECT {column} FROM users WHERE id = $1");
        let Some(row) = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            // Pruning references of an already-deleted user is a no-op.
            if add {
                return Err(anyhow!("user not found: {user_id}"));
            }
            return Ok(());
        };

        let current: String = row.get(0);
        let mut set = strings_from_json(&current)?;
        if add {
            if !set.iter().any(|v| v == value) {
                set.push(value.to_owned());
            }
        } else {
            set.retain(|v| v != value);
        }

        let update = format!("UPDATE users SET {column} = $2 WHERE id = $1");
        sqlx::query(&update)
            .bind(user_id.to_string())
            .bind(strings_to_json(&set)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mutate_uuid_set(
        &self,
        user_id: Uuid,
        column: &str,
        value: Uuid,
        add: bool,
    ) -> Result<()> {
        let query = format!("SELECT {column} FROM users WHERE id = $1");
        let Some(row) = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
        else {
            if add {
                return Err(anyhow!("user not found: {user_id}"));
            }
            return Ok(());
        };

        let current: String = row.get(0);
        let mut set = uuids_from_json(&current)?;
        if add {
            if !set.contains(&value) {
                set.push(value);
            }
        } else {
            set.retain(|v| *v != value);
        }

        let update = format!("UPDATE users SET {column} = $2 WHERE id = $1");
        sqlx::query(&update)
            .bind(user_id.to_string())
            .bind(uuids_to_json(&set)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create an address and register it on the owning user.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or the reference-set update fails.
    pub async fn create_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO addresses (id, user_id, recipient, street, city, postal_code, country, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(address.id.to_string())
        .bind(address.user_id.to_string())
        .bind(&address.recipient)
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.postal_code)
        .bind(&address.country)
        .bind(address.created_at)
        .execute(&self.pool)
        .await?;

        self.mutate_uuid_set(address.user_id, "addresses", address.id, true)
            .await
    }

    /// Get an address by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_address(&self, address_id: Uuid) -> Result<Option<Address>> {
        let row = sqlx::query(
            "SELECT id, user_id, recipient, street, city, postal_code, country, created_at FROM addresses WHERE id = $1",
        )
        .bind(address_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let id: String = row.get("id");
            let user_id: String = row.get("user_id");
            Ok(Address {
                id: Uuid::parse_str(&id)?,
                user_id: Uuid::parse_str(&user_id)?,
                recipient: row.get("recipient"),
                street: row.get("street"),
                city: row.get("city"),
                postal_code: row.get("postal_code"),
                country: row.get("country"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    /// Update address fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            r"
            UPDATE addresses SET recipient = $2, street = $3, city = $4, postal_code = $5, country = $6
            WHERE id = $1
            ",
        )
        .bind(address.id.to_string())
        .bind(&address.recipient)
        .bind(&address.street)
        .bind(&address.city)
        .bind(&address.postal_code)
        .bind(&address.country)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete an address row and deregister it from the owner. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn delete_address(&self, address_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM addresses WHERE id = $1")
            .bind(address_id.to_string())
            .execute(&self.pool)
            .await?;
        self.mutate_uuid_set(user_id, "addresses", address_id, false)
            .await
    }

    /// Create an email and register it on the owning user. The caller is
    /// responsible for the exactly-one-main invariant.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or the reference-set update fails.
    pub async fn create_email(&self, email: &Email) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO emails (id, user_id, address, is_main_address, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(email.id.to_string())
        .bind(email.user_id.to_string())
        .bind(&email.address)
        .bind(email.is_main_address)
        .bind(email.created_at)
        .execute(&self.pool)
        .await?;

        self.mutate_uuid_set(email.user_id, "emails", email.id, true)
            .await
    }

    /// Get an email by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_email(&self, email_id: Uuid) -> Result<Option<Email>> {
        let row = sqlx::query(
            "SELECT id, user_id, address, is_main_address, created_at FROM emails WHERE id = $1",
        )
        .bind(email_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::row_to_email(&row)).transpose()
    }

    /// List a user's emails.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_emails_for_user(&self, user_id: Uuid) -> Result<Vec<Email>> {
        let rows = sqlx::query(
            "SELECT id, user_id, address, is_main_address, created_at FROM emails WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_email).collect()
    }

    fn row_to_email(row: &sqlx::sqlite::SqliteRow) -> Result<Email> {
        let id: String = row.get("id");
        let user_id: String = row.get("user_id");
        Ok(Email {
            id: Uuid::parse_str(&id)?,
            user_id: Uuid::parse_str(&user_id)?,
            address: row.get("address"),
            is_main_address: row.get("is_main_address"),
            created_at: row.get("created_at"),
        })
    }

    /// Update email fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_email(&self, email: &Email) -> Result<()> {
        sqlx::query("UPDATE emails SET address = $2, is_main_address = $3 WHERE id = $1")
            .bind(email.id.to_string())
            .bind(&email.address)
            .bind(email.is_main_address)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete an email row and deregister it from the owner. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn delete_email(&self, email_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM emails WHERE id = $1")
            .bind(email_id.to_string())
            .execute(&self.pool)
            .await?;
        self.mutate_uuid_set(user_id, "emails", email_id, false).await
    }

    /// Create a phone number and register it on the owning user.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or the reference-set update fails.
    pub async fn create_phone_number(&self, phone: &PhoneNumber) -> Result<()> {
        sqlx::query(
            "INSERT INTO phone_numbers (id, user_id, number, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(phone.id.to_string())
        .bind(phone.user_id.to_string())
        .bind(&phone.number)
        .bind(phone.created_at)
        .execute(&self.pool)
        .await?;

        self.mutate_uuid_set(phone.user_id, "phone_numbers", phone.id, true)
            .await
    }

    /// Get a phone number by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_phone_number(&self, phone_id: Uuid) -> Result<Option<PhoneNumber>> {
        let row =
            sqlx::query("SELECT id, user_id, number, created_at FROM phone_numbers WHERE id = $1")
                .bind(phone_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|row| {
            let id: String = row.get("id");
            let user_id: String = row.get("user_id");
            Ok(PhoneNumber {
                id: Uuid::parse_str(&id)?,
                user_id: Uuid::parse_str(&user_id)?,
                number: row.get("number"),
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }

    /// Update a phone number.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn update_phone_number(&self, phone: &PhoneNumber) -> Result<()> {
        sqlx::query("UPDATE phone_numbers SET number = $2 WHERE id = $1")
            .bind(phone.id.to_string())
            .bind(&phone.number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a phone number row and deregister it from the owner. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn delete_phone_number(&self, phone_id: Uuid, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM phone_numbers WHERE id = $1")
            .bind(phone_id.to_string())
            .execute(&self.pool)
            .await?;
        self.mutate_uuid_set(user_id, "phone_numbers", phone_id, false)
            .await
    }
}
