// ABOUTME: Core data models for users, clients, authorizations, tokens, and sharing ledgers
// ABOUTME: Typed enumerations for response types, grant types, hook events, and status kinds
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Entity models.
//!
//! Reference sets (owned sub-entity ids, authorized client ids, shared
//! snapshots) are denormalized onto the owning entity, mirroring the
//! document-store layout; the repository layer keeps them consistent.

use crate::scopes::{ScopeFlagSet, ScopeSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An end-user account.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub timezone: String,
    pub is_developer: bool,
    /// Throwaway accounts created by the test-account authorize flow.
    pub is_test_account: bool,
    /// Client ids owned by this developer, capped.
    pub developer_clients: Vec<String>,
    /// Client ids the user has a live authorization with.
    pub authorized_clients: Vec<String>,
    pub addresses: Vec<Uuid>,
    pub emails: Vec<Uuid>,
    pub phone_numbers: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Ownership checks are pure membership tests over the denormalized
    /// reference sets; they run after scope checks, before any mutation.
    #[must_use]
    pub fn owns_client(&self, client_id: &str) -> bool {
        self.developer_clients.iter().any(|c| c == client_id)
    }

    #[must_use]
    pub fn owns_address(&self, address_id: Uuid) -> bool {
        self.addresses.contains(&address_id)
    }

    #[must_use]
    pub fn owns_email(&self, email_id: Uuid) -> bool {
        self.emails.contains(&email_id)
    }

    #[must_use]
    pub fn owns_phone_number(&self, phone_id: Uuid) -> bool {
        self.phone_numbers.contains(&phone_id)
    }
}

/// A registered OAuth2 client (application).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,
    /// SHA-256 of the generated secret; plaintext returned once at creation.
    pub secret_hash: String,
    pub name: String,
    pub developer_id: Uuid,
    pub authorize_test_accounts: bool,
    /// Set only by seeding, never by the public API. Marks the privileged
    /// app client allowed to use the password and client_credentials grants.
    pub first_party: bool,
    /// Derived: mirrors the URL of the client's single
    /// personal-information hook, or is absent.
    pub update_notification_handler: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Response type of a registered redirection URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }
}

impl FromStr for ResponseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "token" => Ok(Self::Token),
            other => Err(format!("unknown response type: {other}")),
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered redirection URI with its negotiated scope.
#[derive(Debug, Clone)]
pub struct RedirectionUri {
    pub id: Uuid,
    pub client_id: String,
    /// Stored normalized; see [`crate::uri::normalize_redirect_uri`].
    pub uri: String,
    pub response_type: ResponseType,
    pub scope: ScopeSet,
    pub scope_flags: ScopeFlagSet,
    /// Derived from the URI shape: false for installed/native apps.
    pub needs_client_secret: bool,
    pub created_at: DateTime<Utc>,
}

/// Event types a client hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookEvent {
    #[serde(rename = "USER_DID_UPDATE_PERSONAL_INFORMATION")]
    UserDidUpdatePersonalInformation,
    #[serde(rename = "USER_DID_REVOKE_ACCESS")]
    UserDidRevokeAccess,
    #[serde(rename = "USER_DID_DELETE_ACCOUNT")]
    UserDidDeleteAccount,
}

impl HookEvent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserDidUpdatePersonalInformation => "USER_DID_UPDATE_PERSONAL_INFORMATION",
            Self::UserDidRevokeAccess => "USER_DID_REVOKE_ACCESS",
            Self::UserDidDeleteAccount => "USER_DID_DELETE_ACCOUNT",
        }
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_DID_UPDATE_PERSONAL_INFORMATION" => Ok(Self::UserDidUpdatePersonalInformation),
            "USER_DID_REVOKE_ACCESS" => Ok(Self::UserDidRevokeAccess),
            "USER_DID_DELETE_ACCOUNT" => Ok(Self::UserDidDeleteAccount),
            other => Err(format!("unknown hook event type: {other}")),
        }
    }
}

/// A client webhook registration. Delivery is an external collaborator;
/// this service only maintains the registrations and the derived
/// notification handler on the client.
#[derive(Debug, Clone)]
pub struct Hook {
    pub id: Uuid,
    pub client_id: String,
    pub url: String,
    pub event_type: HookEvent,
    pub created_at: DateTime<Utc>,
}

/// A postal address owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

/// An email address owned by a user. Exactly one email per user carries
/// `is_main_address` while the user has any email at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub is_main_address: bool,
    pub created_at: DateTime<Utc>,
}

/// A phone number owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: Uuid,
    pub user_id: Uuid,
    pub number: String,
    pub created_at: DateTime<Utc>,
}

/// How an authorization came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationType {
    AuthorizationCode,
    Implicit,
    Password,
    ClientCredentials,
}

impl AuthorizationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

impl FromStr for AuthorizationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "implicit" => Ok(Self::Implicit),
            "password" => Ok(Self::Password),
            "client_credentials" => Ok(Self::ClientCredentials),
            other => Err(format!("unknown authorization type: {other}")),
        }
    }
}

/// Address slot kinds in the shared snapshot. `separate_shipping_billing`
/// uses distinct `shipping`/`billing` slots, otherwise a single `main`.
pub mod address_kinds {
    pub const MAIN: &str = "main";
    pub const SHIPPING: &str = "shipping";
    pub const BILLING: &str = "billing";
}

/// The single-use code attached to a code-flow authorization.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub value: String,
    /// Starts false; flipped exactly once by the atomic consume.
    pub is_used: bool,
    pub expires_at: DateTime<Utc>,
}

/// One user's consent grant to one client.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub id: Uuid,
    /// Absent for client_credentials grants.
    pub user_id: Option<Uuid>,
    pub client_id: String,
    pub auth_type: AuthorizationType,
    /// Only ever grows: re-authorization unions with the existing scope.
    pub scope: ScopeSet,
    pub scope_flags: ScopeFlagSet,
    /// Copied from the matched redirection URI at creation.
    pub needs_client_secret: bool,
    pub code: Option<AuthorizationCode>,
    /// Snapshot of shared addresses, keyed by slot kind.
    pub shared_addresses: BTreeMap<String, Uuid>,
    pub shared_emails: Vec<Uuid>,
    pub shared_phone_numbers: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Authorization {
    /// Whether the deleted entity appears anywhere in this snapshot.
    #[must_use]
    pub fn shares_address(&self, address_id: Uuid) -> bool {
        self.shared_addresses.values().any(|id| *id == address_id)
    }
}

/// A minted access/refresh token pair, stored hashed.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub id: Uuid,
    pub token_hash: String,
    /// Absent for implicit and client_credentials tokens.
    pub refresh_token_hash: Option<String>,
    /// Required; a token without a live authorization is invalid.
    pub authorization_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Per-user-per-client ledger of which sub-entities are shared.
#[derive(Debug, Clone)]
pub struct UserAuthorization {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: String,
    pub addresses: Vec<Uuid>,
    pub emails: Vec<Uuid>,
    pub phone_numbers: Vec<Uuid>,
}

impl UserAuthorization {
    /// True when the ledger shares nothing besides the given address -
    /// the refusal condition for address deletion.
    #[must_use]
    pub fn shares_only_address(&self, address_id: Uuid) -> bool {
        self.addresses == [address_id] && self.emails.is_empty() && self.phone_numbers.is_empty()
    }
}

/// Whether a client has already fetched this user at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatusKind {
    New,
    ExistingUser,
}

impl UserStatusKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ExistingUser => "existing_user",
        }
    }
}

impl FromStr for UserStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "existing_user" => Ok(Self::ExistingUser),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

/// Per-client ledger of which of a user's shared fields changed since
/// the client last observed them.
#[derive(Debug, Clone)]
pub struct UserStatus {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: String,
    pub status: UserStatusKind,
    /// Field names among first_name, last_name, timezone, addresses,
    /// emails, phone_numbers.
    pub updated_fields: Vec<String>,
    pub updated_addresses: Vec<Uuid>,
    pub updated_emails: Vec<Uuid>,
    pub updated_phone_numbers: Vec<Uuid>,
}

impl UserStatus {
    /// A pristine `existing_user` record with nothing flagged.
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.status = UserStatusKind::ExistingUser;
        self.updated_fields.clear();
        self.updated_addresses.clear();
        self.updated_emails.clear();
        self.updated_phone_numbers.clear();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_is_membership() {
        let address = Uuid::new_v4();
        let user = User {
            id: Uuid::new_v4(),
            username: "ada".into(),
            password_hash: String::new(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            timezone: "Europe/London".into(),
            is_developer: true,
            is_test_account: false,
            developer_clients: vec!["ck_abc".into()],
            authorized_clients: vec![],
            addresses: vec![address],
            emails: vec![],
            phone_numbers: vec![],
            created_at: Utc::now(),
        };
        assert!(user.owns_client("ck_abc"));
        assert!(!user.owns_client("ck_other"));
        assert!(user.owns_address(address));
        assert!(!user.owns_address(Uuid::new_v4()));
    }

    #[test]
    fn sole_shared_address_detection() {
        let address = Uuid::new_v4();
        let mut ledger = UserAuthorization {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            client_id: "ck_abc".into(),
            addresses: vec![address],
            emails: vec![],
            phone_numbers: vec![],
        };
        assert!(ledger.shares_only_address(address));
        ledger.emails.push(Uuid::new_v4());
        assert!(!ledger.shares_only_address(address));
    }

    #[test]
    fn hook_event_round_trips() {
        for event in [
            HookEvent::UserDidUpdatePersonalInformation,
            HookEvent::UserDidRevokeAccess,
            HookEvent::UserDidDeleteAccount,
        ] {
            assert_eq!(event.as_str().parse::<HookEvent>().unwrap(), event);
        }
    }
}
