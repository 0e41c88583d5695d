// ABOUTME: Authorization flow engine - query validation, credential stage, consent, code issuance
// ABOUTME: Explicit context value threaded through sequential stages, no ambient state
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! The authorize endpoint.
//!
//! A request moves through query validation, client resolution (done
//! once and cached on the context), the credential or test-account
//! stage, then consent. Consent creates or widens the authorization:
//! scope is unioned with any existing grant and never shrinks, the
//! shared-entity snapshot and ledger are replaced, and a fresh
//! single-use code (or an immediate implicit token) is issued.

use crate::errors::{ApiError, FieldErrors};
use crate::middleware::{check_scope, resolve_bearer, CallSite};
use crate::models::{
    address_kinds, Authorization, AuthorizationCode, AuthorizationType, Client, RedirectionUri,
    ResponseType, User, UserAuthorization, UserStatus, UserStatusKind,
};
use crate::oauth::token::mint_tokens;
use crate::resources::ServerResources;
use crate::scopes::{Scope, ScopeFlag};
use crate::uri::normalize_redirect_uri;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// The SPA flow being driven through the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Login,
    Signup,
    RecoverPassword,
}

impl Flow {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::RecoverPassword => "recover_password",
        }
    }
}

impl FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Self::Login),
            "signup" => Ok(Self::Signup),
            "recover_password" => Ok(Self::RecoverPassword),
            other => Err(format!("unknown flow: {other}")),
        }
    }
}

/// Raw query parameters, all optional so every invalid field can be
/// reported in one response.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub flow: Option<String>,
    pub access_token: Option<String>,
}

/// JSON body of the authorize POST.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeSubmission {
    pub username: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub test_account: bool,
    #[serde(default)]
    pub shared: SharedSelection,
}

/// The user's consent selection: which owned sub-entities to share.
#[derive(Debug, Default, Deserialize)]
pub struct SharedSelection {
    /// Address-kind slot to owned address id.
    #[serde(default)]
    pub addresses: BTreeMap<String, Uuid>,
    #[serde(default)]
    pub emails: Vec<Uuid>,
    #[serde(default)]
    pub phone_numbers: Vec<Uuid>,
}

/// Validated query with the client and matched URI resolved once.
pub struct AuthorizeContext {
    pub client: Client,
    pub uri: RedirectionUri,
    pub state: String,
    pub flow: Flow,
}

#[derive(Debug, Serialize)]
pub struct ClientView {
    pub id: String,
    pub name: String,
}

/// GET response telling the SPA which step to render.
#[derive(Debug, Serialize)]
pub struct BeginResponse {
    pub step: &'static str,
    pub flow: Flow,
    pub client: ClientView,
    pub scope: String,
    pub scope_flags: String,
    #[serde(rename = "installedApp")]
    pub installed_app: bool,
}

/// POST response: a single-use code, or an immediate implicit token.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AuthorizeGrant {
    Code {
        code: String,
        state: String,
    },
    Implicit {
        access_token: String,
        expires_in: i64,
        state: String,
    },
}

/// Validate the query string and resolve the client and redirection URI.
/// Every invalid field is collected before failing.
///
/// # Errors
///
/// Returns `InvalidRequest` with a field map, or `Internal` on storage
/// failure.
pub async fn validate_query(
    resources: &ServerResources,
    query: &AuthorizeQuery,
) -> Result<AuthorizeContext, ApiError> {
    let mut fields = FieldErrors::new();

    let client = match query.client_id.as_deref() {
        None | Some("") => {
            fields.insert("client_id".into(), "missing".into());
            None
        }
        Some(client_id) => {
            let client = resources.database.get_client(client_id).await?;
            if client.is_none() {
                fields.insert("client_id".into(), "unknown client".into());
            }
            client
        }
    };

    let uri = match query.redirect_uri.as_deref() {
        None | Some("") => {
            fields.insert("redirect_uri".into(), "missing".into());
            None
        }
        Some(raw) => match normalize_redirect_uri(raw) {
            Err(err) => {
                fields.insert("redirect_uri".into(), err.to_string());
                None
            }
            Ok(normalized) => match &client {
                Some(client) => {
                    let registered = resources
                        .database
                        .list_redirection_uris_for_client(&client.id)
                        .await?;
                    let matched = registered.into_iter().find(|u| u.uri == normalized);
                    if matched.is_none() {
                        fields.insert(
                            "redirect_uri".into(),
                            "not registered for this client".into(),
                        );
                    }
                    matched
                }
                None => None,
            },
        },
    };

    let state = match query.state.as_deref() {
        None | Some("") => {
            fields.insert("state".into(), "missing".into());
            None
        }
        Some(state) => Some(state.to_owned()),
    };

    let flow = match query.flow.as_deref() {
        None | Some("") => {
            fields.insert("flow".into(), "missing".into());
            None
        }
        Some(raw) => match raw.parse::<Flow>() {
            Ok(flow) => Some(flow),
            Err(_) => {
                fields.insert(
                    "flow".into(),
                    "must be one of login, signup, recover_password".into(),
                );
                None
            }
        },
    };

    if !fields.is_empty() {
        return Err(ApiError::InvalidRequest(fields));
    }

    // All four are present when no field error was recorded.
    match (client, uri, state, flow) {
        (Some(client), Some(uri), Some(state), Some(flow)) => Ok(AuthorizeContext {
            client,
            uri,
            state,
            flow,
        }),
        _ => Err(ApiError::Internal(anyhow::anyhow!(
            "authorize query validation inconsistency"
        ))),
    }
}

/// Handle the GET: tell the SPA whether to render credentials or
/// consent, with the client and requested scope.
///
/// # Errors
///
/// Query validation errors, bearer resolution errors when a token is
/// presented, or `NotFound` when the token lacks the `app` scope.
pub async fn begin(
    resources: &ServerResources,
    headers: &HeaderMap,
    query: &AuthorizeQuery,
) -> Result<BeginResponse, ApiError> {
    let context = validate_query(resources, query).await?;

    let step = if headers.contains_key(AUTHORIZATION) || query.access_token.is_some() {
        let auth = resolve_bearer(resources, headers, query.access_token.as_deref()).await?;
        check_scope(&auth, &[Scope::App], CallSite::Authorize)?;
        "consent"
    } else {
        "credentials"
    };

    Ok(BeginResponse {
        step,
        flow: context.flow,
        client: ClientView {
            id: context.client.id.clone(),
            name: context.client.name.clone(),
        },
        scope: context.uri.scope.to_string(),
        scope_flags: context.uri.scope_flags.to_string(),
        installed_app: !context.uri.needs_client_secret,
    })
}

/// Handle the POST: establish the user (session, credentials, signup,
/// or test account), validate consent, persist the authorization, and
/// issue the grant.
///
/// # Errors
///
/// See the stage descriptions; storage failures map to `Internal`.
pub async fn submit(
    resources: &ServerResources,
    headers: &HeaderMap,
    query: &AuthorizeQuery,
    body: &AuthorizeSubmission,
) -> Result<AuthorizeGrant, ApiError> {
    let context = validate_query(resources, query).await?;

    // The reset leg is an external collaborator; only GET surfaces it.
    if context.flow == Flow::RecoverPassword {
        return Err(ApiError::invalid_field(
            "flow",
            "password recovery cannot be submitted here",
        ));
    }

    let user = establish_user(resources, headers, query, &context, body).await?;

    validate_consent(resources, &context, &user, &body.shared).await?;

    let authorization = persist_authorization(resources, &context, &user, &body.shared).await?;

    match context.uri.response_type {
        ResponseType::Code => {
            let value = resources.credentials.generate_authorization_code()?;
            let code = AuthorizationCode {
                value: value.clone(),
                is_used: false,
                expires_at: Utc::now()
                    + Duration::seconds(resources.config.auth.auth_code_ttl_secs),
            };
            resources
                .database
                .set_authorization_code(authorization.id, &code)
                .await?;
            tracing::info!(
                client_id = %context.client.id,
                user_id = %user.id,
                "authorization code issued"
            );
            Ok(AuthorizeGrant::Code {
                code: value,
                state: context.state,
            })
        }
        ResponseType::Token => {
            let tokens = mint_tokens(resources, authorization.id, false).await?;
            tracing::info!(
                client_id = %context.client.id,
                user_id = %user.id,
                "implicit token issued"
            );
            Ok(AuthorizeGrant::Implicit {
                access_token: tokens.access_token,
                expires_in: tokens.expires_in,
                state: context.state,
            })
        }
    }
}

async fn establish_user(
    resources: &ServerResources,
    headers: &HeaderMap,
    query: &AuthorizeQuery,
    context: &AuthorizeContext,
    body: &AuthorizeSubmission,
) -> Result<User, ApiError> {
    // An existing app session short-circuits the credential stage.
    if headers.contains_key(AUTHORIZATION) || query.access_token.is_some() {
        let auth = resolve_bearer(resources, headers, query.access_token.as_deref()).await?;
        check_scope(&auth, &[Scope::App], CallSite::Authorize)?;
        let user_id = auth
            .user_id
            .ok_or_else(|| ApiError::access_denied("no user attached to this session"))?;
        return resources
            .database
            .get_user(user_id)
            .await?
            .ok_or(ApiError::NotFound);
    }

    if body.test_account {
        // A disallowing client is a policy refusal, not a malformed
        // request.
        if !context.client.authorize_test_accounts {
            return Err(ApiError::access_denied(
                "this application does not accept test accounts",
            ));
        }
        return create_test_account(resources).await;
    }

    match context.flow {
        Flow::Signup => signup_user(resources, body).await,
        Flow::Login | Flow::RecoverPassword => {
            login_user(resources, &context.client.id, body).await
        }
    }
}

async fn create_test_account(resources: &ServerResources) -> Result<User, ApiError> {
    let throwaway_password = resources.credentials.generate_token()?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: format!("test-{}", Uuid::new_v4()),
        password_hash: resources
            .credentials
            .hash_password_blocking(&throwaway_password)
            .await?,
        first_name: "Test".into(),
        last_name: "Account".into(),
        timezone: "UTC".into(),
        is_developer: false,
        is_test_account: true,
        developer_clients: Vec::new(),
        authorized_clients: Vec::new(),
        addresses: Vec::new(),
        emails: Vec::new(),
        phone_numbers: Vec::new(),
        created_at: now,
    };
    resources.database.create_user(&user).await?;
    Ok(user)
}

async fn signup_user(
    resources: &ServerResources,
    body: &AuthorizeSubmission,
) -> Result<User, ApiError> {
    let mut fields = FieldErrors::new();
    let username = body.username.as_deref().unwrap_or("");
    let password = body.password.as_deref().unwrap_or("");
    if username.is_empty() {
        fields.insert("username".into(), "missing".into());
    }
    if password.is_empty() {
        fields.insert("password".into(), "missing".into());
    }
    if !fields.is_empty() {
        return Err(ApiError::InvalidRequest(fields));
    }
    if resources
        .database
        .get_user_by_username(username)
        .await?
        .is_some()
    {
        return Err(ApiError::invalid_field("username", "already in use"));
    }

    let user = User {
        id: Uuid::new_v4(),
        username: username.to_owned(),
        password_hash: resources
            .credentials
            .hash_password_blocking(password)
            .await?,
        first_name: body.first_name.clone().unwrap_or_default(),
        last_name: body.last_name.clone().unwrap_or_default(),
        timezone: body.timezone.clone().unwrap_or_else(|| "UTC".into()),
        is_developer: false,
        is_test_account: false,
        developer_clients: Vec::new(),
        authorized_clients: Vec::new(),
        addresses: Vec::new(),
        emails: Vec::new(),
        phone_numbers: Vec::new(),
        created_at: Utc::now(),
    };
    resources.database.create_user(&user).await?;
    Ok(user)
}

async fn login_user(
    resources: &ServerResources,
    client_id: &str,
    body: &AuthorizeSubmission,
) -> Result<User, ApiError> {
    let bad_login = || ApiError::access_denied("invalid username or password");

    let username = body.username.as_deref().unwrap_or("");
    let password = body.password.as_deref().unwrap_or("");
    if username.is_empty() || password.is_empty() {
        return Err(bad_login());
    }

    if !resources.attempts.is_allowed(client_id, username) {
        return Err(ApiError::access_denied(
            "too many failed attempts, try again later",
        ));
    }

    let Some(user) = resources.database.get_user_by_username(username).await? else {
        resources.attempts.record_failure(client_id, username);
        return Err(bad_login());
    };
    if !resources
        .credentials
        .verify_password_blocking(password, &user.password_hash)
        .await?
    {
        resources.attempts.record_failure(client_id, username);
        return Err(bad_login());
    }

    resources.attempts.clear(client_id, username);
    Ok(user)
}

async fn validate_consent(
    resources: &ServerResources,
    context: &AuthorizeContext,
    user: &User,
    shared: &SharedSelection,
) -> Result<(), ApiError> {
    let scope = &context.uri.scope;
    let flags = &context.uri.scope_flags;
    let mut fields = FieldErrors::new();

    if scope.contains(Scope::Addresses) {
        if flags.contains(ScopeFlag::SeparateShippingBilling) {
            if !shared.addresses.contains_key(address_kinds::SHIPPING)
                || !shared.addresses.contains_key(address_kinds::BILLING)
            {
                fields.insert(
                    "shared.addresses".into(),
                    "shipping and billing addresses are both required".into(),
                );
            }
        } else if !shared.addresses.contains_key(address_kinds::MAIN) {
            fields.insert("shared.addresses".into(), "a main address is required".into());
        }
        for kind in shared.addresses.keys() {
            if kind != address_kinds::MAIN
                && kind != address_kinds::SHIPPING
                && kind != address_kinds::BILLING
            {
                fields.insert("shared.addresses".into(), format!("unknown kind: {kind}"));
            }
        }
    } else if !shared.addresses.is_empty() {
        fields.insert("shared.addresses".into(), "not requested by this client".into());
    }

    if scope.contains(Scope::Emails) {
        if shared.emails.is_empty() {
            fields.insert("shared.emails".into(), "at least one email is required".into());
        } else if flags.contains(ScopeFlag::MainEmailOnly) {
            if shared.emails.len() != 1 {
                fields.insert(
                    "shared.emails".into(),
                    "only the main email may be shared".into(),
                );
            } else if let Some(email) = resources.database.get_email(shared.emails[0]).await? {
                if !email.is_main_address {
                    fields.insert(
                        "shared.emails".into(),
                        "only the main email may be shared".into(),
                    );
                }
            }
        }
    } else if !shared.emails.is_empty() {
        fields.insert("shared.emails".into(), "not requested by this client".into());
    }

    if scope.contains(Scope::PhoneNumbers) {
        if shared.phone_numbers.is_empty() {
            fields.insert(
                "shared.phone_numbers".into(),
                "at least one phone number is required".into(),
            );
        }
    } else if !shared.phone_numbers.is_empty() {
        fields.insert(
            "shared.phone_numbers".into(),
            "not requested by this client".into(),
        );
    }

    if !fields.is_empty() {
        return Err(ApiError::InvalidRequest(fields));
    }

    // Ownership runs after shape validation.
    for address_id in shared.addresses.values() {
        if !user.owns_address(*address_id) {
            return Err(ApiError::access_denied("address not owned by this user"));
        }
    }
    for email_id in &shared.emails {
        if !user.owns_email(*email_id) {
            return Err(ApiError::access_denied("email not owned by this user"));
        }
    }
    for phone_id in &shared.phone_numbers {
        if !user.owns_phone_number(*phone_id) {
            return Err(ApiError::access_denied("phone number not owned by this user"));
        }
    }

    Ok(())
}

async fn persist_authorization(
    resources: &ServerResources,
    context: &AuthorizeContext,
    user: &User,
    shared: &SharedSelection,
) -> Result<Authorization, ApiError> {
    let auth_type = match context.uri.response_type {
        ResponseType::Code => AuthorizationType::AuthorizationCode,
        ResponseType::Token => AuthorizationType::Implicit,
    };

    let authorization = match resources
        .database
        .get_authorization_for_user_client(user.id, &context.client.id)
        .await?
    {
        Some(mut existing) => {
            // Scope only grows across re-authorizations.
            existing.scope = existing.scope.union(&context.uri.scope);
            let mut flags = existing.scope_flags.clone();
            for flag in context.uri.scope_flags.iter() {
                flags.insert(flag);
            }
            existing.scope_flags = flags;
            resources
                .database
                .update_authorization_scope(existing.id, &existing.scope, &existing.scope_flags)
                .await?;

            existing.shared_addresses = shared.addresses.clone();
            existing.shared_emails = shared.emails.clone();
            existing.shared_phone_numbers = shared.phone_numbers.clone();
            resources
                .database
                .update_authorization_snapshot(&existing)
                .await?;
            existing
        }
        None => {
            let now = Utc::now();
            let created = Authorization {
                id: Uuid::new_v4(),
                user_id: Some(user.id),
                client_id: context.client.id.clone(),
                auth_type,
                scope: context.uri.scope.clone(),
                scope_flags: context.uri.scope_flags.clone(),
                needs_client_secret: context.uri.needs_client_secret,
                code: None,
                shared_addresses: shared.addresses.clone(),
                shared_emails: shared.emails.clone(),
                shared_phone_numbers: shared.phone_numbers.clone(),
                created_at: now,
                updated_at: now,
            };
            resources.database.create_authorization(&created).await?;
            created
        }
    };

    let ledger = UserAuthorization {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: context.client.id.clone(),
        addresses: shared.addresses.values().copied().collect(),
        emails: shared.emails.clone(),
        phone_numbers: shared.phone_numbers.clone(),
    };
    resources.database.upsert_user_authorization(&ledger).await?;

    if resources
        .database
        .get_user_status(user.id, &context.client.id)
        .await?
        .is_none()
    {
        let status = UserStatus {
            id: Uuid::new_v4(),
            user_id: user.id,
            client_id: context.client.id.clone(),
            status: UserStatusKind::New,
            updated_fields: Vec::new(),
            updated_addresses: Vec::new(),
            updated_emails: Vec::new(),
            updated_phone_numbers: Vec::new(),
        };
        resources.database.upsert_user_status(&status).await?;
    }

    resources
        .database
        .add_authorized_client(user.id, &context.client.id)
        .await?;

    Ok(authorization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_parses_wire_names() {
        assert_eq!("login".parse::<Flow>().unwrap(), Flow::Login);
        assert_eq!("signup".parse::<Flow>().unwrap(), Flow::Signup);
        assert_eq!(
            "recover_password".parse::<Flow>().unwrap(),
            Flow::RecoverPassword
        );
        assert!("logout".parse::<Flow>().is_err());
    }

    #[test]
    fn grant_serializes_flat() {
        let grant = AuthorizeGrant::Code {
            code: "abc".into(),
            state: "xyz".into(),
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["code"], "abc");
        assert_eq!(json["state"], "xyz");

        let grant = AuthorizeGrant::Implicit {
            access_token: "tok".into(),
            expires_in: 3600,
            state: "xyz".into(),
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert_eq!(json["access_token"], "tok");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn begin_response_uses_camel_case_installed_app() {
        let response = BeginResponse {
            step: "credentials",
            flow: Flow::Login,
            client: ClientView {
                id: "ck_abc".into(),
                name: "Demo".into(),
            },
            scope: "emails".into(),
            scope_flags: String::new(),
            installed_app: true,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["installedApp"], true);
        assert_eq!(json["client"]["name"], "Demo");
    }
}
