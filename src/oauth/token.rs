// ABOUTME: Token exchange engine implementing the four OAuth2 grant types
// ABOUTME: Staged validation with a fixed error-code ordering contract per RFC 6749
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! `POST /oauth/token`.
//!
//! Validation runs in fixed stages, each short-circuiting with its own
//! error code: header sanity, client authentication, grant-type
//! authorization, required-parameter presence, then grant semantics.
//! Basic-auth parsing fails closed as `invalid_client` so a malformed
//! header can never be mistaken for an unauthenticated public client.

use crate::errors::{ApiError, OAuthErrorCode};
use crate::models::{Authorization, AuthorizationType, Client};
use crate::resources::ServerResources;
use crate::scopes::{Scope, ScopeFlagSet, ScopeSet};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Form body of the token endpoint. Everything is optional at the parse
/// stage; presence is enforced per grant type.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Success body. No `token_type` field; the wire format matches the
/// service this API fronts.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

struct ClientAuth {
    client: Client,
    secret_verified: bool,
}

/// Run the staged token exchange.
///
/// # Errors
///
/// Returns the stage-appropriate OAuth protocol error, or `Internal` on
/// storage failure.
pub async fn exchange(
    resources: &ServerResources,
    headers: &HeaderMap,
    form: TokenRequest,
) -> Result<TokenResponse, ApiError> {
    // Stage 1: header sanity and header/body credential agreement.
    let header_creds = match headers.get(AUTHORIZATION) {
        Some(value) => Some(parse_basic_header(
            value
                .to_str()
                .map_err(|_| ApiError::oauth(OAuthErrorCode::InvalidClient))?,
        )?),
        None => None,
    };
    let (client_id, client_secret) = merge_credentials(header_creds, &form)?;

    // Stage 2: client authentication.
    let auth = authenticate_client(resources, client_id, client_secret).await?;

    // Stage 3: grant-type authorization.
    let grant_type = form
        .grant_type
        .as_deref()
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidRequest))?;
    match grant_type {
        "authorization_code" | "refresh_token" => {}
        "password" | "client_credentials" => {
            if !auth.client.first_party {
                return Err(ApiError::oauth(OAuthErrorCode::UnauthorizedClient));
            }
        }
        _ => return Err(ApiError::oauth(OAuthErrorCode::UnsupportedGrantType)),
    }

    // Stages 4 and 5 are per grant.
    match grant_type {
        "authorization_code" => exchange_code(resources, &auth, &form).await,
        "password" => exchange_password(resources, &auth, &form).await,
        "client_credentials" => exchange_client_credentials(resources, &auth).await,
        "refresh_token" => exchange_refresh(resources, &form).await,
        _ => unreachable!("grant type screened above"),
    }
}

fn parse_basic_header(value: &str) -> Result<(String, Option<String>), ApiError> {
    let invalid = || ApiError::oauth(OAuthErrorCode::InvalidClient);
    let encoded = value.strip_prefix("Basic ").ok_or_else(invalid)?;
    if encoded.is_empty() || encoded.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let decoded = STANDARD.decode(encoded).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    if decoded.matches(':').count() != 1 {
        return Err(invalid());
    }
    let (id, secret) = decoded.split_once(':').ok_or_else(invalid)?;
    if id.is_empty() {
        return Err(invalid());
    }
    Ok((id.to_owned(), Some(secret.to_owned())))
}

fn merge_credentials(
    header: Option<(String, Option<String>)>,
    form: &TokenRequest,
) -> Result<(Option<String>, Option<String>), ApiError> {
    match header {
        Some((header_id, header_secret)) => {
            // Credentials arriving both ways must agree.
            if form.client_id.as_deref().is_some_and(|id| id != header_id) {
                return Err(ApiError::oauth(OAuthErrorCode::InvalidRequest));
            }
            if let (Some(body), Some(head)) = (form.client_secret.as_deref(), header_secret.as_deref())
            {
                if body != head {
                    return Err(ApiError::oauth(OAuthErrorCode::InvalidRequest));
                }
            }
            Ok((Some(header_id), header_secret.or_else(|| form.client_secret.clone())))
        }
        None => Ok((form.client_id.clone(), form.client_secret.clone())),
    }
}

async fn authenticate_client(
    resources: &ServerResources,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> Result<ClientAuth, ApiError> {
    let client_id = client_id.ok_or(ApiError::oauth(OAuthErrorCode::InvalidClient))?;
    let client = resources
        .database
        .get_client(&client_id)
        .await?
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidClient))?;

    // A supplied secret must match; absence is tolerated here and
    // enforced per grant below (installed apps have no secret to send).
    let secret_verified = match client_secret.as_deref() {
        Some(secret) => {
            if !resources.credentials.token_matches(secret, &client.secret_hash) {
                return Err(ApiError::oauth(OAuthErrorCode::InvalidClient));
            }
            true
        }
        None => false,
    };

    Ok(ClientAuth {
        client,
        secret_verified,
    })
}

async fn exchange_code(
    resources: &ServerResources,
    auth: &ClientAuth,
    form: &TokenRequest,
) -> Result<TokenResponse, ApiError> {
    let code = form
        .code
        .as_deref()
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidRequest))?;

    let now = Utc::now();
    let Some(authorization) = resources
        .database
        .consume_authorization_code(code, &auth.client.id, now)
        .await?
    else {
        // An expired unredeemed code cannot be retried: clear it so the
        // authorize flow must issue a fresh one.
        if let Some(stale) = resources
            .database
            .get_authorization_by_code(code, &auth.client.id)
            .await?
        {
            if let Some(stored) = &stale.code {
                if !stored.is_used && stored.expires_at <= now {
                    resources.database.clear_authorization_code(stale.id).await?;
                }
            }
        }
        return Err(ApiError::oauth(OAuthErrorCode::InvalidGrant));
    };

    if authorization.needs_client_secret && !auth.secret_verified {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidClient));
    }

    mint_tokens(resources, authorization.id, true).await
}

async fn exchange_password(
    resources: &ServerResources,
    auth: &ClientAuth,
    form: &TokenRequest,
) -> Result<TokenResponse, ApiError> {
    if !auth.secret_verified {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidClient));
    }
    let (Some(username), Some(password)) = (form.username.as_deref(), form.password.as_deref())
    else {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidRequest));
    };

    // Empty or wrong credentials are a bad login, not a malformed form.
    let bad_login = || ApiError::oauth(OAuthErrorCode::InvalidClient);
    if username.is_empty() || password.is_empty() {
        return Err(bad_login());
    }
    let user = resources
        .database
        .get_user_by_username(username)
        .await?
        .ok_or_else(bad_login)?;
    if !resources
        .credentials
        .verify_password_blocking(password, &user.password_hash)
        .await?
    {
        return Err(bad_login());
    }

    let mut scope = ScopeSet::new();
    scope.insert(Scope::App);
    if user.is_developer {
        scope.insert(Scope::AppDeveloper);
    }

    let authorization = match resources
        .database
        .get_authorization_for_user_client(user.id, &auth.client.id)
        .await?
    {
        Some(existing) => {
            let merged = existing.scope.union(&scope);
            if merged != existing.scope {
                resources
                    .database
                    .update_authorization_scope(existing.id, &merged, &existing.scope_flags)
                    .await?;
            }
            existing
        }
        None => {
            let now = Utc::now();
            let created = Authorization {
                id: Uuid::new_v4(),
                user_id: Some(user.id),
                client_id: auth.client.id.clone(),
                auth_type: AuthorizationType::Password,
                scope,
                scope_flags: ScopeFlagSet::new(),
                needs_client_secret: false,
                code: None,
                shared_addresses: BTreeMap::new(),
                shared_emails: Vec::new(),
                shared_phone_numbers: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            resources.database.create_authorization(&created).await?;
            resources
                .database
                .add_authorized_client(user.id, &auth.client.id)
                .await?;
            created
        }
    };

    mint_tokens(resources, authorization.id, true).await
}

async fn exchange_client_credentials(
    resources: &ServerResources,
    auth: &ClientAuth,
) -> Result<TokenResponse, ApiError> {
    if !auth.secret_verified {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidClient));
    }

    let authorization = match resources
        .database
        .get_client_credentials_authorization(&auth.client.id)
        .await?
    {
        Some(existing) => existing,
        None => {
            let now = Utc::now();
            let mut scope = ScopeSet::new();
            scope.insert(Scope::UnauthenticatedApp);
            let created = Authorization {
                id: Uuid::new_v4(),
                user_id: None,
                client_id: auth.client.id.clone(),
                auth_type: AuthorizationType::ClientCredentials,
                scope,
                scope_flags: ScopeFlagSet::new(),
                needs_client_secret: false,
                code: None,
                shared_addresses: BTreeMap::new(),
                shared_emails: Vec::new(),
                shared_phone_numbers: Vec::new(),
                created_at: now,
                updated_at: now,
            };
            resources.database.create_authorization(&created).await?;
            created
        }
    };

    // Client-only sessions get no refresh token.
    mint_tokens(resources, authorization.id, false).await
}

async fn exchange_refresh(
    resources: &ServerResources,
    form: &TokenRequest,
) -> Result<TokenResponse, ApiError> {
    let refresh_token = form
        .refresh_token
        .as_deref()
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidRequest))?;

    let refresh_hash = resources.credentials.hash_token(refresh_token);
    let old = resources
        .database
        .claim_refresh_token(&refresh_hash)
        .await?
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidGrant))?;

    // The claim already removed the old pair; a revoked authorization
    // means nothing new may be minted.
    if resources
        .database
        .get_authorization(old.authorization_id)
        .await?
        .is_none()
    {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidGrant));
    }

    mint_tokens(resources, old.authorization_id, true).await
}

/// Mint and store an access token (optionally with a refresh token)
/// bound to an authorization. Shared with the implicit response type of
/// the authorize flow.
///
/// # Errors
///
/// Returns `Internal` on RNG or storage failure.
pub(crate) async fn mint_tokens(
    resources: &ServerResources,
    authorization_id: Uuid,
    with_refresh: bool,
) -> Result<TokenResponse, ApiError> {
    let access_token = resources.credentials.generate_token()?;
    let refresh_token = if with_refresh {
        Some(resources.credentials.generate_token()?)
    } else {
        None
    };

    let ttl = resources.config.auth.access_token_ttl_secs;
    let now = Utc::now();
    let stored = crate::models::AccessToken {
        id: Uuid::new_v4(),
        token_hash: resources.credentials.hash_token(&access_token),
        refresh_token_hash: refresh_token
            .as_deref()
            .map(|t| resources.credentials.hash_token(t)),
        authorization_id,
        expires_at: now + Duration::seconds(ttl),
        created_at: now,
    };
    resources.database.create_access_token(&stored).await?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        expires_in: ttl,
    })
}
