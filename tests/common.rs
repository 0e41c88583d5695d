// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides database, resource, seeding, and request helpers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Shared test utilities for `latchkey`.
//!
//! Common setup to reduce duplication across integration tests: an
//! in-memory database behind fully-wired server resources, seeding
//! helpers for users, clients, and authorizations, and oneshot request
//! plumbing against the real router.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use chrono::{Duration, Utc};
use latchkey::{
    config::{AttemptConfig, AuthConfig, DatabaseConfig, ServerConfig},
    database::Database,
    models::{
        AccessToken, Authorization, AuthorizationType, Client, RedirectionUri, ResponseType, User,
    },
    resources::ServerResources,
    routes,
    scopes::{ScopeFlagSet, ScopeSet},
};
use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use tower::ServiceExt;
use uuid::Uuid;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process).
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_test_writer()
            .init();
    });
}

/// Test configuration: minimum bcrypt cost and small attempt limits so
/// lockout tests stay fast.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
        },
        auth: AuthConfig {
            bcrypt_cost: 4,
            access_token_ttl_secs: 3600,
            auth_code_ttl_secs: 600,
        },
        attempts: AttemptConfig {
            limit: 3,
            window_secs: 300,
        },
    }
}

/// Fully-wired resources over a fresh in-memory database.
pub async fn create_test_resources() -> Result<Arc<ServerResources>> {
    init_test_logging();
    let config = test_config();
    let database = Database::new(&config.database.url).await?;
    database.migrate().await?;
    Ok(ServerResources::new(database, config))
}

/// The real application router over test resources.
pub fn app(resources: Arc<ServerResources>) -> axum::Router {
    routes::router(resources)
}

/// Create a user directly in the store with a bcrypt-hashed password.
pub async fn seed_user(
    resources: &ServerResources,
    username: &str,
    password: &str,
    is_developer: bool,
) -> Result<User> {
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_owned(),
        password_hash: resources.credentials.hash_password(password)?,
        first_name: "Test".into(),
        last_name: "User".into(),
        timezone: "UTC".into(),
        is_developer,
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

/// Create a client owned by `developer_id`, returning it with the
/// plaintext secret.
pub async fn seed_client(
    resources: &ServerResources,
    developer_id: Uuid,
    first_party: bool,
) -> Result<(Client, String)> {
    let secret = resources.credentials.generate_client_secret();
    let client = Client {
        id: resources.credentials.generate_client_id(),
        secret_hash: resources.credentials.hash_token(&secret),
        name: "Test Client".into(),
        developer_id,
        authorize_test_accounts: true,
        first_party,
        update_notification_handler: None,
        created_at: Utc::now(),
    };
    resources.database.create_client(&client).await?;
    resources
        .database
        .add_developer_client(developer_id, &client.id)
        .await?;
    Ok((client, secret))
}

/// Register a redirection URI for a client. `uri` is stored as given,
/// so pass it pre-normalized (no port, trailing slash stripped).
pub async fn seed_redirection_uri(
    resources: &ServerResources,
    client_id: &str,
    uri: &str,
    response_type: ResponseType,
    scope: &str,
    scope_flags: &str,
    needs_client_secret: bool,
) -> Result<RedirectionUri> {
    let registered = RedirectionUri {
        id: Uuid::new_v4(),
        client_id: client_id.to_owned(),
        uri: uri.to_owned(),
        response_type,
        scope: ScopeSet::parse(scope)?,
        scope_flags: ScopeFlagSet::parse(scope_flags)?,
        needs_client_secret,
        created_at: Utc::now(),
    };
    resources.database.create_redirection_uri(&registered).await?;
    Ok(registered)
}

/// Create an authorization for a user/client pair with the given scope.
pub async fn seed_authorization(
    resources: &ServerResources,
    user_id: Option<Uuid>,
    client_id: &str,
    scope: &str,
) -> Result<Authorization> {
    let now = Utc::now();
    let authorization = Authorization {
        id: Uuid::new_v4(),
        user_id,
        client_id: client_id.to_owned(),
        auth_type: AuthorizationType::AuthorizationCode,
        scope: ScopeSet::parse(scope)?,
        scope_flags: ScopeFlagSet::new(),
        needs_client_secret: false,
        code: None,
        shared_addresses: BTreeMap::new(),
        shared_emails: Vec::new(),
        shared_phone_numbers: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    resources.database.create_authorization(&authorization).await?;
    if let Some(user_id) = user_id {
        resources
            .database
            .add_authorized_client(user_id, client_id)
            .await?;
    }
    Ok(authorization)
}

/// Mint an access token (and optionally a refresh token) bound to an
/// authorization, the way the token endpoint stores them.
pub async fn seed_token(
    resources: &ServerResources,
    authorization_id: Uuid,
    with_refresh: bool,
) -> Result<(String, Option<String>)> {
    seed_token_with_expiry(
        resources,
        authorization_id,
        with_refresh,
        Utc::now() + Duration::seconds(3600),
    )
    .await
}

/// [`seed_token`] with an explicit expiry, for expired-token tests.
pub async fn seed_token_with_expiry(
    resources: &ServerResources,
    authorization_id: Uuid,
    with_refresh: bool,
    expires_at: chrono::DateTime<Utc>,
) -> Result<(String, Option<String>)> {
    let access_token = resources.credentials.generate_token()?;
    let refresh_token = if with_refresh {
        Some(resources.credentials.generate_token()?)
    } else {
        None
    };
    let stored = AccessToken {
        id: Uuid::new_v4(),
        token_hash: resources.credentials.hash_token(&access_token),
        refresh_token_hash: refresh_token
            .as_deref()
            .map(|t| resources.credentials.hash_token(t)),
        authorization_id,
        expires_at,
        created_at: Utc::now(),
    };
    resources.database.create_access_token(&stored).await?;
    Ok((access_token, refresh_token))
}

/// Build a JSON request with an optional bearer token.
pub fn json_request(
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

/// Build a form-encoded POST to the token endpoint, optionally with a
/// Basic authorization header.
pub fn token_request(basic: Option<(&str, &str)>, form: &[(&str, &str)]) -> Request<Body> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut builder = Request::builder()
        .method("POST")
        .uri("/oauth/token")
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some((id, secret)) = basic {
        let encoded = STANDARD.encode(format!("{id}:{secret}"));
        builder = builder.header("authorization", format!("Basic {encoded}"));
    }
    let body = serde_urlencoded::to_string(form).unwrap();
    builder.body(Body::from(body)).unwrap()
}

/// Send a request through the router.
pub async fn send(router: axum::Router, request: Request<Body>) -> Response<Body> {
    router.oneshot(request).await.unwrap()
}

/// Read the response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    }
}

/// Assert status and return the JSON body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status, "unexpected status");
    body_json(response).await
}
