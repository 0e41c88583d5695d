// ABOUTME: Route handlers for client registration, redirection URIs, and hooks
// ABOUTME: Developer-scoped CRUD with normalization, scope validation, and the handler mirror
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Client management routes.
//!
//! All endpoints require an `app_developer`-scoped session and, beyond
//! creation, ownership of the client. The plaintext secret appears once
//! in the creation response; only its hash is kept. Hook mutations
//! maintain the derived `update_notification_handler` mirror and the
//! at-most-one personal-information hook invariant.

use crate::cascade;
use crate::constants::limits;
use crate::errors::{ApiError, FieldErrors};
use crate::middleware::{check_scope, resolve_bearer, CallSite};
use crate::models::{Client, Hook, HookEvent, RedirectionUri, ResponseType, User};
use crate::resources::ServerResources;
use crate::scopes::{Scope, ScopeFlagSet, ScopeSet};
use crate::uri::{needs_client_secret, normalize_redirect_uri, require_https_for_token};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateClientBody {
    pub name: String,
    #[serde(default)]
    pub authorize_test_accounts: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientBody {
    pub name: String,
    #[serde(default)]
    pub authorize_test_accounts: bool,
}

#[derive(Debug, Deserialize)]
pub struct RedirectionUriBody {
    pub uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub scope_flags: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HookBody {
    pub url: Option<String>,
    pub event_type: Option<String>,
}

/// Creation response; the only place the plaintext secret appears.
#[derive(Debug, Serialize)]
pub struct ClientCreatedView {
    pub id: String,
    pub secret: String,
    pub name: String,
    pub authorize_test_accounts: bool,
}

#[derive(Debug, Serialize)]
pub struct ClientView {
    pub id: String,
    pub name: String,
    pub authorize_test_accounts: bool,
    pub update_notification_handler: Option<String>,
    pub redirection_uris: Vec<RedirectionUriView>,
    pub hooks: Vec<HookView>,
}

#[derive(Debug, Serialize)]
pub struct RedirectionUriView {
    pub id: Uuid,
    pub uri: String,
    pub response_type: ResponseType,
    pub scope: String,
    pub scope_flags: String,
    pub needs_client_secret: bool,
}

impl From<RedirectionUri> for RedirectionUriView {
    fn from(uri: RedirectionUri) -> Self {
        Self {
            id: uri.id,
            uri: uri.uri,
            response_type: uri.response_type,
            scope: uri.scope.to_string(),
            scope_flags: uri.scope_flags.to_string(),
            needs_client_secret: uri.needs_client_secret,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HookView {
    pub id: Uuid,
    pub url: String,
    pub event_type: HookEvent,
}

impl From<Hook> for HookView {
    fn from(hook: Hook) -> Self {
        Self {
            id: hook.id,
            url: hook.url,
            event_type: hook.event_type,
        }
    }
}

/// Client routes handler.
pub struct ClientRoutes;

impl ClientRoutes {
    /// Create all client routes.
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/clients", post(Self::handle_create))
            .route("/clients/:id", get(Self::handle_get))
            .route("/clients/:id", put(Self::handle_update))
            .route("/clients/:id", delete(Self::handle_delete))
            .route(
                "/clients/:id/redirection-uris",
                post(Self::handle_create_uri),
            )
            .route(
                "/clients/:id/redirection-uris/:uri_id",
                put(Self::handle_update_uri).delete(Self::handle_delete_uri),
            )
            .route("/clients/:id/hooks", post(Self::handle_create_hook))
            .route(
                "/clients/:id/hooks/:hook_id",
                put(Self::handle_update_hook).delete(Self::handle_delete_hook),
            )
            .with_state(resources)
    }

    async fn handle_create(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<CreateClientBody>,
    ) -> Result<Response, ApiError> {
        let developer = require_developer(&resources, &headers).await?;
        if developer.developer_clients.len() >= limits::MAX_CLIENTS_PER_DEVELOPER {
            return Err(ApiError::invalid_field(
                "clients",
                "developer client limit reached",
            ));
        }
        if body.name.trim().is_empty() {
            return Err(ApiError::invalid_field("name", "missing"));
        }

        let secret = resources.credentials.generate_client_secret();
        let client = Client {
            id: resources.credentials.generate_client_id(),
            secret_hash: resources.credentials.hash_token(&secret),
            name: body.name,
            developer_id: developer.id,
            authorize_test_accounts: body.authorize_test_accounts,
            first_party: false,
            update_notification_handler: None,
            created_at: Utc::now(),
        };
        resources.database.create_client(&client).await?;
        resources
            .database
            .add_developer_client(developer.id, &client.id)
            .await?;
        tracing::info!(client_id = %client.id, developer_id = %developer.id, "client registered");

        Ok((
            StatusCode::CREATED,
            Json(ClientCreatedView {
                id: client.id,
                secret,
                name: client.name,
                authorize_test_accounts: client.authorize_test_accounts,
            }),
        )
            .into_response())
    }

    async fn handle_get(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(client_id): Path<String>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;

        let redirection_uris = resources
            .database
            .list_redirection_uris_for_client(&client.id)
            .await?
            .into_iter()
            .map(RedirectionUriView::from)
            .collect();
        let hooks = resources
            .database
            .list_hooks_for_client(&client.id)
            .await?
            .into_iter()
            .map(HookView::from)
            .collect();

        Ok(Json(ClientView {
            id: client.id,
            name: client.name,
            authorize_test_accounts: client.authorize_test_accounts,
            update_notification_handler: client.update_notification_handler,
            redirection_uris,
            hooks,
        })
        .into_response())
    }

    async fn handle_update(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(client_id): Path<String>,
        Json(body): Json<UpdateClientBody>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        if body.name.trim().is_empty() {
            return Err(ApiError::invalid_field("name", "missing"));
        }

        resources
            .database
            .update_client(&client.id, &body.name, body.authorize_test_accounts)
            .await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_delete(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(client_id): Path<String>,
    ) -> Result<Response, ApiError> {
        let (developer, client) = require_owned_client(&resources, &headers, &client_id).await?;

        cascade::remove_client(&resources.database, &client.id, developer.id).await?;
        tracing::info!(client_id = %client.id, "client deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_create_uri(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(client_id): Path<String>,
        Json(body): Json<RedirectionUriBody>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        let validated = validate_uri_body(&body)?;

        let uri = RedirectionUri {
            id: Uuid::new_v4(),
            client_id: client.id,
            uri: validated.uri,
            response_type: validated.response_type,
            scope: validated.scope,
            scope_flags: validated.scope_flags,
            needs_client_secret: validated.needs_client_secret,
            created_at: Utc::now(),
        };
        resources.database.create_redirection_uri(&uri).await?;
        Ok((StatusCode::CREATED, Json(RedirectionUriView::from(uri))).into_response())
    }

    async fn handle_update_uri(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((client_id, uri_id)): Path<(String, Uuid)>,
        Json(body): Json<RedirectionUriBody>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        let current = resources
            .database
            .get_redirection_uri(uri_id)
            .await?
            .filter(|u| u.client_id == client.id)
            .ok_or(ApiError::NotFound)?;
        let validated = validate_uri_body(&body)?;

        let uri = RedirectionUri {
            id: current.id,
            client_id: current.client_id,
            uri: validated.uri,
            response_type: validated.response_type,
            scope: validated.scope,
            scope_flags: validated.scope_flags,
            needs_client_secret: validated.needs_client_secret,
            created_at: current.created_at,
        };
        resources.database.update_redirection_uri(&uri).await?;
        Ok(Json(RedirectionUriView::from(uri)).into_response())
    }

    async fn handle_delete_uri(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((client_id, uri_id)): Path<(String, Uuid)>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        if resources
            .database
            .get_redirection_uri(uri_id)
            .await?
            .filter(|u| u.client_id == client.id)
            .is_none()
        {
            return Err(ApiError::NotFound);
        }

        resources.database.delete_redirection_uri(uri_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_create_hook(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(client_id): Path<String>,
        Json(body): Json<HookBody>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        let (url, event_type) = validate_hook_body(&body)?;

        if event_type == HookEvent::UserDidUpdatePersonalInformation
            && resources
                .database
                .get_hook_for_event(&client.id, event_type)
                .await?
                .is_some()
        {
            return Err(ApiError::invalid_field(
                "event_type",
                "a personal-information hook is already registered",
            ));
        }

        let hook = Hook {
            id: Uuid::new_v4(),
            client_id: client.id.clone(),
            url,
            event_type,
            created_at: Utc::now(),
        };
        resources.database.create_hook(&hook).await?;
        refresh_notification_handler(&resources, &client.id).await?;
        Ok((StatusCode::CREATED, Json(HookView::from(hook))).into_response())
    }

    async fn handle_update_hook(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((client_id, hook_id)): Path<(String, Uuid)>,
        Json(body): Json<HookBody>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        let current = resources
            .database
            .get_hook(hook_id)
            .await?
            .filter(|h| h.client_id == client.id)
            .ok_or(ApiError::NotFound)?;
        let (url, event_type) = validate_hook_body(&body)?;

        if event_type == HookEvent::UserDidUpdatePersonalInformation
            && current.event_type != event_type
            && resources
                .database
                .get_hook_for_event(&client.id, event_type)
                .await?
                .is_some()
        {
            return Err(ApiError::invalid_field(
                "event_type",
                "a personal-information hook is already registered",
            ));
        }

        let hook = Hook {
            id: current.id,
            client_id: current.client_id,
            url,
            event_type,
            created_at: current.created_at,
        };
        resources.database.update_hook(&hook).await?;
        refresh_notification_handler(&resources, &client.id).await?;
        Ok(Json(HookView::from(hook)).into_response())
    }

    async fn handle_delete_hook(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((client_id, hook_id)): Path<(String, Uuid)>,
    ) -> Result<Response, ApiError> {
        let (_developer, client) = require_owned_client(&resources, &headers, &client_id).await?;
        if resources
            .database
            .get_hook(hook_id)
            .await?
            .filter(|h| h.client_id == client.id)
            .is_none()
        {
            return Err(ApiError::NotFound);
        }

        resources.database.delete_hook(hook_id).await?;
        refresh_notification_handler(&resources, &client.id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

/// Resolve an `app_developer`-scoped session and return the developer.
async fn require_developer(
    resources: &ServerResources,
    headers: &HeaderMap,
) -> Result<User, ApiError> {
    let context = resolve_bearer(resources, headers, None).await?;
    check_scope(&context, &[Scope::AppDeveloper], CallSite::Resource)?;
    let user_id = context
        .user_id
        .ok_or_else(|| ApiError::access_denied("no user attached to this session"))?;
    resources
        .database
        .get_user(user_id)
        .await?
        .ok_or(ApiError::NotFound)
}

/// Developer session plus ownership of the addressed client.
async fn require_owned_client(
    resources: &ServerResources,
    headers: &HeaderMap,
    client_id: &str,
) -> Result<(User, Client), ApiError> {
    let developer = require_developer(resources, headers).await?;
    let client = resources
        .database
        .get_client(client_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !developer.owns_client(client_id) {
        return Err(ApiError::access_denied("client not owned by this developer"));
    }
    Ok((developer, client))
}

struct ValidatedUri {
    uri: String,
    response_type: ResponseType,
    scope: ScopeSet,
    scope_flags: ScopeFlagSet,
    needs_client_secret: bool,
}

fn validate_uri_body(body: &RedirectionUriBody) -> Result<ValidatedUri, ApiError> {
    let mut fields = FieldErrors::new();

    let uri = match body.uri.as_deref() {
        None | Some("") => {
            fields.insert("uri".into(), "missing".into());
            None
        }
        Some(raw) => match normalize_redirect_uri(raw) {
            Ok(normalized) => Some(normalized),
            Err(err) => {
                fields.insert("uri".into(), err.to_string());
                None
            }
        },
    };

    let response_type = match body.response_type.as_deref() {
        None | Some("") => {
            fields.insert("response_type".into(), "missing".into());
            None
        }
        Some(raw) => match raw.parse::<ResponseType>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                fields.insert("response_type".into(), err);
                None
            }
        },
    };

    let scope = match ScopeSet::parse(body.scope.as_deref().unwrap_or("")) {
        Ok(scope) => Some(scope),
        Err(err) => {
            fields.insert("scope".into(), err.to_string());
            None
        }
    };

    let scope_flags = match ScopeFlagSet::parse(body.scope_flags.as_deref().unwrap_or("")) {
        Ok(flags) => {
            if let Some(scope) = &scope {
                if let Err(err) = flags.validate_against(scope) {
                    fields.insert("scope_flags".into(), err.to_string());
                }
            }
            Some(flags)
        }
        Err(err) => {
            fields.insert("scope_flags".into(), err.to_string());
            None
        }
    };

    if let (Some(uri), Some(ResponseType::Token)) = (&uri, response_type) {
        if let Err(err) = require_https_for_token(uri) {
            fields.insert("uri".into(), err.to_string());
        }
    }

    if !fields.is_empty() {
        return Err(ApiError::InvalidRequest(fields));
    }

    match (uri, response_type, scope, scope_flags) {
        (Some(uri), Some(response_type), Some(scope), Some(scope_flags)) => {
            let needs_secret = needs_client_secret(&uri);
            Ok(ValidatedUri {
                uri,
                response_type,
                scope,
                scope_flags,
                needs_client_secret: needs_secret,
            })
        }
        _ => Err(ApiError::Internal(anyhow::anyhow!(
            "redirection URI validation inconsistency"
        ))),
    }
}

fn validate_hook_body(body: &HookBody) -> Result<(String, HookEvent), ApiError> {
    let mut fields = FieldErrors::new();

    let url = match body.url.as_deref() {
        None | Some("") => {
            fields.insert("url".into(), "missing".into());
            None
        }
        Some(url) => {
            if url::Url::parse(url).is_err() {
                fields.insert("url".into(), "does not parse".into());
                None
            } else {
                Some(url.to_owned())
            }
        }
    };

    let event_type = match body.event_type.as_deref() {
        None | Some("") => {
            fields.insert("event_type".into(), "missing".into());
            None
        }
        Some(raw) => match raw.parse::<HookEvent>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                fields.insert("event_type".into(), err);
                None
            }
        },
    };

    match (url, event_type) {
        (Some(url), Some(event_type)) if fields.is_empty() => Ok((url, event_type)),
        _ => Err(ApiError::InvalidRequest(fields)),
    }
}

/// Re-derive the client's notification-handler mirror from its
/// personal-information hook.
async fn refresh_notification_handler(
    resources: &ServerResources,
    client_id: &str,
) -> Result<(), ApiError> {
    let handler = resources
        .database
        .get_hook_for_event(client_id, HookEvent::UserDidUpdatePersonalInformation)
        .await?
        .map(|hook| hook.url);
    resources
        .database
        .set_update_notification_handler(client_id, handler.as_deref())
        .await?;
    Ok(())
}
