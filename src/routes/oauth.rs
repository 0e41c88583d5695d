// ABOUTME: Route handlers for the OAuth2 authorize and token endpoints
// ABOUTME: Thin wrappers delegating to the authorize flow engine and the token exchange engine
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use crate::errors::ApiError;
use crate::oauth::authorize::{self, AuthorizeQuery, AuthorizeSubmission};
use crate::oauth::token::{self, TokenRequest};
use crate::resources::ServerResources;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use std::sync::Arc;

/// OAuth endpoint handlers.
pub struct OAuthRoutes;

impl OAuthRoutes {
    /// Create the OAuth routes.
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/oauth/authorize",
                get(Self::handle_begin).post(Self::handle_submit),
            )
            .route("/oauth/token", post(Self::handle_token))
            .with_state(resources)
    }

    async fn handle_begin(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<AuthorizeQuery>,
    ) -> Result<Response, ApiError> {
        let response = authorize::begin(&resources, &headers, &query).await?;
        Ok((StatusCode::OK, Json(response)).into_response())
    }

    async fn handle_submit(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<AuthorizeQuery>,
        Json(body): Json<AuthorizeSubmission>,
    ) -> Result<Response, ApiError> {
        let grant = authorize::submit(&resources, &headers, &query, &body).await?;
        Ok((StatusCode::OK, Json(grant)).into_response())
    }

    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Form(form): Form<TokenRequest>,
    ) -> Result<Response, ApiError> {
        let tokens = token::exchange(&resources, &headers, form).await?;
        Ok((StatusCode::OK, Json(tokens)).into_response())
    }
}
