// ABOUTME: Bearer token resolution and scope enforcement for protected endpoints
// ABOUTME: Distinguishes malformed, unknown, expired, and orphaned tokens per RFC 6750
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

use crate::errors::{ApiError, OAuthErrorCode};
use crate::resources::ServerResources;
use crate::scopes::{Scope, ScopeFlagSet, ScopeSet};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::Utc;
use uuid::Uuid;

/// Where a scope check is evaluated. The authorize flow hides scope
/// failures as 404 so probing a user's consent page reveals nothing;
/// resource routes report 403 `invalid_scope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Authorize,
    Resource,
}

/// The caller identity established from a validated bearer token.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Absent for client_credentials sessions.
    pub user_id: Option<Uuid>,
    pub client_id: String,
    pub scope: ScopeSet,
    pub scope_flags: ScopeFlagSet,
    pub authorization_id: Uuid,
}

/// Resolve the bearer token from the `Authorization` header or the
/// `access_token` query parameter into an [`AuthContext`].
///
/// A present but malformed header (wrong scheme, extra whitespace, empty
/// token) is `invalid_request`; an unknown token or one whose
/// authorization has been revoked is `invalid_token`; a known token past
/// its expiry is `expired_token`.
///
/// # Errors
///
/// Returns an OAuth protocol error as above, or `Internal` on storage
/// failure.
pub async fn resolve_bearer(
    resources: &ServerResources,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<AuthContext, ApiError> {
    let token = match headers.get(AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| ApiError::oauth(OAuthErrorCode::InvalidRequest))?;
            parse_bearer_header(value)?
        }
        None => query_token
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::oauth(OAuthErrorCode::InvalidToken))?
            .to_owned(),
    };

    let token_hash = resources.credentials.hash_token(&token);
    let stored = resources
        .database
        .get_access_token_by_hash(&token_hash)
        .await?
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidToken))?;

    if stored.expires_at <= Utc::now() {
        return Err(ApiError::oauth(OAuthErrorCode::ExpiredToken));
    }

    // A token whose authorization is gone (revoked, cascaded away) is
    // indistinguishable from an unknown token to the caller.
    let authorization = resources
        .database
        .get_authorization(stored.authorization_id)
        .await?
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidToken))?;

    Ok(AuthContext {
        user_id: authorization.user_id,
        client_id: authorization.client_id,
        scope: authorization.scope,
        scope_flags: authorization.scope_flags,
        authorization_id: authorization.id,
    })
}

fn parse_bearer_header(value: &str) -> Result<String, ApiError> {
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(ApiError::oauth(OAuthErrorCode::InvalidRequest))?;
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(ApiError::oauth(OAuthErrorCode::InvalidRequest));
    }
    Ok(token.to_owned())
}

/// Require at least one of `any_of` in the caller's granted scope.
///
/// # Errors
///
/// `NotFound` at the authorize call site, `InvalidScope` at resource
/// call sites.
pub fn check_scope(
    context: &AuthContext,
    any_of: &[Scope],
    call_site: CallSite,
) -> Result<(), ApiError> {
    if context.scope.contains_any(any_of) {
        return Ok(());
    }
    match call_site {
        CallSite::Authorize => Err(ApiError::NotFound),
        CallSite::Resource => Err(ApiError::InvalidScope),
    }
}
