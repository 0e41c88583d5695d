// ABOUTME: Unified error taxonomy for the authorization server with HTTP response mapping
// ABOUTME: Maps validation, access-control, and OAuth protocol errors to RFC-style JSON bodies
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Error handling for the Latchkey API.
//!
//! Two families of errors coexist: field-keyed validation errors
//! (`invalid_request` with a `fields` map, so a UI can highlight every
//! problem at once) and RFC 6749 protocol errors (`{"error": "<code>"}`).
//! Storage errors propagate unwrapped through [`ApiError::Internal`] and
//! surface as a generic 500 with nothing leaked to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Field name to human message, collected so every invalid field is
/// reported together rather than one at a time.
pub type FieldErrors = BTreeMap<String, String>;

/// OAuth protocol error codes per RFC 6749 / RFC 6750.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    InvalidToken,
    ExpiredToken,
}

impl OAuthErrorCode {
    /// Wire representation used in the JSON `error` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
        }
    }

    /// HTTP status for this code. `invalid_client` and token errors are
    /// 401 (the former additionally carries a `WWW-Authenticate` header),
    /// everything else is 400.
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken | Self::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate error for cascade cleanup fan-outs.
///
/// Cascades are not transactional; each failed step is collected so the
/// whole picture is reported at once and the (idempotent) cascade can be
/// re-run.
#[derive(Debug, Error)]
pub struct CascadeError {
    /// Step name paired with the failure it produced.
    pub failures: Vec<(String, String)>,
}

impl CascadeError {
    #[must_use]
    pub const fn new(failures: Vec<(String, String)>) -> Self {
        Self { failures }
    }
}

impl fmt::Display for CascadeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cascade step(s) failed:", self.failures.len())?;
        for (step, error) in &self.failures {
            write!(f, " [{step}: {error}]")?;
        }
        Ok(())
    }
}

/// Unified error type returned by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed, missing, or out-of-range input. Carries a field-keyed
    /// message map so multiple problems surface at once.
    #[error("invalid request")]
    InvalidRequest(FieldErrors),

    /// Authenticated but not permitted (ownership or consent failures).
    #[error("access denied")]
    AccessDenied(Option<String>),

    /// Referenced entity absent, or an endpoint deliberately hidden.
    #[error("not found")]
    NotFound,

    /// Token scope insufficient for the resource. Kept distinct from
    /// `AccessDenied`: the authorize flow converts this to `NotFound`
    /// before it surfaces, while resource routes render it as 403.
    #[error("insufficient scope")]
    InvalidScope,

    /// OAuth protocol error mapped to an RFC-style code.
    #[error("oauth error: {0}")]
    OAuth(OAuthErrorCode),

    /// Partial failure of a cascade cleanup fan-out.
    #[error(transparent)]
    Cascade(#[from] CascadeError),

    /// Unexpected internal failure; logged in full, never detailed to
    /// the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Single-field `invalid_request`.
    #[must_use]
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.into(), message.into());
        Self::InvalidRequest(fields)
    }

    /// `AccessDenied` with a human message.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied(Some(message.into()))
    }

    /// OAuth protocol error shorthand.
    #[must_use]
    pub const fn oauth(code: OAuthErrorCode) -> Self {
        Self::OAuth(code)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidRequest(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_request", "fields": fields })),
            )
                .into_response(),
            Self::AccessDenied(message) => {
                let body = message.map_or_else(
                    || json!({ "error": "access_denied" }),
                    |m| json!({ "error": "access_denied", "error_description": m }),
                );
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found" })),
            )
                .into_response(),
            Self::InvalidScope => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "invalid_scope" })),
            )
                .into_response(),
            Self::OAuth(code) => {
                let status = code.http_status();
                let body = Json(json!({ "error": code.as_str() }));
                if code == OAuthErrorCode::InvalidClient {
                    (
                        status,
                        [("WWW-Authenticate", "Basic realm=\"API\"")],
                        body,
                    )
                        .into_response()
                } else {
                    (status, body).into_response()
                }
            }
            Self::Cascade(err) => {
                tracing::error!(failures = %err, "cascade cleanup reported partial failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error" })),
                )
                    .into_response()
            }
            Self::Internal(err) => {
                tracing::error!("internal error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error" })),
                )
                    .into_response()
            }
        }
    }
}
