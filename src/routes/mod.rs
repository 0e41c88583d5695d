// ABOUTME: Route module organization for the Latchkey HTTP API
// ABOUTME: Assembles domain routers and the router-wide cache-suppression and trace layers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! HTTP routes organized by domain. Each module exposes a unit struct
//! with a `routes(Arc<ServerResources>) -> Router` constructor and thin
//! handlers delegating to the flow engines and the store.

pub mod clients;
pub mod health;
pub mod oauth;
pub mod users;

use crate::resources::ServerResources;
use axum::http::{header, HeaderValue};
use axum::Router;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Assemble the full application router.
///
/// Every response carries `Cache-Control: no-store` and
/// `Pragma: no-cache`; tokens and personal data must never land in a
/// shared cache.
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(health::HealthRoutes::routes())
        .merge(oauth::OAuthRoutes::routes(resources.clone()))
        .merge(users::UserRoutes::routes(resources.clone()))
        .merge(clients::ClientRoutes::routes(resources))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(TraceLayer::new_for_http())
}
