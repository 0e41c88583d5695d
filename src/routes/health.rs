// ABOUTME: Health check route for service monitoring
// ABOUTME: Unauthenticated liveness endpoint for load balancers
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

/// Health routes implementation.
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route.
    pub fn routes() -> axum::Router {
        use axum::{routing::get, Json, Router};

        async fn health_handler() -> Json<serde_json::Value> {
            Json(serde_json::json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339()
            }))
        }

        Router::new().route("/health", get(health_handler))
    }
}
