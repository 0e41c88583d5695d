// ABOUTME: Integration tests for bearer resolution and scope enforcement
// ABOUTME: Distinguishes malformed, unknown, expired, and orphaned tokens over HTTP
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::*;
use latchkey::models::ResponseType;

#[tokio::test]
async fn malformed_bearer_spacing_is_invalid_request() {
    let resources = create_test_resources().await.unwrap();
    let user_id = uuid::Uuid::new_v4();

    for header in ["Bearer", "Bearer ", "Bearer  two  spaces", "bearer lower"] {
        let mut request = json_request(
            "GET",
            &format!("/users/{user_id}"),
            None,
            &serde_json::json!({}),
        );
        request
            .headers_mut()
            .insert("authorization", header.parse().unwrap());
        let response = send(app(resources.clone()), request).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "header {header:?}"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_request");
    }
}

#[tokio::test]
async fn unknown_token_is_invalid_token() {
    let resources = create_test_resources().await.unwrap();
    let user_id = uuid::Uuid::new_v4();

    let request = json_request(
        "GET",
        &format!("/users/{user_id}"),
        Some("no-such-token"),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn expired_token_is_reported_distinctly() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "app")
        .await
        .unwrap();
    let (token, _) = seed_token_with_expiry(
        &resources,
        authorization.id,
        false,
        Utc::now() - Duration::seconds(1),
    )
    .await
    .unwrap();

    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "expired_token");
}

#[tokio::test]
async fn token_without_authorization_row_is_invalid_token() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "app")
        .await
        .unwrap();
    let (token, _) = seed_token(&resources, authorization.id, false).await.unwrap();

    // Revocation removes the authorization; the token must stop
    // resolving whether or not its row survived.
    resources
        .database
        .delete_authorization(authorization.id)
        .await
        .unwrap();

    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn query_parameter_token_works_on_authorize() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (app_client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    seed_redirection_uri(
        &resources,
        &client.id,
        "http://localhost/cb",
        ResponseType::Code,
        "emails",
        "",
        false,
    )
    .await
    .unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let session = seed_authorization(&resources, Some(user.id), &app_client.id, "app")
        .await
        .unwrap();
    let (token, _) = seed_token(&resources, session.id, false).await.unwrap();

    let query = serde_urlencoded::to_string([
        ("client_id", client.id.as_str()),
        ("redirect_uri", "http://localhost/cb"),
        ("state", "xyz"),
        ("flow", "login"),
        ("access_token", token.as_str()),
    ])
    .unwrap();
    let request = json_request(
        "GET",
        &format!("/oauth/authorize?{query}"),
        None,
        &serde_json::json!({}),
    );
    let body = expect_json(send(app(resources), request).await, StatusCode::OK).await;
    assert_eq!(body["step"], "consent");
}

#[tokio::test]
async fn scope_failure_is_hidden_on_authorize_and_explicit_on_resources() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    seed_redirection_uri(
        &resources,
        &client.id,
        "http://localhost/cb",
        ResponseType::Code,
        "emails",
        "",
        false,
    )
    .await
    .unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    // An emails-scoped session, not an app session.
    let narrow = seed_authorization(&resources, Some(user.id), &client.id, "emails")
        .await
        .unwrap();
    let (token, _) = seed_token(&resources, narrow.id, false).await.unwrap();

    // The authorize flow hides the scope failure as 404.
    let query = serde_urlencoded::to_string([
        ("client_id", client.id.as_str()),
        ("redirect_uri", "http://localhost/cb"),
        ("state", "xyz"),
        ("flow", "login"),
    ])
    .unwrap();
    let request = json_request(
        "GET",
        &format!("/oauth/authorize?{query}"),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources.clone()), request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A resource route says invalid_scope out loud.
    let request = json_request(
        "PUT",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({ "first_name": "New" }),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_scope");
}
