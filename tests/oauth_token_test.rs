// ABOUTME: Integration tests for the token endpoint grant flows
// ABOUTME: Covers the staged validation ordering, code redemption, and refresh rotation
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::*;
use latchkey::models::AuthorizationCode;

#[tokio::test]
async fn malformed_basic_header_fails_closed_as_invalid_client() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, true).await.unwrap();

    // Valid body credentials cannot rescue a malformed header.
    let mut request = token_request(
        None,
        &[
            ("grant_type", "client_credentials"),
            ("client_id", &client.id),
            ("client_secret", &secret),
        ],
    );
    request
        .headers_mut()
        .insert("authorization", "Basic not!base64!".parse().unwrap());

    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn conflicting_header_and_body_client_ids_are_invalid_request() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, true).await.unwrap();

    let request = token_request(
        Some((&client.id, &secret)),
        &[
            ("grant_type", "client_credentials"),
            ("client_id", "ck_somebodyelse"),
        ],
    );
    let body = expect_json(
        send(app(resources), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn validation_ordering_holds_across_stages() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (first_party, fp_secret) = seed_client(&resources, developer.id, true).await.unwrap();
    let (third_party, tp_secret) = seed_client(&resources, developer.id, false).await.unwrap();

    // Wrong secret beats any grant-type problem: client auth is stage 2.
    let request = token_request(
        Some((&first_party.id, "cs_wrong")),
        &[("grant_type", "nonsense")],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(body["error"], "invalid_client");

    // Unknown grant type surfaces after authentication.
    let request = token_request(
        Some((&first_party.id, &fp_secret)),
        &[("grant_type", "nonsense")],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "unsupported_grant_type");

    // Restricted grants are screened before parameter presence: no
    // username/password in the form, but the client is third-party.
    let request = token_request(
        Some((&third_party.id, &tp_secret)),
        &[("grant_type", "password")],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "unauthorized_client");

    // Same request against the first-party client reaches the
    // parameter-presence stage.
    let request = token_request(
        Some((&first_party.id, &fp_secret)),
        &[("grant_type", "password")],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_request");

    // Missing grant_type entirely.
    let request = token_request(Some((&first_party.id, &fp_secret)), &[]);
    let body = expect_json(
        send(app(resources), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn authorization_code_redeems_once() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _secret) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "emails")
        .await
        .unwrap();

    let code = AuthorizationCode {
        value: "single-use-code".into(),
        is_used: false,
        expires_at: Utc::now() + Duration::seconds(600),
    };
    resources
        .database
        .set_authorization_code(authorization.id, &code)
        .await
        .unwrap();

    let request = token_request(
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.id),
            ("code", "single-use-code"),
        ],
    );
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    assert!(body["access_token"].is_string());
    assert!(body["refresh_token"].is_string());
    assert!(body["expires_in"].is_i64());
    assert!(body.get("token_type").is_none());

    // Replay of the same code.
    let request = token_request(
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.id),
            ("code", "single-use-code"),
        ],
    );
    let body = expect_json(
        send(app(resources), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn expired_code_is_invalid_grant_and_cleared() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _secret) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "emails")
        .await
        .unwrap();

    let code = AuthorizationCode {
        value: "stale-code".into(),
        is_used: false,
        expires_at: Utc::now() - Duration::seconds(1),
    };
    resources
        .database
        .set_authorization_code(authorization.id, &code)
        .await
        .unwrap();

    let request = token_request(
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.id),
            ("code", "stale-code"),
        ],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_grant");

    let reloaded = resources
        .database
        .get_authorization(authorization.id)
        .await
        .unwrap()
        .unwrap();
    assert!(reloaded.code.is_none(), "stale code should be cleared");
}

#[tokio::test]
async fn confidential_authorization_requires_verified_secret() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let now = Utc::now();
    let authorization = latchkey::models::Authorization {
        id: uuid::Uuid::new_v4(),
        user_id: Some(user.id),
        client_id: client.id.clone(),
        auth_type: latchkey::models::AuthorizationType::AuthorizationCode,
        scope: latchkey::scopes::ScopeSet::parse("emails").unwrap(),
        scope_flags: latchkey::scopes::ScopeFlagSet::new(),
        needs_client_secret: true,
        code: None,
        shared_addresses: std::collections::BTreeMap::new(),
        shared_emails: Vec::new(),
        shared_phone_numbers: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    resources
        .database
        .create_authorization(&authorization)
        .await
        .unwrap();

    let code = AuthorizationCode {
        value: "confidential-code".into(),
        is_used: false,
        expires_at: Utc::now() + Duration::seconds(600),
    };
    resources
        .database
        .set_authorization_code(authorization.id, &code)
        .await
        .unwrap();

    let request = token_request(
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.id),
            ("code", "confidential-code"),
        ],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::UNAUTHORIZED,
    )
    .await;
    assert_eq!(body["error"], "invalid_client");

    // The failed attempt consumed the code; issue a fresh one and redeem
    // with the secret this time.
    let code = AuthorizationCode {
        value: "confidential-code-2".into(),
        is_used: false,
        expires_at: Utc::now() + Duration::seconds(600),
    };
    resources
        .database
        .set_authorization_code(authorization.id, &code)
        .await
        .unwrap();
    let request = token_request(
        Some((&client.id, &secret)),
        &[
            ("grant_type", "authorization_code"),
            ("code", "confidential-code-2"),
        ],
    );
    let body = expect_json(send(app(resources), request).await, StatusCode::OK).await;
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn password_grant_with_empty_credentials_is_invalid_client() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, true).await.unwrap();

    let request = token_request(
        Some((&client.id, &secret)),
        &[
            ("grant_type", "password"),
            ("username", ""),
            ("password", ""),
        ],
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn password_grant_issues_app_scoped_session() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, true).await.unwrap();
    let user = seed_user(&resources, "alice", "hunter2", false).await.unwrap();

    let request = token_request(
        Some((&client.id, &secret)),
        &[
            ("grant_type", "password"),
            ("username", "alice"),
            ("password", "hunter2"),
        ],
    );
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    let access_token = body["access_token"].as_str().unwrap().to_owned();
    assert!(body["refresh_token"].is_string());

    // The session reads the user's own account.
    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&access_token),
        &serde_json::json!({}),
    );
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    assert_eq!(body["username"], "alice");

    let authorization = resources
        .database
        .get_authorization_for_user_client(user.id, &client.id)
        .await
        .unwrap()
        .unwrap();
    assert!(authorization.scope.to_string().contains("app"));
}

#[tokio::test]
async fn client_credentials_grant_omits_refresh_token() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, secret) = seed_client(&resources, developer.id, true).await.unwrap();

    let request = token_request(Some((&client.id, &secret)), &[("grant_type", "client_credentials")]);
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    assert!(body["access_token"].is_string());
    assert!(body.get("refresh_token").is_none());

    // The second exchange reuses the same user-less authorization.
    let request = token_request(Some((&client.id, &secret)), &[("grant_type", "client_credentials")]);
    expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    let authorization = resources
        .database
        .get_client_credentials_authorization(&client.id)
        .await
        .unwrap()
        .unwrap();
    assert!(authorization.user_id.is_none());
}

#[tokio::test]
async fn refresh_rotation_invalidates_the_old_pair() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _secret) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "app")
        .await
        .unwrap();
    let (old_access, old_refresh) = seed_token(&resources, authorization.id, true).await.unwrap();
    let old_refresh = old_refresh.unwrap();

    let request = token_request(
        None,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &client.id),
            ("refresh_token", &old_refresh),
        ],
    );
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    let new_access = body["access_token"].as_str().unwrap().to_owned();
    assert_ne!(new_access, old_access);
    assert!(body["refresh_token"].is_string());

    // The old access token no longer resolves.
    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&old_access),
        &serde_json::json!({}),
    );
    let response = send(app(resources.clone()), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");

    // Re-refreshing with the old refresh token fails too.
    let request = token_request(
        None,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &client.id),
            ("refresh_token", &old_refresh),
        ],
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_grant");

    // The new pair works.
    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&new_access),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn refresh_after_revocation_is_invalid_grant() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _secret) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let authorization = seed_authorization(&resources, Some(user.id), &client.id, "app")
        .await
        .unwrap();
    let (_access, refresh) = seed_token(&resources, authorization.id, true).await.unwrap();

    resources
        .database
        .delete_authorization(authorization.id)
        .await
        .unwrap();

    let request = token_request(
        None,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &client.id),
            ("refresh_token", &refresh.unwrap()),
        ],
    );
    let body = expect_json(
        send(app(resources), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["error"], "invalid_grant");
}
