// ABOUTME: Integration tests for user routes - registration, views, profile, sub-entities
// ABOUTME: Covers self vs scoped views, change tracking, round-trips, and the main-email rule
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

mod common;

use axum::http::StatusCode;
use common::*;
use latchkey::models::{Email, UserAuthorization, UserStatus, UserStatusKind};
use uuid::Uuid;

/// App-scoped session token for a user.
async fn app_session(
    resources: &std::sync::Arc<latchkey::resources::ServerResources>,
    user_id: Uuid,
    client_id: &str,
) -> String {
    let session = seed_authorization(resources, Some(user_id), client_id, "app")
        .await
        .unwrap();
    let (token, _) = seed_token(resources, session.id, false).await.unwrap();
    token
}

#[tokio::test]
async fn registration_requires_unauthenticated_app_scope() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, true).await.unwrap();

    let body = serde_json::json!({ "username": "newbie", "password": "pw" });

    // No token at all.
    let request = json_request("POST", "/users", None, &body);
    let response = send(app(resources.clone()), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A client-credentials session carries the right scope.
    let service = seed_authorization(&resources, None, &client.id, "unauthenticated_app")
        .await
        .unwrap();
    let (token, _) = seed_token(&resources, service.id, false).await.unwrap();

    let request = json_request("POST", "/users", Some(&token), &body);
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(body["username"], "newbie");
    assert!(body["id"].is_string());

    // Duplicate usernames are rejected with a field error.
    let request = json_request(
        "POST",
        "/users",
        Some(&token),
        &serde_json::json!({ "username": "newbie", "password": "pw2" }),
    );
    let body = expect_json(
        send(app(resources), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["fields"]["username"], "already in use");
}

#[tokio::test]
async fn another_users_account_reads_as_not_found() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let alice = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let bob = seed_user(&resources, "bob", "pw", false).await.unwrap();
    let token = app_session(&resources, alice.id, &client.id).await;

    let request = json_request(
        "GET",
        &format!("/users/{}", bob.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scoped_view_shows_only_granted_fields_and_clears_status() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let email = Email {
        id: Uuid::new_v4(),
        user_id: user.id,
        address: "a@example.com".into(),
        is_main_address: true,
        created_at: chrono::Utc::now(),
    };
    resources.database.create_email(&email).await.unwrap();

    let grant = seed_authorization(&resources, Some(user.id), &client.id, "first_name emails")
        .await
        .unwrap();
    let ledger = UserAuthorization {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: client.id.clone(),
        addresses: Vec::new(),
        emails: vec![email.id],
        phone_numbers: Vec::new(),
    };
    resources
        .database
        .upsert_user_authorization(&ledger)
        .await
        .unwrap();
    let status = UserStatus {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: client.id.clone(),
        status: UserStatusKind::New,
        updated_fields: Vec::new(),
        updated_addresses: Vec::new(),
        updated_emails: Vec::new(),
        updated_phone_numbers: Vec::new(),
    };
    resources.database.upsert_user_status(&status).await.unwrap();

    let (token, _) = seed_token(&resources, grant.id, false).await.unwrap();

    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let body = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    assert_eq!(body["first_name"], "Test");
    assert!(body.get("last_name").is_none(), "ungranted field leaked");
    assert!(body.get("username").is_none(), "username never leaves the self view");
    assert_eq!(body["emails"][0]["address"], "a@example.com");
    assert_eq!(body["status"], "new");

    // The read consumed the status; a second read sees a quiet record.
    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let body = expect_json(send(app(resources), request).await, StatusCode::OK).await;
    assert_eq!(body["status"], "existing_user");
    assert_eq!(body["updated_fields"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn profile_round_trip_is_a_no_op_and_changes_are_flagged() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (app_client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let token = app_session(&resources, user.id, &app_client.id).await;

    // A sharing client watching first_name.
    seed_authorization(&resources, Some(user.id), &client.id, "first_name")
        .await
        .unwrap();
    let status = UserStatus {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: client.id.clone(),
        status: UserStatusKind::ExistingUser,
        updated_fields: Vec::new(),
        updated_addresses: Vec::new(),
        updated_emails: Vec::new(),
        updated_phone_numbers: Vec::new(),
    };
    resources.database.upsert_user_status(&status).await.unwrap();

    // GET then PUT the same representation back.
    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let view = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;

    let request = json_request(
        "PUT",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({
            "first_name": view["first_name"],
            "last_name": view["last_name"],
            "timezone": view["timezone"],
        }),
    );
    let echoed = expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;
    assert_eq!(echoed["first_name"], view["first_name"]);

    let status = resources
        .database
        .get_user_status(user.id, &client.id)
        .await
        .unwrap()
        .unwrap();
    assert!(status.updated_fields.is_empty(), "round-trip flagged a change");

    // A real change is flagged for the watching client.
    let request = json_request(
        "PUT",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({ "first_name": "Renamed" }),
    );
    expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;

    let status = resources
        .database
        .get_user_status(user.id, &client.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.updated_fields, vec!["first_name".to_owned()]);
}

#[tokio::test]
async fn first_email_is_main_and_promotion_demotes_the_old_main() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (app_client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let token = app_session(&resources, user.id, &app_client.id).await;

    let request = json_request(
        "POST",
        &format!("/users/{}/emails", user.id),
        Some(&token),
        &serde_json::json!({ "address": "first@example.com" }),
    );
    let first = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(first["is_main_address"], true);

    let request = json_request(
        "POST",
        &format!("/users/{}/emails", user.id),
        Some(&token),
        &serde_json::json!({ "address": "second@example.com", "is_main_address": true }),
    );
    let second = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(second["is_main_address"], true);

    let first_id = Uuid::parse_str(first["id"].as_str().unwrap()).unwrap();
    let demoted = resources.database.get_email(first_id).await.unwrap().unwrap();
    assert!(!demoted.is_main_address);

    // Demoting the current main directly is rejected.
    let second_id = second["id"].as_str().unwrap();
    let request = json_request(
        "PUT",
        &format!("/users/{}/emails/{second_id}", user.id),
        Some(&token),
        &serde_json::json!({ "address": "second@example.com", "is_main_address": false }),
    );
    let body = expect_json(
        send(app(resources.clone()), request).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(body["fields"]
        .as_object()
        .unwrap()
        .contains_key("is_main_address"));

    // Deleting the main while another remains is refused too.
    let request = json_request(
        "DELETE",
        &format!("/users/{}/emails/{second_id}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn shared_entity_edits_flag_the_sharing_client() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (app_client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let (client, _) = seed_client(&resources, developer.id, false).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let token = app_session(&resources, user.id, &app_client.id).await;

    let email = Email {
        id: Uuid::new_v4(),
        user_id: user.id,
        address: "a@example.com".into(),
        is_main_address: true,
        created_at: chrono::Utc::now(),
    };
    resources.database.create_email(&email).await.unwrap();

    seed_authorization(&resources, Some(user.id), &client.id, "emails")
        .await
        .unwrap();
    let ledger = UserAuthorization {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: client.id.clone(),
        addresses: Vec::new(),
        emails: vec![email.id],
        phone_numbers: Vec::new(),
    };
    resources
        .database
        .upsert_user_authorization(&ledger)
        .await
        .unwrap();
    let status = UserStatus {
        id: Uuid::new_v4(),
        user_id: user.id,
        client_id: client.id.clone(),
        status: UserStatusKind::ExistingUser,
        updated_fields: Vec::new(),
        updated_addresses: Vec::new(),
        updated_emails: Vec::new(),
        updated_phone_numbers: Vec::new(),
    };
    resources.database.upsert_user_status(&status).await.unwrap();

    let request = json_request(
        "PUT",
        &format!("/users/{}/emails/{}", user.id, email.id),
        Some(&token),
        &serde_json::json!({ "address": "renamed@example.com" }),
    );
    expect_json(send(app(resources.clone()), request).await, StatusCode::OK).await;

    let status = resources
        .database
        .get_user_status(user.id, &client.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.updated_fields, vec!["emails".to_owned()]);
    assert_eq!(status.updated_emails, vec![email.id]);
}

#[tokio::test]
async fn deleting_the_account_invalidates_its_sessions() {
    let resources = create_test_resources().await.unwrap();
    let developer = seed_user(&resources, "dev", "pw", true).await.unwrap();
    let (app_client, _) = seed_client(&resources, developer.id, true).await.unwrap();
    let user = seed_user(&resources, "alice", "pw", false).await.unwrap();
    let token = app_session(&resources, user.id, &app_client.id).await;

    let request = json_request(
        "DELETE",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources.clone()), request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = json_request(
        "GET",
        &format!("/users/{}", user.id),
        Some(&token),
        &serde_json::json!({}),
    );
    let response = send(app(resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
