// ABOUTME: Route handlers for user accounts, sub-entities, and consent revocation
// ABOUTME: Self view vs scoped client view, change tracking, and deletion cascades
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! User routes.
//!
//! Two audiences read a user: the user themself (an `app`-scoped
//! session sees everything) and an authorized client (sees only the
//! fields its scope covers and the sub-entities in its sharing ledger,
//! plus the change-tracking status, which the read then clears).
//! Mutations of shared data flag the change on every sharing client's
//! status row.

use crate::cascade::{self, SharedEntity};
use crate::errors::{ApiError, FieldErrors};
use crate::middleware::{check_scope, resolve_bearer, AuthContext, CallSite};
use crate::models::{Address, Email, PhoneNumber, User};
use crate::resources::ServerResources;
use crate::scopes::Scope;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const USER_DATA_SCOPES: &[Scope] = &[
    Scope::FirstName,
    Scope::LastName,
    Scope::Emails,
    Scope::Addresses,
    Scope::PhoneNumbers,
    Scope::Timezone,
];

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub username: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddressBody {
    pub recipient: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailBody {
    pub address: String,
    pub is_main_address: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneNumberBody {
    pub number: String,
}

/// Full self view of an account.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub timezone: String,
    pub is_developer: bool,
    pub addresses: Vec<Address>,
    pub emails: Vec<Email>,
    pub phone_numbers: Vec<PhoneNumber>,
}

/// User routes handler.
pub struct UserRoutes;

impl UserRoutes {
    /// Create all user routes.
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/users", post(Self::handle_register))
            .route("/users/:id", get(Self::handle_get))
            .route("/users/:id", put(Self::handle_update))
            .route("/users/:id", delete(Self::handle_delete))
            .route(
                "/users/:id/authorized-clients/:client_id",
                delete(Self::handle_revoke_client),
            )
            .route("/users/:id/addresses", post(Self::handle_create_address))
            .route(
                "/users/:id/addresses/:address_id",
                put(Self::handle_update_address).delete(Self::handle_delete_address),
            )
            .route("/users/:id/emails", post(Self::handle_create_email))
            .route(
                "/users/:id/emails/:email_id",
                put(Self::handle_update_email).delete(Self::handle_delete_email),
            )
            .route(
                "/users/:id/phone-numbers",
                post(Self::handle_create_phone_number),
            )
            .route(
                "/users/:id/phone-numbers/:phone_id",
                put(Self::handle_update_phone_number).delete(Self::handle_delete_phone_number),
            )
            .with_state(resources)
    }

    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(body): Json<RegisterBody>,
    ) -> Result<Response, ApiError> {
        let context = resolve_bearer(&resources, &headers, None).await?;
        check_scope(&context, &[Scope::UnauthenticatedApp], CallSite::Resource)?;

        let mut fields = FieldErrors::new();
        let username = body.username.as_deref().unwrap_or("");
        let password = body.password.as_deref().unwrap_or("");
        if username.is_empty() {
            fields.insert("username".into(), "missing".into());
        }
        if password.is_empty() {
            fields.insert("password".into(), "missing".into());
        }
        if !fields.is_empty() {
            return Err(ApiError::InvalidRequest(fields));
        }
        if resources
            .database
            .get_user_by_username(username)
            .await?
            .is_some()
        {
            return Err(ApiError::invalid_field("username", "already in use"));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: resources
                .credentials
                .hash_password_blocking(password)
                .await?,
            first_name: body.first_name.unwrap_or_default(),
            last_name: body.last_name.unwrap_or_default(),
            timezone: body.timezone.unwrap_or_else(|| "UTC".into()),
            is_developer: false,
            is_test_account: false,
            developer_clients: Vec::new(),
            authorized_clients: Vec::new(),
            addresses: Vec::new(),
            emails: Vec::new(),
            phone_numbers: Vec::new(),
            created_at: Utc::now(),
        };
        resources.database.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "user registered");

        let view = Self::self_view(&resources, &user).await?;
        Ok((StatusCode::CREATED, Json(view)).into_response())
    }

    async fn handle_get(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
    ) -> Result<Response, ApiError> {
        let context = resolve_bearer(&resources, &headers, None).await?;
        require_self(&context, user_id)?;
        let user = resources
            .database
            .get_user(user_id)
            .await?
            .ok_or(ApiError::NotFound)?;

        if context.scope.contains(Scope::App) {
            let view = Self::self_view(&resources, &user).await?;
            return Ok(Json(view).into_response());
        }

        check_scope(&context, USER_DATA_SCOPES, CallSite::Resource)?;
        let view = Self::scoped_view(&resources, &context, &user).await?;
        Ok(Json(view).into_response())
    }

    /// Assemble the full self view with owned sub-entities.
    async fn self_view(resources: &ServerResources, user: &User) -> Result<UserView, ApiError> {
        let mut addresses = Vec::with_capacity(user.addresses.len());
        for id in &user.addresses {
            if let Some(address) = resources.database.get_address(*id).await? {
                addresses.push(address);
            }
        }
        let emails = resources.database.list_emails_for_user(user.id).await?;
        let mut phone_numbers = Vec::with_capacity(user.phone_numbers.len());
        for id in &user.phone_numbers {
            if let Some(phone) = resources.database.get_phone_number(*id).await? {
                phone_numbers.push(phone);
            }
        }
        Ok(UserView {
            id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            timezone: user.timezone.clone(),
            is_developer: user.is_developer,
            addresses,
            emails,
            phone_numbers,
        })
    }

    /// Assemble the client view: scoped fields, shared sub-entities,
    /// and the change-tracking status, which this read clears.
    async fn scoped_view(
        resources: &ServerResources,
        context: &AuthContext,
        user: &User,
    ) -> Result<serde_json::Value, ApiError> {
        let mut view = serde_json::Map::new();
        view.insert("id".into(), json!(user.id));

        if context.scope.contains(Scope::FirstName) {
            view.insert("first_name".into(), json!(user.first_name));
        }
        if context.scope.contains(Scope::LastName) {
            view.insert("last_name".into(), json!(user.last_name));
        }
        if context.scope.contains(Scope::Timezone) {
            view.insert("timezone".into(), json!(user.timezone));
        }

        if context.scope.contains(Scope::Addresses) {
            let authorization = resources
                .database
                .get_authorization(context.authorization_id)
                .await?
                .ok_or(ApiError::NotFound)?;
            let mut shared = serde_json::Map::new();
            for (kind, address_id) in &authorization.shared_addresses {
                if let Some(address) = resources.database.get_address(*address_id).await? {
                    shared.insert(kind.clone(), json!(address));
                }
            }
            view.insert("addresses".into(), serde_json::Value::Object(shared));
        }

        let ledger = resources
            .database
            .get_user_authorization(user.id, &context.client_id)
            .await?;
        if context.scope.contains(Scope::Emails) {
            let mut emails = Vec::new();
            if let Some(ledger) = &ledger {
                for id in &ledger.emails {
                    if let Some(email) = resources.database.get_email(*id).await? {
                        emails.push(email);
                    }
                }
            }
            view.insert("emails".into(), json!(emails));
        }
        if context.scope.contains(Scope::PhoneNumbers) {
            let mut phones = Vec::new();
            if let Some(ledger) = &ledger {
                for id in &ledger.phone_numbers {
                    if let Some(phone) = resources.database.get_phone_number(*id).await? {
                        phones.push(phone);
                    }
                }
            }
            view.insert("phone_numbers".into(), json!(phones));
        }

        // Reading the user consumes the pending change flags.
        if let Some(status) = resources
            .database
            .get_user_status(user.id, &context.client_id)
            .await?
        {
            view.insert("status".into(), json!(status.status.as_str()));
            view.insert("updated_fields".into(), json!(status.updated_fields));
            resources
                .database
                .upsert_user_status(&status.reset())
                .await?;
        }

        Ok(serde_json::Value::Object(view))
    }

    async fn handle_update(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
        Json(body): Json<UpdateUserBody>,
    ) -> Result<Response, ApiError> {
        let context = resolve_bearer(&resources, &headers, None).await?;
        check_scope(&context, &[Scope::App], CallSite::Resource)?;
        require_self(&context, user_id)?;
        let user = resources
            .database
            .get_user(user_id)
            .await?
            .ok_or(ApiError::NotFound)?;

        let first_name = body.first_name.unwrap_or_else(|| user.first_name.clone());
        let last_name = body.last_name.unwrap_or_else(|| user.last_name.clone());
        let timezone = body.timezone.unwrap_or_else(|| user.timezone.clone());

        let mut changed: Vec<(&str, Scope)> = Vec::new();
        if first_name != user.first_name {
            changed.push(("first_name", Scope::FirstName));
        }
        if last_name != user.last_name {
            changed.push(("last_name", Scope::LastName));
        }
        if timezone != user.timezone {
            changed.push(("timezone", Scope::Timezone));
        }

        // Feeding a GET representation back through is a no-op.
        if !changed.is_empty() {
            resources
                .database
                .update_user_profile(user_id, &first_name, &last_name, &timezone)
                .await?;
            mark_profile_updated(&resources, &user, &changed).await?;
        }

        let updated = resources
            .database
            .get_user(user_id)
            .await?
            .ok_or(ApiError::NotFound)?;
        let view = Self::self_view(&resources, &updated).await?;
        Ok(Json(view).into_response())
    }

    async fn handle_delete(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
    ) -> Result<Response, ApiError> {
        let context = resolve_bearer(&resources, &headers, None).await?;
        check_scope(&context, &[Scope::App], CallSite::Resource)?;
        require_self(&context, user_id)?;

        cascade::remove_user(&resources.database, user_id).await?;
        tracing::info!(user_id = %user_id, "user deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_revoke_client(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, client_id)): Path<(Uuid, String)>,
    ) -> Result<Response, ApiError> {
        let context = resolve_bearer(&resources, &headers, None).await?;
        check_scope(&context, &[Scope::App], CallSite::Resource)?;
        require_self(&context, user_id)?;

        cascade::revoke_authorization(&resources.database, user_id, &client_id).await?;
        tracing::info!(user_id = %user_id, client_id = %client_id, "authorization revoked");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_create_address(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
        Json(body): Json<AddressBody>,
    ) -> Result<Response, ApiError> {
        let _user = require_self_session(&resources, &headers, user_id).await?;

        let address = Address {
            id: Uuid::new_v4(),
            user_id,
            recipient: body.recipient,
            street: body.street,
            city: body.city,
            postal_code: body.postal_code,
            country: body.country,
            created_at: Utc::now(),
        };
        resources.database.create_address(&address).await?;
        Ok((StatusCode::CREATED, Json(address)).into_response())
    }

    async fn handle_update_address(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, address_id)): Path<(Uuid, Uuid)>,
        Json(body): Json<AddressBody>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_address(address_id) {
            return Err(ApiError::access_denied("address not owned by this user"));
        }
        let current = resources
            .database
            .get_address(address_id)
            .await?
            .ok_or(ApiError::NotFound)?;

        let address = Address {
            id: address_id,
            user_id,
            recipient: body.recipient,
            street: body.street,
            city: body.city,
            postal_code: body.postal_code,
            country: body.country,
            created_at: current.created_at,
        };
        resources.database.update_address(&address).await?;
        mark_entity_updated(&resources, user_id, SharedEntity::Address, address_id).await?;
        Ok(Json(address).into_response())
    }

    async fn handle_delete_address(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, address_id)): Path<(Uuid, Uuid)>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_address(address_id) {
            return Err(ApiError::access_denied("address not owned by this user"));
        }

        cascade::remove_address(&resources.database, address_id, user_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_create_email(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
        Json(body): Json<EmailBody>,
    ) -> Result<Response, ApiError> {
        let _user = require_self_session(&resources, &headers, user_id).await?;
        let existing = resources.database.list_emails_for_user(user_id).await?;

        // The first email is always main; a later main demotes the old.
        let is_main = existing.is_empty() || body.is_main_address.unwrap_or(false);
        if is_main {
            demote_main_email(&resources, &existing).await?;
        }

        let email = Email {
            id: Uuid::new_v4(),
            user_id,
            address: body.address,
            is_main_address: is_main,
            created_at: Utc::now(),
        };
        resources.database.create_email(&email).await?;
        Ok((StatusCode::CREATED, Json(email)).into_response())
    }

    async fn handle_update_email(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, email_id)): Path<(Uuid, Uuid)>,
        Json(body): Json<EmailBody>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_email(email_id) {
            return Err(ApiError::access_denied("email not owned by this user"));
        }
        let current = resources
            .database
            .get_email(email_id)
            .await?
            .ok_or(ApiError::NotFound)?;

        let is_main = body.is_main_address.unwrap_or(current.is_main_address);
        if current.is_main_address && !is_main {
            return Err(ApiError::invalid_field(
                "is_main_address",
                "promote another email to main instead",
            ));
        }
        if is_main && !current.is_main_address {
            let existing = resources.database.list_emails_for_user(user_id).await?;
            demote_main_email(&resources, &existing).await?;
        }

        let email = Email {
            id: email_id,
            user_id,
            address: body.address,
            is_main_address: is_main,
            created_at: current.created_at,
        };
        resources.database.update_email(&email).await?;
        mark_entity_updated(&resources, user_id, SharedEntity::Email, email_id).await?;
        Ok(Json(email).into_response())
    }

    async fn handle_delete_email(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, email_id)): Path<(Uuid, Uuid)>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_email(email_id) {
            return Err(ApiError::access_denied("email not owned by this user"));
        }

        cascade::remove_email(&resources.database, email_id, user_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    async fn handle_create_phone_number(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(user_id): Path<Uuid>,
        Json(body): Json<PhoneNumberBody>,
    ) -> Result<Response, ApiError> {
        let _user = require_self_session(&resources, &headers, user_id).await?;

        let phone = PhoneNumber {
            id: Uuid::new_v4(),
            user_id,
            number: body.number,
            created_at: Utc::now(),
        };
        resources.database.create_phone_number(&phone).await?;
        Ok((StatusCode::CREATED, Json(phone)).into_response())
    }

    async fn handle_update_phone_number(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, phone_id)): Path<(Uuid, Uuid)>,
        Json(body): Json<PhoneNumberBody>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_phone_number(phone_id) {
            return Err(ApiError::access_denied("phone number not owned by this user"));
        }
        let current = resources
            .database
            .get_phone_number(phone_id)
            .await?
            .ok_or(ApiError::NotFound)?;

        let phone = PhoneNumber {
            id: phone_id,
            user_id,
            number: body.number,
            created_at: current.created_at,
        };
        resources.database.update_phone_number(&phone).await?;
        mark_entity_updated(&resources, user_id, SharedEntity::PhoneNumber, phone_id).await?;
        Ok(Json(phone).into_response())
    }

    async fn handle_delete_phone_number(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((user_id, phone_id)): Path<(Uuid, Uuid)>,
    ) -> Result<Response, ApiError> {
        let user = require_self_session(&resources, &headers, user_id).await?;
        if !user.owns_phone_number(phone_id) {
            return Err(ApiError::access_denied("phone number not owned by this user"));
        }

        cascade::remove_phone_number(&resources.database, phone_id, user_id).await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

fn require_self(context: &AuthContext, user_id: Uuid) -> Result<(), ApiError> {
    if context.user_id == Some(user_id) {
        Ok(())
    } else {
        Err(ApiError::NotFound)
    }
}

/// Resolve an `app`-scoped session for the user named in the path and
/// return the account.
async fn require_self_session(
    resources: &ServerResources,
    headers: &HeaderMap,
    user_id: Uuid,
) -> Result<User, ApiError> {
    let context = resolve_bearer(resources, headers, None).await?;
    check_scope(&context, &[Scope::App], CallSite::Resource)?;
    require_self(&context, user_id)?;
    resources
        .database
        .get_user(user_id)
        .await?
        .ok_or(ApiError::NotFound)
}

async fn demote_main_email(resources: &ServerResources, emails: &[Email]) -> Result<(), ApiError> {
    for email in emails {
        if email.is_main_address {
            let mut demoted = email.clone();
            demoted.is_main_address = false;
            resources.database.update_email(&demoted).await?;
        }
    }
    Ok(())
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, value: T) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Flag an edited sub-entity on the status row of every client whose
/// ledger shares it.
async fn mark_entity_updated(
    resources: &ServerResources,
    user_id: Uuid,
    entity: SharedEntity,
    entity_id: Uuid,
) -> Result<(), ApiError> {
    for ledger in resources
        .database
        .list_user_authorizations_for_user(user_id)
        .await?
    {
        let shares = match entity {
            SharedEntity::Address => ledger.addresses.contains(&entity_id),
            SharedEntity::Email => ledger.emails.contains(&entity_id),
            SharedEntity::PhoneNumber => ledger.phone_numbers.contains(&entity_id),
        };
        if !shares {
            continue;
        }
        let Some(mut status) = resources
            .database
            .get_user_status(user_id, &ledger.client_id)
            .await?
        else {
            continue;
        };
        push_unique(&mut status.updated_fields, entity.field_name().to_owned());
        let list = match entity {
            SharedEntity::Address => &mut status.updated_addresses,
            SharedEntity::Email => &mut status.updated_emails,
            SharedEntity::PhoneNumber => &mut status.updated_phone_numbers,
        };
        push_unique(list, entity_id);
        resources.database.upsert_user_status(&status).await?;
    }
    Ok(())
}

/// Flag edited profile fields on the status rows of clients whose scope
/// covers them.
async fn mark_profile_updated(
    resources: &ServerResources,
    user: &User,
    changed: &[(&str, Scope)],
) -> Result<(), ApiError> {
    for client_id in &user.authorized_clients {
        let Some(authorization) = resources
            .database
            .get_authorization_for_user_client(user.id, client_id)
            .await?
        else {
            continue;
        };
        let relevant: Vec<&str> = changed
            .iter()
            .filter(|(_, scope)| authorization.scope.contains(*scope))
            .map(|(field, _)| *field)
            .collect();
        if relevant.is_empty() {
            continue;
        }
        let Some(mut status) = resources
            .database
            .get_user_status(user.id, client_id)
            .await?
        else {
            continue;
        };
        for field in relevant {
            push_unique(&mut status.updated_fields, field.to_owned());
        }
        resources.database.upsert_user_status(&status).await?;
    }
    Ok(())
}
