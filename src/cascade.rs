// ABOUTME: Cascade consistency actions for client, authorization, sub-entity, and user deletion
// ABOUTME: Ordered idempotent steps with aggregate failure collection, re-runnable on partial failure
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Latchkey Identity

//! Deletion cascades.
//!
//! Deleting an entity fans out into an ordered list of idempotent
//! cleanup steps, each addressed by the id it touches. Steps are not
//! wrapped in a transaction; failures are collected into one
//! [`CascadeError`] naming every failed step, and because every step is
//! idempotent the whole cascade can simply be re-run. Refusal rules and
//! invariant checks run before the first destructive step.

use crate::database::Database;
use crate::errors::{ApiError, CascadeError};
use crate::models::{UserStatus, UserStatusKind};
use uuid::Uuid;

/// Which kind of shared sub-entity a cascade is pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedEntity {
    Address,
    Email,
    PhoneNumber,
}

impl SharedEntity {
    /// The `updated_fields` name for this entity kind.
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::Address => "addresses",
            Self::Email => "emails",
            Self::PhoneNumber => "phone_numbers",
        }
    }
}

/// Collects step failures instead of aborting on the first one.
struct StepLog {
    failures: Vec<(String, String)>,
}

impl StepLog {
    const fn new() -> Self {
        Self {
            failures: Vec::new(),
        }
    }

    fn record(&mut self, step: String, result: anyhow::Result<()>) {
        if let Err(err) = result {
            self.failures.push((step, format!("{err:#}")));
        }
    }

    fn finish(self) -> Result<(), ApiError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(CascadeError::new(self.failures).into())
        }
    }
}

/// Delete a client and everything hanging off it.
///
/// # Errors
///
/// Returns a [`CascadeError`] listing every failed step.
pub async fn remove_client(
    db: &Database,
    client_id: &str,
    developer_id: Uuid,
) -> Result<(), ApiError> {
    let mut log = StepLog::new();

    log.record(
        format!("delete_redirection_uris:{client_id}"),
        db.delete_redirection_uris_for_client(client_id).await,
    );
    log.record(
        format!("delete_hooks:{client_id}"),
        db.delete_hooks_for_client(client_id).await,
    );

    match db.list_authorizations_for_client(client_id).await {
        Ok(authorizations) => {
            for auth in authorizations {
                log.record(
                    format!("delete_access_tokens:{}", auth.id),
                    db.delete_access_tokens_for_authorization(auth.id).await,
                );
                log.record(
                    format!("delete_authorization:{}", auth.id),
                    db.delete_authorization(auth.id).await,
                );
                if let Some(user_id) = auth.user_id {
                    log.record(
                        format!("prune_authorized_client:{user_id}"),
                        db.remove_authorized_client(user_id, client_id).await,
                    );
                }
            }
        }
        Err(err) => log.record(format!("list_authorizations:{client_id}"), Err(err)),
    }

    match db.list_user_authorizations_for_client(client_id).await {
        Ok(ledgers) => {
            for ledger in ledgers {
                log.record(
                    format!("delete_user_authorization:{}", ledger.id),
                    db.delete_user_authorization(ledger.user_id, client_id).await,
                );
                log.record(
                    format!("delete_user_status:{}:{client_id}", ledger.user_id),
                    db.delete_user_status(ledger.user_id, client_id).await,
                );
            }
        }
        Err(err) => log.record(format!("list_user_authorizations:{client_id}"), Err(err)),
    }

    log.record(
        format!("prune_developer_client:{developer_id}"),
        db.remove_developer_client(developer_id, client_id).await,
    );
    log.record(
        format!("delete_client:{client_id}"),
        db.delete_client(client_id).await,
    );

    log.finish()
}

/// Revoke one user's consent to one client: the authorization, its
/// tokens, and the sharing ledgers all go.
///
/// # Errors
///
/// Returns a [`CascadeError`] listing every failed step.
pub async fn revoke_authorization(
    db: &Database,
    user_id: Uuid,
    client_id: &str,
) -> Result<(), ApiError> {
    let mut log = StepLog::new();

    match db.get_authorization_for_user_client(user_id, client_id).await {
        Ok(Some(auth)) => {
            log.record(
                format!("delete_access_tokens:{}", auth.id),
                db.delete_access_tokens_for_authorization(auth.id).await,
            );
            log.record(
                format!("delete_authorization:{}", auth.id),
                db.delete_authorization(auth.id).await,
            );
        }
        Ok(None) => {}
        Err(err) => log.record(format!("get_authorization:{user_id}:{client_id}"), Err(err)),
    }

    log.record(
        format!("prune_authorized_client:{user_id}"),
        db.remove_authorized_client(user_id, client_id).await,
    );
    log.record(
        format!("delete_user_authorization:{user_id}:{client_id}"),
        db.delete_user_authorization(user_id, client_id).await,
    );
    log.record(
        format!("delete_user_status:{user_id}:{client_id}"),
        db.delete_user_status(user_id, client_id).await,
    );

    log.finish()
}

/// Delete an address, pruning it from every snapshot, ledger, and
/// status record.
///
/// The refusal rule runs first: when some client's ledger shares
/// nothing besides this address and that client still holds a live
/// authorization, the address is load-bearing for the consent and the
/// deletion is refused.
///
/// # Errors
///
/// `AccessDenied` under the refusal rule, otherwise a [`CascadeError`]
/// listing every failed step.
pub async fn remove_address(
    db: &Database,
    address_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    for ledger in db.list_user_authorizations_for_user(user_id).await? {
        if ledger.shares_only_address(address_id)
            && db
                .get_authorization_for_user_client(user_id, &ledger.client_id)
                .await?
                .is_some()
        {
            return Err(ApiError::access_denied(
                "this address is the only data shared with an authorized application; revoke the authorization first",
            ));
        }
    }

    let mut log = StepLog::new();
    log.record(
        format!("delete_address:{address_id}"),
        db.delete_address(address_id, user_id).await,
    );
    prune_snapshots(db, user_id, SharedEntity::Address, address_id, &mut log).await;
    reset_user_status_for_deleted_entity(db, user_id, SharedEntity::Address, address_id, &mut log)
        .await;
    log.finish()
}

/// Delete an email. The main email cannot go while other emails remain,
/// preserving the exactly-one-main invariant.
///
/// # Errors
///
/// `InvalidRequest` on the main-email rule, otherwise a [`CascadeError`]
/// listing every failed step.
pub async fn remove_email(db: &Database, email_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    if let Some(email) = db.get_email(email_id).await? {
        if email.is_main_address {
            let others = db
                .list_emails_for_user(user_id)
                .await?
                .iter()
                .any(|e| e.id != email_id);
            if others {
                return Err(ApiError::invalid_field(
                    "email",
                    "the main email cannot be deleted while other emails exist",
                ));
            }
        }
    }

    let mut log = StepLog::new();
    log.record(
        format!("delete_email:{email_id}"),
        db.delete_email(email_id, user_id).await,
    );
    prune_snapshots(db, user_id, SharedEntity::Email, email_id, &mut log).await;
    reset_user_status_for_deleted_entity(db, user_id, SharedEntity::Email, email_id, &mut log)
        .await;
    log.finish()
}

/// Delete a phone number, pruning it from every snapshot, ledger, and
/// status record.
///
/// # Errors
///
/// Returns a [`CascadeError`] listing every failed step.
pub async fn remove_phone_number(
    db: &Database,
    phone_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    let mut log = StepLog::new();
    log.record(
        format!("delete_phone_number:{phone_id}"),
        db.delete_phone_number(phone_id, user_id).await,
    );
    prune_snapshots(db, user_id, SharedEntity::PhoneNumber, phone_id, &mut log).await;
    reset_user_status_for_deleted_entity(db, user_id, SharedEntity::PhoneNumber, phone_id, &mut log)
        .await;
    log.finish()
}

/// Delete a user account: revoke every consent, delete sub-entities and
/// owned clients, then the user row.
///
/// # Errors
///
/// Returns a [`CascadeError`] listing every failed step.
pub async fn remove_user(db: &Database, user_id: Uuid) -> Result<(), ApiError> {
    let Some(user) = db.get_user(user_id).await? else {
        return Ok(());
    };

    let mut log = StepLog::new();

    for client_id in &user.authorized_clients {
        if let Err(err) = revoke_authorization(db, user_id, client_id).await {
            log.failures
                .push((format!("revoke_authorization:{client_id}"), err.to_string()));
        }
    }

    for address_id in &user.addresses {
        log.record(
            format!("delete_address:{address_id}"),
            db.delete_address(*address_id, user_id).await,
        );
    }
    for email_id in &user.emails {
        log.record(
            format!("delete_email:{email_id}"),
            db.delete_email(*email_id, user_id).await,
        );
    }
    for phone_id in &user.phone_numbers {
        log.record(
            format!("delete_phone_number:{phone_id}"),
            db.delete_phone_number(*phone_id, user_id).await,
        );
    }

    for client_id in &user.developer_clients {
        if let Err(err) = remove_client(db, client_id, user_id).await {
            log.failures
                .push((format!("remove_client:{client_id}"), err.to_string()));
        }
    }

    log.record(
        format!("delete_user_authorizations:{user_id}"),
        db.delete_user_authorizations_for_user(user_id).await,
    );
    log.record(
        format!("delete_user_statuses:{user_id}"),
        db.delete_user_statuses_for_user(user_id).await,
    );
    log.record(format!("delete_user:{user_id}"), db.delete_user(user_id).await);

    log.finish()
}

/// Pull a deleted entity id out of every authorization snapshot and
/// every sharing ledger of the user.
async fn prune_snapshots(
    db: &Database,
    user_id: Uuid,
    entity: SharedEntity,
    entity_id: Uuid,
    log: &mut StepLog,
) {
    match db.list_authorizations_for_user(user_id).await {
        Ok(authorizations) => {
            for mut auth in authorizations {
                let touched = match entity {
                    SharedEntity::Address => {
                        let before = auth.shared_addresses.len();
                        auth.shared_addresses.retain(|_, id| *id != entity_id);
                        auth.shared_addresses.len() != before
                    }
                    SharedEntity::Email => {
                        let before = auth.shared_emails.len();
                        auth.shared_emails.retain(|id| *id != entity_id);
                        auth.shared_emails.len() != before
                    }
                    SharedEntity::PhoneNumber => {
                        let before = auth.shared_phone_numbers.len();
                        auth.shared_phone_numbers.retain(|id| *id != entity_id);
                        auth.shared_phone_numbers.len() != before
                    }
                };
                if touched {
                    log.record(
                        format!("prune_snapshot:{}", auth.id),
                        db.update_authorization_snapshot(&auth).await,
                    );
                }
            }
        }
        Err(err) => log.record(format!("list_authorizations:{user_id}"), Err(err)),
    }

    match db.list_user_authorizations_for_user(user_id).await {
        Ok(ledgers) => {
            for mut ledger in ledgers {
                let list = match entity {
                    SharedEntity::Address => &mut ledger.addresses,
                    SharedEntity::Email => &mut ledger.emails,
                    SharedEntity::PhoneNumber => &mut ledger.phone_numbers,
                };
                if list.contains(&entity_id) {
                    list.retain(|id| *id != entity_id);
                    log.record(
                        format!("prune_ledger:{}", ledger.id),
                        db.upsert_user_authorization(&ledger).await,
                    );
                }
            }
        }
        Err(err) => log.record(format!("list_user_authorizations:{user_id}"), Err(err)),
    }
}

/// Repair every status record of the user after a shared entity is
/// deleted. When the deleted entity was the sole remaining flagged
/// change, the whole record resets to a pristine `existing_user`;
/// otherwise just the one id is pruned, and the entity's field name is
/// dropped once its list empties.
async fn reset_user_status_for_deleted_entity(
    db: &Database,
    user_id: Uuid,
    entity: SharedEntity,
    entity_id: Uuid,
    log: &mut StepLog,
) {
    let statuses = match db.list_user_statuses_for_user(user_id).await {
        Ok(statuses) => statuses,
        Err(err) => {
            log.record(format!("list_user_statuses:{user_id}"), Err(err));
            return;
        }
    };

    for status in statuses {
        let Some(updated) = repair_status(status, entity, entity_id) else {
            continue;
        };
        log.record(
            format!("repair_user_status:{}", updated.id),
            db.upsert_user_status(&updated).await,
        );
    }
}

/// Pure repair step; returns `None` when the record does not reference
/// the deleted entity.
fn repair_status(
    mut status: UserStatus,
    entity: SharedEntity,
    entity_id: Uuid,
) -> Option<UserStatus> {
    let list = match entity {
        SharedEntity::Address => &mut status.updated_addresses,
        SharedEntity::Email => &mut status.updated_emails,
        SharedEntity::PhoneNumber => &mut status.updated_phone_numbers,
    };
    if !list.contains(&entity_id) {
        return None;
    }
    list.retain(|id| *id != entity_id);
    let list_emptied = list.is_empty();

    let sole_remaining = list_emptied
        && status
            .updated_fields
            .iter()
            .all(|f| f == entity.field_name());
    if sole_remaining {
        return Some(status.reset());
    }

    if list_emptied {
        status.updated_fields.retain(|f| f != entity.field_name());
    }
    Some(status)
}
