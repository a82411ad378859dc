//! Staff accounts and access-key authentication

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use tmb_core::types::{User, UserCreate, UserUpdate};
use tmb_store::{EntityStore, StoreError};

use crate::error::{IngestError, IngestResult};

/// Access keys are stored as the SHA-256 hex of the key.
pub fn hash_access_key(access_key: &str) -> String {
    tmb_crypto::sha256_hex(access_key.as_bytes())
}

fn require_non_empty(field: &str, value: &str) -> IngestResult<()> {
    if value.trim().is_empty() {
        return Err(IngestError::InvalidInput(format!("`{field}` must not be empty")));
    }
    Ok(())
}

pub fn create(store: &dyn EntityStore, request: UserCreate) -> IngestResult<User> {
    require_non_empty("email", &request.email)?;
    require_non_empty("access_key", &request.access_key)?;

    let user = store.create_user(User {
        user_id: Uuid::new_v4(),
        email: request.email.trim().to_string(),
        access_key_hash: hash_access_key(&request.access_key),
        disabled: request.disabled,
        created_at: Utc::now(),
    })?;
    info!(user_id = %user.user_id, email = %user.email, "user created");
    Ok(user)
}

/// Resolve an access key to its user, whether or not the account is disabled.
pub fn authenticate(store: &dyn EntityStore, access_key: &str) -> IngestResult<Option<User>> {
    let user = store.find_user_by_access_key_hash(&hash_access_key(access_key))?;
    if user.is_none() {
        warn!("no user matches the presented access key");
    }
    Ok(user)
}

pub fn get(store: &dyn EntityStore, user_id: Uuid) -> IngestResult<User> {
    Ok(store.get_user(user_id)?)
}

pub fn list(store: &dyn EntityStore) -> IngestResult<Vec<User>> {
    Ok(store.list_users()?)
}

pub fn update(store: &dyn EntityStore, user_id: Uuid, changes: UserUpdate) -> IngestResult<User> {
    let mut user = store.get_user(user_id)?;
    if let Some(email) = changes.email {
        require_non_empty("email", &email)?;
        user.email = email.trim().to_string();
    }
    if let Some(key) = changes.access_key {
        require_non_empty("access_key", &key)?;
        user.access_key_hash = hash_access_key(&key);
    }
    if let Some(disabled) = changes.disabled {
        user.disabled = disabled;
    }
    Ok(store.update_user(user)?)
}

/// Delete a user who no longer owns any records.
pub fn delete(store: &dyn EntityStore, user_id: Uuid) -> IngestResult<bool> {
    match store.delete_user(user_id) {
        Ok(removed) => Ok(removed),
        Err(StoreError::ForeignKey { .. }) => Err(IngestError::InvalidInput(format!(
            "user {user_id} still owns records; disable the account instead"
        ))),
        Err(e) => Err(e.into()),
    }
}
