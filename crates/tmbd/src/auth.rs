//! Bearer access-key authentication

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use tmb_core::types::User;

use crate::api::AppState;
use crate::error::ApiError;

/// The authenticated, active caller of a `/v1` route.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;

        let key = key.to_string();
        let user = state
            .ingest
            .with_store(move |store| tmb_ingest::users::authenticate(store, &key))
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".into()))?;

        if user.disabled {
            return Err(ApiError::BadRequest("Inactive user".into()));
        }
        Ok(CurrentUser(user))
    }
}
