//! Caller resolution.
//!
//! Authentication happens upstream; requests arrive carrying the caller's user
//! id in the `x-user-id` header. The id must name an existing user, whose
//! company scopes everything the request can touch.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;

use super::error::ApiError;
use super::state::AppState;
use crate::store::WorkflowStore;
use crate::workflow::types::{Actor, User, UserId};

pub const USER_HEADER: &str = "x-user-id";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::from(&self.0)
    }
}

impl<S: WorkflowStore> FromRequestParts<Arc<AppState<S>>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = caller_id(parts)?;
        match state.resolve_user(user_id).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(ApiError::Unauthorized(format!("Unknown user {user_id}"))),
        }
    }
}

fn caller_id(parts: &Parts) -> Result<UserId, ApiError> {
    let raw = parts
        .headers
        .get(USER_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user-id header".to_string()))?;
    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse::<UserId>().ok())
        .ok_or_else(|| ApiError::Unauthorized("Invalid x-user-id header".to_string()))
}
