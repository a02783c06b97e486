//! Caller identity from the authenticating proxy, plus per-endpoint limits.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::policy::{Actor, Capability, Role};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Parse the actor headers. Missing or malformed values yield `None`.
pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let user_id = headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;
    let role = match headers.get(USER_ROLE_HEADER) {
        Some(v) => v.to_str().ok()?.trim().parse::<Role>().ok()?,
        None => Role::Reader,
    };
    Some(Actor { user_id, role })
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).ok_or(AppError::Unauthorized)
    }
}

/// Count this request against `endpoint` and reject it past the ceiling.
pub async fn enforce_rate_limit(
    state: &AppState,
    actor: &Actor,
    endpoint: &str,
) -> Result<(), AppError> {
    if state
        .ingestor
        .quota()
        .check_rate_limit(actor, endpoint)
        .await?
    {
        Ok(())
    } else {
        Err(AppError::RateLimited)
    }
}

pub fn require(state: &AppState, actor: &Actor, capability: Capability) -> Result<(), AppError> {
    if state.permissions.allows(actor, capability) {
        Ok(())
    } else {
        tracing::debug!(
            "User {} ({}) denied {:?}",
            actor.user_id,
            actor.role.as_str(),
            capability
        );
        Err(AppError::Forbidden)
    }
}
