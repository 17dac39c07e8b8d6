//! Caller identity extractors.
//!
//! Credentials are verified upstream; the authenticating proxy forwards the
//! resolved user id in `X-User-Id`. These extractors only look that id up in
//! the identity store.

use crate::{
    errors::{AppError, ServiceError},
    models::user::User,
    state::AppState,
};
use axum::{extract::FromRequestParts, http::StatusCode, http::request::Parts};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// A resolved caller. Rejects with 401 when no identity is present.
pub struct AuthUser(pub User);

/// A resolved caller with the admin role. Rejects with 401/403.
pub struct AdminUser(pub User);

/// An optional caller, for public read endpoints.
pub struct MaybeUser(pub Option<User>);

async fn resolve_caller(parts: &Parts, state: &AppState) -> Result<Option<User>, AppError> {
    let Some(raw) = parts.headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let id = raw
        .to_str()
        .ok()
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| ServiceError::Unauthorized("Invalid caller identity".into()))?;
    let user = state
        .identity
        .get_user(id)
        .await?
        .ok_or_else(|| ServiceError::Unauthorized("Unknown caller".into()))?;
    Ok(Some(user))
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(resolve_caller(parts, state).await?))
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve_caller(parts, state)
            .await?
            .map(AuthUser)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::new(StatusCode::FORBIDDEN, "Admin access required"));
        }
        Ok(AdminUser(user))
    }
}
