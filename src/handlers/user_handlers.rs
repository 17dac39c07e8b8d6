//! Admin-only user management.

use crate::{auth::AdminUser, errors::AppError, models::user::Role, state::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleReq {
    pub role: String,
}

/// GET `/api/users`
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(q): Query<ListUsersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (users, page) = state.identity.list_users(q.limit, q.offset).await?;
    Ok(Json(json!({
        "users": users,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// GET `/api/users/{id}`
pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .identity
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(json!({ "user": user })))
}

/// PUT `/api/users/{id}/role`
pub async fn update_user_role(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateRoleReq>,
) -> Result<impl IntoResponse, AppError> {
    let role: Role = req.role.parse().map_err(AppError::bad_request)?;
    let user = state
        .identity
        .update_role(user_id, role)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    Ok(Json(json!({ "user": user })))
}
