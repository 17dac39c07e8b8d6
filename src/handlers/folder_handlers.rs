//! HTTP handlers for folder operations. Reads are public; writes need a
//! resolved caller and are restricted to the folder's owner by the service.

use crate::{
    auth::{AuthUser, MaybeUser},
    errors::AppError,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListFoldersQuery {
    #[serde(default)]
    pub owned: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveFolderReq {
    pub parent_id: Option<Uuid>,
}

/// GET `/api/folders` — root-level folders and files.
pub async fn list_folders(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Query(q): Query<ListFoldersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let owner_id = match (q.owned, caller) {
        (false, _) => None,
        (true, Some(user)) => Some(user.id),
        (true, None) => {
            return Err(AppError::unauthorized(
                "Authentication required for owned filter",
            ));
        }
    };

    let listing = state.folders.list_root(owner_id, q.limit, q.offset).await?;
    Ok(Json(listing))
}

/// GET `/api/folders/{id}` — folder with its direct children.
pub async fn get_folder(
    State(state): State<AppState>,
    Path(folder_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let contents = state
        .folders
        .get_folder_contents(folder_id)
        .await?
        .ok_or_else(|| AppError::not_found("Folder not found"))?;
    Ok(Json(contents))
}

/// POST `/api/folders`
pub async fn create_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let folder = state
        .folders
        .create_folder(&req.name, user.id, req.parent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "folder": folder }))))
}

/// PUT `/api/folders/{id}` — rename.
pub async fn update_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(folder_id): Path<Uuid>,
    Json(req): Json<RenameReq>,
) -> Result<impl IntoResponse, AppError> {
    let folder = state
        .folders
        .update_folder(folder_id, &req.name, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Folder not found"))?;
    Ok(Json(json!({ "folder": folder })))
}

/// PUT `/api/folders/{id}/parent` — move under another folder, or to the root.
pub async fn move_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(folder_id): Path<Uuid>,
    Json(req): Json<MoveFolderReq>,
) -> Result<impl IntoResponse, AppError> {
    let folder = state
        .folders
        .move_folder(folder_id, req.parent_id, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("Folder not found"))?;
    Ok(Json(json!({ "folder": folder })))
}

/// DELETE `/api/folders/{id}` — delete with the whole subtree.
pub async fn delete_folder(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(folder_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.folders.delete_folder(folder_id, user.id).await? {
        return Err(AppError::not_found("Folder not found"));
    }
    Ok(Json(json!({ "message": "Folder deleted successfully" })))
}
