//! Defines routes for folder, file, search and user operations.
//!
//! ## Structure
//! - **Folders**
//!   - `GET    /api/folders` — root listing (`?owned=true&limit=&offset=`)
//!   - `POST   /api/folders` — create folder
//!   - `GET    /api/folders/{id}` — folder with direct children
//!   - `PUT    /api/folders/{id}` — rename
//!   - `DELETE /api/folders/{id}` — delete with subtree
//!   - `PUT    /api/folders/{id}/parent` — move
//!
//! - **Files**
//!   - `POST   /api/files` — multipart upload
//!   - `GET    /api/files/{id}` — metadata
//!   - `GET    /api/files/{id}/download` — attachment
//!   - `GET    /api/files/{id}/preview` — inline
//!   - `PUT    /api/files/{id}` — rename
//!   - `DELETE /api/files/{id}` — delete
//!
//! - `GET /api/search?q=` and the admin-only `/api/users` endpoints.

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_file, get_file, preview_file, update_file, upload_file,
        },
        folder_handlers::{
            create_folder, delete_folder, get_folder, list_folders, move_folder, update_folder,
        },
        health_handlers::{healthz, readyz},
        search_handlers::search,
        user_handlers::{get_user, list_users, update_user_role},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Build and return the router for all API routes.
///
/// Upload size is enforced by the blob store while streaming, so the default
/// request body limit is lifted on the upload route only.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Folder routes
        .route("/api/folders", get(list_folders).post(create_folder))
        .route(
            "/api/folders/{id}",
            get(get_folder).put(update_folder).delete(delete_folder),
        )
        .route("/api/folders/{id}/parent", put(move_folder))
        // File routes
        .route(
            "/api/files",
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/files/{id}",
            get(get_file).put(update_file).delete(delete_file),
        )
        .route("/api/files/{id}/download", get(download_file))
        .route("/api/files/{id}/preview", get(preview_file))
        // Search
        .route("/api/search", get(search))
        // Admin
        .route("/api/users", get(list_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/role", put(update_user_role))
}
