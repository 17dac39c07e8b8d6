//! HTTP handlers for file operations.
//! Upload bodies are spooled to disk and download bodies are streamed, so
//! neither is buffered in memory. Storage concerns belong to `FileService`.

use crate::{
    auth::AuthUser,
    errors::{AppError, ServiceError},
    models::file::File,
    services::file_service::{UploadRequest, ensure_pdf, sanitize_filename},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::folder_handlers::RenameReq;

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::bad_request(format!("Invalid multipart body: {}", err))
}

fn spool_failed(err: io::Error) -> AppError {
    ServiceError::Storage(err).into()
}

/// The `file` part, held in an anonymous temp file until the whole form
/// has been read.
struct SpooledFile {
    filename: String,
    content_type: Option<String>,
    spool: tokio::fs::File,
}

/// Parts of the upload form, in whatever order the client sent them.
#[derive(Default)]
struct UploadForm {
    name: Option<String>,
    folder_id: Option<Uuid>,
    file: Option<SpooledFile>,
}

/// Copy a field into an unlinked temp file and rewind it.
///
/// The temp file lives outside the blob root and vanishes when dropped, so
/// an aborted request leaves nothing behind.
async fn spool_field(mut field: Field<'_>, max_bytes: u64) -> Result<tokio::fs::File, AppError> {
    let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
        .await
        .map_err(|err| AppError::internal(format!("spool task failed: {}", err)))?
        .map_err(spool_failed)?;
    let mut spool = tokio::fs::File::from_std(std_file);

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(ServiceError::validation(format!(
                "file exceeds the maximum size of {} bytes",
                max_bytes
            ))
            .into());
        }
        spool.write_all(&chunk).await.map_err(spool_failed)?;
    }
    spool.flush().await.map_err(spool_failed)?;
    spool.rewind().await.map_err(spool_failed)?;
    Ok(spool)
}

/// POST `/api/files` — multipart upload with `file`, optional `name` and
/// `folder_id` parts, in any order. The file body is spooled until every
/// part has been read, then streamed into the blob store.
pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => form.name = Some(field.text().await.map_err(bad_multipart)?),
            Some("folder_id") => {
                let raw = field.text().await.map_err(bad_multipart)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let id = Uuid::parse_str(raw)
                        .map_err(|_| AppError::bad_request("Invalid folder_id"))?;
                    form.folder_id = Some(id);
                }
            }
            Some("file") => {
                if form.file.is_some() {
                    return Err(AppError::bad_request("Only one file may be uploaded per request"));
                }
                let filename = field.file_name().unwrap_or_default().to_string();
                if filename.is_empty() {
                    return Err(AppError::bad_request("No file selected"));
                }
                let content_type = field.content_type().map(str::to_string);
                // reject other formats before spooling any bytes
                ensure_pdf(&sanitize_filename(&filename), content_type.as_deref())?;

                let spool = spool_field(field, state.blobs.max_blob_bytes).await?;
                form.file = Some(SpooledFile {
                    filename,
                    content_type,
                    spool,
                });
            }
            _ => {}
        }
    }

    let SpooledFile {
        filename,
        content_type,
        spool,
    } = form
        .file
        .ok_or_else(|| AppError::bad_request("No file provided"))?;

    let request = UploadRequest {
        filename,
        name: form.name,
        content_type,
        folder_id: form.folder_id,
    };
    let file = state
        .files
        .upload_file(ReaderStream::new(spool), request, user.id)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "file": file }))))
}

/// GET `/api/files/{id}` — metadata only.
pub async fn get_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .files
        .get_file(file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;
    Ok(Json(json!({ "file": file })))
}

/// GET `/api/files/{id}/download` — stream as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    stream_file(&state, file_id, "attachment").await
}

/// GET `/api/files/{id}/preview` — stream for inline display.
pub async fn preview_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, AppError> {
    stream_file(&state, file_id, "inline").await
}

async fn stream_file(state: &AppState, file_id: Uuid, disposition: &str) -> Result<Response, AppError> {
    let (meta, reader) = state
        .files
        .open_file(file_id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_file_headers(response.headers_mut(), &meta, disposition);
    Ok(response)
}

/// PUT `/api/files/{id}` — rename.
pub async fn update_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(file_id): Path<Uuid>,
    Json(req): Json<RenameReq>,
) -> Result<impl IntoResponse, AppError> {
    let file = state
        .files
        .update_file(file_id, &req.name, user.id)
        .await?
        .ok_or_else(|| AppError::not_found("File not found"))?;
    Ok(Json(json!({ "file": file })))
}

/// DELETE `/api/files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if !state.files.delete_file_by_id(file_id, user.id).await? {
        return Err(AppError::not_found("File not found"));
    }
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

fn set_file_headers(headers: &mut HeaderMap, meta: &File, disposition: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/pdf")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.checksum)) {
        headers.insert(header::ETAG, value);
    }

    // original_filename is already restricted to [A-Za-z0-9._-]
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}; filename=\"{}\"",
        disposition, meta.original_filename
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.updated_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
