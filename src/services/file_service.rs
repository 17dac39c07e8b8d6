//! src/services/file_service.rs
//!
//! FileService — the file half of the namespace tree engine. Uploads run in
//! two phases: validate and store the bytes, then record the metadata row
//! pointing at the blob. Deletes run the other way round: remove the row,
//! commit, then reclaim the bytes.

use crate::{
    errors::{ServiceError, ServiceResult, is_foreign_key_violation, is_unique_violation},
    models::{file::File, listing::Page},
    services::{
        blob_store::BlobStore,
        folder_service::{DEFAULT_ROOT_LIMIT, MAX_ROOT_LIMIT, fetch_folder},
        begin_write, fold_name, normalize_name, reclaim_blobs,
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::io;
use tracing::{info, warn};
use uuid::Uuid;

pub(crate) const FILE_COLUMNS: &str = "id, name, original_filename, storage_path, size_bytes, \
     mime_type, checksum, folder_id, owner_id, uploaded_at, updated_at";

pub const PDF_MIME: &str = "application/pdf";
const PDF_EXTENSION: &str = ".pdf";
const ACCEPTED_DECLARED_TYPES: [&str; 2] = [PDF_MIME, "application/octet-stream"];

/// Caller-supplied description of an upload, alongside the byte stream.
#[derive(Clone, Debug, Default)]
pub struct UploadRequest {
    /// Filename as sent by the client.
    pub filename: String,
    /// Display name. Falls back to the sanitized filename when absent or blank.
    pub name: Option<String>,
    /// Content type declared by the client, if any.
    pub content_type: Option<String>,
    /// Target folder. `None` uploads to the root.
    pub folder_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct FileService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: SqlitePool,

    /// Where document bytes live.
    pub blobs: BlobStore,
}

/// Fetch a file by id on an existing connection or transaction.
pub(crate) async fn fetch_file(conn: &mut SqliteConnection, id: Uuid) -> ServiceResult<Option<File>> {
    let file = sqlx::query_as::<_, File>(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"))
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(file)
}

/// Root-level files, newest first, optionally restricted to one owner.
pub(crate) async fn fetch_root_files(
    conn: &mut SqliteConnection,
    owner_id: Option<Uuid>,
    page: Page,
) -> ServiceResult<Vec<File>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE folder_id IS NULL"
    ));
    if let Some(owner_id) = owner_id {
        builder.push(" AND owner_id = ");
        builder.push_bind(owner_id);
    }
    builder.push(" ORDER BY uploaded_at DESC, id LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset);

    let files: Vec<File> = builder.build_query_as().fetch_all(conn).await?;
    Ok(files)
}

async fn file_name_taken(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
    folder_id: Option<Uuid>,
    name: &str,
    exclude: Option<Uuid>,
) -> ServiceResult<bool> {
    let taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
             SELECT 1 FROM files
             WHERE owner_id = ? AND folder_id IS ? AND name = ? AND id IS NOT ?
         )",
    )
    .bind(owner_id)
    .bind(folder_id)
    .bind(name)
    .bind(exclude)
    .fetch_one(conn)
    .await?;
    Ok(taken)
}

fn map_write_error(err: sqlx::Error) -> ServiceError {
    if is_unique_violation(&err) {
        ServiceError::conflict("A file with this name already exists in this location")
    } else if is_foreign_key_violation(&err) {
        ServiceError::not_found("Folder or owner not found")
    } else {
        ServiceError::Database(err)
    }
}

/// Reduce a client filename to a safe basename.
///
/// Drops any directory components and replaces every character outside
/// `[A-Za-z0-9._-]` with `_`. Leading dots are stripped so the result is
/// never hidden.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Only PDF documents are accepted.
pub fn ensure_pdf(original_filename: &str, declared_type: Option<&str>) -> ServiceResult<()> {
    let has_pdf_extension = original_filename.len() > PDF_EXTENSION.len()
        && original_filename
            .to_ascii_lowercase()
            .ends_with(PDF_EXTENSION);
    if !has_pdf_extension {
        return Err(ServiceError::validation("Only PDF files are allowed"));
    }

    if let Some(declared) = declared_type {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !essence.is_empty() && !ACCEPTED_DECLARED_TYPES.contains(&essence.as_str()) {
            return Err(ServiceError::validation("Only PDF files are allowed"));
        }
    }
    Ok(())
}

impl FileService {
    pub fn new(db: SqlitePool, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Upload a document for `owner_id`.
    ///
    /// Order: validate format and name, check the target folder and name
    /// uniqueness, store the bytes, then insert the row. Nothing is written
    /// if validation fails; if the insert fails after the bytes were
    /// stored, the blob is discarded best-effort.
    pub async fn upload_file<S>(
        &self,
        stream: S,
        request: UploadRequest,
        owner_id: Uuid,
    ) -> ServiceResult<File>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let original_filename = sanitize_filename(&request.filename);
        ensure_pdf(&original_filename, request.content_type.as_deref())?;
        let name = match request.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => normalize_name(name, "File")?,
            _ => normalize_name(&original_filename, "File")?,
        };
        let folder_id = request.folder_id;

        {
            let mut conn = self.db.acquire().await?;
            if let Some(folder_id) = folder_id {
                let folder = fetch_folder(&mut *conn, folder_id)
                    .await?
                    .ok_or_else(|| ServiceError::not_found("Folder not found"))?;
                if folder.owner_id != owner_id {
                    return Err(ServiceError::forbidden(
                        "You can only upload files to your own folders",
                    ));
                }
            }
            if file_name_taken(&mut *conn, owner_id, folder_id, &name, None).await? {
                return Err(ServiceError::conflict(
                    "A file with this name already exists in this location",
                ));
            }
        }

        let blob = self.blobs.store(stream).await?;

        let now = Utc::now();
        let file = File {
            id: Uuid::new_v4(),
            name,
            original_filename,
            storage_path: blob.handle,
            size_bytes: blob.size_bytes,
            mime_type: PDF_MIME.to_string(),
            checksum: blob.checksum,
            folder_id,
            owner_id,
            uploaded_at: now,
            updated_at: now,
        };

        if let Err(err) = self.insert_file(&file).await {
            self.discard_orphan(&file.storage_path).await;
            return Err(err);
        }

        info!(
            file_id = %file.id,
            owner_id = %owner_id,
            folder_id = ?folder_id,
            size_bytes = file.size_bytes,
            "file uploaded"
        );
        Ok(file)
    }

    async fn insert_file(&self, file: &File) -> ServiceResult<()> {
        let mut tx = begin_write(&self.db).await?;
        sqlx::query(
            "INSERT INTO files (
                id, name, name_folded, original_filename, storage_path, size_bytes,
                mime_type, checksum, folder_id, owner_id, uploaded_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(fold_name(&file.name))
        .bind(&file.original_filename)
        .bind(&file.storage_path)
        .bind(file.size_bytes)
        .bind(&file.mime_type)
        .bind(&file.checksum)
        .bind(file.folder_id)
        .bind(file.owner_id)
        .bind(file.uploaded_at)
        .bind(file.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;
        tx.commit().await.map_err(map_write_error)?;
        Ok(())
    }

    /// Remove a blob that never got a committed metadata row.
    async fn discard_orphan(&self, handle: &str) {
        match self.blobs.delete(handle).await {
            Ok(_) => info!(handle = %handle, "discarded blob of failed upload"),
            Err(err) => warn!(
                handle = %handle,
                error = %err,
                "could not discard blob of failed upload, orphaned blob left for reconciliation"
            ),
        }
    }

    pub async fn get_file(&self, file_id: Uuid) -> ServiceResult<Option<File>> {
        let mut conn = self.db.acquire().await?;
        fetch_file(&mut *conn, file_id).await
    }

    /// Root-level files, newest first, optionally restricted to one owner.
    pub async fn get_root_files(
        &self,
        owner_id: Option<Uuid>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<(Vec<File>, Page)> {
        let page = Page::clamped(limit, offset, DEFAULT_ROOT_LIMIT, MAX_ROOT_LIMIT);
        let mut conn = self.db.acquire().await?;
        let files = fetch_root_files(&mut *conn, owner_id, page).await?;
        Ok((files, page))
    }

    /// Metadata plus an open reader over the stored bytes.
    ///
    /// `None` when no such file exists. A row whose blob has gone missing
    /// yields `NotFound`.
    pub async fn open_file(&self, file_id: Uuid) -> ServiceResult<Option<(File, tokio::fs::File)>> {
        let Some(file) = self.get_file(file_id).await? else {
            return Ok(None);
        };
        let reader = self.blobs.open_for_read(&file.storage_path).await?;
        Ok(Some((file, reader)))
    }

    /// Rename a file within its folder. Only the owner may rename.
    pub async fn update_file(
        &self,
        file_id: Uuid,
        new_name: &str,
        requester_id: Uuid,
    ) -> ServiceResult<Option<File>> {
        let name = normalize_name(new_name, "File")?;
        let mut tx = begin_write(&self.db).await?;

        let Some(mut file) = fetch_file(&mut *tx, file_id).await? else {
            return Ok(None);
        };
        if file.owner_id != requester_id {
            return Err(ServiceError::forbidden(
                "You do not have permission to edit this file",
            ));
        }

        if file_name_taken(&mut *tx, file.owner_id, file.folder_id, &name, Some(file.id)).await? {
            return Err(ServiceError::conflict(
                "A file with this name already exists in this location",
            ));
        }

        file.name = name;
        file.updated_at = Utc::now();

        sqlx::query("UPDATE files SET name = ?, name_folded = ?, updated_at = ? WHERE id = ?")
            .bind(&file.name)
            .bind(fold_name(&file.name))
            .bind(file.updated_at)
            .bind(file.id)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;

        tx.commit().await.map_err(map_write_error)?;

        info!(file_id = %file.id, new_name = %file.name, "file renamed");
        Ok(Some(file))
    }

    /// Delete a file row, then reclaim its blob.
    ///
    /// Returns `false` if the file does not exist. A reclamation failure is
    /// logged; the file is gone from the namespace regardless.
    pub async fn delete_file_by_id(&self, file_id: Uuid, requester_id: Uuid) -> ServiceResult<bool> {
        let mut tx = begin_write(&self.db).await?;

        let Some(file) = fetch_file(&mut *tx, file_id).await? else {
            return Ok(false);
        };
        if file.owner_id != requester_id {
            return Err(ServiceError::forbidden(
                "You do not have permission to delete this file",
            ));
        }

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        reclaim_blobs(&self.blobs, std::slice::from_ref(&file.storage_path)).await;

        info!(file_id = %file.id, owner_id = %file.owner_id, "file deleted");
        Ok(true)
    }

    /// `true` iff the file exists and belongs to `user_id`.
    pub async fn check_file_ownership(&self, file_id: Uuid, user_id: Uuid) -> ServiceResult<bool> {
        Ok(self
            .get_file(file_id)
            .await?
            .is_some_and(|file| file.owner_id == user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_store::bytes_stream,
        testing::{Fixture, pdf_request, pdf_stream},
    };
    use tokio::io::AsyncReadExt;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("../../etc/report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("C:\\Users\\me\\Q1 plan.PDF"), "Q1_plan.PDF");
        assert_eq!(sanitize_filename(".hidden.pdf"), "hidden.pdf");
    }

    #[test]
    fn only_pdf_is_accepted() {
        assert!(ensure_pdf("a.pdf", None).is_ok());
        assert!(ensure_pdf("A.PDF", Some("application/pdf; charset=binary")).is_ok());
        assert!(ensure_pdf("a.pdf", Some("application/octet-stream")).is_ok());
        assert!(ensure_pdf(".pdf", None).is_err());
        assert!(ensure_pdf("a.docx", None).is_err());
        assert!(ensure_pdf("a.pdf", Some("image/png")).is_err());
    }

    #[tokio::test]
    async fn upload_records_real_size_and_readable_bytes() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;

        let file = fx
            .files
            .upload_file(bytes_stream(b"%PDF-1.4 hello"), pdf_request("report.pdf", None), owner)
            .await
            .unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.original_filename, "report.pdf");
        assert_eq!(file.size_bytes, 14);
        assert_eq!(file.mime_type, PDF_MIME);
        assert_eq!(file.folder_id, None);

        let (meta, mut reader) = fx.files.open_file(file.id).await.unwrap().unwrap();
        assert_eq!(meta.id, file.id);
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"%PDF-1.4 hello");
    }

    #[tokio::test]
    async fn unsupported_format_writes_nothing() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;

        let err = fx
            .files
            .upload_file(bytes_stream(b"PK"), pdf_request("notes.docx", None), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let (roots, _) = fx.files.get_root_files(None, None, None).await.unwrap();
        assert!(roots.is_empty());
        assert_eq!(std::fs::read_dir(fx.storage_root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn upload_into_foreign_folder_is_forbidden() {
        let fx = Fixture::new().await;
        let u1 = fx.user("u1@example.com").await;
        let u2 = fx.user("u2@example.com").await;
        let shared = fx.folders.create_folder("Shared", u1, None).await.unwrap();

        let err = fx
            .files
            .upload_file(
                bytes_stream(b"%PDF"),
                pdf_request("intruder.pdf", Some(shared.id)),
                u2,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let contents = fx.folders.get_folder_contents(shared.id).await.unwrap().unwrap();
        assert!(contents.files.is_empty());
        assert_eq!(std::fs::read_dir(fx.storage_root()).unwrap().count(), 0);

        let missing = fx
            .files
            .upload_file(
                bytes_stream(b"%PDF"),
                pdf_request("x.pdf", Some(Uuid::new_v4())),
                u1,
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_names_conflict_per_location() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;
        let folder = fx.folders.create_folder("Docs", owner, None).await.unwrap();

        fx.upload(owner, None, "a.pdf").await;
        let err = fx
            .files
            .upload_file(bytes_stream(b"%PDF"), pdf_request("a.pdf", None), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // same name in another folder is fine
        fx.upload(owner, Some(folder.id), "a.pdf").await;
    }

    #[tokio::test]
    async fn storage_failure_creates_no_row() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;
        let blocker = fx.storage_root().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let broken = FileService::new(fx.db.clone(), BlobStore::new(&blocker, 1024));

        let err = broken
            .upload_file(bytes_stream(b"%PDF"), pdf_request("a.pdf", None), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));

        let (roots, _) = fx.files.get_root_files(None, None, None).await.unwrap();
        assert!(roots.is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;
        let tiny = FileService::new(fx.db.clone(), BlobStore::new(fx.storage_root(), 3));

        let err = tiny
            .upload_file(bytes_stream(b"%PDF-1.7"), pdf_request("big.pdf", None), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let (roots, _) = fx.files.get_root_files(None, None, None).await.unwrap();
        assert!(roots.is_empty());
        assert_eq!(std::fs::read_dir(fx.storage_root()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_uploads_keep_one_file_and_blob() {
        let fx = Fixture::file_backed().await;
        let owner = fx.user("u1@example.com").await;

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let files = fx.files.clone();
                tokio::spawn(async move {
                    files
                        .upload_file(pdf_stream(), pdf_request("same.pdf", None), owner)
                        .await
                })
            })
            .collect();

        let mut uploaded = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(file) => uploaded.push(file),
                Err(ServiceError::Conflict(_)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(uploaded.len(), 1);

        let (roots, _) = fx.files.get_root_files(Some(owner), None, None).await.unwrap();
        assert_eq!(roots.len(), 1);
        // losers that got past the pre-check had their blobs discarded
        let mut blobs = 0;
        let mut stack = vec![fx.storage_root().to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    blobs += 1;
                }
            }
        }
        assert_eq!(blobs, 1);
        assert!(fx.blobs.exists(&uploaded[0].storage_path).await);
    }

    #[tokio::test]
    async fn rename_and_delete_are_owner_only() {
        let fx = Fixture::new().await;
        let u1 = fx.user("u1@example.com").await;
        let u2 = fx.user("u2@example.com").await;
        let a = fx.upload(u1, None, "a.pdf").await;
        fx.upload(u1, None, "b.pdf").await;

        assert!(matches!(
            fx.files.update_file(a.id, "b.pdf", u1).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            fx.files.update_file(a.id, "c.pdf", u2).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            fx.files.delete_file_by_id(a.id, u2).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(fx.files.check_file_ownership(a.id, u1).await.unwrap());
        assert!(!fx.files.check_file_ownership(a.id, u2).await.unwrap());

        let renamed = fx.files.update_file(a.id, " c.pdf ", u1).await.unwrap().unwrap();
        assert_eq!(renamed.name, "c.pdf");
        assert_eq!(renamed.original_filename, "a.pdf");

        assert!(fx.files.delete_file_by_id(a.id, u1).await.unwrap());
        assert!(fx.files.get_file(a.id).await.unwrap().is_none());
        assert!(!fx.blobs.exists(&a.storage_path).await);
        assert!(!fx.files.delete_file_by_id(a.id, u1).await.unwrap());
        assert!(fx.files.update_file(a.id, "d.pdf", u1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_is_not_found_on_open_but_delete_succeeds() {
        let fx = Fixture::new().await;
        let owner = fx.user("u1@example.com").await;
        let file = fx.upload(owner, None, "lost.pdf").await;
        fx.blobs.delete(&file.storage_path).await.unwrap();

        assert!(matches!(
            fx.files.open_file(file.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(fx.files.open_file(Uuid::new_v4()).await.unwrap().is_none());
        assert!(fx.files.delete_file_by_id(file.id, owner).await.unwrap());
    }
}
