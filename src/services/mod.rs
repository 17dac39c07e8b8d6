//! Domain services: identity store, namespace tree engine (folders, files,
//! search) and the blob store they orchestrate.

pub mod blob_store;
pub mod file_service;
pub mod folder_service;
pub mod identity_service;
pub mod search_service;

use crate::errors::{ServiceError, ServiceResult};
use blob_store::BlobStore;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

const MAX_NAME_LEN: usize = 255;

/// Trim a folder or file display name and reject empty or oversized names.
pub(crate) fn normalize_name(name: &str, kind: &str) -> ServiceResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(format!("{kind} name is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::validation(format!(
            "{kind} name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Case-folded form of a display name, stored next to it for search.
///
/// SQLite's `LIKE` only folds ASCII, so matching runs against this column
/// with a pattern folded the same way.
pub(crate) fn fold_name(name: &str) -> String {
    name.to_lowercase()
}

/// Open a transaction that takes the database write lock up front.
///
/// A deferred transaction that reads before writing cannot wait for the lock
/// when another writer holds it; SQLite fails the upgrade with `SQLITE_BUSY`
/// at once. `BEGIN IMMEDIATE` queues on the busy timeout instead.
pub(crate) async fn begin_write(db: &SqlitePool) -> ServiceResult<Transaction<'static, Sqlite>> {
    Ok(db.begin_with("BEGIN IMMEDIATE").await?)
}

/// Reclaim blobs whose metadata rows are already committed as deleted.
///
/// Failures are logged with the handle and otherwise ignored: the entities
/// are gone from the namespace either way. Returns how many blobs were removed.
pub(crate) async fn reclaim_blobs(blobs: &BlobStore, handles: &[String]) -> usize {
    let mut reclaimed = 0;
    for handle in handles {
        match blobs.delete(handle).await {
            Ok(true) => reclaimed += 1,
            Ok(false) => debug!(handle = %handle, "blob already absent"),
            Err(err) => warn!(
                handle = %handle,
                error = %err,
                "blob reclamation failed, orphaned blob left for reconciliation"
            ),
        }
    }
    reclaimed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(normalize_name("  Reports ", "folder").unwrap(), "Reports");
        assert!(matches!(
            normalize_name("   ", "folder"),
            Err(ServiceError::Validation(_))
        ));
        assert!(normalize_name(&"x".repeat(256), "file").is_err());
    }

    #[test]
    fn folding_covers_non_ascii() {
        assert_eq!(fold_name("Über"), "über");
        assert_eq!(fold_name("ÉTÉ"), "été");
    }
}

/// Shared fixtures for service tests: a migrated in-memory database and a
/// temporary blob root.
#[cfg(test)]
pub(crate) mod testing {
    use super::{
        blob_store::{BlobStore, bytes_stream},
        file_service::{FileService, UploadRequest},
        folder_service::FolderService,
        identity_service::IdentityService,
        search_service::SearchService,
    };
    use crate::{
        db::{connect, run_migrations, test_pool},
        models::{file::File, user::Role},
    };
    use sqlx::SqlitePool;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use uuid::Uuid;

    pub struct Fixture {
        pub db: SqlitePool,
        pub blobs: BlobStore,
        pub identity: IdentityService,
        pub folders: FolderService,
        pub files: FileService,
        pub search: SearchService,
        _dir: TempDir,
    }

    impl Fixture {
        /// Single-connection in-memory database, blobs in a fresh tempdir.
        pub async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let blob_root = dir.path().to_path_buf();
            Self::assemble(test_pool().await, dir, blob_root)
        }

        /// A database file opened through the production pool, so several
        /// connections really do contend for the write lock.
        pub async fn file_backed() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let url = format!("sqlite://{}", dir.path().join("dataroom.db").display());
            let db = connect(&url).await.unwrap();
            run_migrations(&db).await.unwrap();
            let blob_root = dir.path().join("blobs");
            Self::assemble(db, dir, blob_root)
        }

        fn assemble(db: SqlitePool, dir: TempDir, blob_root: PathBuf) -> Self {
            let blobs = BlobStore::new(blob_root, 1024 * 1024);
            Self {
                identity: IdentityService::new(db.clone()),
                folders: FolderService::new(db.clone(), blobs.clone()),
                files: FileService::new(db.clone(), blobs.clone()),
                search: SearchService::new(db.clone()),
                blobs,
                db,
                _dir: dir,
            }
        }

        pub fn storage_root(&self) -> &Path {
            &self.blobs.base_path
        }

        pub async fn user(&self, email: &str) -> Uuid {
            self.identity
                .create_user(email, "Test User", "hash", Role::User)
                .await
                .unwrap()
                .id
        }

        pub async fn upload(&self, owner: Uuid, folder_id: Option<Uuid>, name: &str) -> File {
            self.files
                .upload_file(pdf_stream(), pdf_request(name, folder_id), owner)
                .await
                .unwrap()
        }
    }

    pub fn pdf_stream() -> impl futures::Stream<Item = std::io::Result<bytes::Bytes>> + Send {
        bytes_stream(b"%PDF-1.4\n%test\n")
    }

    pub fn pdf_request(filename: &str, folder_id: Option<Uuid>) -> UploadRequest {
        UploadRequest {
            filename: filename.to_string(),
            name: None,
            content_type: Some("application/pdf".to_string()),
            folder_id,
        }
    }
}
