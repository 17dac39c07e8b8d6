//! src/services/blob_store.rs
//!
//! BlobStore — maps opaque handles to document bytes on local disk. Handles
//! are date-bucketed relative paths `{yyyy}/{mm}/{dd}/{uuid}.pdf`, so
//! concurrent uploads never collide and no two files share a handle. The
//! store knows nothing about folders or owners; the namespace services
//! decide when to store and when to reclaim.

use crate::errors::{ServiceError, ServiceResult};
use bytes::Bytes;
use chrono::{Datelike, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_HANDLE_LEN: usize = 512;

/// Result of a successful `store` call.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Opaque handle to persist alongside the metadata row.
    pub handle: String,
    /// Number of bytes actually written.
    pub size_bytes: i64,
    /// Hex MD5 of the written bytes.
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Base directory on disk where blobs are stored.
    pub base_path: PathBuf,

    /// Uploads larger than this are rejected while streaming.
    pub max_blob_bytes: u64,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>, max_blob_bytes: u64) -> Self {
        Self {
            base_path: base_path.into(),
            max_blob_bytes,
        }
    }

    /// Rejects handles that could escape `base_path`.
    fn ensure_handle_safe(handle: &str) -> ServiceResult<()> {
        let unsafe_handle = handle.is_empty()
            || handle.len() > MAX_HANDLE_LEN
            || handle.starts_with('/')
            || handle.contains("..")
            || handle
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_handle {
            return Err(ServiceError::validation("invalid blob handle"));
        }
        Ok(())
    }

    /// Build a fresh handle in today's bucket.
    fn new_handle() -> String {
        let now = Utc::now();
        format!(
            "{:04}/{:02}/{:02}/{}.pdf",
            now.year(),
            now.month(),
            now.day(),
            Uuid::new_v4().simple()
        )
    }

    fn blob_path(&self, handle: &str) -> PathBuf {
        self.base_path.join(handle)
    }

    /// Stream bytes into a new blob.
    ///
    /// Writes to a temporary file first, fsyncs, then renames into place, so
    /// a failed or oversized upload never leaves a blob behind. The returned
    /// size is what reached disk, not what the caller claimed.
    pub async fn store<S>(&self, stream: S) -> ServiceResult<StoredBlob>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let handle = Self::new_handle();
        let file_path = self.blob_path(&handle);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ServiceError::Storage(io::Error::other("blob path missing parent directory"))
        })?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = match self.create_temp(&parent, &tmp_path).await {
            Ok(file) => file,
            Err(err) => {
                self.prune_empty_dirs(&parent).await;
                return Err(ServiceError::Storage(err));
            }
        };

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.abandon_temp(&tmp_path, &parent).await;
                    return Err(ServiceError::Storage(err));
                }
            };
            size_bytes += chunk.len() as u64;
            if size_bytes > self.max_blob_bytes {
                self.abandon_temp(&tmp_path, &parent).await;
                return Err(ServiceError::validation(format!(
                    "file exceeds the maximum size of {} bytes",
                    self.max_blob_bytes
                )));
            }
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                self.abandon_temp(&tmp_path, &parent).await;
                return Err(ServiceError::Storage(err));
            }
        }
        if let Err(err) = file.flush().await {
            self.abandon_temp(&tmp_path, &parent).await;
            return Err(ServiceError::Storage(err));
        }
        if let Err(err) = file.sync_all().await {
            self.abandon_temp(&tmp_path, &parent).await;
            return Err(ServiceError::Storage(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            self.abandon_temp(&tmp_path, &parent).await;
            return Err(ServiceError::Storage(err));
        }

        debug!(handle = %handle, size_bytes, "stored blob");
        Ok(StoredBlob {
            handle,
            size_bytes: size_bytes as i64,
            checksum: format!("{:x}", digest.compute()),
        })
    }

    /// Remove a partial upload along with any bucket directories it leaves empty.
    async fn abandon_temp(&self, tmp_path: &Path, parent: &Path) {
        if let Err(err) = fs::remove_file(tmp_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove temp file {}: {}", tmp_path.display(), err);
            }
        }
        self.prune_empty_dirs(parent).await;
    }

    /// Create the temp file, recreating the bucket directory once if a
    /// concurrent delete pruned it in between.
    async fn create_temp(&self, parent: &Path, tmp_path: &Path) -> io::Result<File> {
        fs::create_dir_all(parent).await?;
        match File::create(tmp_path).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(parent).await?;
                File::create(tmp_path).await
            }
            other => other,
        }
    }

    /// Open a blob for streaming out.
    pub async fn open_for_read(&self, handle: &str) -> ServiceResult<File> {
        Self::ensure_handle_safe(handle)?;
        File::open(self.blob_path(handle))
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => ServiceError::not_found("file contents not found"),
                _ => ServiceError::Storage(err),
            })
    }

    /// Remove a blob. Returns `false` if it was already gone.
    ///
    /// Empty date directories left behind are pruned best-effort.
    pub async fn delete(&self, handle: &str) -> ServiceResult<bool> {
        Self::ensure_handle_safe(handle)?;
        let file_path = self.blob_path(handle);
        let removed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed blob {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(ServiceError::Storage(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }

        Ok(removed)
    }

    /// Whether a blob exists for `handle`.
    pub async fn exists(&self, handle: &str) -> bool {
        Self::ensure_handle_safe(handle).is_ok()
            && fs::try_exists(self.blob_path(handle))
                .await
                .unwrap_or(false)
    }

    /// Recursively remove empty directories up to `base_path`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Wrap an in-memory buffer as a single-chunk byte stream.
#[cfg(test)]
pub fn bytes_stream(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures::stream::iter(vec![Ok(Bytes::from_static(data))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> BlobStore {
        BlobStore::new(dir.path(), 1024)
    }

    #[tokio::test]
    async fn store_reports_real_size_and_date_bucketed_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"%PDF-1.7\n")),
            Ok(Bytes::from_static(b"body")),
        ]);
        let blob = store.store(chunks).await.unwrap();

        assert_eq!(blob.size_bytes, 13);
        assert_eq!(blob.checksum, format!("{:x}", md5::compute(b"%PDF-1.7\nbody")));
        assert_eq!(blob.handle.split('/').count(), 4);
        assert!(blob.handle.ends_with(".pdf"));
        assert!(store.exists(&blob.handle).await);
    }

    #[tokio::test]
    async fn handles_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let a = store.store(bytes_stream(b"same")).await.unwrap();
        let b = store.store(bytes_stream(b"same")).await.unwrap();
        assert_ne!(a.handle, b.handle);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let blob = store.store(bytes_stream(b"data")).await.unwrap();
        assert!(store.delete(&blob.handle).await.unwrap());
        assert!(!store.delete(&blob.handle).await.unwrap());
        assert!(!store.exists(&blob.handle).await);
        // date directories were pruned
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), 4);

        let err = store.store(bytes_stream(b"too large")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let leftovers = walk_files(dir.path());
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
        // the date directories created for the upload are gone too
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_stream_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ]);
        let err = store.store(chunks).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
        assert!(walk_files(dir.path()).is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_upload_keeps_sibling_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path(), 8);

        let kept = store.store(bytes_stream(b"small")).await.unwrap();
        assert!(store.store(bytes_stream(b"far too large")).await.is_err());

        // the shared bucket still holds the earlier blob
        assert!(store.exists(&kept.handle).await);
        assert_eq!(walk_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn unwritable_root_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let store = BlobStore::new(&blocker, 1024);

        let err = store.store(bytes_stream(b"data")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(_)));
    }

    #[tokio::test]
    async fn traversal_handles_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.delete("../etc/passwd").await.is_err());
        assert!(store.open_for_read("/abs/path.pdf").await.is_err());
        assert!(matches!(
            store.open_for_read("2024/01/01/missing.pdf").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    fn walk_files(root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out
    }
}
