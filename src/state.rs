//! Shared application state handed to every handler.

use crate::services::{
    blob_store::BlobStore, file_service::FileService, folder_service::FolderService,
    identity_service::IdentityService, search_service::SearchService,
};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub blobs: BlobStore,
    pub identity: IdentityService,
    pub folders: FolderService,
    pub files: FileService,
    pub search: SearchService,
}

impl AppState {
    pub fn new(db: SqlitePool, blobs: BlobStore) -> Self {
        Self {
            identity: IdentityService::new(db.clone()),
            folders: FolderService::new(db.clone(), blobs.clone()),
            files: FileService::new(db.clone(), blobs.clone()),
            search: SearchService::new(db.clone()),
            blobs,
            db,
        }
    }
}
