//! src/services/folder_service.rs
//!
//! FolderService — the folder half of the namespace tree engine. Folders form
//! a per-owner adjacency list; names are unique among siblings sharing the
//! same `(parent_id, owner_id)`. That invariant is checked up front for a
//! clean error and backed by a unique index, so a racing insert that slips
//! past the check still surfaces as `Conflict`.
//!
//! Every mutation runs in one explicit `BEGIN IMMEDIATE` transaction, so
//! concurrent writers queue on the database lock. Deleting a folder
//! collects its subtree breadth-first, removes all file and folder rows in
//! that transaction, and only after commit reclaims the blobs of the
//! removed files.

use crate::{
    errors::{ServiceError, ServiceResult, is_foreign_key_violation, is_unique_violation},
    models::{
        file::File,
        folder::{Folder, FolderContents},
        listing::{Page, RootListing},
    },
    services::{
        blob_store::BlobStore,
        file_service::{FILE_COLUMNS, fetch_root_files},
        begin_write, fold_name, normalize_name, reclaim_blobs,
    },
};
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashSet, VecDeque};
use tracing::info;
use uuid::Uuid;

pub(crate) const FOLDER_COLUMNS: &str = "id, name, parent_id, owner_id, created_at, updated_at";

pub const DEFAULT_ROOT_LIMIT: i64 = 100;
pub const MAX_ROOT_LIMIT: i64 = 1000;

/// Upper bound on bound parameters per `IN (...)` statement.
const ID_CHUNK: usize = 500;

#[derive(Clone)]
pub struct FolderService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: SqlitePool,

    /// Blob store used to reclaim file contents after cascading deletes.
    pub blobs: BlobStore,
}

/// Fetch a folder by id on an existing connection or transaction.
pub(crate) async fn fetch_folder(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> ServiceResult<Option<Folder>> {
    let folder = sqlx::query_as::<_, Folder>(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(folder)
}

/// Whether a sibling folder named `name` exists under `(parent_id, owner_id)`,
/// ignoring `exclude` (the folder being renamed or moved).
async fn folder_name_taken(
    conn: &mut SqliteConnection,
    owner_id: Uuid,
    parent_id: Option<Uuid>,
    name: &str,
    exclude: Option<Uuid>,
) -> ServiceResult<bool> {
    let taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(
             SELECT 1 FROM folders
             WHERE owner_id = ? AND parent_id IS ? AND name = ? AND id IS NOT ?
         )",
    )
    .bind(owner_id)
    .bind(parent_id)
    .bind(name)
    .bind(exclude)
    .fetch_one(conn)
    .await?;
    Ok(taken)
}

/// Collect `root` and every descendant folder id, breadth-first.
///
/// The result starts with `root`, and every folder appears after its parent.
async fn collect_subtree(conn: &mut SqliteConnection, root: Uuid) -> ServiceResult<Vec<Uuid>> {
    let mut ordered = vec![root];
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);

    while let Some(id) = queue.pop_front() {
        let children: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM folders WHERE parent_id = ?")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;
        for child in children {
            if seen.insert(child) {
                ordered.push(child);
                queue.push_back(child);
            }
        }
    }

    Ok(ordered)
}

/// Blob handles of every file directly inside one of `folder_ids`.
async fn collect_file_handles(
    conn: &mut SqliteConnection,
    folder_ids: &[Uuid],
) -> ServiceResult<Vec<String>> {
    let mut handles = Vec::new();
    for chunk in folder_ids.chunks(ID_CHUNK) {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT storage_path FROM files WHERE folder_id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        let mut rows: Vec<String> = builder.build_query_scalar().fetch_all(&mut *conn).await?;
        handles.append(&mut rows);
    }
    Ok(handles)
}

/// Run `DELETE FROM {table} WHERE {column} IN (ids)` in bounded chunks.
async fn delete_where_in(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    ids: &[Uuid],
) -> ServiceResult<u64> {
    let mut removed = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE {column} IN ("));
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        removed += builder.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}

/// Whether `candidate` is `ancestor` itself or lies somewhere below it.
async fn is_within_subtree(
    conn: &mut SqliteConnection,
    candidate: Uuid,
    ancestor: Uuid,
) -> ServiceResult<bool> {
    let mut seen = HashSet::new();
    let mut cursor = Some(candidate);
    while let Some(id) = cursor {
        if id == ancestor {
            return Ok(true);
        }
        if !seen.insert(id) {
            break;
        }
        cursor = sqlx::query_scalar::<_, Option<Uuid>>("SELECT parent_id FROM folders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
    }
    Ok(false)
}

fn map_write_error(err: sqlx::Error) -> ServiceError {
    if is_unique_violation(&err) {
        ServiceError::conflict("A folder with this name already exists in this location")
    } else if is_foreign_key_violation(&err) {
        ServiceError::not_found("Parent folder or owner not found")
    } else {
        ServiceError::Database(err)
    }
}

impl FolderService {
    pub fn new(db: SqlitePool, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    /// Create a folder under `parent_id` (or at the root).
    ///
    /// The parent must exist and belong to `owner_id`. Not idempotent: a
    /// second identical call is a `Conflict`.
    pub async fn create_folder(
        &self,
        name: &str,
        owner_id: Uuid,
        parent_id: Option<Uuid>,
    ) -> ServiceResult<Folder> {
        let name = normalize_name(name, "Folder")?;
        let mut tx = begin_write(&self.db).await?;

        if let Some(parent_id) = parent_id {
            let parent = fetch_folder(&mut *tx, parent_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Parent folder not found"))?;
            if parent.owner_id != owner_id {
                return Err(ServiceError::forbidden(
                    "You can only create subfolders in your own folders",
                ));
            }
        }

        if folder_name_taken(&mut *tx, owner_id, parent_id, &name, None).await? {
            return Err(ServiceError::conflict(
                "A folder with this name already exists in this location",
            ));
        }

        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            name,
            parent_id,
            owner_id,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO folders (id, name, name_folded, parent_id, owner_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(folder.id)
        .bind(&folder.name)
        .bind(fold_name(&folder.name))
        .bind(folder.parent_id)
        .bind(folder.owner_id)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(map_write_error)?;

        tx.commit().await.map_err(map_write_error)?;

        info!(
            folder_id = %folder.id,
            owner_id = %owner_id,
            parent_id = ?parent_id,
            "folder created"
        );
        Ok(folder)
    }

    pub async fn get_folder(&self, folder_id: Uuid) -> ServiceResult<Option<Folder>> {
        let mut conn = self.db.acquire().await?;
        fetch_folder(&mut *conn, folder_id).await
    }

    /// Root-level folders, newest first, optionally restricted to one owner.
    pub async fn get_root_folders(
        &self,
        owner_id: Option<Uuid>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<(Vec<Folder>, Page)> {
        let page = Page::clamped(limit, offset, DEFAULT_ROOT_LIMIT, MAX_ROOT_LIMIT);
        let mut conn = self.db.acquire().await?;
        let folders = fetch_root_folders(&mut *conn, owner_id, page).await?;
        Ok((folders, page))
    }

    /// Root-level folders and files in one consistent read.
    pub async fn list_root(
        &self,
        owner_id: Option<Uuid>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<RootListing> {
        let page = Page::clamped(limit, offset, DEFAULT_ROOT_LIMIT, MAX_ROOT_LIMIT);
        let mut tx = self.db.begin().await?;
        let folders = fetch_root_folders(&mut *tx, owner_id, page).await?;
        let files = fetch_root_files(&mut *tx, owner_id, page).await?;
        tx.commit().await?;

        Ok(RootListing {
            folders,
            files,
            limit: page.limit,
            offset: page.offset,
        })
    }

    /// A folder with its direct subfolders and files, both ordered by name.
    ///
    /// `None` when the folder does not exist.
    pub async fn get_folder_contents(
        &self,
        folder_id: Uuid,
    ) -> ServiceResult<Option<FolderContents>> {
        let mut tx = self.db.begin().await?;
        let Some(folder) = fetch_folder(&mut *tx, folder_id).await? else {
            return Ok(None);
        };

        let subfolders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE parent_id = ? ORDER BY name ASC, id"
        ))
        .bind(folder_id)
        .fetch_all(&mut *tx)
        .await?;

        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE folder_id = ? ORDER BY name ASC, id"
        ))
        .bind(folder_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(FolderContents {
            folder,
            subfolders,
            files,
        }))
    }

    /// Rename a folder in place. Only the owner may rename.
    ///
    /// `None` when the folder does not exist.
    pub async fn update_folder(
        &self,
        folder_id: Uuid,
        new_name: &str,
        requester_id: Uuid,
    ) -> ServiceResult<Option<Folder>> {
        let name = normalize_name(new_name, "Folder")?;
        let mut tx = begin_write(&self.db).await?;

        let Some(mut folder) = fetch_folder(&mut *tx, folder_id).await? else {
            return Ok(None);
        };
        if folder.owner_id != requester_id {
            return Err(ServiceError::forbidden(
                "You do not have permission to edit this folder",
            ));
        }

        if folder_name_taken(
            &mut *tx,
            folder.owner_id,
            folder.parent_id,
            &name,
            Some(folder.id),
        )
        .await?
        {
            return Err(ServiceError::conflict(
                "A folder with this name already exists in this location",
            ));
        }

        folder.name = name;
        folder.updated_at = Utc::now();

        sqlx::query("UPDATE folders SET name = ?, name_folded = ?, updated_at = ? WHERE id = ?")
            .bind(&folder.name)
            .bind(fold_name(&folder.name))
            .bind(folder.updated_at)
            .bind(folder.id)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;

        tx.commit().await.map_err(map_write_error)?;

        info!(folder_id = %folder.id, new_name = %folder.name, "folder renamed");
        Ok(Some(folder))
    }

    /// Reparent a folder under `new_parent_id`, or to the root when `None`.
    ///
    /// Moves never cross owners and never place a folder inside its own
    /// subtree. `None` when the folder does not exist.
    pub async fn move_folder(
        &self,
        folder_id: Uuid,
        new_parent_id: Option<Uuid>,
        requester_id: Uuid,
    ) -> ServiceResult<Option<Folder>> {
        let mut tx = begin_write(&self.db).await?;

        let Some(mut folder) = fetch_folder(&mut *tx, folder_id).await? else {
            return Ok(None);
        };
        if folder.owner_id != requester_id {
            return Err(ServiceError::forbidden(
                "You do not have permission to move this folder",
            ));
        }

        if let Some(target_id) = new_parent_id {
            let target = fetch_folder(&mut *tx, target_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("Target folder not found"))?;
            if target.owner_id != folder.owner_id {
                return Err(ServiceError::forbidden(
                    "Folders can only be moved within your own folders",
                ));
            }
            if is_within_subtree(&mut *tx, target.id, folder.id).await? {
                return Err(ServiceError::validation(
                    "Cannot move a folder into itself or one of its descendants",
                ));
            }
        }

        if folder.parent_id == new_parent_id {
            return Ok(Some(folder));
        }

        if folder_name_taken(
            &mut *tx,
            folder.owner_id,
            new_parent_id,
            &folder.name,
            Some(folder.id),
        )
        .await?
        {
            return Err(ServiceError::conflict(
                "A folder with this name already exists in the destination",
            ));
        }

        folder.parent_id = new_parent_id;
        folder.updated_at = Utc::now();

        sqlx::query("UPDATE folders SET parent_id = ?, updated_at = ? WHERE id = ?")
            .bind(folder.parent_id)
            .bind(folder.updated_at)
            .bind(folder.id)
            .execute(&mut *tx)
            .await
            .map_err(map_write_error)?;

        tx.commit().await.map_err(map_write_error)?;

        info!(folder_id = %folder.id, new_parent_id = ?new_parent_id, "folder moved");
        Ok(Some(folder))
    }

    /// Delete a folder and its entire subtree.
    ///
    /// All descendant folder and file rows go in a single transaction, so
    /// readers see either the whole subtree or none of it. Blobs of the
    /// removed files are reclaimed after commit; reclamation failures are
    /// logged and do not fail the call. Returns `false` if the folder does
    /// not exist.
    pub async fn delete_folder(&self, folder_id: Uuid, requester_id: Uuid) -> ServiceResult<bool> {
        let mut tx = begin_write(&self.db).await?;

        let Some(folder) = fetch_folder(&mut *tx, folder_id).await? else {
            return Ok(false);
        };
        if folder.owner_id != requester_id {
            return Err(ServiceError::forbidden(
                "You do not have permission to delete this folder",
            ));
        }

        let subtree = collect_subtree(&mut *tx, folder.id).await?;
        let handles = collect_file_handles(&mut *tx, &subtree).await?;

        let files_removed = delete_where_in(&mut *tx, "files", "folder_id", &subtree).await?;
        // Deepest folders first so no row ever points at an already removed parent.
        let reversed: Vec<Uuid> = subtree.iter().rev().copied().collect();
        let folders_removed = delete_where_in(&mut *tx, "folders", "id", &reversed).await?;

        tx.commit().await?;

        let blobs_reclaimed = reclaim_blobs(&self.blobs, &handles).await;

        info!(
            folder_id = %folder.id,
            owner_id = %folder.owner_id,
            folders_removed,
            files_removed,
            blobs_reclaimed,
            "folder deleted"
        );
        Ok(true)
    }

    /// `true` iff the folder exists and belongs to `user_id`.
    pub async fn check_folder_ownership(&self, folder_id: Uuid, user_id: Uuid) -> ServiceResult<bool> {
        Ok(self
            .get_folder(folder_id)
            .await?
            .is_some_and(|folder| folder.owner_id == user_id))
    }
}

async fn fetch_root_folders(
    conn: &mut SqliteConnection,
    owner_id: Option<Uuid>,
    page: Page,
) -> ServiceResult<Vec<Folder>> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE parent_id IS NULL"
    ));
    if let Some(owner_id) = owner_id {
        builder.push(" AND owner_id = ");
        builder.push_bind(owner_id);
    }
    builder.push(" ORDER BY created_at DESC, id LIMIT ");
    builder.push_bind(page.limit);
    builder.push(" OFFSET ");
    builder.push_bind(page.offset);

    let folders: Vec<Folder> = builder.build_query_as().fetch_all(conn).await?;
    Ok(folders)
}
