//! Represents a folder in the per-owner namespace tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::file::File;

/// A node of the folder tree.
///
/// Folders form an adjacency list through `parent_id`. Among folders sharing
/// the same `(parent_id, owner_id)` the `name` is unique.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Folder {
    /// Unique identifier.
    pub id: Uuid,

    /// Display name, never empty.
    pub name: String,

    /// Containing folder. `None` for root-level folders.
    pub parent_id: Option<Uuid>,

    /// The user this folder belongs to. Never changes.
    pub owner_id: Uuid,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// A folder together with its direct children (one level deep).
#[derive(Serialize, Debug)]
pub struct FolderContents {
    pub folder: Folder,

    /// Child folders ordered by name.
    pub subfolders: Vec<Folder>,

    /// Child files ordered by name.
    pub files: Vec<File>,
}
