//! Represents an uploaded document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a stored document. The bytes live in the blob store under
/// `storage_path`; this struct never holds content.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct File {
    /// Unique identifier.
    pub id: Uuid,

    /// Display name, unique per `(folder_id, owner_id)`.
    pub name: String,

    /// Sanitised filename as uploaded, used for downloads.
    pub original_filename: String,

    /// Opaque blob handle. Not exposed to clients.
    #[serde(skip_serializing)]
    pub storage_path: String,

    /// Size of the persisted blob in bytes.
    pub size_bytes: i64,

    pub mime_type: String,

    /// Hex MD5 of the blob contents.
    pub checksum: String,

    /// Containing folder. `None` for root-level files.
    pub folder_id: Option<Uuid>,

    pub owner_id: Uuid,

    pub uploaded_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
