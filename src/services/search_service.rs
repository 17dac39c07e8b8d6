//! SearchService — flat, case-insensitive substring search over folder and
//! file names across all owners. No ranking: each result set is ordered by
//! name and paginated independently.

use crate::{
    errors::{ServiceError, ServiceResult},
    models::{
        file::File,
        folder::Folder,
        listing::{Page, SearchResults},
    },
    services::{file_service::FILE_COLUMNS, fold_name, folder_service::FOLDER_COLUMNS},
};
use sqlx::SqlitePool;

pub const MIN_QUERY_CHARS: usize = 2;
pub const DEFAULT_SEARCH_LIMIT: i64 = 50;
pub const MAX_SEARCH_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct SearchService {
    pub db: SqlitePool,
}

/// Build a `LIKE` pattern matching `query` anywhere, with wildcards escaped.
fn contains_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl SearchService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Folders whose name contains `query`, and files whose name or original
    /// filename contains it. Names are compared in their stored folded form,
    /// so case is ignored beyond ASCII too.
    pub async fn search(
        &self,
        query: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> ServiceResult<SearchResults> {
        let query = query.trim();
        if query.chars().count() < MIN_QUERY_CHARS {
            return Err(ServiceError::validation(format!(
                "Search query must be at least {MIN_QUERY_CHARS} characters"
            )));
        }
        let page = Page::clamped(limit, offset, DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT);
        let pattern = contains_pattern(&fold_name(query));

        let mut tx = self.db.begin().await?;

        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE name_folded LIKE ? ESCAPE '\\'
             ORDER BY name ASC, id LIMIT ? OFFSET ?"
        ))
        .bind(&pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *tx)
        .await?;

        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE name_folded LIKE ?1 ESCAPE '\\' OR original_filename LIKE ?1 ESCAPE '\\'
             ORDER BY name ASC, id LIMIT ?2 OFFSET ?3"
        ))
        .bind(&pattern)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SearchResults {
            query: query.to_string(),
            folders,
            files,
            limit: page.limit,
            offset: page.offset,
        })
    }
}
