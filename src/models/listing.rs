//! Result shapes for listing and search, plus limit/offset clamping.

use serde::Serialize;

use super::{file::File, folder::Folder};

/// A clamped limit/offset pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    /// Clamp caller-supplied values: `limit` into `1..=max` (falling back to
    /// `default` when absent) and `offset` to be non-negative.
    pub fn clamped(limit: Option<i64>, offset: Option<i64>, default: i64, max: i64) -> Self {
        Self {
            limit: limit.unwrap_or(default).clamp(1, max),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

/// Root-level folders and files, each independently paginated.
#[derive(Serialize, Debug)]
pub struct RootListing {
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
    pub limit: i64,
    pub offset: i64,
}

/// Substring search hits across all owners.
#[derive(Serialize, Debug)]
pub struct SearchResults {
    pub query: String,
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
    pub limit: i64,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_is_clamped() {
        assert_eq!(
            Page::clamped(Some(5000), Some(-3), 100, 1000),
            Page { limit: 1000, offset: 0 }
        );
        assert_eq!(
            Page::clamped(None, None, 50, 500),
            Page { limit: 50, offset: 0 }
        );
        assert_eq!(Page::clamped(Some(0), Some(7), 50, 500).limit, 1);
    }
}
