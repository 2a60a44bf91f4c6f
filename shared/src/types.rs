//! Common types used across the platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pagination parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Pagination {
    /// Rows to skip for this page (pages are 1-based)
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }

    /// Build the response metadata for a result set of `total_items`
    pub fn meta(&self, total_items: u64) -> PaginationMeta {
        let total_pages = if self.per_page == 0 {
            0
        } else {
            total_items.div_ceil(u64::from(self.per_page)) as u32
        };
        PaginationMeta {
            page: self.page.max(1),
            per_page: self.per_page,
            total_items,
            total_pages,
        }
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

/// Time range for queries (both ends inclusive)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

/// Sort direction for time-ordered listings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A string did not name any variant of an enum
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        let p = Pagination { page: 3, per_page: 25 };
        assert_eq!(p.offset(), 50);
        assert_eq!(p.limit(), 25);

        let first = Pagination { page: 0, per_page: 10 };
        assert_eq!(first.offset(), 0);
    }

    #[test]
    fn test_pagination_meta() {
        let p = Pagination { page: 1, per_page: 20 };
        let meta = p.meta(41);
        assert_eq!(meta.total_pages, 3);
        assert_eq!(meta.total_items, 41);

        assert_eq!(p.meta(0).total_pages, 0);
    }
}
