//! Page-by-page results

use crate::errors::DalError;
use crate::query_builder::builder::QueryBuilder;
use crate::rows::TypedRows;
use serde::Serialize;

/// Position of a page within its query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    /// Rows per page; 0 means the page holds everything
    pub limit: u64,
    pub current_page: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub next_page: Option<u64>,
    pub prev_page: Option<u64>,
}

impl Pagination {
    pub fn new(limit: u64, current_page: u64, has_next_page: bool) -> Self {
        let has_prev_page = limit > 0 && current_page > 1;
        Self {
            limit,
            current_page,
            has_next_page,
            has_prev_page,
            next_page: current_page.checked_add(1).filter(|_| has_next_page),
            prev_page: has_prev_page.then(|| current_page - 1),
        }
    }

    /// Offset of the first row of this page
    pub fn offset(&self) -> u64 {
        self.current_page.saturating_sub(1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone)]
pub struct PaginatedRows {
    pub rows: TypedRows,
    pub pagination: Pagination,
    builder: QueryBuilder,
}

impl PaginatedRows {
    pub(crate) fn new(rows: TypedRows, pagination: Pagination, builder: QueryBuilder) -> Self {
        Self {
            rows,
            pagination,
            builder,
        }
    }

    /// The following page, if there is one
    pub async fn next(&self) -> Result<Option<PaginatedRows>, DalError> {
        match self.pagination.next_page {
            Some(page) => Ok(Some(self.builder.paginate(self.pagination.limit, page).await?)),
            None => Ok(None),
        }
    }

    /// The preceding page, if there is one
    pub async fn previous(&self) -> Result<Option<PaginatedRows>, DalError> {
        match self.pagination.prev_page {
            Some(page) => Ok(Some(self.builder.paginate(self.pagination.limit, page).await?)),
            None => Ok(None),
        }
    }

    /// Number of rows over all pages; runs a count query
    pub async fn total(&self) -> Result<u64, DalError> {
        self.builder.count().await
    }

    pub fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "data": self.rows.as_json(),
            "pagination": self.pagination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_links() {
        let first = Pagination::new(5, 1, true);
        assert_eq!(first.offset(), 0);
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.prev_page, None);
        assert!(!first.has_prev_page);

        let last = Pagination::new(5, 3, false);
        assert_eq!(last.offset(), 10);
        assert_eq!(last.next_page, None);
        assert_eq!(last.prev_page, Some(2));

        let everything = Pagination::new(0, 1, false);
        assert_eq!(everything.offset(), 0);
        assert!(!everything.has_prev_page);
    }

    #[test]
    fn test_huge_pages_saturate() {
        let far = Pagination::new(u64::MAX, u64::MAX, true);
        assert_eq!(far.offset(), u64::MAX);
        assert_eq!(far.next_page, None);
        assert_eq!(far.prev_page, Some(u64::MAX - 1));
    }

    #[test]
    fn test_pagination_json() {
        let json = serde_json::to_value(Pagination::new(10, 2, false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "limit": 10,
                "current_page": 2,
                "has_next_page": false,
                "has_prev_page": true,
                "next_page": null,
                "prev_page": 1
            })
        );
    }
}
