//! Paging requests and paged results.
//!
//! A paged read never mutates its request. The total item count comes back
//! inside [`Page`] next to the items, whether the read was served from cache
//! or from storage.

use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Sort key for paged reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortExpr {
    /// Dotted field path, resolved the same way as filter fields.
    pub field: String,
    pub direction: SortDirection,
}

impl SortExpr {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Paging request: 1-based page number, page size and optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PagingOptions {
    pub page_number: u32,
    pub page_size: u32,
    pub sort: Option<SortExpr>,
}

impl PagingOptions {
    /// Create an unsorted paging request.
    pub fn new(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
            sort: None,
        }
    }

    /// Create a request sorted ascending by `field`.
    pub fn sorted(page_number: u32, page_size: u32, field: impl Into<String>) -> Self {
        Self::new(page_number, page_size).with_sort(SortExpr::ascending(field))
    }

    pub fn with_sort(mut self, sort: SortExpr) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Number of matching items that precede this page.
    pub fn skip(&self) -> usize {
        (self.page_number.saturating_sub(1) as usize).saturating_mul(self.page_size as usize)
    }

    /// Validate the request.
    ///
    /// Page numbers start at 1 and a page holds at least one item.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_number == 0 {
            return Err(ValidationError::InvalidPaging {
                field: "page_number",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ValidationError::InvalidPaging {
                field: "page_size",
                reason: "must be >= 1".to_string(),
            });
        }
        if let Some(sort) = &self.sort {
            if sort.field.trim().is_empty() {
                return Err(ValidationError::InvalidPaging {
                    field: "sort.field",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Canonical fingerprint covering page number, size and sort key.
    pub fn fingerprint(&self) -> String {
        let sort = match &self.sort {
            Some(sort) => format!(
                "{}:{}:{}",
                sort.field.len(),
                sort.field,
                sort.direction.as_str()
            ),
            None => "_".to_string(),
        };
        format!(
            "page={};size={};sort={}",
            self.page_number, self.page_size, sort
        )
    }
}

/// One page of results plus the total number of matching items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub page_number: u32,
    pub page_size: u32,
    /// Items matching the query across all pages.
    pub total_items: u64,
}

impl<R> Page<R> {
    pub fn new(items: Vec<R>, paging: &PagingOptions, total_items: u64) -> Self {
        Self {
            items,
            page_number: paging.page_number,
            page_size: paging.page_size,
            total_items,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total_items.div_ceil(u64::from(self.page_size))
    }

    pub fn has_next_page(&self) -> bool {
        u64::from(self.page_number) < self.total_pages()
    }

    pub fn has_previous_page(&self) -> bool {
        self.page_number > 1
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transform the items, keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(R) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            page_size: self.page_size,
            total_items: self.total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip() {
        assert_eq!(PagingOptions::new(1, 10).skip(), 0);
        assert_eq!(PagingOptions::new(3, 10).skip(), 20);
    }

    #[test]
    fn test_validate_rejects_zero_page_number() {
        let err = PagingOptions::new(0, 10).validate().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidPaging {
                field: "page_number",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let err = PagingOptions::new(1, 0).validate().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidPaging {
                field: "page_size",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_blank_sort_field() {
        assert!(PagingOptions::sorted(1, 1, " ").validate().is_err());
        assert!(PagingOptions::sorted(1, 1, "name").validate().is_ok());
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = PagingOptions::sorted(1, 10, "name");
        let fingerprints = [
            base.fingerprint(),
            PagingOptions::sorted(2, 10, "name").fingerprint(),
            PagingOptions::sorted(1, 20, "name").fingerprint(),
            PagingOptions::sorted(1, 10, "email").fingerprint(),
            PagingOptions::new(1, 10)
                .with_sort(SortExpr::descending("name"))
                .fingerprint(),
            PagingOptions::new(1, 10).fingerprint(),
        ];
        for (i, a) in fingerprints.iter().enumerate() {
            for b in fingerprints.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(base.fingerprint(), PagingOptions::sorted(1, 10, "name").fingerprint());
    }

    #[test]
    fn test_page_metadata() {
        let paging = PagingOptions::new(2, 2);
        let page = Page::new(vec![3, 4], &paging, 5);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next_page());
        assert!(page.has_previous_page());

        let last = Page::new(vec![5], &PagingOptions::new(3, 2), 5);
        assert!(!last.has_next_page());
    }

    #[test]
    fn test_page_map_keeps_metadata() {
        let page = Page::new(vec![1, 2], &PagingOptions::new(1, 2), 7);
        let mapped = page.map(|n| n.to_string());
        assert_eq!(mapped.items, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(mapped.total_items, 7);
        assert_eq!(mapped.page_size, 2);
    }
}
