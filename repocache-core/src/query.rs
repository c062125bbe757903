//! In-memory query composition.
//!
//! Backends that hand back a materialised sequence from `query_all` get
//! filtering, sorting and paging from here.

use crate::filter::{lookup_field, sort_compare};
use crate::{Filter, PagingOptions, SortDirection};
use serde::Serialize;
use serde_json::Value;

/// Outcome of [`apply_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput<T> {
    pub items: Vec<T>,
    /// Number of items that matched the filter before paging.
    pub total_items: u64,
}

/// Filter, sort, count and page a sequence.
///
/// Sorting is stable, so items with equal sort keys keep backend order.
/// Without paging every matching item is returned.
pub fn apply_query<T: Serialize>(
    items: Vec<T>,
    filter: Option<&Filter<T>>,
    paging: Option<&PagingOptions>,
) -> QueryOutput<T> {
    let mut matched: Vec<T> = match filter {
        Some(filter) => items.into_iter().filter(|item| filter.matches(item)).collect(),
        None => items,
    };
    let total_items = matched.len() as u64;

    let Some(paging) = paging else {
        return QueryOutput {
            items: matched,
            total_items,
        };
    };

    if let Some(sort) = &paging.sort {
        let mut keyed: Vec<(Option<Value>, T)> = matched
            .into_iter()
            .map(|item| {
                let key = serde_json::to_value(&item)
                    .ok()
                    .and_then(|doc| lookup_field(&doc, &sort.field).cloned());
                (key, item)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = sort_compare(a.as_ref(), b.as_ref());
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
        matched = keyed.into_iter().map(|(_, item)| item).collect();
    }

    let items = matched
        .into_iter()
        .skip(paging.skip())
        .take(paging.page_size as usize)
        .collect();

    QueryOutput { items, total_items }
}
