//! Offset/limit windows over ordered comment sequences.

use crate::error::{Result, StoreError};

/// A validated offset/limit window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    /// Validate client-supplied bounds. Negative values are rejected; a zero
    /// limit is a valid, empty window.
    pub fn new(limit: i64, offset: i64) -> Result<Self> {
        if limit < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "limit must not be negative (got {})",
                limit
            )));
        }
        if offset < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "offset must not be negative (got {})",
                offset
            )));
        }
        Ok(Self {
            offset: usize::try_from(offset).unwrap_or(usize::MAX),
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
        })
    }

    /// Half-open index range `[offset, min(offset + limit, len))` for a
    /// sequence of `len` items, or `None` when the offset is past the end.
    pub fn range(&self, len: usize) -> Option<std::ops::Range<usize>> {
        if self.offset > len {
            return None;
        }
        let end = self.offset.saturating_add(self.limit).min(len);
        Some(self.offset..end)
    }

    /// Bounds in the signed form SQL `LIMIT`/`OFFSET` expects.
    pub(crate) fn sql_bounds(&self) -> (i64, i64) {
        (
            i64::try_from(self.limit).unwrap_or(i64::MAX),
            i64::try_from(self.offset).unwrap_or(i64::MAX),
        )
    }
}

/// Slice `items` to the window described by `page`.
pub fn paginate<T>(items: &[T], page: Page) -> &[T] {
    match page.range(items.len()) {
        Some(range) => &items[range],
        None => &[],
    }
}
