//! The contract between the search core and a remote cadastral service.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    Result, filters::SearchFilters, geometry::BoundingBox, record::RawRecord,
};

/// What a single logical query selects on the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpatialFilter {
    BoundingBox(BoundingBox),
    Municipality(String),
    Identifier(String),
}

impl fmt::Display for SpatialFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoundingBox(bbox) => write!(f, "bbox {bbox}"),
            Self::Municipality(name) => write!(f, "municipality '{name}'"),
            Self::Identifier(id) => write!(f, "catastro '{id}'"),
        }
    }
}

/// Opaque continuation token handed back by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn from_offset(offset: usize) -> Self {
        Self(offset.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret the token as a record offset, for offset-paginated services.
    #[must_use]
    pub fn as_offset(&self) -> Option<usize> {
        self.0.parse().ok()
    }
}

/// One request for one page.
///
/// `attributes` may be pushed down to the service to shrink the result; the
/// caller filters locally regardless, so ignoring them is always correct.
#[derive(Debug, Clone, Copy)]
pub struct RemoteQuery<'a> {
    pub filter: &'a SpatialFilter,
    pub attributes: &'a SearchFilters,
    pub cursor: Option<&'a PageCursor>,
}

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    next_cursor: Option<PageCursor>,
}

impl Page {
    /// An empty cursor token is normalised to "no further pages".
    #[must_use]
    pub fn new(records: Vec<RawRecord>, next_cursor: Option<PageCursor>) -> Self {
        let next_cursor = next_cursor.filter(|c| !c.as_str().is_empty());
        Self {
            records,
            next_cursor,
        }
    }

    #[must_use]
    pub fn last(records: Vec<RawRecord>) -> Self {
        Self::new(records, None)
    }

    #[must_use]
    pub const fn next_cursor(&self) -> Option<&PageCursor> {
        self.next_cursor.as_ref()
    }

    #[must_use]
    pub const fn is_last(&self) -> bool {
        self.next_cursor.is_none()
    }

    #[must_use]
    pub fn into_parts(self) -> (Vec<RawRecord>, Option<PageCursor>) {
        (self.records, self.next_cursor)
    }
}

/// A record-capped remote source.
///
/// Implementations return at most [`crate::RECORD_CAP`] records across all pages
/// of one logical query. Session establishment and renewal are internal to the
/// implementation; a rejected session surfaces as
/// [`crate::RemoteError::Unauthorized`].
#[async_trait]
pub trait RemoteQueryClient: Send + Sync {
    async fn query(&self, query: RemoteQuery<'_>) -> Result<Page>;
}

#[async_trait]
impl<T: RemoteQueryClient + ?Sized> RemoteQueryClient for Arc<T> {
    async fn query(&self, query: RemoteQuery<'_>) -> Result<Page> {
        (**self).query(query).await
    }
}

#[async_trait]
impl<T: RemoteQueryClient + ?Sized> RemoteQueryClient for &T {
    async fn query(&self, query: RemoteQuery<'_>) -> Result<Page> {
        (**self).query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cursor_means_last_page() {
        let page = Page::new(Vec::new(), Some(PageCursor::new("")));
        assert!(page.is_last());

        let page = Page::new(Vec::new(), Some(PageCursor::from_offset(100)));
        assert!(!page.is_last());
        assert_eq!(page.next_cursor().and_then(PageCursor::as_offset), Some(100));
    }

    #[test]
    fn test_spatial_filter_display() {
        let bbox = BoundingBox::new(18.0, 18.5, -66.5, -66.0).unwrap();
        assert!(SpatialFilter::BoundingBox(bbox).to_string().starts_with("bbox"));
        assert_eq!(
            SpatialFilter::Municipality("SAN JUAN".into()).to_string(),
            "municipality 'SAN JUAN'"
        );
    }
}
