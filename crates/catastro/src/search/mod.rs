//! Search requests, results and the orchestration that connects them.
//!
//! A [`SearchRequest`] names one of three modes. Radius searches are split into
//! a grid of cells; municipality and identifier searches run as a single
//! implicit cell. Every mode goes through the same fetch, reconcile and report
//! phases, see [`orchestration`].

pub use error::SearchError;
mod orchestration;

use std::{slice, time::Duration};

use catastro_source::{Point, SearchFilters};
pub(crate) use error::Result;
pub use orchestration::{SearchConfig, SearchPhase, search_inner};

use crate::{aggregate::PropertyRecord, completeness::CompletenessReport};

/// Calls per trailing minute when a request does not set its own rate.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;

mod error {
    use thiserror::Error;

    use crate::fetch::CellError;

    #[derive(Error, Debug)]
    pub enum SearchError {
        #[error("Invalid search request: {0}")]
        InvalidRequest(String),
        #[error("Search failed: {0}")]
        CellFailed(#[from] CellError),
        #[error("Search cancelled")]
        Cancelled,
        #[error("No property found for catastro '{0}'")]
        CenterNotFound(String),
        #[error("Property '{0}' has no coordinates")]
        MissingPosition(String),
    }
    pub type Result<T> = std::result::Result<T, SearchError>;
}

/// What to search for.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum SearchMode {
    /// Everything within `radius_miles` of `center`, queried as a
    /// `grid_size` x `grid_size` grid over the circle's bounding box.
    Radius {
        center: Point,
        radius_miles: f64,
        grid_size: u32,
    },
    Municipality {
        name: String,
    },
    ById {
        id: String,
    },
}

/// A complete search invocation.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub mode: SearchMode,
    pub filters: SearchFilters,
    pub rate_limit_per_minute: u32,
}

impl SearchRequest {
    #[must_use]
    pub fn new(mode: SearchMode) -> Self {
        Self {
            mode,
            filters: SearchFilters::default(),
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }

    #[must_use]
    pub fn radius(center: Point, radius_miles: f64, grid_size: u32) -> Self {
        Self::new(SearchMode::Radius {
            center,
            radius_miles,
            grid_size,
        })
    }

    #[must_use]
    pub fn municipality(name: impl Into<String>) -> Self {
        Self::new(SearchMode::Municipality { name: name.into() })
    }

    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new(SearchMode::ById { id: id.into() })
    }

    #[must_use]
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub const fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    /// Grid size the request is partitioned with; 1 for single-region modes.
    #[must_use]
    pub const fn grid_size(&self) -> u32 {
        match self.mode {
            SearchMode::Radius { grid_size, .. } => grid_size,
            SearchMode::Municipality { .. } | SearchMode::ById { .. } => 1,
        }
    }
}

/// Counters gathered over one search.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub cells_queried: usize,
    /// Records received across all regions, duplicates included
    pub records_fetched: usize,
    pub unique_records: usize,
    pub records_returned: usize,
    pub elapsed: Duration,
}

/// Ordered records plus the completeness report of the search that produced them.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub records: Vec<PropertyRecord>,
    pub completeness: CompletenessReport,
    pub stats: SearchStats,
}

impl SearchResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, PropertyRecord> {
        self.records.iter()
    }

    #[must_use]
    pub const fn possibly_incomplete(&self) -> bool {
        self.completeness.possibly_incomplete
    }
}

impl<'a> IntoIterator for &'a SearchResult {
    type Item = &'a PropertyRecord;
    type IntoIter = slice::Iter<'a, PropertyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for SearchResult {
    type Item = PropertyRecord;
    type IntoIter = std::vec::IntoIter<PropertyRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
