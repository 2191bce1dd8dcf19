//! Paginated, rate-limited retrieval of one query region.
//!
//! A [`CellFetcher`] drains every page of a single logical query, gating each
//! remote call (retries included) on the shared [`RateLimiter`], and records
//! whether the remote record cap was reached. Transient failures are retried
//! under a [`RetryPolicy`]; anything else, or a transient failure that outlives
//! the retry budget, comes back as a [`CellError`] naming the region.

use std::{fmt, time::Duration};

use catastro_source::{
    Page, PageCursor, RawRecord, RemoteError, RemoteQuery, RemoteQueryClient, SearchFilters,
    SpatialFilter,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub use error::{CellError, FetchError};

use crate::{grid::GridCell, rate_limit::RateLimiter};

/// Consecutive empty pages, each still claiming more results, before a region
/// is failed.
const MAX_EMPTY_PAGES: u32 = 3;

mod error {
    use catastro_source::RemoteError;
    use thiserror::Error;

    use super::QueryRegion;

    /// A region that could not be fetched, with the last remote failure.
    #[derive(Error, Debug, Clone, PartialEq)]
    #[error("{region} failed after {attempts} attempt(s): {source}")]
    pub struct CellError {
        pub region: QueryRegion,
        pub attempts: u32,
        #[source]
        pub source: RemoteError,
    }

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum FetchError {
        #[error("Fetch cancelled")]
        Cancelled,
        #[error(transparent)]
        Exhausted(#[from] CellError),
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per remote call, the first included. Zero behaves as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the `attempt`-th failure (1-based), capped at `max_backoff`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// The unit of remote querying: a grid cell, or the single implicit cell of a
/// municipality or identifier search.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRegion {
    Cell(GridCell),
    Municipality(String),
    Identifier(String),
}

impl QueryRegion {
    #[must_use]
    pub fn filter(&self) -> SpatialFilter {
        match self {
            Self::Cell(cell) => SpatialFilter::BoundingBox(cell.bbox),
            Self::Municipality(name) => SpatialFilter::Municipality(name.clone()),
            Self::Identifier(id) => SpatialFilter::Identifier(id.clone()),
        }
    }

    /// Row-major position for grid cells; other regions sort first.
    #[must_use]
    pub const fn grid_position(&self) -> (u32, u32) {
        match self {
            Self::Cell(cell) => (cell.row, cell.col),
            Self::Municipality(_) | Self::Identifier(_) => (0, 0),
        }
    }
}

impl fmt::Display for QueryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell(cell) => write!(f, "{cell}"),
            Self::Municipality(name) => write!(f, "municipality '{name}'"),
            Self::Identifier(id) => write!(f, "catastro '{id}'"),
        }
    }
}

/// Everything retrieved for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFetchResult {
    pub region: QueryRegion,
    pub records: Vec<RawRecord>,
    /// The region returned the remote maximum and may be truncated.
    pub hit_cap: bool,
}

impl CellFetchResult {
    #[must_use]
    pub fn new(region: QueryRegion, records: Vec<RawRecord>, record_cap: usize) -> Self {
        let hit_cap = records.len() >= record_cap;
        Self {
            region,
            records,
            hit_cap,
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }
}

/// Drives one region's pagination against a remote client.
pub struct CellFetcher<'a, C: ?Sized> {
    client: &'a C,
    limiter: &'a RateLimiter,
    retry: &'a RetryPolicy,
    filters: &'a SearchFilters,
    record_cap: usize,
    cancel: &'a CancellationToken,
}

impl<'a, C: RemoteQueryClient + ?Sized> CellFetcher<'a, C> {
    pub const fn new(
        client: &'a C,
        limiter: &'a RateLimiter,
        retry: &'a RetryPolicy,
        filters: &'a SearchFilters,
        record_cap: usize,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            filters,
            record_cap,
            cancel,
        }
    }

    /// Fetch pages until the source runs dry or the record cap is reached.
    ///
    /// A page that carries the count past the cap is kept whole. Empty pages
    /// that still hand out a continuation are followed, but a short run of them
    /// fails the region instead of ending it early.
    #[instrument(name = "Fetch region", level = "debug", skip_all, fields(cell = %region))]
    pub async fn fetch(&self, region: QueryRegion) -> Result<CellFetchResult, FetchError> {
        let filter = region.filter();
        let mut records: Vec<RawRecord> = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        let mut pages = 0_usize;
        let mut empty_pages = 0_u32;

        loop {
            let page = self.fetch_page(&region, &filter, cursor.as_ref()).await?;
            pages += 1;
            let (batch, next) = page.into_parts();
            let received = batch.len();
            records.extend(batch);

            if records.len() >= self.record_cap {
                break;
            }
            let Some(next) = next else {
                break;
            };
            if received == 0 {
                empty_pages += 1;
                if empty_pages >= MAX_EMPTY_PAGES {
                    warn!(
                        cell = %region,
                        pages,
                        empty_pages,
                        "Continuation keeps returning empty pages"
                    );
                    return Err(CellError {
                        region: region.clone(),
                        attempts: empty_pages,
                        source: RemoteError::InvalidResponse(format!(
                            "{empty_pages} consecutive empty pages with a continuation"
                        )),
                    }
                    .into());
                }
                debug!(
                    cell = %region,
                    pages,
                    empty_pages,
                    "Empty page with a continuation, following"
                );
            } else {
                empty_pages = 0;
            }
            cursor = Some(next);
        }

        let result = CellFetchResult::new(region, records, self.record_cap);
        debug!(
            cell = %result.region,
            records = result.count(),
            pages,
            hit_cap = result.hit_cap,
            "Region fetched"
        );
        Ok(result)
    }

    async fn fetch_page(
        &self,
        region: &QueryRegion,
        filter: &SpatialFilter,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, FetchError> {
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                () = self.limiter.acquire() => {}
            }

            let query = RemoteQuery {
                filter,
                attributes: self.filters,
                cursor,
            };
            let outcome: Result<Page, RemoteError> = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                outcome = self.client.query(query) => outcome,
            };

            match outcome {
                Ok(page) => return Ok(page),
                Err(source) if source.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        cell = %region,
                        attempt,
                        error = %source,
                        delay_ms = delay.as_millis(),
                        "Transient remote failure, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                        () = sleep(delay) => {}
                    }
                }
                Err(source) => {
                    warn!(cell = %region, attempt, error = %source, "Giving up on region");
                    return Err(CellError {
                        region: region.clone(),
                        attempts: attempt,
                        source,
                    }
                    .into());
                }
            }
        }
    }
}
