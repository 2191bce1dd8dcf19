use std::{fmt, num::NonZeroU32, time::Instant};

use catastro_source::{Point, RECORD_CAP, RecordSchema, RemoteQueryClient};
use futures::{StreamExt, stream::FuturesUnordered};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{Result, SearchError, SearchMode, SearchRequest, SearchResult, SearchStats};
use crate::{
    aggregate::{Aggregator, RadiusQuery},
    completeness::CompletenessReport,
    config::SearchConfigBuilder,
    fetch::{CellFetchResult, CellFetcher, FetchError, QueryRegion, RetryPolicy},
    grid,
    rate_limit::{JitterConfig, RateLimiter},
};

/// Configuration for search behavior
///
/// `SearchConfig` controls how hard the remote service is pushed and how
/// results are reconciled. Use the builder pattern for convenient
/// configuration, or start from one of the presets.
///
/// # Examples
///
/// ```rust
/// use catastro::SearchConfig;
/// use std::time::Duration;
///
/// let config = SearchConfig::builder()
///     .max_attempts(5)
///     .jitter(Duration::from_millis(200), Duration::from_millis(800))
///     .build();
/// ```
///
/// Using preset configurations:
/// ```rust
/// use catastro::SearchConfigBuilder;
///
/// // No jitter, short backoff
/// let fast_config = SearchConfigBuilder::fast().build();
///
/// // More attempts, longer pauses between requests
/// let cautious_config = SearchConfigBuilder::cautious().build();
/// ```
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Record count at which a region is considered truncated
    pub record_cap: usize,
    /// Retry policy for transient remote failures
    pub retry: RetryPolicy,
    /// Randomised delay after every rate-limiter admission
    pub jitter: JitterConfig,
    /// Radius candidates from which the spatial index replaces a linear scan
    pub spatial_index_threshold: usize,
    /// Show a per-cell progress bar
    pub show_progress: bool,
    /// Names of the record fields the search interprets
    pub schema: RecordSchema,
}

impl SearchConfig {
    pub fn builder() -> SearchConfigBuilder {
        SearchConfigBuilder::default()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            record_cap: RECORD_CAP,
            retry: RetryPolicy::default(),
            jitter: JitterConfig::default(),
            spatial_index_threshold: 256,
            show_progress: false,
            schema: RecordSchema::default(),
        }
    }
}

/// Where a search invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Partitioning,
    Fetching,
    Reconciling,
    Reporting,
    Done,
    Failed,
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Partitioning => "partitioning",
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs phase transitions of one search.
struct PhaseTracker {
    phase: SearchPhase,
}

impl PhaseTracker {
    const fn new() -> Self {
        Self {
            phase: SearchPhase::Partitioning,
        }
    }

    fn advance(&mut self, next: SearchPhase) {
        debug!(from = %self.phase, to = %next, "Search phase");
        self.phase = next;
    }

    fn fail(&mut self, error: SearchError) -> SearchError {
        warn!(phase = %self.phase, error = %error, "Search failed");
        self.phase = SearchPhase::Failed;
        error
    }
}

/// Regions to query for a request, plus the circle for radius searches.
struct SearchPlan {
    regions: Vec<QueryRegion>,
    radius: Option<RadiusQuery>,
    grid_size: u32,
}

fn invalid(message: impl Into<String>) -> SearchError {
    SearchError::InvalidRequest(message.into())
}

/// Validate `request` and turn it into query regions. No remote call is made.
fn plan_search(request: &SearchRequest) -> Result<SearchPlan> {
    if request.rate_limit_per_minute == 0 {
        return Err(invalid("rate limit must be at least 1 call per minute"));
    }

    match &request.mode {
        SearchMode::Radius {
            center,
            radius_miles,
            grid_size,
        } => {
            let Some(grid) = NonZeroU32::new(*grid_size) else {
                return Err(invalid(format!("grid size must be at least 1, got {grid_size}")));
            };
            if !radius_miles.is_finite() || *radius_miles <= 0.0 {
                return Err(invalid(format!("radius must be positive, got {radius_miles}")));
            }
            Point::try_new(center.lat, center.lon)
                .map_err(|e| invalid(format!("invalid center: {e}")))?;

            let query = RadiusQuery::new(*center, *radius_miles)
                .map_err(|e| invalid(format!("radius does not fit a bounding box: {e}")))?;
            let cells = grid::partition(&query.bbox, grid)
                .map_err(|e| invalid(format!("cannot partition search area: {e}")))?;

            Ok(SearchPlan {
                regions: cells.into_iter().map(QueryRegion::Cell).collect(),
                radius: Some(query),
                grid_size: grid.get(),
            })
        }
        SearchMode::Municipality { name } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid("municipality name is empty"));
            }
            Ok(SearchPlan {
                regions: vec![QueryRegion::Municipality(name.to_string())],
                radius: None,
                grid_size: 1,
            })
        }
        SearchMode::ById { id } => {
            let id = id.trim();
            if id.is_empty() {
                return Err(invalid("catastro number is empty"));
            }
            Ok(SearchPlan {
                regions: vec![QueryRegion::Identifier(id.to_string())],
                radius: None,
                grid_size: 1,
            })
        }
    }
}

fn progress_bar(show: bool, regions: usize) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(u64::try_from(regions).unwrap_or(u64::MAX));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} cells {msg}")
    {
        pb.set_style(style.progress_chars("█░"));
    }
    pb
}

/// Run one search end to end.
///
/// Every region is fetched concurrently, with admission bounded by a rate
/// limiter shared across the whole search. The first region that fails, or an
/// external cancellation, fails the entire search; a partial result is never
/// returned.
#[instrument(name = "Property Search", level = "info", skip_all, fields(mode = ?request.mode))]
pub async fn search_inner<C: RemoteQueryClient + ?Sized>(
    client: &C,
    request: &SearchRequest,
    config: &SearchConfig,
    cancel: &CancellationToken,
) -> Result<SearchResult> {
    let t_start = Instant::now();
    let mut tracker = PhaseTracker::new();

    let plan = plan_search(request).map_err(|e| tracker.fail(e))?;
    if cancel.is_cancelled() {
        return Err(tracker.fail(SearchError::Cancelled));
    }
    info!(
        regions = plan.regions.len(),
        grid_size = plan.grid_size,
        rate_limit = request.rate_limit_per_minute,
        "Search planned"
    );

    tracker.advance(SearchPhase::Fetching);
    let mut results = fetch_all(client, request, config, cancel, plan.regions)
        .await
        .map_err(|e| tracker.fail(e))?;
    // Completion order is arbitrary; dedup runs over grid order
    results.sort_by_key(|result| result.region.grid_position());

    tracker.advance(SearchPhase::Reconciling);
    let reconciled = Aggregator::new(&config.schema, config.spatial_index_threshold).reconcile(
        &results,
        plan.radius.as_ref(),
        &request.filters,
    );

    tracker.advance(SearchPhase::Reporting);
    let completeness = CompletenessReport::report(&results, plan.grid_size, config.record_cap);
    if completeness.possibly_incomplete {
        warn!(
            capped = completeness.capped_count(),
            suggested_grid_size = completeness.suggested_grid_size,
            "{completeness}"
        );
    }

    let stats = SearchStats {
        cells_queried: results.len(),
        records_fetched: reconciled.fetched,
        unique_records: reconciled.unique,
        records_returned: reconciled.records.len(),
        elapsed: t_start.elapsed(),
    };
    tracker.advance(SearchPhase::Done);
    info!(
        fetched = stats.records_fetched,
        unique = stats.unique_records,
        returned = stats.records_returned,
        possibly_incomplete = completeness.possibly_incomplete,
        elapsed_seconds = ?stats.elapsed,
        "Search complete"
    );

    Ok(SearchResult {
        records: reconciled.records,
        completeness,
        stats,
    })
}

async fn fetch_all<C: RemoteQueryClient + ?Sized>(
    client: &C,
    request: &SearchRequest,
    config: &SearchConfig,
    cancel: &CancellationToken,
    regions: Vec<QueryRegion>,
) -> Result<Vec<CellFetchResult>> {
    let limiter = RateLimiter::new(request.rate_limit_per_minute, config.jitter);
    // Stops the remaining regions once one has failed
    let fetch_cancel = cancel.child_token();
    let fetcher = CellFetcher::new(
        client,
        &limiter,
        &config.retry,
        &request.filters,
        config.record_cap,
        &fetch_cancel,
    );

    let total = regions.len();
    let pb = progress_bar(config.show_progress, total);
    let mut in_flight: FuturesUnordered<_> =
        regions.into_iter().map(|region| fetcher.fetch(region)).collect();
    let mut results = Vec::with_capacity(total);
    let mut fetched = 0_usize;

    while let Some(outcome) = in_flight.next().await {
        match outcome {
            Ok(result) => {
                fetched += result.count();
                debug!(
                    cell = %result.region,
                    records = result.count(),
                    hit_cap = result.hit_cap,
                    "Region done"
                );
                pb.set_message(format!("found {} total {fetched}", result.count()));
                pb.inc(1);
                results.push(result);
            }
            Err(error) => {
                fetch_cancel.cancel();
                pb.abandon();
                return Err(match error {
                    FetchError::Cancelled => SearchError::Cancelled,
                    FetchError::Exhausted(cell) => SearchError::CellFailed(cell),
                });
            }
        }
    }

    pb.finish_and_clear();
    Ok(results)
}
