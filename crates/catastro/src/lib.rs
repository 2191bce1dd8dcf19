//! Catastro - grid-partitioned property search over a record-capped cadastral service
//!
//! The cadastral service answers at most 1,000 records per query, in no
//! particular order, and has no radius operator. Catastro turns "everything
//! within R miles of P" into a grid of bounding-box queries, fetches them under
//! a shared rate limit, and reconciles the cells into one deduplicated,
//! radius-exact, distance-sorted result. Cells that came back full are reported
//! so the caller can retry with a finer grid.
//!
//! # Quick Start
//!
//! ```rust
//! use catastro::{PropertySearcher, SearchConfigBuilder, SearchRequest};
//! use catastro_source::{
//!     Point,
//!     test_data::{FakeCadastre, ring_of_records},
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let center = Point::new(18.445550, -66.064836);
//! let client = FakeCadastre::new(ring_of_records("P", center, 1.0, 12));
//! let searcher = PropertySearcher::with_config(client, SearchConfigBuilder::fast().build());
//!
//! let result = searcher
//!     .search(&SearchRequest::radius(center, 1.5, 3).with_rate_limit(600))
//!     .await?;
//! assert_eq!(result.len(), 12);
//! assert!(!result.possibly_incomplete());
//! # Ok::<(), catastro::error::CatastroError>(())
//! # }).unwrap();
//! ```
//!
//! # Search modes
//!
//! - **Radius**: center point, radius in miles and grid size
//! - **Municipality**: every property of one municipality
//! - **By id**: one property by catastro number
//!
//! All three share attribute filters (sale price, sale date, land area,
//! municipality) and the same failure policy: a region that cannot be fetched
//! fails the whole search rather than silently shrinking the result.
use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod aggregate;
mod completeness;
mod config;
mod core;
pub mod error;
mod fetch;
pub mod geo;
pub mod grid;
mod rate_limit;
mod search;

pub use crate::core::PropertySearcher;

pub use aggregate::{Aggregator, PropertyRecord, RadiusQuery, Reconciled, SpatialIndex};
pub use catastro_source as source;
pub use completeness::{CappedRegion, CompletenessReport, GRID_ESCALATION_STEP};
pub use config::SearchConfigBuilder;
pub use fetch::{CellError, CellFetchResult, CellFetcher, FetchError, QueryRegion, RetryPolicy};
pub use grid::GridCell;
pub use rate_limit::{JitterConfig, RateLimiter};
pub use search::{
    DEFAULT_RATE_LIMIT_PER_MINUTE, SearchConfig, SearchError, SearchMode, SearchPhase,
    SearchRequest, SearchResult, SearchStats,
};
pub use tokio_util::sync::CancellationToken;

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for the Catastro library.
///
/// Sets up structured logging with the given minimum level, overridable via
/// `RUST_LOG`. HTTP client internals are kept at `warn`. Calling it again is a
/// no-op.
///
/// # Examples
///
/// ```rust
/// use catastro::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO)?;
/// # Ok::<(), catastro::error::CatastroError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static (), error::CatastroError> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("hyper_util=warn".parse()?)
            .add_directive("reqwest=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    })
}
