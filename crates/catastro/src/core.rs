//! The [`PropertySearcher`] entry point.
//!
//! ```rust,no_run
//! use catastro::{PropertySearcher, SearchRequest};
//! use catastro_source::{
//!     Point,
//!     arcgis::{ArcGisClient, ArcGisConfig},
//! };
//!
//! # async fn run() -> Result<(), catastro::error::CatastroError> {
//! let client = ArcGisClient::new(ArcGisConfig::default())?;
//! let searcher = PropertySearcher::new(client);
//!
//! let request = SearchRequest::radius(Point::new(18.445550, -66.064836), 1.5, 3);
//! let result = searcher.search(&request).await?;
//! if result.possibly_incomplete() {
//!     eprintln!("{}", result.completeness);
//! }
//! for record in &result {
//!     println!("{} {:.2} mi", record.id(), record.distance_miles().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

use catastro_source::{Point, RemoteQueryClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::search::{SearchConfig, SearchError, SearchRequest, SearchResult, search_inner};

/// Runs searches against one remote client with one configuration.
///
/// The client is the only collaborator that talks to the outside world; the
/// searcher owns it and never reaches into its session handling.
#[derive(Debug, Clone)]
pub struct PropertySearcher<C> {
    client: C,
    config: SearchConfig,
}

impl<C: RemoteQueryClient> PropertySearcher<C> {
    pub fn new(client: C) -> Self {
        Self::with_config(client, SearchConfig::default())
    }

    pub const fn with_config(client: C, config: SearchConfig) -> Self {
        Self { client, config }
    }

    pub const fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Run `request` to completion.
    ///
    /// # Errors
    ///
    /// [`SearchError::InvalidRequest`] before any remote call for a malformed
    /// request, [`SearchError::CellFailed`] when any region exhausts its retries.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult, SearchError> {
        self.search_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Run `request`, stopping early with [`SearchError::Cancelled`] once
    /// `cancel` fires. In-flight remote calls are abandoned.
    pub async fn search_with_cancellation(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, SearchError> {
        search_inner(&self.client, request, &self.config, cancel).await
    }

    /// Position of the property with catastro number `id`, for use as a radius center.
    #[instrument(name = "Resolve center", level = "info", skip(self))]
    pub async fn resolve_center(&self, id: &str) -> Result<Point, SearchError> {
        let result = self.search(&SearchRequest::by_id(id)).await?;
        let record = result
            .records
            .first()
            .ok_or_else(|| SearchError::CenterNotFound(id.to_string()))?;
        let position = record
            .position()
            .ok_or_else(|| SearchError::MissingPosition(record.id().to_string()))?;
        info!(%position, "Resolved center");
        Ok(position)
    }
}
