//! Remote-source contract for cadastral property searches.
//!
//! The cadastral service answers bounding-box, municipality and identifier
//! queries, at most [`RECORD_CAP`] records per logical query and in no
//! particular order. This crate holds everything the search core needs to
//! talk to such a service without knowing how it is reached:
//!
//! - geometry value types ([`Point`], [`BoundingBox`]),
//! - the opaque record shape ([`RawRecord`]) and its field naming ([`RecordSchema`]),
//! - attribute predicates ([`SearchFilters`]) that clients may push down,
//! - the [`RemoteQueryClient`] trait and its [`RemoteError`] taxonomy,
//! - an ArcGIS REST implementation (feature `http-client`),
//! - an in-memory fake for tests ([`test_data`]).

pub mod filters;
pub mod geometry;
pub mod query;
pub mod record;
pub mod test_data;

#[cfg(feature = "http-client")]
pub mod arcgis;

/// Hard maximum of records the remote service returns for one logical query.
pub const RECORD_CAP: usize = 1_000;

mod error {
    use thiserror::Error;

    /// Failure of a single remote call.
    ///
    /// Transient variants are worth retrying; everything else is a fault in the
    /// request or the response and will not improve on a second attempt.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RemoteError {
        #[error("Request timed out")]
        Timeout,
        #[error("HTTP status {0}")]
        Status(u16),
        #[error("Rate limited by remote service")]
        RateLimited,
        #[error("Session rejected by remote service: {0}")]
        Unauthorized(String),
        #[error("Service error {code}: {message}")]
        Service { code: i64, message: String },
        #[error("Transport error: {0}")]
        Transport(String),
        #[error("Invalid response: {0}")]
        InvalidResponse(String),
    }

    impl RemoteError {
        /// Whether a retry of the same call can reasonably succeed.
        #[must_use]
        pub const fn is_transient(&self) -> bool {
            match self {
                Self::Timeout | Self::RateLimited | Self::Unauthorized(_) | Self::Transport(_) => {
                    true
                }
                Self::Status(code) => *code >= 500,
                Self::Service { code, .. } => *code >= 500,
                Self::InvalidResponse(_) => false,
            }
        }
    }

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum RecordError {
        #[error("Record is missing identifier field '{0}'")]
        MissingIdentifier(String),
        #[error("Record field '{field}' is not a valid coordinate: {value}")]
        InvalidCoordinate { field: String, value: String },
    }

    pub type Result<T> = std::result::Result<T, RemoteError>;
}

pub use error::{RecordError, RemoteError, Result};
pub use filters::{FieldPredicate, RangeFilter, SearchFilters};
pub use geometry::{BoundingBox, EARTH_RADIUS_KM, GeometryError, KM_PER_MILE, Point};
pub use query::{Page, PageCursor, RemoteQuery, RemoteQueryClient, SpatialFilter};
pub use record::{RawRecord, RecordSchema};
