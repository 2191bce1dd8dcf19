//! Reconciliation of per-region fetch results into one ordered record set.

mod index;

use ahash::AHashSet as HashSet;
use catastro_source::{BoundingBox, GeometryError, Point, RawRecord, RecordSchema, SearchFilters};
use rayon::prelude::*;
use tracing::{debug, instrument};

pub use index::SpatialIndex;

use crate::{fetch::CellFetchResult, geo};

/// Center and radius of a radius search, with its enclosing box precomputed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusQuery {
    pub center: Point,
    pub radius_miles: f64,
    pub bbox: BoundingBox,
}

impl RadiusQuery {
    pub fn new(center: Point, radius_miles: f64) -> Result<Self, GeometryError> {
        Ok(Self {
            center,
            radius_miles,
            bbox: geo::bounding_box(&center, radius_miles)?,
        })
    }
}

/// A returned record, with its distance from the center in radius searches.
///
/// Every remote attribute is passed through untouched.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub record: RawRecord,
    pub distance_miles: Option<f64>,
}

impl PropertyRecord {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.record.id
    }

    #[must_use]
    pub const fn position(&self) -> Option<Point> {
        self.record.position
    }

    #[must_use]
    pub const fn distance_miles(&self) -> Option<f64> {
        self.distance_miles
    }

    #[must_use]
    pub fn distance_km(&self) -> Option<f64> {
        self.distance_miles.map(|miles| miles * catastro_source::KM_PER_MILE)
    }
}

/// Output of [`Aggregator::reconcile`].
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub records: Vec<PropertyRecord>,
    /// Records across all regions before deduplication
    pub fetched: usize,
    /// Distinct identifiers
    pub unique: usize,
}

/// Deduplicates, radius-filters, attribute-filters and orders fetched records.
#[derive(Debug, Clone)]
pub struct Aggregator<'a> {
    schema: &'a RecordSchema,
    index_threshold: usize,
}

impl<'a> Aggregator<'a> {
    /// Radius candidates below `index_threshold` are scanned linearly instead of indexed.
    #[must_use]
    pub const fn new(schema: &'a RecordSchema, index_threshold: usize) -> Self {
        Self {
            schema,
            index_threshold,
        }
    }

    /// Merge `results` into the final record order.
    ///
    /// Duplicates keep their first occurrence in `results` order. With a radius
    /// query, records outside the circle (distance strictly greater than the
    /// radius) or without a position are dropped and the rest are sorted by
    /// distance; otherwise the remote order is preserved.
    #[instrument(name = "Reconcile", level = "debug", skip_all, fields(regions = results.len()))]
    pub fn reconcile(
        &self,
        results: &[CellFetchResult],
        radius: Option<&RadiusQuery>,
        filters: &SearchFilters,
    ) -> Reconciled {
        let fetched = results.iter().map(CellFetchResult::count).sum();
        let unique = dedup(results);
        let unique_count = unique.len();
        let predicates = filters.predicates(self.schema);
        let keep = |record: &RawRecord| predicates.iter().all(|p| p.matches(record));

        let mut records: Vec<PropertyRecord> = match radius {
            Some(query) => self
                .within_radius(&unique, query)
                .into_iter()
                .filter(|&(record, _)| keep(record))
                .map(|(record, distance)| PropertyRecord {
                    record: record.clone(),
                    distance_miles: Some(distance),
                })
                .collect(),
            None => unique
                .into_iter()
                .filter(|&record| keep(record))
                .map(|record| PropertyRecord {
                    record: record.clone(),
                    distance_miles: None,
                })
                .collect(),
        };

        if radius.is_some() {
            records.sort_by(|a, b| {
                let da = a.distance_miles.unwrap_or(f64::INFINITY);
                let db = b.distance_miles.unwrap_or(f64::INFINITY);
                da.total_cmp(&db).then_with(|| a.id().cmp(b.id()))
            });
        }

        debug!(
            fetched,
            unique = unique_count,
            returned = records.len(),
            "Reconciled regions"
        );
        Reconciled {
            records,
            fetched,
            unique: unique_count,
        }
    }

    /// Bounding-box pass, then exact distance. Returns `(record, miles)` in input order.
    fn within_radius<'r>(
        &self,
        records: &[&'r RawRecord],
        query: &RadiusQuery,
    ) -> Vec<(&'r RawRecord, f64)> {
        let positioned: Vec<(&'r RawRecord, Point)> = records
            .iter()
            .filter_map(|&record| record.position.map(|p| (record, p)))
            .collect();

        let candidates: Vec<(&'r RawRecord, Point)> = if positioned.len() >= self.index_threshold {
            let index = SpatialIndex::build(
                positioned
                    .iter()
                    .enumerate()
                    .map(|(i, &(_, p))| (p, i))
                    .collect(),
            );
            debug!(entries = index.len(), "Using spatial index for box pass");
            index
                .query(&query.bbox)
                .into_iter()
                .map(|i| positioned[i])
                .collect()
        } else {
            positioned
                .into_iter()
                .filter(|(_, p)| query.bbox.contains(p))
                .collect()
        };

        candidates
            .into_par_iter()
            .filter_map(|(record, p)| {
                let distance = geo::haversine_miles(&query.center, &p);
                (distance <= query.radius_miles).then_some((record, distance))
            })
            .collect()
    }
}

/// First occurrence of each identifier, in region order.
fn dedup(results: &[CellFetchResult]) -> Vec<&RawRecord> {
    let mut seen: HashSet<&str> = HashSet::new();
    results
        .iter()
        .flat_map(|result| result.records.iter())
        .filter(|&record| seen.insert(record.id.as_str()))
        .collect()
}
