//! In-memory stand-ins for the remote service.
//!
//! [`FakeCadastre`] answers the same three selections as the real service,
//! truncates every logical query at the record cap and paginates by offset. It
//! ignores attribute pushdown, which keeps the caller's local filtering honest.
//! Failures can be scripted per call to exercise retry paths, and calls can be
//! slowed down or answered with empty pages to exercise cancellation and
//! pagination edge cases.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Map;
use tracing::info;

use crate::{
    RECORD_CAP, RemoteError, Result,
    geometry::{BoundingBox, EARTH_RADIUS_KM, KM_PER_MILE, Point},
    query::{Page, PageCursor, RemoteQuery, RemoteQueryClient, SpatialFilter},
    record::{RawRecord, RecordSchema},
};

type FilterMatcher = Arc<dyn Fn(&SpatialFilter) -> bool + Send + Sync>;

struct FailureRule {
    matcher: FilterMatcher,
    error: RemoteError,
    /// `None` fails forever
    remaining: Option<usize>,
}

/// Fake record-capped cadastral service.
pub struct FakeCadastre {
    records: Vec<RawRecord>,
    schema: RecordSchema,
    page_size: usize,
    record_cap: usize,
    failures: Mutex<VecDeque<FailureRule>>,
    /// Page offset answered empty, and how many more times
    stall: Mutex<Option<(usize, usize)>>,
    latency: Duration,
    calls: AtomicUsize,
    log: Mutex<Vec<SpatialFilter>>,
}

impl FakeCadastre {
    #[must_use]
    pub fn new(records: Vec<RawRecord>) -> Self {
        info!(records = records.len(), "Creating fake cadastre");
        Self {
            records,
            schema: RecordSchema::default(),
            page_size: 100,
            record_cap: RECORD_CAP,
            failures: Mutex::new(VecDeque::new()),
            stall: Mutex::new(None),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_record_cap(mut self, record_cap: usize) -> Self {
        self.record_cap = record_cap;
        self
    }

    /// Answer the page at `offset` with no records, but a continuation back to
    /// the same offset, `times` times before serving it normally.
    #[must_use]
    pub fn stall_at(self, offset: usize, times: usize) -> Self {
        *self.stall.lock().unwrap_or_else(PoisonError::into_inner) = Some((offset, times));
        self
    }

    /// Hold every call for `latency` before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` calls, whatever they select.
    #[must_use]
    pub fn fail_next(self, times: usize, error: RemoteError) -> Self {
        self.push_rule(Arc::new(|_| true), error, Some(times))
    }

    /// Fail every call whose selection satisfies `matcher`.
    #[must_use]
    pub fn always_fail_where(
        self,
        matcher: impl Fn(&SpatialFilter) -> bool + Send + Sync + 'static,
        error: RemoteError,
    ) -> Self {
        self.push_rule(Arc::new(matcher), error, None)
    }

    fn push_rule(self, matcher: FilterMatcher, error: RemoteError, remaining: Option<usize>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(FailureRule {
                matcher,
                error,
                remaining,
            });
        self
    }

    /// Total calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Selections of every call, in arrival order.
    pub fn queried_filters(&self) -> Vec<SpatialFilter> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn scripted_failure(&self, filter: &SpatialFilter) -> Option<RemoteError> {
        let mut rules = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .iter_mut()
            .find(|r| r.remaining != Some(0) && (r.matcher)(filter))?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.error.clone())
    }

    fn stalled(&self, offset: usize) -> bool {
        let mut stall = self.stall.lock().unwrap_or_else(PoisonError::into_inner);
        match stall.as_mut() {
            Some((at, remaining)) if *at == offset && *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn selects(&self, filter: &SpatialFilter, record: &RawRecord) -> bool {
        match filter {
            SpatialFilter::BoundingBox(bbox) => record.position.is_some_and(|p| bbox.contains(&p)),
            SpatialFilter::Municipality(name) => record
                .text(&self.schema.municipality_field)
                .is_some_and(|m| m.eq_ignore_ascii_case(name)),
            SpatialFilter::Identifier(id) => record.id.eq_ignore_ascii_case(id),
        }
    }
}

#[async_trait]
impl RemoteQueryClient for FakeCadastre {
    async fn query(&self, query: RemoteQuery<'_>) -> Result<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.filter.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(error) = self.scripted_failure(query.filter) {
            return Err(error);
        }

        let offset = query.cursor.and_then(PageCursor::as_offset).unwrap_or(0);
        if self.stalled(offset) {
            return Ok(Page::new(Vec::new(), Some(PageCursor::from_offset(offset))));
        }
        let selected: Vec<&RawRecord> = self
            .records
            .iter()
            .filter(|r| self.selects(query.filter, r))
            .take(self.record_cap)
            .collect();

        let end = (offset + self.page_size).min(selected.len());
        let records = selected
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();
        let next = (end < selected.len()).then(|| PageCursor::from_offset(end));
        Ok(Page::new(records, next))
    }
}

/// A record with the default schema's identifier and coordinate fields set.
pub fn record_at(id: impl Into<String>, point: Point) -> RawRecord {
    let id = id.into();
    let schema = RecordSchema::default();
    let mut attributes = Map::new();
    attributes.insert(schema.id_field, id.clone().into());
    attributes.insert(schema.latitude_field, point.lat.into());
    attributes.insert(schema.longitude_field, point.lon.into());
    RawRecord {
        id,
        position: Some(point),
        attributes,
    }
}

/// A record `miles` away from `center` along the initial bearing `bearing_degrees`
/// (0 = north, 90 = east), on the same sphere the search core measures with.
pub fn record_at_distance(
    id: impl Into<String>,
    center: Point,
    miles: f64,
    bearing_degrees: f64,
) -> RawRecord {
    record_at(id, destination(center, miles, bearing_degrees))
}

/// `count` records evenly spaced on a circle of `miles` around `center`.
pub fn ring_of_records(prefix: &str, center: Point, miles: f64, count: usize) -> Vec<RawRecord> {
    (0..count)
        .map(|i| {
            let bearing = 360.0 * i as f64 / count as f64;
            record_at_distance(format!("{prefix}-{i:04}"), center, miles, bearing)
        })
        .collect()
}

/// A `rows` x `cols` lattice of records strictly inside `bbox`.
pub fn lattice_of_records(prefix: &str, bbox: &BoundingBox, rows: usize, cols: usize) -> Vec<RawRecord> {
    let lat_step = bbox.height() / (rows + 1) as f64;
    let lon_step = bbox.width() / (cols + 1) as f64;
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| {
            let point = Point::new(
                bbox.south() + lat_step * (r + 1) as f64,
                bbox.west() + lon_step * (c + 1) as f64,
            );
            record_at(format!("{prefix}-{r:03}-{c:03}"), point)
        })
        .collect()
}

fn destination(origin: Point, miles: f64, bearing_degrees: f64) -> Point {
    let angular = miles * KM_PER_MILE / EARTH_RADIUS_KM;
    let bearing = bearing_degrees.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());
    Point::new(lat2.to_degrees(), lon2.to_degrees())
}
