//! Integration tests for Catastro property search
//!
//! These run the public API end to end against the in-memory `FakeCadastre`,
//! which honours the same selections, pagination and record cap as the real
//! service.

use std::{num::NonZeroU32, time::Duration};

use catastro::{
    CancellationToken, PropertySearcher, QueryRegion, SearchConfig, SearchConfigBuilder,
    SearchError, SearchRequest, geo, grid,
};
use catastro_source::{
    BoundingBox, Point, RemoteError, SearchFilters, SpatialFilter,
    test_data::{FakeCadastre, lattice_of_records, record_at, record_at_distance, ring_of_records},
};
use chrono::NaiveDate;

fn setup_test_env() {
    let _ = catastro::init_logging(tracing::Level::WARN);
}

fn center() -> Point {
    Point::new(18.445550, -66.064836)
}

fn fast_config() -> SearchConfig {
    SearchConfigBuilder::fast().build()
}

fn searcher(client: FakeCadastre) -> PropertySearcher<FakeCadastre> {
    PropertySearcher::with_config(client, fast_config())
}

fn radius_request() -> SearchRequest {
    SearchRequest::radius(center(), 1.5, 3).with_rate_limit(600)
}

/// A point on the boundary shared by cells (1,0) and (1,1) of the 3x3 grid.
fn shared_edge_point() -> Point {
    let bbox = geo::bounding_box(&center(), 1.5).unwrap();
    let cells = grid::partition(&bbox, NonZeroU32::new(3).unwrap()).unwrap();
    let middle = cells
        .iter()
        .find(|c| (c.row, c.col) == (1, 1))
        .expect("3x3 grid has a middle cell");
    Point::new(center().lat, middle.bbox.west())
}

#[tokio::test]
async fn test_end_to_end_radius_search() {
    setup_test_env();

    let records = vec![
        record_at_distance("INSIDE-149", center(), 1.49, 10.0),
        record_at_distance("OUTSIDE-151", center(), 1.51, 10.0),
        record_at("042-000-006-29", shared_edge_point()),
        record_at_distance("NEAR", center(), 0.2, 200.0),
        // In the bounding box corner, outside the circle
        record_at_distance("CORNER", center(), 1.9, 45.0),
    ];
    let client = FakeCadastre::new(records);
    let searcher = searcher(client);

    let result = searcher.search(&radius_request()).await.unwrap();

    let ids: Vec<&str> = result.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["NEAR", "042-000-006-29", "INSIDE-149"]);

    // Nine cells queried, the edge record fetched by both neighbours
    let filters = searcher.client().queried_filters();
    assert_eq!(filters.len(), 9);
    assert!(filters.iter().all(|f| matches!(f, SpatialFilter::BoundingBox(_))));
    assert_eq!(result.stats.cells_queried, 9);
    assert_eq!(result.stats.records_fetched, result.stats.unique_records + 1);
    assert_eq!(result.stats.records_returned, 3);

    let union = filters
        .iter()
        .filter_map(|f| match f {
            SpatialFilter::BoundingBox(b) => Some(*b),
            _ => None,
        })
        .reduce(|a, b| a.union(&b))
        .unwrap();
    assert_eq!(union, geo::bounding_box(&center(), 1.5).unwrap());

    let inside = result.iter().find(|r| r.id() == "INSIDE-149").unwrap();
    assert!((inside.distance_miles().unwrap() - 1.49).abs() < 1e-6);
    assert!((inside.distance_km().unwrap() - 1.49 * 1.60934).abs() < 1e-5);

    assert!(!result.possibly_incomplete());
    assert_eq!(result.completeness.grid_size, 3);
    assert_eq!(result.completeness.suggested_grid_size, 5);
}

#[tokio::test]
async fn test_radius_results_are_sorted_and_stable() {
    setup_test_env();

    let mut records = Vec::new();
    for (i, miles) in [1.4, 0.3, 0.9, 0.05, 1.2, 0.6].iter().enumerate() {
        records.extend(ring_of_records(&format!("R{i}"), center(), *miles, 17));
    }
    let searcher = searcher(FakeCadastre::new(records));

    let first = searcher.search(&radius_request()).await.unwrap();
    let second = searcher.search(&radius_request()).await.unwrap();

    assert_eq!(first.len(), 6 * 17);
    let distances: Vec<f64> = first.iter().filter_map(|r| r.distance_miles()).collect();
    assert_eq!(distances.len(), first.len());
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));

    // Same input, same output
    assert_eq!(first.records, second.records);
    let mut ids: Vec<&str> = first.iter().map(|r| r.id()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), first.len(), "no duplicate identifiers");
}

#[tokio::test(start_paused = true)]
async fn test_one_failed_cell_fails_the_search() {
    setup_test_env();

    let client = FakeCadastre::new(ring_of_records("R", center(), 1.0, 20)).always_fail_where(
        |filter| matches!(filter, SpatialFilter::BoundingBox(b) if b.contains(&center())),
        RemoteError::Status(503),
    );
    let searcher = searcher(client);

    let err = searcher.search(&radius_request()).await.unwrap_err();
    let SearchError::CellFailed(cell) = err else {
        panic!("expected a cell failure, got {err:?}");
    };
    assert!(matches!(cell.region, QueryRegion::Cell(c) if (c.row, c.col) == (1, 1)));
    assert_eq!(cell.attempts, fast_config().retry.max_attempts);
    assert_eq!(cell.source, RemoteError::Status(503));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_do_not_fail_the_search() {
    setup_test_env();

    let client =
        FakeCadastre::new(ring_of_records("R", center(), 1.0, 20)).fail_next(2, RemoteError::Timeout);
    let searcher = searcher(client);

    let result = searcher.search(&radius_request()).await.unwrap();
    assert_eq!(result.len(), 20);
    assert_eq!(searcher.client().calls(), 9 + 2);
}

#[tokio::test]
async fn test_capped_cell_is_reported() {
    setup_test_env();

    let bbox = geo::bounding_box(&center(), 1.5).unwrap();
    let cells = grid::partition(&bbox, NonZeroU32::new(3).unwrap()).unwrap();
    let crowded = cells[0].bbox;
    let client = FakeCadastre::new(lattice_of_records("L", &crowded, 10, 8)).with_record_cap(50);
    let config = SearchConfigBuilder::fast().record_cap(50).build();
    let searcher = PropertySearcher::with_config(client, config);

    let result = searcher.search(&radius_request()).await.unwrap();

    assert!(result.possibly_incomplete());
    assert_eq!(result.completeness.capped_count(), 1);
    let capped = &result.completeness.capped[0];
    assert_eq!(capped.records, 50);
    assert!(matches!(capped.region, QueryRegion::Cell(c) if (c.row, c.col) == (0, 0)));
    assert_eq!(result.completeness.suggested_grid_size, 5);

    let warning = result.completeness.to_string();
    assert!(warning.contains("1 cell(s) reached the 50 record limit"));
    assert!(warning.contains("consider trying 5x5"));
}

#[tokio::test]
async fn test_municipality_search_with_filters() {
    setup_test_env();

    let sale = |id: &str, town: &str, price: f64, date: &str| {
        record_at(id, center())
            .with_attribute("MUNICIPIO", town)
            .with_attribute("SALESAMT", price)
            .with_attribute("SALESDTTM", date)
    };
    let client = FakeCadastre::new(vec![
        sale("P-1", "PONCE", 120_000.0, "2021-06-01"),
        sale("P-2", "PONCE", 80_000.0, "2021-06-01"),
        sale("P-3", "PONCE", 150_000.0, "2015-01-01"),
        sale("S-1", "SAN JUAN", 150_000.0, "2021-06-01"),
        sale("P-4", "PONCE", 300_000.0, "2022-12-31"),
    ]);
    let searcher = searcher(client);

    let filters = SearchFilters::new()
        .with_sale_price(Some(100_000.0), Some(250_000.0))
        .with_sale_date(NaiveDate::from_ymd_opt(2020, 1, 1), None);
    let request = SearchRequest::municipality("Ponce")
        .with_filters(filters)
        .with_rate_limit(600);

    let result = searcher.search(&request).await.unwrap();
    let ids: Vec<&str> = result.iter().map(|r| r.id()).collect();
    assert_eq!(ids, vec!["P-1"]);
    assert!(result.iter().all(|r| r.distance_miles().is_none()));
    assert_eq!(result.stats.cells_queried, 1);
    assert_eq!(
        searcher.client().queried_filters(),
        vec![SpatialFilter::Municipality("Ponce".into())]
    );
}

#[tokio::test]
async fn test_by_id_search_and_center_resolution() {
    setup_test_env();

    let target = Point::new(18.4012, -66.0531);
    let mut no_position = record_at("999-000-000-01", center());
    no_position.position = None;
    let client = FakeCadastre::new(vec![
        record_at("042-000-006-29", target).with_attribute("MUNICIPIO", "SAN JUAN"),
        no_position,
    ]);
    let searcher = searcher(client);

    let result = searcher
        .search(&SearchRequest::by_id("042-000-006-29").with_rate_limit(600))
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.records[0].record.text("MUNICIPIO"),
        Some("SAN JUAN"),
        "attributes pass through untouched"
    );

    assert_eq!(searcher.resolve_center("042-000-006-29").await.unwrap(), target);
    assert!(matches!(
        searcher.resolve_center("000-000-000-00").await,
        Err(SearchError::CenterNotFound(_))
    ));
    assert!(matches!(
        searcher.resolve_center("999-000-000-01").await,
        Err(SearchError::MissingPosition(_))
    ));
}

#[tokio::test]
async fn test_empty_area_is_a_successful_search() {
    setup_test_env();

    let far_away = BoundingBox::new(17.9, 18.0, -67.2, -67.1).unwrap();
    let searcher = searcher(FakeCadastre::new(lattice_of_records("F", &far_away, 3, 3)));

    let result = searcher.search(&radius_request()).await.unwrap();
    assert!(result.is_empty());
    assert!(!result.possibly_incomplete());
}

#[tokio::test]
async fn test_invalid_request_makes_no_remote_calls() {
    setup_test_env();

    let searcher = searcher(FakeCadastre::new(ring_of_records("R", center(), 1.0, 5)));
    let err = searcher
        .search(&SearchRequest::radius(center(), 1.5, 0))
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::InvalidRequest(_)));
    assert_eq!(searcher.client().calls(), 0);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    setup_test_env();

    let searcher = searcher(FakeCadastre::new(ring_of_records("R", center(), 1.0, 5)));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = searcher
        .search_with_cancellation(&radius_request(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(searcher.client().calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_waiting_on_rate_limit() {
    setup_test_env();

    let searcher = searcher(FakeCadastre::new(ring_of_records("R", center(), 1.0, 5)));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    // One call per minute: the first cell is admitted, the rest queue up
    let request = SearchRequest::radius(center(), 1.5, 3).with_rate_limit(1);
    let err = searcher
        .search_with_cancellation(&request, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SearchError::Cancelled));
    assert_eq!(searcher.client().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_while_calls_are_in_flight() {
    setup_test_env();

    let client = FakeCadastre::new(ring_of_records("R", center(), 1.0, 5))
        .with_latency(Duration::from_secs(30));
    let searcher = searcher(client);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });
    let start = tokio::time::Instant::now();

    let outcome = searcher
        .search_with_cancellation(&radius_request(), &cancel)
        .await;

    assert!(matches!(outcome, Err(SearchError::Cancelled)));
    // Every cell was admitted and its call was pending when the search stopped
    assert_eq!(searcher.client().calls(), 9);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn test_pagination_that_never_resumes_fails_the_search() {
    setup_test_env();

    let records = (0..150)
        .map(|i| record_at(format!("P-{i:03}"), center()).with_attribute("MUNICIPIO", "PONCE"))
        .collect();
    let client = FakeCadastre::new(records).stall_at(100, usize::MAX);
    let searcher = searcher(client);

    let err = searcher
        .search(&SearchRequest::municipality("PONCE").with_rate_limit(600))
        .await
        .unwrap_err();

    let SearchError::CellFailed(cell) = err else {
        panic!("expected a failed region, got {err:?}");
    };
    assert_eq!(cell.region, QueryRegion::Municipality("PONCE".into()));
    assert!(matches!(cell.source, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_empty_page_mid_pagination_loses_nothing() {
    setup_test_env();

    let records = (0..150)
        .map(|i| record_at(format!("P-{i:03}"), center()).with_attribute("MUNICIPIO", "PONCE"))
        .collect();
    let client = FakeCadastre::new(records).stall_at(100, 1);
    let searcher = searcher(client);

    let result = searcher
        .search(&SearchRequest::municipality("PONCE").with_rate_limit(600))
        .await
        .unwrap();

    assert_eq!(result.len(), 150);
    assert!(!result.possibly_incomplete());
}
