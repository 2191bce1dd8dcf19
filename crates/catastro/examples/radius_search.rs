use anyhow::Result;
use catastro::{PropertySearcher, SearchConfigBuilder, SearchRequest};
use catastro_source::{
    Point, SearchFilters,
    arcgis::{ArcGisClient, ArcGisConfig},
};
use tracing::{Level, info, info_span};

/// Usage: `radius_search [LAT LON RADIUS_MILES GRID]`
///
/// Set `CATASTRO_COOKIE` to the `Cookie` header of a session opened in a browser.
#[tokio::main]
async fn main() -> Result<()> {
    catastro::init_logging(Level::INFO)?;
    let _span = info_span!("radius_search_example").entered();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (lat, lon, radius, grid) = match args.as_slice() {
        [lat, lon, radius, grid] => (lat.parse()?, lon.parse()?, radius.parse()?, grid.parse()?),
        _ => (18.445550, -66.064836, 1.5, 3),
    };

    let config = ArcGisConfig {
        session_cookie: std::env::var("CATASTRO_COOKIE").ok(),
        ..ArcGisConfig::default()
    };
    let searcher = PropertySearcher::with_config(
        ArcGisClient::new(config)?,
        SearchConfigBuilder::new().show_progress(true).build(),
    );

    let request = SearchRequest::radius(Point::try_new(lat, lon)?, radius, grid)
        .with_filters(SearchFilters::new().with_sale_price(Some(1.0), None));
    let result = searcher.search(&request).await?;

    for record in result.iter().take(20) {
        info!(
            catastro = record.id(),
            distance_miles = record.distance_miles().unwrap_or_default(),
            price = record.record.number("SALESAMT"),
            "Property"
        );
    }
    if result.possibly_incomplete() {
        eprintln!("{}", result.completeness);
    }
    info!(stats = ?result.stats, "Done");
    Ok(())
}
