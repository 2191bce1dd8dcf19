//! Mile/degree conversions and great-circle distance.

use catastro_source::{BoundingBox, EARTH_RADIUS_KM, GeometryError, KM_PER_MILE, Point};

/// Miles per degree of latitude.
pub const MILES_PER_LAT_DEGREE: f64 = 69.0;
/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = EARTH_RADIUS_KM / KM_PER_MILE;

#[must_use]
pub fn miles_to_lat_degrees(miles: f64) -> f64 {
    miles / MILES_PER_LAT_DEGREE
}

/// Longitude degrees spanned by `miles` at the given latitude.
///
/// Degree width shrinks with `cos(latitude)`; the query center's latitude must
/// be used, a flat conversion undersizes boxes away from the equator.
#[must_use]
pub fn miles_to_lon_degrees(miles: f64, at_latitude: f64) -> f64 {
    miles / (MILES_PER_LAT_DEGREE * at_latitude.to_radians().cos())
}

/// Great-circle distance in miles.
#[must_use]
pub fn haversine_miles(a: &Point, b: &Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Inclusive: a point exactly `radius_miles` away is inside.
#[must_use]
pub fn within_radius(center: &Point, point: &Point, radius_miles: f64) -> bool {
    haversine_miles(center, point) <= radius_miles
}

/// Degree rectangle enclosing the circle of `radius_miles` around `center`.
pub fn bounding_box(center: &Point, radius_miles: f64) -> Result<BoundingBox, GeometryError> {
    let lat_offset = miles_to_lat_degrees(radius_miles);
    let lon_offset = miles_to_lon_degrees(radius_miles, center.lat);
    BoundingBox::new(
        center.lat - lat_offset,
        center.lat + lat_offset,
        center.lon - lon_offset,
        center.lon + lon_offset,
    )
}
