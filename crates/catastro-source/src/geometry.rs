//! Geometry value types shared by the remote contract and the search core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean Earth radius used for every great-circle computation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Statute mile in kilometres.
pub const KM_PER_MILE: f64 = 1.60934;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Latitude {0} is outside [-90, 90]")]
    InvalidLatitude(f64),
    #[error("Longitude {0} is outside [-180, 180]")]
    InvalidLongitude(f64),
    #[error("Degenerate bounding box: south={south} north={north} west={west} east={east}")]
    DegenerateBox {
        south: f64,
        north: f64,
        west: f64,
        east: f64,
    },
}

/// A WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Build a point, rejecting non-finite or out-of-range coordinates.
    pub fn try_new(lat: f64, lon: f64) -> Result<Self, GeometryError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(GeometryError::InvalidLatitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(GeometryError::InvalidLongitude(lon));
        }
        Ok(Self { lat, lon })
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// An axis-aligned degree rectangle. `south < north` and `west < east` always hold;
/// antimeridian crossing is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    south: f64,
    north: f64,
    west: f64,
    east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Result<Self, GeometryError> {
        let finite = [south, north, west, east].iter().all(|v| v.is_finite());
        if !finite || south >= north || west >= east {
            return Err(GeometryError::DegenerateBox {
                south,
                north,
                west,
                east,
            });
        }
        Ok(Self {
            south,
            north,
            west,
            east,
        })
    }

    #[must_use]
    pub const fn south(&self) -> f64 {
        self.south
    }

    #[must_use]
    pub const fn north(&self) -> f64 {
        self.north
    }

    #[must_use]
    pub const fn west(&self) -> f64 {
        self.west
    }

    #[must_use]
    pub const fn east(&self) -> f64 {
        self.east
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            self.south.midpoint(self.north),
            self.west.midpoint(self.east),
        )
    }

    /// Inclusive on every edge, so a point on a shared cell boundary belongs to both cells.
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lon >= self.west
            && point.lon <= self.east
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.south <= other.north
            && other.south <= self.north
            && self.west <= other.east
            && other.west <= self.east
    }

    /// Smallest box covering both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            south: self.south.min(other.south),
            north: self.north.max(other.north),
            west: self.west.min(other.west),
            east: self.east.max(other.east),
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[S {:.6}, N {:.6}, W {:.6}, E {:.6}]",
            self.south, self.north, self.west, self.east
        )
    }
}
