//! Partitioning of a search area into independently queried cells.

use std::{fmt, num::NonZeroU32};

use catastro_source::{BoundingBox, GeometryError};
use itertools::Itertools;
use tracing::debug;

/// One rectangular sub-region of a partitioned search area.
///
/// `row` counts south to north, `col` west to east.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
    pub bbox: BoundingBox,
}

impl fmt::Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell ({},{})", self.row, self.col)
    }
}

/// Split `bbox` into `grid_size` x `grid_size` equal cells in row-major order.
///
/// Cells tile the box exactly: the outer edges of the outermost cells are the
/// box's own edges, and neighbours share their boundary coordinate, so a record
/// on a shared edge can come back from both. `grid_size == 1` returns the box
/// itself.
pub fn partition(
    bbox: &BoundingBox,
    grid_size: NonZeroU32,
) -> Result<Vec<GridCell>, GeometryError> {
    let grid_size = grid_size.get();
    if grid_size == 1 {
        return Ok(vec![GridCell {
            row: 0,
            col: 0,
            bbox: *bbox,
        }]);
    }

    let lat_edges = edges(bbox.south(), bbox.north(), grid_size);
    let lon_edges = edges(bbox.west(), bbox.east(), grid_size);

    let cells = (0..grid_size)
        .cartesian_product(0..grid_size)
        .map(|(row, col)| {
            let (r, c) = (row as usize, col as usize);
            BoundingBox::new(lat_edges[r], lat_edges[r + 1], lon_edges[c], lon_edges[c + 1])
                .map(|bbox| GridCell { row, col, bbox })
        })
        .collect::<Result<Vec<_>, _>>()?;

    debug!(grid_size, cells = cells.len(), %bbox, "Partitioned search area");
    Ok(cells)
}

/// `n + 1` boundaries from `start` to `end`; the last is exactly `end`.
fn edges(start: f64, end: f64, n: u32) -> Vec<f64> {
    let step = (end - start) / f64::from(n);
    (0..=n)
        .map(|i| if i == n { end } else { start + step * f64::from(i) })
        .collect()
}
