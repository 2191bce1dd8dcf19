//! Detection of possible cap truncation.

use std::fmt;

use itertools::Itertools;

use crate::fetch::{CellFetchResult, QueryRegion};

/// Grid size increase suggested when any region hit the cap.
pub const GRID_ESCALATION_STEP: u32 = 2;

/// A region that returned the remote maximum.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CappedRegion {
    pub region: QueryRegion,
    pub records: usize,
}

/// Which regions may have lost records to the remote cap, and what to try next.
///
/// Always present on a successful search; an empty `capped` list with
/// `possibly_incomplete == false` means every region was drained.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CompletenessReport {
    /// Capped regions in row-major order
    pub capped: Vec<CappedRegion>,
    pub possibly_incomplete: bool,
    pub grid_size: u32,
    pub suggested_grid_size: u32,
    pub record_cap: usize,
}

impl CompletenessReport {
    #[must_use]
    pub fn report(results: &[CellFetchResult], grid_size: u32, record_cap: usize) -> Self {
        let capped: Vec<CappedRegion> = results
            .iter()
            .filter(|result| result.hit_cap)
            .sorted_by_key(|result| result.region.grid_position())
            .map(|result| CappedRegion {
                region: result.region.clone(),
                records: result.count(),
            })
            .collect();

        Self {
            possibly_incomplete: !capped.is_empty(),
            capped,
            grid_size,
            suggested_grid_size: grid_size.saturating_add(GRID_ESCALATION_STEP),
            record_cap,
        }
    }

    #[must_use]
    pub fn capped_count(&self) -> usize {
        self.capped.len()
    }
}

impl fmt::Display for CompletenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.possibly_incomplete {
            return write!(f, "All regions returned fewer than {} records", self.record_cap);
        }
        writeln!(
            f,
            "WARNING: {} cell(s) reached the {} record limit!",
            self.capped_count(),
            self.record_cap
        )?;
        writeln!(f, "Some properties might not be included in the results.")?;
        writeln!(
            f,
            "Capped: {}",
            self.capped.iter().map(|c| c.region.to_string()).join(", ")
        )?;
        write!(
            f,
            "Current grid size: {g}x{g}, consider trying {s}x{s}",
            g = self.grid_size,
            s = self.suggested_grid_size
        )
    }
}
