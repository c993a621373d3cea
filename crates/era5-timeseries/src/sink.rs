//! Destination of transposed time-series blocks.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use ndarray::Array2;

use era5_archive::Attributes;
use era5_common::SpatialGrid;

use crate::error::TimeSeriesResult;

/// Receives per-cell `(points x times)` blocks.
///
/// Calls arrive as one `begin`, any number of `write_block`s in ascending time
/// order per cell and variable, then one `finish`.
pub trait TimeSeriesSink {
    /// Prepare storage for every cell of `grid`, all `timestamps` and the given
    /// variables with their attributes.
    fn begin(
        &mut self,
        grid: &SpatialGrid,
        timestamps: &[NaiveDateTime],
        variables: &BTreeMap<String, Attributes>,
    ) -> TimeSeriesResult<()>;

    /// Store `block` (rows follow the cell's point order) at time index
    /// `time_start`.
    fn write_block(
        &mut self,
        cell: u32,
        variable: &str,
        time_start: usize,
        block: &Array2<f32>,
    ) -> TimeSeriesResult<()>;

    fn finish(&mut self) -> TimeSeriesResult<()>;
}
