//! Global grid definitions for ERA5 images.
//!
//! ERA5 single-level fields are delivered on a regular lat/lon raster with
//! longitudes in `[0, 360)`. The grids built here normalize longitudes into
//! `(-180, 180]` and partition the points into square cells, which is the unit
//! the time series writer uses to split its output.

use std::collections::BTreeMap;

use ndarray::ArrayView2;

use crate::error::{Era5Error, Era5Result};

/// Edge length of the square cells used for output partitioning (degrees).
pub const CELL_SIZE_DEG: f64 = 5.0;

/// Decimal places used when comparing coordinate spacing.
const RESOLUTION_DECIMALS: i32 = 3;

/// A global grid of points with flattened, row-major coordinate arrays.
///
/// Rows run along latitude, columns along longitude. Each point belongs to
/// exactly one cell of `cell_size` degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    lons: Vec<f64>,
    lats: Vec<f64>,
    /// (rows, cols)
    shape: (usize, usize),
    cell_size: f64,
    /// cell id -> point indices, both ascending
    cells: BTreeMap<u32, Vec<usize>>,
}

impl SpatialGrid {
    fn new(lons: Vec<f64>, lats: Vec<f64>, shape: (usize, usize), cell_size: f64) -> Self {
        let mut cells: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (gpi, (&lon, &lat)) in lons.iter().zip(lats.iter()).enumerate() {
            cells
                .entry(cell_for(lon, lat, cell_size))
                .or_default()
                .push(gpi);
        }

        Self {
            lons,
            lats,
            shape,
            cell_size,
            cells,
        }
    }

    /// Longitude of every point, in (-180, 180].
    pub fn lons(&self) -> &[f64] {
        &self.lons
    }

    /// Latitude of every point.
    pub fn lats(&self) -> &[f64] {
        &self.lats
    }

    /// Grid shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Total number of grid points.
    pub fn len(&self) -> usize {
        self.lons.len()
    }

    /// Check if grid is empty.
    pub fn is_empty(&self) -> bool {
        self.lons.is_empty()
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Ids of all cells that contain at least one point, ascending.
    pub fn cell_ids(&self) -> Vec<u32> {
        self.cells.keys().copied().collect()
    }

    /// Point indices (row-major) of the points in `cell`, ascending.
    pub fn cell_points(&self, cell: u32) -> Option<&[usize]> {
        self.cells.get(&cell).map(Vec::as_slice)
    }

    /// Distinct latitudes, ascending.
    pub fn unique_lats(&self) -> Vec<f64> {
        unique_sorted(&self.lats)
    }

    /// Distinct longitudes, ascending.
    pub fn unique_lons(&self) -> Vec<f64> {
        unique_sorted(&self.lons)
    }

    /// Infer the (lat, lon) resolution, failing if the grid is not regular.
    pub fn resolution(&self) -> Era5Result<(f64, f64)> {
        infer_resolution(&self.lats, &self.lons)
    }
}

/// Reject non-positive or non-finite resolutions before building a grid.
pub fn validate_resolution(res: f64) -> Era5Result<f64> {
    if res.is_finite() && res > 0.0 {
        Ok(res)
    } else {
        Err(Era5Error::InvalidResolution(res))
    }
}

/// Build the regular global grid for the given resolution in degrees.
///
/// Longitudes start at 0 and are wrapped into (-180, 180]; latitudes run from
/// +90 down to -90 inclusive. Resolutions must be positive; use
/// [`validate_resolution`] on untrusted input.
pub fn build_regular_grid(res_lat: f64, res_lon: f64) -> SpatialGrid {
    let lon_axis: Vec<f64> = arange(0.0, 360.0 - res_lon / 2.0, res_lon)
        .into_iter()
        .map(wrap_longitude)
        .collect();
    let lat_axis = arange(90.0, -90.0 - res_lat / 2.0, -res_lat);

    let shape = (lat_axis.len(), lon_axis.len());
    let mut lons = Vec::with_capacity(shape.0 * shape.1);
    let mut lats = Vec::with_capacity(shape.0 * shape.1);
    for &lat in &lat_axis {
        for &lon in &lon_axis {
            lons.push(lon);
            lats.push(lat);
        }
    }

    SpatialGrid::new(lons, lats, shape, CELL_SIZE_DEG)
}

/// Build a grid from 2-D coordinate arrays, as found in image files.
///
/// Longitudes above 180 are wrapped by subtracting 360. No resolution is
/// assumed; call [`SpatialGrid::resolution`] to check regularity.
pub fn build_irregular_grid(
    lons: ArrayView2<'_, f64>,
    lats: ArrayView2<'_, f64>,
) -> Era5Result<SpatialGrid> {
    if lons.dim() != lats.dim() {
        return Err(Era5Error::ShapeMismatch {
            lons: lons.dim(),
            lats: lats.dim(),
        });
    }

    let shape = lons.dim();
    let lons: Vec<f64> = lons.iter().copied().map(wrap_longitude).collect();
    let lats: Vec<f64> = lats.iter().copied().collect();

    Ok(SpatialGrid::new(lons, lats, shape, CELL_SIZE_DEG))
}

/// Derive the (lat, lon) resolution of coordinate arrays.
///
/// The distinct values of each axis are sorted and their adjacent deltas,
/// rounded to 3 decimals, must all be equal.
pub fn infer_resolution(lats: &[f64], lons: &[f64]) -> Era5Result<(f64, f64)> {
    let lat_res = axis_resolution("latitude", lats)?;
    let lon_res = axis_resolution("longitude", lons)?;
    Ok((lat_res, lon_res))
}

fn axis_resolution(axis: &'static str, values: &[f64]) -> Era5Result<f64> {
    let unique = unique_sorted(values);
    if unique.len() < 2 {
        return Err(Era5Error::InvalidGrid(format!(
            "{} axis needs at least two distinct coordinates, found {}",
            axis,
            unique.len()
        )));
    }

    let deltas: Vec<f64> = unique
        .windows(2)
        .map(|pair| round_to(pair[1] - pair[0], RESOLUTION_DECIMALS))
        .collect();

    let first = deltas[0];
    if deltas.iter().all(|&d| d == first) {
        return Ok(first);
    }

    let mut distinct = deltas;
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    Err(Era5Error::IrregularGrid {
        axis,
        deltas: distinct,
    })
}

/// Cell id of a point: columns of cells west to east, rows south to north.
fn cell_for(lon: f64, lat: f64, cell_size: f64) -> u32 {
    let n_lon = (360.0 / cell_size).round() as i64;
    let n_lat = (180.0 / cell_size).round() as i64;

    let x = (((lon + 180.0) / cell_size).floor() as i64).rem_euclid(n_lon);
    let y = (((lat + 90.0) / cell_size).floor() as i64).clamp(0, n_lat - 1);

    (x * n_lat + y) as u32
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else {
        lon
    }
}

/// Evenly spaced values in `[start, stop)`.
fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let n = ((stop - start) / step).ceil().max(0.0) as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn unique_sorted(values: &[f64]) -> Vec<f64> {
    let mut unique = values.to_vec();
    unique.sort_by(f64::total_cmp);
    unique.dedup();
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_regular_grid_0p3() {
        let grid = build_regular_grid(0.3, 0.3);

        assert_eq!(grid.unique_lats().len(), 601);
        assert_eq!(grid.unique_lons().len(), 1200);
        assert_eq!(grid.shape(), (601, 1200));
        assert_eq!(grid.resolution().unwrap(), (0.3, 0.3));
    }

    #[test]
    fn test_regular_grid_resolution_round_trip() {
        for res in [0.25, 0.3, 0.5, 0.75, 1.0, 2.5] {
            let grid = build_regular_grid(res, res);
            assert_eq!(grid.resolution().unwrap(), (res, res), "resolution {}", res);
        }

        let grid = build_regular_grid(0.5, 1.0);
        assert_eq!(grid.resolution().unwrap(), (0.5, 1.0));
    }

    #[test]
    fn test_regular_grid_bounds() {
        let grid = build_regular_grid(1.0, 1.0);

        let lats = grid.unique_lats();
        assert_eq!(lats.first(), Some(&-90.0));
        assert_eq!(lats.last(), Some(&90.0));

        let lons = grid.unique_lons();
        assert_eq!(lons.first(), Some(&-179.0));
        assert_eq!(lons.last(), Some(&180.0));
        assert!(grid.lons().iter().all(|&lon| lon > -180.0 && lon <= 180.0));

        // first row is the north pole, starting at 0E
        assert_eq!(grid.lats()[0], 90.0);
        assert_eq!(grid.lons()[0], 0.0);
    }

    #[test]
    fn test_irregular_grid_matches_regular() {
        let lon_axis: Vec<f64> = (0..360).map(|i| i as f64).collect();
        let lat_axis: Vec<f64> = (0..181).map(|i| 90.0 - i as f64).collect();
        let lons = Array2::from_shape_fn((181, 360), |(_, c)| lon_axis[c]);
        let lats = Array2::from_shape_fn((181, 360), |(r, _)| lat_axis[r]);

        let grid = build_irregular_grid(lons.view(), lats.view()).unwrap();

        assert_eq!(grid, build_regular_grid(1.0, 1.0));
    }

    #[test]
    fn test_irregular_grid_shape_mismatch() {
        let lons = Array2::<f64>::zeros((2, 3));
        let lats = Array2::<f64>::zeros((3, 2));

        let err = build_irregular_grid(lons.view(), lats.view()).unwrap_err();
        assert!(matches!(err, Era5Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_infer_resolution_irregular() {
        let lats = [0.0, 0.25, 0.5, 1.0];
        let lons = [0.0, 0.25, 0.5, 0.75];

        let err = infer_resolution(&lats, &lons).unwrap_err();
        match err {
            Era5Error::IrregularGrid { axis, deltas } => {
                assert_eq!(axis, "latitude");
                assert_eq!(deltas, vec![0.25, 0.5]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_infer_resolution_ignores_order_and_duplicates() {
        let lats = [1.0, 0.0, 0.5, 0.5, 1.0];
        let lons = [10.0, 12.0, 11.0];

        assert_eq!(infer_resolution(&lats, &lons).unwrap(), (0.5, 1.0));
    }

    #[test]
    fn test_infer_resolution_single_value() {
        let err = infer_resolution(&[1.0, 1.0], &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, Era5Error::InvalidGrid(_)));
    }

    #[test]
    fn test_cells_cover_all_points() {
        let grid = build_regular_grid(2.5, 2.5);

        let total: usize = grid
            .cell_ids()
            .iter()
            .map(|&cell| grid.cell_points(cell).unwrap().len())
            .sum();
        assert_eq!(total, grid.len());
        assert_eq!(grid.cell_ids().len(), 72 * 36);
    }

    #[test]
    fn test_cell_numbering() {
        assert_eq!(cell_for(-180.0, -90.0, 5.0), 0);
        assert_eq!(cell_for(-177.5, -87.5, 5.0), 0);
        assert_eq!(cell_for(-180.0, -85.0, 5.0), 1);
        assert_eq!(cell_for(-175.0, -90.0, 5.0), 36);
        // north pole folds into the last row, 180E into the first column
        assert_eq!(cell_for(-180.0, 90.0, 5.0), 35);
        assert_eq!(cell_for(180.0, -90.0, 5.0), 0);
        assert_eq!(cell_for(0.0, 0.0, 5.0), 36 * 36 + 18);
    }

    #[test]
    fn test_validate_resolution() {
        assert_eq!(validate_resolution(0.25).unwrap(), 0.25);
        assert!(validate_resolution(0.0).is_err());
        assert!(validate_resolution(-1.0).is_err());
        assert!(validate_resolution(f64::NAN).is_err());
    }
}
