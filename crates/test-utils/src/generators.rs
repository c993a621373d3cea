//! Generators for synthetic ERA5-like fields.
//!
//! Values are small integers so they survive 16-bit simple packing exactly,
//! which keeps comparisons in tests exact.

/// Axes of a global grid as the CDS encodes them: latitudes from 90 down to
/// -90, longitudes from 0 eastwards below 360.
pub fn global_axes(res_deg: f64) -> (Vec<f64>, Vec<f64>) {
    let nj = (180.0 / res_deg).round() as usize + 1;
    let ni = (360.0 / res_deg).round() as usize;
    let lats = (0..nj).map(|j| 90.0 - j as f64 * res_deg).collect();
    let lons = (0..ni).map(|i| i as f64 * res_deg).collect();
    (lats, lons)
}

/// Unique value for a point at a time step: `step * 10000 + row * ncols + col`.
///
/// # Example
///
/// ```
/// use test_utils::point_value;
///
/// assert_eq!(point_value(2, 1, 3, 36), 20039.0);
/// ```
pub fn point_value(step: usize, row: usize, col: usize, ncols: usize) -> f32 {
    (step * 10_000 + row * ncols + col) as f32
}

/// A full field of [`point_value`]s in row-major order.
pub fn indexed_field(step: usize, rows: usize, cols: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            data.push(point_value(step, row, col, cols));
        }
    }
    data
}

/// Land-sea mask with land on the eastern half (0 <= lon < 180 as encoded).
pub fn half_land_mask(_lat: f64, lon: f64) -> f32 {
    if lon < 180.0 {
        1.0
    } else {
        0.0
    }
}
