//! Error types shared by the ERA5 crates.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using Era5Error.
pub type Era5Result<T> = Result<T, Era5Error>;

/// Primary error type for grid, date and variable handling.
#[derive(Debug, Error)]
pub enum Era5Error {
    // === Grid Errors ===
    #[error("Grid not regular: {axis} spacing varies ({deltas:?})")]
    IrregularGrid { axis: &'static str, deltas: Vec<f64> },

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Coordinate arrays differ in shape: lons {lons:?}, lats {lats:?}")]
    ShapeMismatch {
        lons: (usize, usize),
        lats: (usize, usize),
    },

    #[error("Resolution must be a positive number of degrees, got {0}")]
    InvalidResolution(f64),

    // === Date Errors ===
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid hour step {0}: must be a full hour between 0 and 23")]
    InvalidHourStep(u32),

    #[error("At least one hour step is required")]
    EmptyHourSteps,

    #[error("Invalid date/time '{0}': expected YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]")]
    InvalidDateTime(String),

    // === Variable Errors ===
    #[error("Unknown variable '{name}' for product {product}")]
    UnknownVariable { product: String, name: String },

    #[error("No variable table for product {0}")]
    UnknownProduct(String),

    #[error("Failed to read variable table '{0}'")]
    VariableTableRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse variable table: {0}")]
    VariableTableParse(#[from] serde_yaml::Error),
}
