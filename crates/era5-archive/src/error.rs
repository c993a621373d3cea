//! Error types for the archive crate.

use std::path::PathBuf;

use chrono::NaiveDateTime;
use thiserror::Error;

use era5_common::Era5Error;
use grib2_parser::Grib2Error;

/// Errors that can occur while extracting or reading archive files.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse GRIB2 data: {0}")]
    Grib2(#[from] Grib2Error),

    #[error("NetCDF error: {0}")]
    NetCdf(String),

    #[error("No GRIB or NetCDF files found under {0}")]
    UnknownFormat(PathBuf),

    #[error("{format} support is not compiled in (enable the `{feature}` feature)")]
    FormatDisabled {
        format: &'static str,
        feature: &'static str,
    },

    #[error("Variable '{variable}' missing at {timestamp}")]
    MissingVariable {
        variable: String,
        timestamp: NaiveDateTime,
    },

    #[error("No image for {timestamp}: {path} does not exist")]
    ImageNotFound {
        timestamp: NaiveDateTime,
        path: PathBuf,
    },

    #[error("Shape mismatch for '{variable}': expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        variable: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid field in {path}: {reason}")]
    InvalidField { path: PathBuf, reason: String },

    #[error(transparent)]
    Common(#[from] Era5Error),
}

/// Result type for archive operations.
pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;
