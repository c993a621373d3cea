//! Error types for time-series conversion.

use chrono::NaiveDateTime;
use thiserror::Error;

use era5_archive::ArchiveError;
use era5_common::Era5Error;

/// Errors that can occur while reshuffling images into time series.
#[derive(Error, Debug)]
pub enum TimeSeriesError {
    /// Reading the image archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Common(#[from] Era5Error),

    /// Zarr format or store error.
    #[error("Zarr error: {0}")]
    Zarr(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Misuse of the time-series buffer.
    #[error("invalid buffer operation: {0}")]
    InvalidBuffer(String),

    /// A block was written for a cell the writer was not prepared for.
    #[error("unknown cell {0}")]
    UnknownCell(u32),

    /// An image does not cover the grid the conversion was set up with.
    #[error("image at {timestamp} has shape {found:?}, grid has {expected:?}")]
    ImageShape {
        timestamp: NaiveDateTime,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// None of the requested timestamps has an image on disk.
    #[error("no images found between {start} and {end}")]
    NoImages {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl TimeSeriesError {
    pub fn zarr(err: impl std::fmt::Display) -> Self {
        Self::Zarr(err.to_string())
    }
}

/// Result type for time-series operations.
pub type TimeSeriesResult<T> = std::result::Result<T, TimeSeriesError>;
