//! ERA5 download orchestration.
//!
//! A date range is split into month windows, each retrieved from the Climate
//! Data Store with bounded retries and then split into the image archive.

pub mod cds;
pub mod download;
pub mod request;
pub mod retry;

pub use cds::{CdsClient, CdsConfig, RetrievalClient, RetrievalError};
pub use download::{
    download_and_extract, DownloadError, DownloadOptions, DownloadSummary, ExhaustionPolicy,
    STAGING_DIR,
};
pub use request::{RetrievalRequest, ERA5_SINGLE_LEVELS};
pub use retry::{attempt, Attempt, DEFAULT_MAX_TRIES};
