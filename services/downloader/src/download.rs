//! Chunked download of a date range and extraction into the archive.
//!
//! The range is split into windows of at most one calendar month. Each window
//! is one remote request, staged under `<target>/temp_downloaded/` and then
//! split into per-timestamp, per-variable archive files.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument, warn};

use era5_archive::{ArchiveError, ArchiveExtractor, ImageFormat};
use era5_common::{month_windows, DateWindow, Era5Error, HourSteps, VariableLookup, ERA5_PRODUCT};

use crate::cds::{RetrievalClient, RetrievalError};
use crate::request::{staging_file_name, RetrievalRequest, ERA5_SINGLE_LEVELS};
use crate::retry::{attempt, Attempt, DEFAULT_MAX_TRIES};

/// Directory below the target path holding raw downloads.
pub const STAGING_DIR: &str = "temp_downloaded";

/// What to do when a window still fails after the last try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Stop the run.
    #[default]
    Abort,
    /// Skip the window and report it once all windows were tried.
    Continue,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Common(#[from] Era5Error),

    #[error("extraction failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("retrieval of {window} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        window: DateWindow,
        attempts: u32,
        #[source]
        source: RetrievalError,
    },

    #[error("{} of {total} windows failed: {}", .failed.len(), join_windows(.failed))]
    IncompleteRange {
        failed: Vec<DateWindow>,
        total: usize,
        extracted_files: usize,
    },

    #[error("a retrieval client is required unless running dry")]
    MissingClient,
}

fn join_windows(windows: &[DateWindow]) -> String {
    windows
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parameters of one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub target_path: PathBuf,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Short or request names; `None` selects the product defaults.
    pub variables: Option<Vec<String>>,
    pub h_steps: HourSteps,
    pub keep_original: bool,
    pub format: ImageFormat,
    pub dry_run: bool,
    pub max_attempts: u32,
    pub policy: ExhaustionPolicy,
    pub product: String,
    pub dataset: String,
}

impl DownloadOptions {
    pub fn new(target_path: impl Into<PathBuf>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            target_path: target_path.into(),
            start,
            end,
            variables: None,
            h_steps: HourSteps::default(),
            keep_original: false,
            format: ImageFormat::default(),
            dry_run: false,
            max_attempts: DEFAULT_MAX_TRIES,
            policy: ExhaustionPolicy::Abort,
            product: ERA5_PRODUCT.to_string(),
            dataset: ERA5_SINGLE_LEVELS.to_string(),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.target_path.join(STAGING_DIR)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSummary {
    pub chunks: Vec<DateWindow>,
    pub extracted_files: Vec<PathBuf>,
    pub dry_run: bool,
}

fn remove_staging_dir(dir: &Path) -> Result<(), DownloadError> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Download every window of `[start, end]` and extract it below the target
/// path.
///
/// `client` may be `None` only for dry runs.
#[instrument(skip_all, fields(target = %options.target_path.display(), start = %options.start, end = %options.end))]
pub async fn download_and_extract(
    options: &DownloadOptions,
    client: Option<&dyn RetrievalClient>,
    extractor: &dyn ArchiveExtractor,
    lookup: &dyn VariableLookup,
) -> Result<DownloadSummary, DownloadError> {
    let variables = match &options.variables {
        None => lookup.default_variables(&options.product)?,
        Some(names) => lookup.lookup(&options.product, names)?,
    };
    let chunks = month_windows(options.start, options.end)?;
    let staging = options.staging_dir();

    info!(
        chunks = chunks.len(),
        variables = ?variables.dl_names(),
        format = %options.format,
        "Planned download"
    );

    if options.dry_run {
        for window in &chunks {
            let request = RetrievalRequest::for_window(window, &variables, &options.h_steps, options.format);
            info!(window = %window, days = request.day.len(), "Dry run, skipping retrieval");
        }
        return Ok(DownloadSummary {
            chunks,
            extracted_files: Vec::new(),
            dry_run: true,
        });
    }

    let client = client.ok_or(DownloadError::MissingClient)?;
    std::fs::create_dir_all(&staging)?;

    let mut extracted_files = Vec::new();
    let mut failed = Vec::new();

    for window in &chunks {
        let request = RetrievalRequest::for_window(window, &variables, &options.h_steps, options.format);
        let staged = staging.join(staging_file_name(window, options.format));

        let outcome = attempt(
            options.max_attempts,
            |_| client.retrieve(&options.dataset, &request, &staged),
            |_, try_number| {
                if staged.exists() {
                    if let Err(e) = std::fs::remove_file(&staged) {
                        warn!(error = %e, attempt = try_number, "Failed to remove partial download");
                    }
                }
            },
        )
        .await;

        match outcome {
            Attempt::Success { attempts, .. } => {
                info!(window = %window, attempts = attempts, "Retrieved window");
                let files = extractor.extract(&staged, &options.target_path, &options.product)?;
                info!(window = %window, files = files.len(), "Extracted window");
                extracted_files.extend(files);

                if !options.keep_original {
                    std::fs::remove_file(&staged)?;
                }
            }
            Attempt::Exhausted {
                attempts,
                last_error,
            } => match options.policy {
                ExhaustionPolicy::Abort => {
                    if !options.keep_original {
                        remove_staging_dir(&staging)?;
                    }
                    return Err(DownloadError::RetriesExhausted {
                        window: *window,
                        attempts,
                        source: last_error,
                    });
                }
                ExhaustionPolicy::Continue => {
                    warn!(window = %window, attempts = attempts, error = %last_error, "Skipping window");
                    failed.push(*window);
                }
            },
        }
    }

    if !options.keep_original {
        remove_staging_dir(&staging)?;
    }

    if !failed.is_empty() {
        return Err(DownloadError::IncompleteRange {
            failed,
            total: chunks.len(),
            extracted_files: extracted_files.len(),
        });
    }

    info!(files = extracted_files.len(), "Download finished");
    Ok(DownloadSummary {
        chunks,
        extracted_files,
        dry_run: false,
    })
}
