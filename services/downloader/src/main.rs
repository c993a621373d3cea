//! ERA5 downloader.
//!
//! Downloads ERA5 single-level images between two dates from the Climate Data
//! Store and stores them as one file per timestamp and variable in yearly
//! folders below the target directory.
//!
//! Credentials come from `CDSAPI_URL`/`CDSAPI_KEY` or the `.cdsapirc` file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use downloader::{
    download_and_extract, CdsClient, CdsConfig, DownloadOptions, ExhaustionPolicy,
    RetrievalClient, DEFAULT_MAX_TRIES,
};
use era5_archive::{extractor_for, ImageFormat};
use era5_common::{parse_date, HourSteps, VariableTable};

fn first_era5_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1979, 1, 1).unwrap_or_default()
}

#[derive(Parser, Debug)]
#[command(name = "era5-download")]
#[command(about = "Download ERA5 reanalysis images between two dates from the Climate Data Store")]
struct Args {
    /// Root of the local archive
    localroot: PathBuf,

    /// First date to download (YYYY-MM-DD), defaults to 1979-01-01
    #[arg(short, long, value_parser = parse_date)]
    start: Option<NaiveDate>,

    /// Last date to download (YYYY-MM-DD), defaults to today
    #[arg(short, long, value_parser = parse_date)]
    end: Option<NaiveDate>,

    /// Variables to download, by short or request name (default: the product defaults)
    #[arg(long = "variables", alias = "var", num_args = 1..)]
    variables: Option<Vec<String>>,

    /// Keep the raw downloads in temp_downloaded/
    #[arg(long)]
    keep_original: bool,

    /// Download GRIB instead of NetCDF (always GRIB without the netcdf feature)
    #[arg(long)]
    as_grib: bool,

    /// Full hours to download at each day
    #[arg(long, num_args = 1.., default_values_t = [0u32, 6, 12, 18])]
    h_steps: Vec<u32>,

    /// Plan the requests without contacting the CDS
    #[arg(long)]
    dry_run: bool,

    /// Keep going when a month fails after all retries (the run still fails at the end)
    #[arg(long)]
    skip_failed_chunks: bool,

    /// Attempts per month before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_TRIES)]
    max_attempts: u32,

    /// YAML variable table replacing the built-in one
    #[arg(long, env = "ERA5_VARIABLE_TABLE")]
    variable_table: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let start = args.start.unwrap_or_else(first_era5_date);
    let end = args.end.unwrap_or_else(|| Utc::now().date_naive());
    let format = if args.as_grib {
        ImageFormat::Grib
    } else {
        ImageFormat::default()
    };

    println!(
        "Downloading ERA5 {} data from {} to {} into folder {}",
        format.label(),
        start,
        end,
        args.localroot.display()
    );

    let table = Arc::new(
        VariableTable::load(args.variable_table.as_deref())
            .context("Failed to load variable table")?,
    );
    let extractor = extractor_for(format, table.clone())?;

    let mut options = DownloadOptions::new(&args.localroot, start, end);
    options.variables = args.variables;
    options.h_steps = HourSteps::new(args.h_steps)?;
    options.keep_original = args.keep_original;
    options.format = format;
    options.dry_run = args.dry_run;
    options.max_attempts = args.max_attempts;
    options.policy = if args.skip_failed_chunks {
        ExhaustionPolicy::Continue
    } else {
        ExhaustionPolicy::Abort
    };

    let client: Option<Box<dyn RetrievalClient>> = if args.dry_run {
        None
    } else {
        let config = CdsConfig::load().context(
            "CDS credentials missing: set CDSAPI_KEY or create ~/.cdsapirc \
             (https://cds.climate.copernicus.eu/how-to-api)",
        )?;
        Some(Box::new(CdsClient::new(config)?))
    };

    let summary = download_and_extract(
        &options,
        client.as_deref(),
        extractor.as_ref(),
        table.as_ref(),
    )
    .await?;

    info!(
        chunks = summary.chunks.len(),
        files = summary.extracted_files.len(),
        dry_run = summary.dry_run,
        "Download session complete"
    );

    Ok(())
}
