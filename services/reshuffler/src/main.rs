//! ERA5 reshuffler.
//!
//! Converts the images of an archive written by `era5-download` into per-cell
//! time series.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use era5_common::{parse_datetime, parse_end_datetime, HourSteps, VariableTable, ERA5_PRODUCT};
use era5_timeseries::{reshuffle, ReshuffleOptions};

#[derive(Parser, Debug)]
#[command(name = "era5-reshuffle")]
#[command(about = "Convert ERA5 image files into time series")]
struct Args {
    /// Root of the image archive
    dataset_root: PathBuf,

    /// Root of the time-series store
    timeseries_root: PathBuf,

    /// First timestamp (YYYY-MM-DD or YYYY-MM-DDTHH:MM)
    #[arg(value_parser = parse_datetime)]
    start: NaiveDateTime,

    /// Last timestamp (YYYY-MM-DD or YYYY-MM-DDTHH:MM), a bare date includes the whole day
    #[arg(value_parser = parse_end_datetime)]
    end: NaiveDateTime,

    /// Variables to convert, by short or request name
    #[arg(required = true, num_args = 1..)]
    variables: Vec<String>,

    /// Set sea points (land-sea mask below 0.5) to NaN
    #[arg(long)]
    mask_seapoints: bool,

    /// Full hours to read at each day
    #[arg(long, num_args = 1.., default_values_t = [0u32, 6, 12, 18])]
    h_steps: Vec<u32>,

    /// Number of images held in memory between writes
    #[arg(long, default_value_t = 50)]
    imgbuffer: usize,

    /// YAML variable table replacing the built-in one
    #[arg(long, env = "ERA5_VARIABLE_TABLE")]
    variable_table: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
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

    println!(
        "Converting data from {} to {} into {}.",
        args.start,
        args.end,
        args.timeseries_root.display()
    );

    let table = VariableTable::load(args.variable_table.as_deref())
        .context("Failed to load variable table")?;

    let summary = reshuffle(ReshuffleOptions {
        dataset_root: args.dataset_root,
        timeseries_root: args.timeseries_root,
        start: args.start,
        end: args.end,
        variables: args.variables,
        mask_seapoints: args.mask_seapoints,
        h_steps: HourSteps::new(args.h_steps)?,
        imgbuffer: args.imgbuffer,
        product: ERA5_PRODUCT.to_string(),
        lookup: Arc::new(table),
    })
    .context("Reshuffle failed")?;

    info!(
        images = summary.images_read,
        gaps = summary.gaps.len(),
        cells = summary.cells,
        "Conversion complete"
    );

    Ok(())
}
