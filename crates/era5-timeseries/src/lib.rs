//! Image-to-time-series transposition with a Zarr V3 output store.
//!
//! Images are read one timestamp at a time, held in a bounded buffer and
//! flushed as per-cell `(points x times)` blocks.
//!
//! ```text
//! ImageSource::read(ts)
//!      │
//!      ▼
//! TimeSeriesBuffer::push      (up to imgbuffer images)
//!      │
//!      ▼
//! TimeSeriesBuffer::flush ──► TimeSeriesSink::write_block(cell, variable, ..)
//!                                  │
//!                                  ▼
//!                             <root>/<cell>/<variable>
//! ```
//!
//! # Example
//!
//! ```ignore
//! let summary = reshuffle(ReshuffleOptions {
//!     dataset_root: "era5/images".into(),
//!     timeseries_root: "era5/ts".into(),
//!     start, end,
//!     variables: vec!["swvl1".into()],
//!     mask_seapoints: false,
//!     h_steps: HourSteps::default(),
//!     imgbuffer: 200,
//!     product: "ERA5".into(),
//!     lookup: Arc::new(VariableTable::embedded()?),
//! })?;
//! ```

pub mod buffer;
pub mod error;
pub mod reshuffle;
pub mod sink;
pub mod zarr_writer;

pub use buffer::TimeSeriesBuffer;
pub use error::{TimeSeriesError, TimeSeriesResult};
pub use reshuffle::{
    first_image, reshuffle, FirstImage, ReshuffleDriver, ReshuffleOptions, ReshuffleSummary,
};
pub use sink::TimeSeriesSink;
pub use zarr_writer::{
    days_since_1900, ZarrTimeSeriesWriter, BLOSC_LEVEL, MAX_TIME_CHUNK, TIME_UNITS,
};
