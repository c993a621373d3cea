//! Zarr V3 time-series store, one group per 5 degree cell.
//!
//! ```text
//! <root>/<cell:04>/zarr.json         group, global attributes
//! <root>/<cell:04>/lon|lat           [points] float64
//! <root>/<cell:04>/location_id       [points] int64, index into the image grid
//! <root>/<cell:04>/time              [times]  float64, days since 1900-01-01
//! <root>/<cell:04>/<variable>        [points, times] float32
//! ```
//!
//! Every array is compressed with Blosc/Zstd, byte-shuffled by element size.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::Array2;
use serde_json::json;
use tracing::{debug, info, instrument};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::codec::BytesToBytesCodecTraits;
use zarrs::array::{Array, ArrayBuilder, ChunkGrid, DataType, Element, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs_filesystem::FilesystemStore;

use era5_archive::Attributes;
use era5_common::SpatialGrid;

use crate::error::{TimeSeriesError, TimeSeriesResult};
use crate::sink::TimeSeriesSink;

/// Upper bound of the time extent of one chunk.
pub const MAX_TIME_CHUNK: usize = 1000;

pub const TIME_UNITS: &str = "days since 1900-01-01 00:00:00";

/// Blosc compression level of all arrays (0-9).
pub const BLOSC_LEVEL: u8 = 5;

/// Fractional days since 1900-01-01 00:00.
pub fn days_since_1900(ts: NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    (ts - epoch).num_seconds() as f64 / 86_400.0
}

/// Writes cell time series as compressed Zarr V3 arrays on the filesystem.
pub struct ZarrTimeSeriesWriter {
    root: PathBuf,
    global_attributes: Attributes,
    arrays: HashMap<(u32, String), Array<FilesystemStore>>,
    times: usize,
}

impl ZarrTimeSeriesWriter {
    pub fn new(root: impl Into<PathBuf>, global_attributes: Attributes) -> Self {
        Self {
            root: root.into(),
            global_attributes,
            arrays: HashMap::new(),
            times: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the group of `cell`.
    pub fn cell_path(&self, cell: u32) -> PathBuf {
        self.root.join(format!("{:04}", cell))
    }

    fn open_store(&self, cell: u32) -> TimeSeriesResult<Arc<FilesystemStore>> {
        let path = self.cell_path(cell);
        std::fs::create_dir_all(&path)?;
        let store = FilesystemStore::new(&path).map_err(TimeSeriesError::zarr)?;
        Ok(Arc::new(store))
    }

    fn build_array(
        store: Arc<FilesystemStore>,
        path: &str,
        shape: Vec<u64>,
        chunks: Vec<u64>,
        data_type: DataType,
        fill_value: FillValue,
        attributes: Attributes,
    ) -> TimeSeriesResult<Array<FilesystemStore>> {
        let chunk_grid: ChunkGrid = chunks
            .try_into()
            .map_err(|e| TimeSeriesError::Zarr(format!("{:?}", e)))?;

        let codec = Self::blosc_codec(&data_type)?;
        let array = ArrayBuilder::new(shape, data_type, chunk_grid, fill_value)
            .attributes(attributes)
            .bytes_to_bytes_codecs(vec![codec])
            .build(store, path)
            .map_err(TimeSeriesError::zarr)?;
        array.store_metadata().map_err(TimeSeriesError::zarr)?;
        Ok(array)
    }

    /// Blosc/Zstd codec, shuffled by the element size of `data_type`.
    fn blosc_codec(data_type: &DataType) -> TimeSeriesResult<Arc<dyn BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(BLOSC_LEVEL)
            .map_err(|_| TimeSeriesError::Zarr(format!("invalid Blosc level {}", BLOSC_LEVEL)))?;

        // typesize is required when shuffle is enabled
        let typesize = match data_type {
            DataType::Float32 | DataType::Int32 => Some(4),
            DataType::Float64 | DataType::Int64 => Some(8),
            _ => None,
        };
        let shuffle = if typesize.is_some() {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        let codec = BloscCodec::new(BloscCompressor::Zstd, level, None, shuffle, typesize)
            .map_err(TimeSeriesError::zarr)?;
        Ok(Arc::new(codec))
    }

    /// Create and fill a one-dimensional coordinate array.
    fn write_vector<T: Element>(
        store: Arc<FilesystemStore>,
        path: &str,
        values: &[T],
        data_type: DataType,
        fill_value: FillValue,
        attributes: Attributes,
    ) -> TimeSeriesResult<()> {
        let len = values.len() as u64;
        let array = Self::build_array(
            store,
            path,
            vec![len],
            vec![len.max(1)],
            data_type,
            fill_value,
            attributes,
        )?;

        let subset =
            ArraySubset::new_with_start_shape(vec![0], vec![len]).map_err(TimeSeriesError::zarr)?;
        array
            .store_array_subset_elements(&subset, values)
            .map_err(TimeSeriesError::zarr)
    }

    fn units(units: &str) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("units".to_string(), json!(units));
        attrs
    }
}

impl TimeSeriesSink for ZarrTimeSeriesWriter {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn begin(
        &mut self,
        grid: &SpatialGrid,
        timestamps: &[NaiveDateTime],
        variables: &BTreeMap<String, Attributes>,
    ) -> TimeSeriesResult<()> {
        let times = timestamps.len() as u64;
        let time_chunk = timestamps.len().clamp(1, MAX_TIME_CHUNK) as u64;
        let time_values: Vec<f64> = timestamps.iter().copied().map(days_since_1900).collect();

        self.times = timestamps.len();
        self.arrays.clear();

        for cell in grid.cell_ids() {
            let points = grid.cell_points(cell).unwrap_or_default();
            let store = self.open_store(cell)?;

            GroupBuilder::new()
                .attributes(self.global_attributes.clone())
                .build(store.clone(), "/")
                .map_err(TimeSeriesError::zarr)?
                .store_metadata()
                .map_err(TimeSeriesError::zarr)?;

            let lons: Vec<f64> = points.iter().map(|&p| grid.lons()[p]).collect();
            let lats: Vec<f64> = points.iter().map(|&p| grid.lats()[p]).collect();
            let location_ids: Vec<i64> = points.iter().map(|&p| p as i64).collect();

            Self::write_vector(
                store.clone(),
                "/lon",
                &lons,
                DataType::Float64,
                FillValue::from(f64::NAN),
                Self::units("degrees_east"),
            )?;
            Self::write_vector(
                store.clone(),
                "/lat",
                &lats,
                DataType::Float64,
                FillValue::from(f64::NAN),
                Self::units("degrees_north"),
            )?;
            Self::write_vector(
                store.clone(),
                "/location_id",
                &location_ids,
                DataType::Int64,
                FillValue::from(-1i64),
                Attributes::new(),
            )?;
            Self::write_vector(
                store.clone(),
                "/time",
                &time_values,
                DataType::Float64,
                FillValue::from(f64::NAN),
                Self::units(TIME_UNITS),
            )?;

            for (variable, attributes) in variables {
                let array = Self::build_array(
                    store.clone(),
                    &format!("/{}", variable),
                    vec![points.len() as u64, times],
                    vec![(points.len() as u64).max(1), time_chunk],
                    DataType::Float32,
                    FillValue::from(f32::NAN),
                    attributes.clone(),
                )?;
                self.arrays.insert((cell, variable.clone()), array);
            }

            debug!(cell, points = points.len(), "Prepared cell store");
        }

        info!(
            cells = grid.cell_ids().len(),
            variables = variables.len(),
            times = self.times,
            "Created time-series store"
        );
        Ok(())
    }

    fn write_block(
        &mut self,
        cell: u32,
        variable: &str,
        time_start: usize,
        block: &Array2<f32>,
    ) -> TimeSeriesResult<()> {
        let array = self
            .arrays
            .get(&(cell, variable.to_string()))
            .ok_or(TimeSeriesError::UnknownCell(cell))?;

        let (points, times) = block.dim();
        if time_start + times > self.times {
            return Err(TimeSeriesError::InvalidBuffer(format!(
                "block ends at time index {}, store holds {}",
                time_start + times,
                self.times
            )));
        }

        let subset = ArraySubset::new_with_start_shape(
            vec![0, time_start as u64],
            vec![points as u64, times as u64],
        )
        .map_err(TimeSeriesError::zarr)?;

        // row-major, whatever the block's memory layout
        let values: Vec<f32> = block.iter().copied().collect();
        array
            .store_array_subset_elements(&subset, &values)
            .map_err(TimeSeriesError::zarr)
    }

    fn finish(&mut self) -> TimeSeriesResult<()> {
        info!(arrays = self.arrays.len(), "Finished time-series store");
        self.arrays.clear();
        Ok(())
    }
}
