//! Conversion of an image sequence into per-cell time series.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{info, instrument, warn};

use era5_archive::{detect_format, ArchiveError, Attributes, ImageDataset, ImageRecord, ImageSource};
use era5_common::{build_irregular_grid, timestamps, HourSteps, SpatialGrid, VariableLookup};

use crate::buffer::TimeSeriesBuffer;
use crate::error::{TimeSeriesError, TimeSeriesResult};
use crate::sink::TimeSeriesSink;
use crate::zarr_writer::ZarrTimeSeriesWriter;

/// Outcome of a reshuffle run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReshuffleSummary {
    pub images_read: usize,
    /// Timestamps without an image on disk, written as `NaN`.
    pub gaps: Vec<NaiveDateTime>,
    pub flushes: usize,
    pub cells: usize,
    pub variables: Vec<String>,
}

/// The first available image of a run and its position in the timestamps.
#[derive(Debug, Clone)]
pub struct FirstImage {
    pub index: usize,
    pub image: ImageRecord,
}

/// Reads the first available image of `stamps`.
///
/// Missing images are skipped; any other error is returned.
pub fn first_image(
    source: &mut dyn ImageSource,
    stamps: &[NaiveDateTime],
) -> TimeSeriesResult<FirstImage> {
    for (index, &ts) in stamps.iter().enumerate() {
        match source.read(ts) {
            Ok(image) => return Ok(FirstImage { index, image }),
            Err(ArchiveError::ImageNotFound { path, .. }) => {
                warn!(timestamp = %ts, path = %path.display(), "Image missing");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(no_images(stamps))
}

fn no_images(stamps: &[NaiveDateTime]) -> TimeSeriesError {
    let start = stamps.first().copied().unwrap_or_default();
    let end = stamps.last().copied().unwrap_or_default();
    TimeSeriesError::NoImages { start, end }
}

/// Drives images through a [`TimeSeriesBuffer`] into a sink.
#[derive(Debug)]
pub struct ReshuffleDriver {
    grid: SpatialGrid,
    timestamps: Vec<NaiveDateTime>,
    imgbuffer: usize,
}

impl ReshuffleDriver {
    /// `imgbuffer` is the number of images held in memory between flushes.
    pub fn new(
        grid: SpatialGrid,
        timestamps: Vec<NaiveDateTime>,
        imgbuffer: usize,
    ) -> TimeSeriesResult<Self> {
        if imgbuffer == 0 {
            return Err(TimeSeriesError::InvalidBuffer(
                "imgbuffer must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            grid,
            timestamps,
            imgbuffer,
        })
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Read every timestamp from `source` and write the series to `sink`.
    ///
    /// Variable attributes come from the first available image.
    pub fn run(
        &self,
        source: &mut dyn ImageSource,
        sink: &mut dyn TimeSeriesSink,
    ) -> TimeSeriesResult<ReshuffleSummary> {
        let first = first_image(source, &self.timestamps)?;
        self.run_from(source, sink, first)
    }

    /// Like [`run`](Self::run), starting from an image the caller already
    /// read. Timestamps before `first.index` are gaps; `first` is not read
    /// again.
    #[instrument(skip_all, fields(timestamps = self.timestamps.len(), imgbuffer = self.imgbuffer))]
    pub fn run_from(
        &self,
        source: &mut dyn ImageSource,
        sink: &mut dyn TimeSeriesSink,
        first: FirstImage,
    ) -> TimeSeriesResult<ReshuffleSummary> {
        let FirstImage {
            index: first_index,
            image: first,
        } = first;

        let variables: Vec<String> = first.data.keys().cloned().collect();
        let mut attributes = first.metadata.clone();
        for variable in &variables {
            attributes.entry(variable.clone()).or_default();
        }
        sink.begin(&self.grid, &self.timestamps, &attributes)?;

        let mut summary = ReshuffleSummary {
            cells: self.grid.cell_ids().len(),
            variables: variables.clone(),
            ..Default::default()
        };
        let mut buffer = TimeSeriesBuffer::new(self.imgbuffer)?;
        let mut first = Some(first);

        for (index, &ts) in self.timestamps.iter().enumerate() {
            let image = if index < first_index {
                None
            } else if index == first_index {
                first.take()
            } else {
                match source.read(ts) {
                    Ok(image) => Some(image),
                    Err(ArchiveError::ImageNotFound { path, .. }) => {
                        warn!(timestamp = %ts, path = %path.display(), "Image missing, writing gap");
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            match image {
                Some(_) => summary.images_read += 1,
                None => summary.gaps.push(ts),
            }
            buffer.push(index, image)?;

            if buffer.is_full() {
                buffer.flush(&self.grid, &variables, sink)?;
                summary.flushes += 1;
                info!(done = index + 1, total = self.timestamps.len(), "Flushed images");
            }
        }

        if !buffer.is_empty() {
            buffer.flush(&self.grid, &variables, sink)?;
            summary.flushes += 1;
        }
        sink.finish()?;

        info!(
            images = summary.images_read,
            gaps = summary.gaps.len(),
            flushes = summary.flushes,
            "Reshuffle finished"
        );
        Ok(summary)
    }
}

/// Everything needed to convert an archive into a time-series store.
pub struct ReshuffleOptions {
    pub dataset_root: PathBuf,
    pub timeseries_root: PathBuf,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub variables: Vec<String>,
    pub mask_seapoints: bool,
    pub h_steps: HourSteps,
    pub imgbuffer: usize,
    pub product: String,
    pub lookup: Arc<dyn VariableLookup>,
}

/// Convert the images of `[start, end]` at the hour steps into time series.
#[instrument(skip_all, fields(
    dataset = %options.dataset_root.display(),
    timeseries = %options.timeseries_root.display(),
))]
pub fn reshuffle(options: ReshuffleOptions) -> TimeSeriesResult<ReshuffleSummary> {
    let format = detect_format(&options.dataset_root)?;
    let mut dataset = ImageDataset::open(
        &options.dataset_root,
        &options.product,
        &options.variables,
        options.mask_seapoints,
        options.lookup.clone(),
    )?;

    let stamps = timestamps(options.start, options.end, &options.h_steps)?;
    let first = first_image(&mut dataset, &stamps)?;

    let grid = build_irregular_grid(first.image.lons.view(), first.image.lats.view())?;
    match grid.resolution() {
        Ok((lat_res, lon_res)) => {
            info!(lat_res, lon_res, points = grid.len(), "Reading regular grid");
        }
        Err(e) => {
            warn!(error = %e, points = grid.len(), "Grid is not regular");
        }
    }

    let mut global = Attributes::new();
    global.insert(
        "product".to_string(),
        json!(format!("{} (from {})", options.product, format.label())),
    );
    let mut writer = ZarrTimeSeriesWriter::new(&options.timeseries_root, global);

    let driver = ReshuffleDriver::new(grid, stamps, options.imgbuffer)?;
    driver.run_from(&mut dataset, &mut writer, first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    use chrono::NaiveDate;
    use era5_common::build_regular_grid;
    use ndarray::Array2;

    struct MemorySource {
        images: HashMap<NaiveDateTime, ImageRecord>,
        fail_at: Option<NaiveDateTime>,
        reads: HashMap<NaiveDateTime, usize>,
    }

    impl ImageSource for MemorySource {
        fn read(&mut self, timestamp: NaiveDateTime) -> Result<ImageRecord, ArchiveError> {
            *self.reads.entry(timestamp).or_default() += 1;
            if self.fail_at == Some(timestamp) {
                return Err(ArchiveError::NetCdf("broken".to_string()));
            }
            self.images
                .get(&timestamp)
                .cloned()
                .ok_or_else(|| ArchiveError::ImageNotFound {
                    timestamp,
                    path: PathBuf::from("missing"),
                })
        }
    }

    #[derive(Default)]
    struct CountingSink {
        begun: Vec<String>,
        blocks: usize,
        finished: bool,
    }

    impl TimeSeriesSink for CountingSink {
        fn begin(
            &mut self,
            _grid: &SpatialGrid,
            _timestamps: &[NaiveDateTime],
            variables: &BTreeMap<String, Attributes>,
        ) -> TimeSeriesResult<()> {
            self.begun = variables.keys().cloned().collect();
            Ok(())
        }

        fn write_block(
            &mut self,
            _cell: u32,
            _variable: &str,
            _time_start: usize,
            _block: &Array2<f32>,
        ) -> TimeSeriesResult<()> {
            self.blocks += 1;
            Ok(())
        }

        fn finish(&mut self) -> TimeSeriesResult<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn source(grid: &SpatialGrid, hours: &[u32]) -> MemorySource {
        let shape = grid.shape();
        let images = hours
            .iter()
            .map(|&h| {
                let record = ImageRecord {
                    timestamp: ts(h),
                    data: BTreeMap::from([("t2m".to_string(), Array2::from_elem(shape, h as f32))]),
                    lons: Array2::zeros(shape),
                    lats: Array2::zeros(shape),
                    metadata: BTreeMap::new(),
                };
                (ts(h), record)
            })
            .collect();
        MemorySource {
            images,
            fail_at: None,
            reads: HashMap::new(),
        }
    }

    #[test]
    fn test_zero_imgbuffer_rejected() {
        let grid = build_regular_grid(30.0, 30.0);
        assert!(matches!(
            ReshuffleDriver::new(grid, vec![ts(0)], 0),
            Err(TimeSeriesError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn test_run_records_gaps_and_flushes() {
        let grid = build_regular_grid(30.0, 30.0);
        let cells = grid.cell_ids().len();
        let stamps: Vec<_> = [0, 6, 12, 18].iter().map(|&h| ts(h)).collect();
        let mut src = source(&grid, &[6, 18]);
        let mut sink = CountingSink::default();

        let driver = ReshuffleDriver::new(grid, stamps, 3).unwrap();
        let summary = driver.run(&mut src, &mut sink).unwrap();

        assert_eq!(summary.images_read, 2);
        assert_eq!(summary.gaps, vec![ts(0), ts(12)]);
        assert_eq!(summary.flushes, 2);
        assert_eq!(summary.variables, vec!["t2m"]);
        assert_eq!(sink.begun, vec!["t2m"]);
        assert_eq!(sink.blocks, 2 * cells);
        assert!(sink.finished);
    }

    #[test]
    fn test_each_timestamp_read_once() {
        let grid = build_regular_grid(30.0, 30.0);
        let stamps: Vec<_> = [0, 6, 12, 18].iter().map(|&h| ts(h)).collect();
        let mut src = source(&grid, &[6, 12, 18]);
        let mut sink = CountingSink::default();

        let first = first_image(&mut src, &stamps).unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.image.timestamp, ts(6));

        let driver = ReshuffleDriver::new(grid, stamps, 2).unwrap();
        let summary = driver.run_from(&mut src, &mut sink, first).unwrap();

        assert_eq!(summary.images_read, 3);
        assert_eq!(summary.gaps, vec![ts(0)]);
        for hour in [0, 6, 12, 18] {
            assert_eq!(src.reads[&ts(hour)], 1, "reads at {:02}:00", hour);
        }
    }

    #[test]
    fn test_run_reads_first_image_once() {
        let grid = build_regular_grid(30.0, 30.0);
        let stamps: Vec<_> = [0, 6].iter().map(|&h| ts(h)).collect();
        let mut src = source(&grid, &[0, 6]);
        let mut sink = CountingSink::default();

        let driver = ReshuffleDriver::new(grid, stamps, 2).unwrap();
        driver.run(&mut src, &mut sink).unwrap();

        assert_eq!(src.reads[&ts(0)], 1);
        assert_eq!(src.reads[&ts(6)], 1);
    }

    #[test]
    fn test_run_without_images() {
        let grid = build_regular_grid(30.0, 30.0);
        let mut src = source(&grid, &[]);
        let mut sink = CountingSink::default();

        let driver = ReshuffleDriver::new(grid, vec![ts(0), ts(6)], 2).unwrap();
        let err = driver.run(&mut src, &mut sink).unwrap_err();
        assert!(matches!(err, TimeSeriesError::NoImages { .. }));
    }

    #[test]
    fn test_run_propagates_read_errors() {
        let grid = build_regular_grid(30.0, 30.0);
        let mut src = source(&grid, &[0, 6]);
        src.fail_at = Some(ts(6));
        let mut sink = CountingSink::default();

        let driver = ReshuffleDriver::new(grid, vec![ts(0), ts(6)], 2).unwrap();
        let err = driver.run(&mut src, &mut sink).unwrap_err();
        assert!(matches!(err, TimeSeriesError::Archive(ArchiveError::NetCdf(_))));
        assert!(!sink.finished);
    }
}
