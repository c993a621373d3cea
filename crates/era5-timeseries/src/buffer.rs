//! Bounded accumulator of images awaiting transposition.

use ndarray::Array2;
use tracing::debug;

use era5_archive::ImageRecord;
use era5_common::SpatialGrid;

use crate::error::{TimeSeriesError, TimeSeriesResult};
use crate::sink::TimeSeriesSink;

/// A contiguous window of up to `capacity` time slots.
///
/// `None` slots are images missing on disk and become `NaN` in the output.
#[derive(Debug)]
pub struct TimeSeriesBuffer {
    capacity: usize,
    start: usize,
    slots: Vec<Option<ImageRecord>>,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> TimeSeriesResult<Self> {
        if capacity == 0 {
            return Err(TimeSeriesError::InvalidBuffer(
                "capacity must be at least one image".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            start: 0,
            slots: Vec::with_capacity(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Time index of the first buffered slot.
    pub fn start_index(&self) -> usize {
        self.start
    }

    /// Append the slot for `time_index`, which must directly follow the
    /// buffered window.
    pub fn push(&mut self, time_index: usize, image: Option<ImageRecord>) -> TimeSeriesResult<()> {
        if self.is_full() {
            return Err(TimeSeriesError::InvalidBuffer(format!(
                "buffer full with {} images",
                self.capacity
            )));
        }
        if self.slots.is_empty() {
            self.start = time_index;
        } else if time_index != self.start + self.slots.len() {
            return Err(TimeSeriesError::InvalidBuffer(format!(
                "time index {} does not follow {}",
                time_index,
                self.start + self.slots.len() - 1
            )));
        }

        self.slots.push(image);
        Ok(())
    }

    /// Transpose the buffered images into one `(points x times)` block per
    /// cell and variable, hand them to `sink` and clear the buffer.
    ///
    /// Returns the number of time slots written.
    pub fn flush(
        &mut self,
        grid: &SpatialGrid,
        variables: &[String],
        sink: &mut dyn TimeSeriesSink,
    ) -> TimeSeriesResult<usize> {
        if self.slots.is_empty() {
            return Ok(0);
        }

        let expected = grid.shape();
        for image in self.slots.iter().flatten() {
            if image.shape() != expected {
                return Err(TimeSeriesError::ImageShape {
                    timestamp: image.timestamp,
                    expected,
                    found: image.shape(),
                });
            }
        }

        let cols = expected.1;
        let times = self.slots.len();

        for cell in grid.cell_ids() {
            let points = grid.cell_points(cell).unwrap_or_default();

            for variable in variables {
                let mut block = Array2::from_elem((points.len(), times), f32::NAN);

                for (t, slot) in self.slots.iter().enumerate() {
                    let Some(values) = slot.as_ref().and_then(|img| img.data.get(variable))
                    else {
                        continue;
                    };
                    for (row, &point) in points.iter().enumerate() {
                        block[[row, t]] = values[[point / cols, point % cols]];
                    }
                }

                sink.write_block(cell, variable, self.start, &block)?;
            }
        }

        debug!(start = self.start, times, "Flushed time-series buffer");
        self.slots.clear();
        self.start += times;
        Ok(times)
    }
}
