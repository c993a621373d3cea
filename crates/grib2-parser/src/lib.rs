//! GRIB parser implementation (WMO FM 92 GRIB Editions 2 and 1).
//!
//! A small pure Rust reader for the messages found in ERA5 single-level
//! downloads: regular lat/lon grids (template 3.0), horizontal-level products
//! (templates 4.0 - 4.15) and simple packing (template 5.0). The CDS still
//! encodes most single-level parameters as edition 1, which [`grib1`] reads;
//! [`GribReader`] walks files that mix both editions.
//!
//! ```ignore
//! let mut reader = GribReader::new(Bytes::from(std::fs::read(path)?));
//! while let Some(message) = reader.next_message()? {
//!     let values = message.unpack_data()?;
//! }
//! ```

pub mod grib1;
pub mod sections;
pub mod tables;
pub mod unpacking;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

pub use sections::{
    Bitmap, DataRepresentation, DataSection, GridDefinition, Identification, Indicator,
    ProductDefinition,
};
pub use grib1::Grib1Message;
pub use tables::{
    describe_grib1_level, fallback_grib1_parameter_name, fallback_parameter_name,
    LevelDescription, LevelTable,
};
pub use unpacking::unpack_simple;

/// Result type alias using Grib2Error.
pub type Grib2Result<T> = Result<T, Grib2Error>;

#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 data: {0}")]
    InvalidFormat(String),

    #[error("Unsupported GRIB edition {0}")]
    UnsupportedEdition(u8),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unsupported template {template} in section {section}")]
    UnsupportedTemplate { section: u8, template: u16 },

    #[error("Failed to unpack data: {0}")]
    UnpackingError(String),
}

/// One decoded GRIB2 message. `raw` holds the complete message bytes.
#[derive(Debug, Clone)]
pub struct Grib2Message {
    /// Byte offset of the message within its file
    pub offset: usize,
    pub raw: Bytes,
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap: Option<Bitmap>,
    pub data_section: DataSection,
}

impl Grib2Message {
    /// Parse a complete message, from `GRIB` to `7777`.
    pub fn parse(raw: Bytes, offset: usize) -> Grib2Result<Self> {
        let indicator = sections::parse_indicator(&raw)?;
        if !raw.ends_with(b"7777") {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message at offset {} is missing its end marker",
                offset
            )));
        }

        Ok(Self {
            offset,
            identification: sections::parse_identification(&raw)?,
            grid_definition: sections::parse_grid_definition(&raw)?,
            product_definition: sections::parse_product_definition(&raw)?,
            data_representation: sections::parse_data_representation(&raw)?,
            bitmap: sections::parse_bitmap(&raw)?,
            data_section: sections::parse_data_section(&raw)?,
            indicator,
            raw,
        })
    }

    pub fn discipline(&self) -> u8 {
        self.indicator.discipline
    }

    /// (discipline, category, number)
    pub fn parameter_code(&self) -> (u8, u8, u8) {
        (
            self.indicator.discipline,
            self.product_definition.parameter_category,
            self.product_definition.parameter_number,
        )
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.identification.reference_time
    }

    /// Reference time plus forecast offset.
    pub fn valid_time(&self) -> Grib2Result<DateTime<Utc>> {
        Ok(self.identification.reference_time + self.product_definition.forecast_offset()?)
    }

    /// Grid dimensions as (rows, cols), i.e. (Nj, Ni).
    pub fn grid_dims(&self) -> (usize, usize) {
        (
            self.grid_definition.num_points_latitude as usize,
            self.grid_definition.num_points_longitude as usize,
        )
    }

    /// Decode the field in scan order. Missing points become NaN.
    pub fn unpack_data(&self) -> Grib2Result<Vec<f32>> {
        let drs = &self.data_representation;
        if drs.template != 0 {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 5,
                template: drs.template,
            });
        }

        let values = unpack_simple(
            &self.data_section.data,
            self.grid_definition.num_data_points,
            drs.bits_per_value,
            drs.reference_value,
            drs.binary_scale_factor,
            drs.decimal_scale_factor,
            self.bitmap.as_ref().map(|b| b.data.as_ref()),
        )?;

        Ok(values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }

    /// Latitude of every row, in degrees.
    pub fn latitudes(&self) -> Grib2Result<Vec<f64>> {
        let gd = self.lat_lon_grid()?;
        let step = if gd.scans_north() { 1 } else { -1 };
        Ok(axis(
            gd.first_latitude,
            step * gd.latitude_increment as i64,
            gd.num_points_latitude,
        ))
    }

    /// Longitude of every column, in degrees as encoded (usually 0 - 360).
    pub fn longitudes(&self) -> Grib2Result<Vec<f64>> {
        let gd = self.lat_lon_grid()?;
        let step = if gd.scans_west() { -1 } else { 1 };
        Ok(axis(
            gd.first_longitude,
            step * gd.longitude_increment as i64,
            gd.num_points_longitude,
        ))
    }

    fn lat_lon_grid(&self) -> Grib2Result<&GridDefinition> {
        let gd = &self.grid_definition;
        if gd.template != 0 {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 3,
                template: gd.template,
            });
        }
        if gd.column_major() {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: "Column-major scanning is not supported".to_string(),
            });
        }
        Ok(gd)
    }
}

/// Coordinates in degrees from a microdegree start and increment.
fn axis(first: i32, step: i64, count: u32) -> Vec<f64> {
    (0..count as i64)
        .map(|i| (first as i64 + i * step) as f64 / 1e6)
        .collect()
}

/// A message of either edition.
#[derive(Debug, Clone)]
pub enum GribMessage {
    Edition1(Grib1Message),
    Edition2(Grib2Message),
}

impl GribMessage {
    pub fn edition(&self) -> u8 {
        match self {
            GribMessage::Edition1(_) => 1,
            GribMessage::Edition2(_) => 2,
        }
    }

    /// Byte offset of the message within its file
    pub fn offset(&self) -> usize {
        match self {
            GribMessage::Edition1(m) => m.offset,
            GribMessage::Edition2(m) => m.offset,
        }
    }

    /// The complete message bytes.
    pub fn raw(&self) -> &Bytes {
        match self {
            GribMessage::Edition1(m) => &m.raw,
            GribMessage::Edition2(m) => &m.raw,
        }
    }

    pub fn valid_time(&self) -> Grib2Result<DateTime<Utc>> {
        match self {
            GribMessage::Edition1(m) => m.valid_time(),
            GribMessage::Edition2(m) => m.valid_time(),
        }
    }

    pub fn unpack_data(&self) -> Grib2Result<Vec<f32>> {
        match self {
            GribMessage::Edition1(m) => m.unpack_data(),
            GribMessage::Edition2(m) => m.unpack_data(),
        }
    }

    pub fn latitudes(&self) -> Grib2Result<Vec<f64>> {
        match self {
            GribMessage::Edition1(m) => m.latitudes(),
            GribMessage::Edition2(m) => m.latitudes(),
        }
    }

    pub fn longitudes(&self) -> Grib2Result<Vec<f64>> {
        match self {
            GribMessage::Edition1(m) => m.longitudes(),
            GribMessage::Edition2(m) => m.longitudes(),
        }
    }
}

/// Sequential reader over the messages of a GRIB file of any supported edition.
pub struct GribReader {
    data: Bytes,
    offset: usize,
}

impl GribReader {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Parse the next message, skipping any bytes before its `GRIB` marker.
    ///
    /// Returns `Ok(None)` once no further marker is found.
    pub fn next_message(&mut self) -> Grib2Result<Option<GribMessage>> {
        let start = match find_marker(&self.data, self.offset) {
            Some(start) => start,
            None => {
                self.offset = self.data.len();
                return Ok(None);
            }
        };

        if start > self.offset {
            debug!(
                skipped = start - self.offset,
                offset = start,
                "Skipped bytes before GRIB marker"
            );
        }

        let edition = *self.data.get(start + 7).ok_or_else(|| {
            Grib2Error::InvalidFormat(format!("Message at offset {} is truncated", start))
        })?;
        let length = match edition {
            1 => grib1::message_length(&self.data[start..])?,
            2 => {
                let indicator = sections::parse_indicator(&self.data[start..])?;
                usize::try_from(indicator.message_length).map_err(|_| {
                    Grib2Error::InvalidFormat(format!(
                        "Message length {} does not fit in memory",
                        indicator.message_length
                    ))
                })?
            }
            other => return Err(Grib2Error::UnsupportedEdition(other)),
        };

        let end = start + length;
        if end > self.data.len() {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message at offset {} is truncated: needs {} bytes, {} available",
                start,
                length,
                self.data.len() - start
            )));
        }

        self.offset = end;
        let raw = self.data.slice(start..end);
        let message = match edition {
            1 => GribMessage::Edition1(Grib1Message::parse(raw, start)?),
            _ => GribMessage::Edition2(Grib2Message::parse(raw, start)?),
        };
        Ok(Some(message))
    }
}

impl Iterator for GribReader {
    type Item = Grib2Result<GribMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next_message();
        if next.is_err() {
            // a broken message leaves no reliable position to resume from
            self.offset = self.data.len();
        }
        next.transpose()
    }
}

/// Reader that accepts edition 2 messages only.
pub struct Grib2Reader {
    inner: GribReader,
}

impl Grib2Reader {
    pub fn new(data: Bytes) -> Self {
        Self {
            inner: GribReader::new(data),
        }
    }

    /// Like [`GribReader::next_message`], failing with
    /// [`Grib2Error::UnsupportedEdition`] on edition 1 messages.
    pub fn next_message(&mut self) -> Grib2Result<Option<Grib2Message>> {
        match self.inner.next_message()? {
            Some(GribMessage::Edition2(message)) => Ok(Some(message)),
            Some(other) => Err(Grib2Error::UnsupportedEdition(other.edition())),
            None => Ok(None),
        }
    }
}

impl Iterator for Grib2Reader {
    type Item = Grib2Result<Grib2Message>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next_message();
        if next.is_err() {
            self.inner.offset = self.inner.data.len();
        }
        next.transpose()
    }
}

fn find_marker(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(4)
        .position(|w| w == b"GRIB")
        .map(|pos| from + pos)
}
