//! GRIB edition 1 messages (WMO FM 92 GRIB Edition 1).
//!
//! Covers what the CDS delivers for ERA5 single levels in GRIB1: a product
//! definition section with the ECMWF local parameter tables, a regular
//! lat/lon grid (data representation type 0), an optional bitmap and simple
//! grid point packing. Coordinates are in millidegrees.

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::unpacking::unpack_simple;
use crate::{Grib2Error, Grib2Result};

/// Length of the indicator section.
const INDICATOR_LEN: usize = 8;

/// Product Definition Section.
#[derive(Debug, Clone)]
pub struct Grib1Product {
    pub table_version: u8,
    pub center: u8,
    pub has_grid: bool,
    pub has_bitmap: bool,
    pub parameter: u8,
    pub level_type: u8,
    /// Octets 11-12 as one value; layers carry top and bottom in one byte each.
    pub level_value: u16,
    pub reference_time: DateTime<Utc>,
    pub time_unit: u8,
    pub p1: u8,
    pub p2: u8,
    pub time_range: u8,
    pub decimal_scale_factor: i16,
}

impl Grib1Product {
    /// Offset of the valid time from the reference time (Code Table 5).
    pub fn forecast_offset(&self) -> Grib2Result<Duration> {
        let steps = match self.time_range {
            0 | 1 => self.p1 as i64,
            10 => u16::from_be_bytes([self.p1, self.p2]) as i64,
            2..=5 => self.p2 as i64,
            other => {
                return Err(Grib2Error::InvalidSection {
                    section: 1,
                    reason: format!("Unsupported time range indicator {}", other),
                })
            }
        };

        let offset = match self.time_unit {
            0 => Duration::minutes(steps),
            1 => Duration::hours(steps),
            2 => Duration::days(steps),
            10 => Duration::hours(3 * steps),
            11 => Duration::hours(6 * steps),
            12 => Duration::hours(12 * steps),
            13 => Duration::minutes(15 * steps),
            254 => Duration::seconds(steps),
            unit => {
                return Err(Grib2Error::InvalidSection {
                    section: 1,
                    reason: format!("Unsupported time unit {}", unit),
                })
            }
        };
        Ok(offset)
    }
}

/// Grid Description Section for a regular lat/lon grid.
#[derive(Debug, Clone)]
pub struct Grib1Grid {
    pub data_representation: u8,
    pub ni: u16,
    pub nj: u16,
    pub first_latitude: i32,
    pub first_longitude: i32,
    pub last_latitude: i32,
    pub last_longitude: i32,
    pub longitude_increment: u16,
    pub latitude_increment: u16,
    pub scanning_mode: u8,
}

impl Grib1Grid {
    pub fn scans_west(&self) -> bool {
        self.scanning_mode & 0x80 != 0
    }

    pub fn scans_north(&self) -> bool {
        self.scanning_mode & 0x40 != 0
    }

    pub fn column_major(&self) -> bool {
        self.scanning_mode & 0x20 != 0
    }

    pub fn num_points(&self) -> u32 {
        self.ni as u32 * self.nj as u32
    }
}

/// Binary Data Section.
#[derive(Debug, Clone)]
pub struct Grib1Data {
    pub flags: u8,
    pub binary_scale_factor: i16,
    pub reference_value: f32,
    pub bits_per_value: u8,
    pub data: Bytes,
}

/// One decoded GRIB1 message. `raw` holds the complete message bytes.
#[derive(Debug, Clone)]
pub struct Grib1Message {
    pub offset: usize,
    pub raw: Bytes,
    pub product: Grib1Product,
    pub grid: Grib1Grid,
    pub bitmap: Option<Bytes>,
    pub binary: Grib1Data,
}

impl Grib1Message {
    /// Parse a complete message, from `GRIB` to `7777`.
    pub fn parse(raw: Bytes, offset: usize) -> Grib2Result<Self> {
        if raw.len() < INDICATOR_LEN + 4 || &raw[0..4] != b"GRIB" || raw[7] != 1 {
            return Err(Grib2Error::InvalidFormat(format!(
                "No GRIB1 message at offset {}",
                offset
            )));
        }
        if !raw.ends_with(b"7777") {
            return Err(Grib2Error::InvalidFormat(format!(
                "Message at offset {} is missing its end marker",
                offset
            )));
        }

        let mut position = INDICATOR_LEN;
        let pds = section(&raw, position, 1, 28)?;
        let product = parse_product(pds)?;
        position += pds.len();

        if !product.has_grid {
            return Err(Grib2Error::InvalidSection {
                section: 2,
                reason: "Messages without a grid description are not supported".to_string(),
            });
        }
        let gds = section(&raw, position, 2, 28)?;
        let grid = parse_grid(gds)?;
        position += gds.len();

        let bitmap = if product.has_bitmap {
            let bms = section(&raw, position, 3, 6)?;
            position += bms.len();
            Some(parse_bitmap(bms)?)
        } else {
            None
        };

        let bds = section(&raw, position, 4, 11)?;
        let binary = parse_binary(bds)?;

        Ok(Self {
            offset,
            raw,
            product,
            grid,
            bitmap,
            binary,
        })
    }

    /// (table version, parameter number)
    pub fn parameter_code(&self) -> (u8, u8) {
        (self.product.table_version, self.product.parameter)
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.product.reference_time
    }

    pub fn valid_time(&self) -> Grib2Result<DateTime<Utc>> {
        Ok(self.product.reference_time + self.product.forecast_offset()?)
    }

    /// Grid dimensions as (rows, cols), i.e. (Nj, Ni).
    pub fn grid_dims(&self) -> (usize, usize) {
        (self.grid.nj as usize, self.grid.ni as usize)
    }

    /// Decode the field in scan order. Missing points become NaN.
    pub fn unpack_data(&self) -> Grib2Result<Vec<f32>> {
        let values = unpack_simple(
            &self.binary.data,
            self.grid.num_points(),
            self.binary.bits_per_value,
            self.binary.reference_value,
            self.binary.binary_scale_factor,
            self.product.decimal_scale_factor,
            self.bitmap.as_deref(),
        )?;
        Ok(values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }

    pub fn latitudes(&self) -> Grib2Result<Vec<f64>> {
        let grid = self.lat_lon_grid()?;
        let step = if grid.scans_north() { 1 } else { -1 };
        Ok(axis(
            grid.first_latitude,
            step * grid.latitude_increment as i64,
            grid.nj,
        ))
    }

    pub fn longitudes(&self) -> Grib2Result<Vec<f64>> {
        let grid = self.lat_lon_grid()?;
        let step = if grid.scans_west() { -1 } else { 1 };
        Ok(axis(
            grid.first_longitude,
            step * grid.longitude_increment as i64,
            grid.ni,
        ))
    }

    fn lat_lon_grid(&self) -> Grib2Result<&Grib1Grid> {
        let grid = &self.grid;
        if grid.data_representation != 0 {
            return Err(Grib2Error::UnsupportedTemplate {
                section: 2,
                template: grid.data_representation as u16,
            });
        }
        if grid.column_major() {
            return Err(Grib2Error::InvalidSection {
                section: 2,
                reason: "Column-major scanning is not supported".to_string(),
            });
        }
        Ok(grid)
    }
}

/// Total message length from the indicator section.
pub fn message_length(data: &[u8]) -> Grib2Result<usize> {
    if data.len() < INDICATOR_LEN {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }
    let length = read_u24(&data[4..7]) as usize;
    if length < INDICATOR_LEN + 4 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Message length {} is shorter than the indicator",
            length
        )));
    }
    Ok(length)
}

/// Coordinates in degrees from a millidegree start and increment.
fn axis(first: i32, step: i64, count: u16) -> Vec<f64> {
    (0..count as i64)
        .map(|i| (first as i64 + i * step) as f64 / 1e3)
        .collect()
}

/// The section starting at `position`, sized by its 3-byte length.
fn section(data: &[u8], position: usize, number: u8, min_len: usize) -> Grib2Result<&[u8]> {
    let header = data
        .get(position..position + 3)
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: number,
            reason: "Section not found".to_string(),
        })?;
    let length = read_u24(header) as usize;
    if length < min_len {
        return Err(Grib2Error::InvalidSection {
            section: number,
            reason: format!("Invalid section length {} at offset {}", length, position),
        });
    }
    data.get(position..position + length)
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: number,
            reason: format!("Section of {} bytes at offset {} is truncated", length, position),
        })
}

fn parse_product(pds: &[u8]) -> Grib2Result<Grib1Product> {
    // octets counted from 1: 4 table, 5 centre, 8 flags, 9 parameter,
    // 10 level type, 11-12 level, 13-17 date, 18 unit, 19 P1, 20 P2,
    // 21 time range, 25 century, 27-28 D
    let century = pds[24] as i32;
    let year = (century - 1) * 100 + pds[12] as i32;
    let (month, day, hour, minute) = (pds[13], pds[14], pds[15], pds[16]);

    let reference_time = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, 0))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}",
                year, month, day, hour, minute
            ),
        })?;

    Ok(Grib1Product {
        table_version: pds[3],
        center: pds[4],
        has_grid: pds[7] & 0x80 != 0,
        has_bitmap: pds[7] & 0x40 != 0,
        parameter: pds[8],
        level_type: pds[9],
        level_value: u16::from_be_bytes([pds[10], pds[11]]),
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        time_unit: pds[17],
        p1: pds[18],
        p2: pds[19],
        time_range: pds[20],
        decimal_scale_factor: decode_signed16(&pds[26..28]),
    })
}

fn parse_grid(gds: &[u8]) -> Grib2Result<Grib1Grid> {
    // 6 representation type, 7-8 Ni, 9-10 Nj, 11-13 La1, 14-16 Lo1,
    // 18-20 La2, 21-23 Lo2, 24-25 Di, 26-27 Dj, 28 scanning mode
    let data_representation = gds[5];
    if data_representation != 0 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 2,
            template: data_representation as u16,
        });
    }

    Ok(Grib1Grid {
        data_representation,
        ni: u16::from_be_bytes([gds[6], gds[7]]),
        nj: u16::from_be_bytes([gds[8], gds[9]]),
        first_latitude: decode_signed24(&gds[10..13]),
        first_longitude: decode_signed24(&gds[13..16]),
        last_latitude: decode_signed24(&gds[17..20]),
        last_longitude: decode_signed24(&gds[20..23]),
        longitude_increment: u16::from_be_bytes([gds[23], gds[24]]),
        latitude_increment: u16::from_be_bytes([gds[25], gds[26]]),
        scanning_mode: gds[27],
    })
}

fn parse_bitmap(bms: &[u8]) -> Grib2Result<Bytes> {
    let table_reference = u16::from_be_bytes([bms[4], bms[5]]);
    if table_reference != 0 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!("Predefined bitmaps are not supported ({})", table_reference),
        });
    }
    Ok(Bytes::copy_from_slice(&bms[6..]))
}

fn parse_binary(bds: &[u8]) -> Grib2Result<Grib1Data> {
    // 4 flags (high nibble) and unused trailing bits, 5-6 E, 7-10 R (IBM),
    // 11 bits per value, 12+ packed values
    let flags = bds[3] >> 4;
    if flags & 0x0C != 0 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Only simple grid point packing is supported".to_string(),
        });
    }

    Ok(Grib1Data {
        flags,
        binary_scale_factor: decode_signed16(&bds[4..6]),
        reference_value: decode_ibm_float([bds[6], bds[7], bds[8], bds[9]]),
        bits_per_value: bds[10],
        data: Bytes::copy_from_slice(&bds[11..]),
    })
}

/// Decode an IBM System/360 single precision float.
pub fn decode_ibm_float(bytes: [u8; 4]) -> f32 {
    let mantissa = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]);
    if mantissa == 0 {
        return 0.0;
    }
    let exponent = (bytes[0] & 0x7F) as i32 - 64;
    let value = mantissa as f64 / (1u32 << 24) as f64 * 16f64.powi(exponent);
    if bytes[0] & 0x80 != 0 {
        -value as f32
    } else {
        value as f32
    }
}

/// Decode a 3-byte sign-magnitude integer.
pub fn decode_signed24(bytes: &[u8]) -> i32 {
    let raw = read_u24(bytes);
    let magnitude = (raw & 0x7F_FFFF) as i32;
    if raw & 0x80_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_signed16(bytes: &[u8]) -> i16 {
    let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn read_u24(b: &[u8]) -> u32 {
    u32::from_be_bytes([0, b[0], b[1], b[2]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ibm_float() {
        // 0x100000 / 2^24 * 16^1
        assert_eq!(decode_ibm_float([0x41, 0x10, 0x00, 0x00]), 1.0);
        assert_eq!(decode_ibm_float([0xC1, 0x10, 0x00, 0x00]), -1.0);
        // 0x10E000 / 2^24 * 16^3
        assert_eq!(decode_ibm_float([0x43, 0x10, 0xE0, 0x00]), 270.0);
        assert_eq!(decode_ibm_float([0x00, 0x00, 0x00, 0x00]), 0.0);
    }

    #[test]
    fn test_decode_signed24() {
        assert_eq!(decode_signed24(&[0x01, 0x5F, 0x90]), 90_000);
        assert_eq!(decode_signed24(&[0x81, 0x5F, 0x90]), -90_000);
    }

    #[test]
    fn test_time_range_offsets() {
        let mut product = Grib1Product {
            table_version: 128,
            center: 98,
            has_grid: true,
            has_bitmap: false,
            parameter: 167,
            level_type: 1,
            level_value: 0,
            reference_time: DateTime::<Utc>::default(),
            time_unit: 1,
            p1: 6,
            p2: 12,
            time_range: 0,
            decimal_scale_factor: 0,
        };
        assert_eq!(product.forecast_offset().unwrap(), Duration::hours(6));

        // accumulation, valid at the end of the period
        product.time_range = 4;
        assert_eq!(product.forecast_offset().unwrap(), Duration::hours(12));

        product.time_range = 10;
        assert_eq!(product.forecast_offset().unwrap(), Duration::hours(6 * 256 + 12));

        product.time_range = 51;
        assert!(product.forecast_offset().is_err());
    }

    #[test]
    fn test_message_length() {
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(b"GRIB");
        data[4..7].copy_from_slice(&[0x00, 0x01, 0x00]);
        data[7] = 1;
        assert_eq!(message_length(&data).unwrap(), 256);

        data[4..7].copy_from_slice(&[0, 0, 4]);
        assert!(message_length(&data).is_err());
    }
}
