//! GRIB2 section parsing.
//!
//! Every function takes the bytes of one complete message (starting at the
//! `GRIB` marker) and locates its section by walking the section headers.

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::Grib2Error;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Section 3: Grid Definition Section
///
/// Coordinates are in microdegrees. Only template 3.0 (regular lat/lon) fills
/// the coordinate fields; other templates keep the point counts only.
#[derive(Debug, Clone)]
pub struct GridDefinition {
    pub template: u16,
    pub num_data_points: u32,
    pub grid_shape: u8,
    pub num_points_latitude: u32,
    pub num_points_longitude: u32,
    pub first_latitude: i32,
    pub first_longitude: i32,
    pub last_latitude: i32,
    pub last_longitude: i32,
    pub longitude_increment: u32,
    pub latitude_increment: u32,
    pub scanning_mode: u8,
}

impl GridDefinition {
    /// Points scan westwards along a row.
    pub fn scans_west(&self) -> bool {
        self.scanning_mode & 0x80 != 0
    }

    /// Rows scan northwards.
    pub fn scans_north(&self) -> bool {
        self.scanning_mode & 0x40 != 0
    }

    /// Adjacent points run along a column instead of a row.
    pub fn column_major(&self) -> bool {
        self.scanning_mode & 0x20 != 0
    }
}

/// Section 4: Product Definition Section (templates 4.0 - 4.15 share this prefix)
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub time_range_unit: u8,
    pub forecast_time: u32,
    pub level_type: u8,
    pub level_scale_factor: i8,
    pub level_value: u32,
}

impl ProductDefinition {
    /// Forecast offset from the reference time (Code Table 4.4 units).
    pub fn forecast_offset(&self) -> Result<Duration, Grib2Error> {
        let value = self.forecast_time as i64;
        let offset = match self.time_range_unit {
            0 => Duration::minutes(value),
            1 => Duration::hours(value),
            2 => Duration::days(value),
            10 => Duration::hours(3 * value),
            11 => Duration::hours(6 * value),
            12 => Duration::hours(12 * value),
            13 => Duration::seconds(value),
            unit => {
                return Err(Grib2Error::InvalidSection {
                    section: 4,
                    reason: format!("Unsupported time range unit {}", unit),
                })
            }
        };
        Ok(offset)
    }
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    pub original_data_type: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub struct Bitmap {
    pub indicator: u8,
    pub data: Bytes,
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, Grib2Error> {
    if data.len() < 16 {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::UnsupportedEdition(edition));
    }

    let message_length = read_u64(&data[8..16]);
    if message_length < 16 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Message length {} is shorter than the indicator",
            message_length
        )));
    }

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification), located right after Section 0
pub fn parse_identification(data: &[u8]) -> Result<Identification, Grib2Error> {
    let section_offset = find_section(data, 1)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 1,
            reason: "Not enough data".to_string(),
        });
    }

    // Skip section length (4 bytes) and section number (1 byte)
    let sec = &section_data[5..];

    let year = read_u16(&sec[7..9]);
    let (month, day, hour, minute, second) = (sec[9], sec[10], sec[11], sec[12], sec[13]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center: read_u16(&sec[0..2]),
        sub_center: read_u16(&sec[2..4]),
        table_version: sec[4],
        local_table_version: sec[5],
        significance_of_reference_time: sec[6],
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        production_status: sec.get(14).copied().unwrap_or(0),
        data_type: sec.get(15).copied().unwrap_or(0),
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition, Grib2Error> {
    let section_offset = find_section(data, 3)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 14 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    // Bytes 6-9: number of data points, 12-13: template number, 14+: template
    let num_data_points = read_u32(&section_data[6..10]);
    let template = read_u16(&section_data[12..14]);
    let gd = &section_data[14..];

    if template != 0 {
        // Keep what is common to most templates: Ni/Nj at the same offsets
        let ni = gd.get(16..20).map(read_u32).unwrap_or(0);
        let nj = gd.get(20..24).map(read_u32).unwrap_or(0);
        return Ok(GridDefinition {
            template,
            num_data_points,
            grid_shape: gd.first().copied().unwrap_or(0),
            num_points_latitude: nj,
            num_points_longitude: ni,
            first_latitude: 0,
            first_longitude: 0,
            last_latitude: 0,
            last_longitude: 0,
            longitude_increment: 0,
            latitude_increment: 0,
            scanning_mode: 0,
        });
    }

    // Template 3.0: latitude/longitude
    // 16-19 Ni, 20-23 Nj, 32-35 La1, 36-39 Lo1, 40 flags, 41-44 La2,
    // 45-48 Lo2, 49-52 Di, 53-56 Dj, 57 scanning mode
    if gd.len() < 58 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: format!("Template 0 needs at least 58 bytes, got {}", gd.len()),
        });
    }

    Ok(GridDefinition {
        template,
        num_data_points,
        grid_shape: gd[0],
        num_points_longitude: read_u32(&gd[16..20]),
        num_points_latitude: read_u32(&gd[20..24]),
        first_latitude: decode_grib2_signed(&gd[32..36]),
        first_longitude: decode_grib2_signed(&gd[36..40]),
        last_latitude: decode_grib2_signed(&gd[41..45]),
        last_longitude: decode_grib2_signed(&gd[45..49]),
        longitude_increment: read_u32(&gd[49..53]),
        latitude_increment: read_u32(&gd[53..57]),
        scanning_mode: gd[57],
    })
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(data: &[u8]) -> Result<ProductDefinition, Grib2Error> {
    let section_offset = find_section(data, 4)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 34 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    // 7-8 template, 9 category, 10 number, 17 time unit, 18-21 forecast time,
    // 22 first surface type, 23 scale factor, 24-27 scaled value
    let template = read_u16(&section_data[7..9]);
    if template > 15 {
        return Err(Grib2Error::UnsupportedTemplate {
            section: 4,
            template,
        });
    }

    Ok(ProductDefinition {
        template,
        parameter_category: section_data[9],
        parameter_number: section_data[10],
        time_range_unit: section_data[17],
        forecast_time: read_u32(&section_data[18..22]),
        level_type: section_data[22],
        level_scale_factor: decode_grib2_signed8(section_data[23]),
        level_value: read_u32(&section_data[24..28]),
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation, Grib2Error> {
    let section_offset = find_section(data, 5)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // 5-8 number of points, 9-10 template; template 5.0 follows:
    // 11-14 R (IEEE float), 15-16 E, 17-18 D, 19 bits, 20 original type
    let t = &section_data[11..];

    Ok(DataRepresentation {
        num_data_points: read_u32(&section_data[5..9]),
        template: read_u16(&section_data[9..11]),
        reference_value: f32::from_be_bytes([t[0], t[1], t[2], t[3]]),
        binary_scale_factor: decode_grib2_signed16(&t[4..6]),
        decimal_scale_factor: decode_grib2_signed16(&t[6..8]),
        bits_per_value: t[8],
        original_data_type: t[9],
    })
}

/// Parse Section 6 (Bitmap). `None` when the message carries no bitmap.
pub fn parse_bitmap(data: &[u8]) -> Result<Option<Bitmap>, Grib2Error> {
    let section_offset = find_section(data, 6)?;
    let section_data = &data[section_offset..];

    if section_data.len() < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }

    let section_length = read_u32(&section_data[0..4]) as usize;
    let indicator = section_data[5];

    match indicator {
        255 => Ok(None),
        0 => {
            let bits = section_data.get(6..section_length).ok_or_else(|| {
                Grib2Error::InvalidSection {
                    section: 6,
                    reason: format!("Bitmap section too short ({} bytes)", section_length),
                }
            })?;
            Ok(Some(Bitmap {
                indicator,
                data: Bytes::copy_from_slice(bits),
            }))
        }
        other => Err(Grib2Error::InvalidSection {
            section: 6,
            reason: format!("Predefined or repeated bitmaps are not supported ({})", other),
        }),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &[u8]) -> Result<DataSection, Grib2Error> {
    let section_offset = find_section(data, 7)?;
    let section_data = &data[section_offset..];

    let section_length = read_u32(&section_data[0..4]) as usize;
    let data_bytes = if section_length > 5 {
        Bytes::copy_from_slice(&section_data[5..section_length])
    } else {
        Bytes::new()
    };

    Ok(DataSection { data: data_bytes })
}

// ===== Helper Functions =====

/// Decode a 4-byte sign-magnitude integer (MSB is the sign).
///
/// Slices of any other length decode to 0.
pub fn decode_grib2_signed(bytes: &[u8]) -> i32 {
    if bytes.len() != 4 {
        return 0;
    }
    let raw = read_u32(bytes);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a 2-byte sign-magnitude integer (scale factors).
pub fn decode_grib2_signed16(bytes: &[u8]) -> i16 {
    if bytes.len() != 2 {
        return 0;
    }
    let raw = read_u16(bytes);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn decode_grib2_signed8(byte: u8) -> i8 {
    let magnitude = (byte & 0x7F) as i8;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Find a section by number within a message
fn find_section(data: &[u8], section_num: u8) -> Result<usize, Grib2Error> {
    let mut offset = 16; // after Section 0

    loop {
        if offset + 5 > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        // End section is the 4 bytes "7777" with no header
        if &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        let section_length = read_u32(&data[offset..offset + 4]) as usize;
        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: format!("Invalid section length {} at offset {}", section_length, offset),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
