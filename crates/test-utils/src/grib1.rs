//! Synthetic GRIB1 messages.
//!
//! Edition 1 messages the way ECMWF encodes ERA5 single levels: local table
//! 128, a regular lat/lon grid in millidegrees and 16-bit simple packing with
//! an IBM reference value. NaN values are written through a bitmap.

use crate::grib2::{sign_magnitude16, Packing};

/// Builder for a single GRIB1 message.
#[derive(Debug, Clone)]
pub struct Grib1Builder {
    table_version: u8,
    parameter: u8,
    level_type: u8,
    level_value: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    p1: u8,
    // Grid (millidegrees)
    ni: u16,
    nj: u16,
    la1: i32,
    lo1: i32,
    di: u16,
    dj: u16,
    data_values: Vec<f32>,
}

impl Grib1Builder {
    /// A 10 degree global 2 m temperature field, all zeros.
    pub fn new_era5() -> Self {
        Self {
            table_version: 128,
            parameter: 167,
            level_type: 1,
            level_value: 0,
            year: 2017,
            month: 1,
            day: 1,
            hour: 0,
            p1: 0,
            ni: 0,
            nj: 0,
            la1: 0,
            lo1: 0,
            di: 0,
            dj: 0,
            data_values: Vec::new(),
        }
        .with_global_grid(10.0)
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Global grid from 90N/0E scanning east and south.
    pub fn with_global_grid(self, res_deg: f64) -> Self {
        let ni = (360.0 / res_deg).round() as u16;
        let nj = (180.0 / res_deg).round() as u16 + 1;
        self.with_grid(ni, nj, 90.0, 0.0, res_deg)
    }

    pub fn with_grid(mut self, ni: u16, nj: u16, first_lat: f64, first_lon: f64, res_deg: f64) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.la1 = (first_lat * 1e3).round() as i32;
        self.lo1 = (first_lon * 1e3).round() as i32;
        self.di = (res_deg * 1e3).round() as u16;
        self.dj = self.di;
        self.data_values = vec![0.0; ni as usize * nj as usize];
        self
    }

    pub fn with_parameter(mut self, table_version: u8, parameter: u8) -> Self {
        self.table_version = table_version;
        self.parameter = parameter;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u16) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u8) -> Self {
        self.p1 = hour;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; self.ni as usize * self.nj as usize];
        self
    }

    /// Values in scan order (row-major, north to south).
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Fill every point from its (lat, lon) in degrees, lon as encoded (0 - 360).
    pub fn with_values_from(mut self, f: impl Fn(f64, f64) -> f32) -> Self {
        let mut data = Vec::with_capacity(self.ni as usize * self.nj as usize);
        for j in 0..self.nj as i64 {
            let lat = (self.la1 as i64 - j * self.dj as i64) as f64 / 1e3;
            for i in 0..self.ni as i64 {
                let lon = (self.lo1 as i64 + i * self.di as i64) as f64 / 1e3;
                data.push(f(lat, lon));
            }
        }
        self.data_values = data;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let packing = Packing::new(&self.data_values);
        let has_bitmap = self.data_values.iter().any(|v| v.is_nan());

        let mut sections = vec![self.build_pds(has_bitmap), self.build_gds()];
        if has_bitmap {
            sections.push(self.build_bms());
        }
        sections.push(build_bds(&packing));

        let body_len: usize = sections.iter().map(Vec::len).sum();
        let message_length = 8 + body_len + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&u24(message_length as u32));
        message.push(1); // edition
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn build_pds(&self, has_bitmap: bool) -> Vec<u8> {
        let century = (self.year - 1) / 100 + 1;
        let year_of_century = self.year - (century - 1) * 100;

        let mut section = Vec::with_capacity(28);
        section.extend_from_slice(&u24(28));
        section.push(self.table_version);
        section.push(98); // ECMWF
        section.push(128); // generating process
        section.push(255); // grid defined in GDS
        section.push(if has_bitmap { 0xC0 } else { 0x80 });
        section.push(self.parameter);
        section.push(self.level_type);
        section.extend_from_slice(&self.level_value.to_be_bytes());
        section.push(year_of_century as u8);
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // minute
        section.push(1); // unit: hour
        section.push(self.p1);
        section.push(0); // P2
        section.push(0); // time range: valid at reference time + P1
        section.extend_from_slice(&[0, 0]); // number in average
        section.push(0); // number missing
        section.push(century as u8);
        section.push(0); // sub-centre
        section.extend_from_slice(&sign_magnitude16(0)); // decimal scale factor
        section
    }

    fn build_gds(&self) -> Vec<u8> {
        let la2 = self.la1 - (self.nj.saturating_sub(1) as i32) * self.dj as i32;
        let lo2 = self.lo1 + (self.ni.saturating_sub(1) as i32) * self.di as i32;

        let mut section = Vec::with_capacity(32);
        section.extend_from_slice(&u24(32));
        section.push(0); // NV
        section.push(255); // PV/PL
        section.push(0); // lat/lon grid
        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&sign_magnitude24(self.la1));
        section.extend_from_slice(&sign_magnitude24(self.lo1));
        section.push(128); // increments given
        section.extend_from_slice(&sign_magnitude24(la2));
        section.extend_from_slice(&sign_magnitude24(lo2));
        section.extend_from_slice(&self.di.to_be_bytes());
        section.extend_from_slice(&self.dj.to_be_bytes());
        section.push(0); // +i, -j, i consecutive
        section.extend_from_slice(&[0; 4]);
        section
    }

    fn build_bms(&self) -> Vec<u8> {
        let mut bitmap = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, value) in self.data_values.iter().enumerate() {
            if !value.is_nan() {
                bitmap[i / 8] |= 1 << (7 - i % 8);
            }
        }
        let unused_bits = (bitmap.len() * 8 - self.data_values.len()) as u8;

        let mut section = Vec::with_capacity(6 + bitmap.len());
        section.extend_from_slice(&u24((6 + bitmap.len()) as u32));
        section.push(unused_bits);
        section.extend_from_slice(&[0, 0]); // bitmap follows
        section.extend_from_slice(&bitmap);
        section
    }
}

fn build_bds(packing: &Packing) -> Vec<u8> {
    let mut section = Vec::with_capacity(11 + packing.data.len());
    section.extend_from_slice(&u24((11 + packing.data.len()) as u32));
    section.push(0); // grid point, simple packing, floats, no unused bits
    section.extend_from_slice(&sign_magnitude16(packing.binary_scale_factor));
    section.extend_from_slice(&ibm_float(packing.reference_value));
    section.push(packing.bits_per_value);
    section.extend_from_slice(&packing.data);
    section
}

fn u24(value: u32) -> [u8; 3] {
    let [_, a, b, c] = value.to_be_bytes();
    [a, b, c]
}

fn sign_magnitude24(value: i32) -> [u8; 3] {
    let magnitude = value.unsigned_abs() & 0x7F_FFFF;
    let raw = if value < 0 {
        magnitude | 0x80_0000
    } else {
        magnitude
    };
    u24(raw)
}

/// Encode an IBM System/360 single precision float.
pub fn ibm_float(value: f32) -> [u8; 4] {
    if value == 0.0 || value.is_nan() {
        return [0; 4];
    }
    let sign = if value < 0.0 { 0x80 } else { 0 };
    let mut fraction = (value as f64).abs();
    let mut exponent: i32 = 64;
    while fraction >= 1.0 {
        fraction /= 16.0;
        exponent += 1;
    }
    while fraction < 1.0 / 16.0 {
        fraction *= 16.0;
        exponent -= 1;
    }

    let mut mantissa = (fraction * (1u32 << 24) as f64).round() as u32;
    if mantissa >= 1 << 24 {
        mantissa >>= 4;
        exponent += 1;
    }
    let [_, a, b, c] = mantissa.to_be_bytes();
    [sign | exponent as u8, a, b, c]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_era5_message() {
        let data = Grib1Builder::new_era5().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 1);
        assert_eq!(&data[data.len() - 4..], b"7777");
        let length = u32::from_be_bytes([0, data[4], data[5], data[6]]);
        assert_eq!(length as usize, data.len());
    }

    #[test]
    fn test_ibm_float() {
        assert_eq!(ibm_float(1.0), [0x41, 0x10, 0x00, 0x00]);
        assert_eq!(ibm_float(-1.0), [0xC1, 0x10, 0x00, 0x00]);
        assert_eq!(ibm_float(270.0), [0x43, 0x10, 0xE0, 0x00]);
        assert_eq!(ibm_float(0.0), [0; 4]);
    }

    #[test]
    fn test_bitmap_only_with_missing_values() {
        let plain = Grib1Builder::new_era5()
            .with_grid(4, 2, 10.0, 0.0, 1.0)
            .with_data((1..=8).map(|v| v as f32).collect())
            .build();
        let masked = Grib1Builder::new_era5()
            .with_grid(4, 2, 10.0, 0.0, 1.0)
            .with_data(vec![1.0, f32::NAN, 3.0, 4.0, 5.0, 6.0, 7.0, f32::NAN])
            .build();

        // PDS flags, then a 7 byte bitmap section and two fewer packed values
        assert_eq!(plain[8 + 7], 0x80);
        assert_eq!(masked[8 + 7], 0xC0);
        assert_eq!(masked.len(), plain.len() + 7 - 2 * 2);
    }
}
