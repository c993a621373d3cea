//! Synthetic GRIB2 messages.
//!
//! Builds structurally valid edition 2 messages with a regular lat/lon grid
//! (template 3.0), product template 4.0 and 16-bit simple packing. NaN values
//! are written through a bitmap. Integer-valued fields with a range below
//! 65536 round-trip exactly.

/// Builder for a single GRIB2 message.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    // Grid definition (microdegrees)
    ni: u32,
    nj: u32,
    la1: i32,
    lo1: i32,
    di: u32,
    dj: u32,
    scanning_mode: u8,
    // Product definition
    param_category: u8,
    param_number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    data_values: Vec<f32>,
}

impl Grib2Builder {
    /// A 10 degree global 2 m temperature field from ECMWF, all zeros.
    pub fn new_era5() -> Self {
        Self {
            discipline: 0,
            center: 98,
            year: 2017,
            month: 1,
            day: 1,
            hour: 0,
            ni: 0,
            nj: 0,
            la1: 0,
            lo1: 0,
            di: 0,
            dj: 0,
            scanning_mode: 0, // +i, -j, i consecutive
            param_category: 0,
            param_number: 0,
            level_type: 103,
            level_value: 2,
            forecast_hour: 0,
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

    /// Global grid from 90N/0E scanning east and south, as delivered by the CDS.
    pub fn with_global_grid(self, res_deg: f64) -> Self {
        let ni = (360.0 / res_deg).round() as u32;
        let nj = (180.0 / res_deg).round() as u32 + 1;
        self.with_grid(ni, nj, 90.0, 0.0, res_deg)
    }

    /// Regular grid of `nj` rows and `ni` columns starting at the north-west corner.
    pub fn with_grid(mut self, ni: u32, nj: u32, first_lat: f64, first_lon: f64, res_deg: f64) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.la1 = (first_lat * 1e6).round() as i32;
        self.lo1 = (first_lon * 1e6).round() as i32;
        self.di = (res_deg * 1e6).round() as u32;
        self.dj = self.di;
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    /// Values in scan order (row-major, north to south).
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Fill every point from its (lat, lon) in degrees, lon as encoded (0 - 360).
    pub fn with_values_from(mut self, f: impl Fn(f64, f64) -> f32) -> Self {
        let mut data = Vec::with_capacity((self.ni * self.nj) as usize);
        for j in 0..self.nj as i64 {
            let lat = (self.la1 as i64 - j * self.dj as i64) as f64 / 1e6;
            for i in 0..self.ni as i64 {
                let lon = (self.lo1 as i64 + i * self.di as i64) as f64 / 1e6;
                data.push(f(lat, lon));
            }
        }
        self.data_values = data;
        self
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        let packing = Packing::new(&self.data_values);

        let sections = [
            self.build_section1(),
            self.build_section3(),
            self.build_section4(),
            self.build_section5(&packing),
            self.build_section6(),
            self.build_section7(&packing),
        ];
        let body_len: usize = sections.iter().map(Vec::len).sum();
        let message_length = 16 + body_len + 4;

        let mut message = Vec::with_capacity(message_length);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]); // reserved
        message.push(self.discipline);
        message.push(2); // edition
        message.extend_from_slice(&(message_length as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");

        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(21);
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);
        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // sub-center
        section.push(5); // master table version
        section.push(0); // local table version
        section.push(1); // reference time is start of forecast
        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(0); // minute
        section.push(0); // second
        section.push(0); // operational products
        section.push(0); // analysis products
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(72);
        section.extend_from_slice(&72u32.to_be_bytes());
        section.push(3);
        section.push(0); // source of grid definition
        section.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        section.push(0); // octets for optional list
        section.push(0); // interpretation of optional list
        section.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        section.push(6); // shape of the earth
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section.extend_from_slice(&self.ni.to_be_bytes());
        section.extend_from_slice(&self.nj.to_be_bytes());
        section.extend_from_slice(&0u32.to_be_bytes()); // basic angle
        section.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // subdivisions

        let la2 = self.la1 - ((self.nj.saturating_sub(1)) * self.dj) as i32;
        let lo2 = self.lo1 + ((self.ni.saturating_sub(1)) * self.di) as i32;
        section.extend_from_slice(&sign_magnitude32(self.la1));
        section.extend_from_slice(&sign_magnitude32(self.lo1));
        section.push(48); // resolution and component flags
        section.extend_from_slice(&sign_magnitude32(la2));
        section.extend_from_slice(&sign_magnitude32(lo2));
        section.extend_from_slice(&self.di.to_be_bytes());
        section.extend_from_slice(&self.dj.to_be_bytes());
        section.push(self.scanning_mode);
        section
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::with_capacity(34);
        section.extend_from_slice(&34u32.to_be_bytes());
        section.push(4);
        section.extend_from_slice(&0u16.to_be_bytes()); // coordinate values
        section.extend_from_slice(&0u16.to_be_bytes()); // template 4.0
        section.push(self.param_category);
        section.push(self.param_number);
        section.push(0); // analysis
        section.push(0); // background process
        section.push(128); // generating process
        section.extend_from_slice(&0u16.to_be_bytes()); // cutoff hours
        section.push(0); // cutoff minutes
        section.push(1); // time unit: hour
        section.extend_from_slice(&self.forecast_hour.to_be_bytes());
        section.push(self.level_type);
        section.push(0); // scale factor
        section.extend_from_slice(&self.level_value.to_be_bytes());
        section.push(255); // no second surface
        section.push(0);
        section.extend_from_slice(&0u32.to_be_bytes());
        section
    }

    fn build_section5(&self, packing: &Packing) -> Vec<u8> {
        let mut section = Vec::with_capacity(21);
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(5);
        section.extend_from_slice(&packing.packed_count.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // template 5.0
        section.extend_from_slice(&packing.reference_value.to_be_bytes());
        section.extend_from_slice(&sign_magnitude16(packing.binary_scale_factor));
        section.extend_from_slice(&sign_magnitude16(0)); // decimal scale factor
        section.push(packing.bits_per_value);
        section.push(0); // floating point
        section
    }

    fn build_section6(&self) -> Vec<u8> {
        let has_missing = self.data_values.iter().any(|v| v.is_nan());
        if !has_missing {
            let mut section = Vec::with_capacity(6);
            section.extend_from_slice(&6u32.to_be_bytes());
            section.push(6);
            section.push(255); // no bitmap
            return section;
        }

        let mut bitmap = vec![0u8; self.data_values.len().div_ceil(8)];
        for (i, value) in self.data_values.iter().enumerate() {
            if !value.is_nan() {
                bitmap[i / 8] |= 1 << (7 - i % 8);
            }
        }

        let mut section = Vec::with_capacity(6 + bitmap.len());
        section.extend_from_slice(&((6 + bitmap.len()) as u32).to_be_bytes());
        section.push(6);
        section.push(0); // bitmap follows
        section.extend_from_slice(&bitmap);
        section
    }

    fn build_section7(&self, packing: &Packing) -> Vec<u8> {
        let mut section = Vec::with_capacity(5 + packing.data.len());
        section.extend_from_slice(&((5 + packing.data.len()) as u32).to_be_bytes());
        section.push(7);
        section.extend_from_slice(&packing.data);
        section
    }
}

/// Simple packing parameters and packed bytes for the present values.
pub(crate) struct Packing {
    pub(crate) packed_count: u32,
    pub(crate) reference_value: f32,
    pub(crate) binary_scale_factor: i16,
    pub(crate) bits_per_value: u8,
    pub(crate) data: Vec<u8>,
}

impl Packing {
    pub(crate) fn new(values: &[f32]) -> Self {
        let present: Vec<f64> = values
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| v as f64)
            .collect();
        let min = present.iter().copied().fold(f64::INFINITY, f64::min);
        let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let range = max - min;
        if present.is_empty() || range == 0.0 {
            return Self {
                packed_count: present.len() as u32,
                reference_value: if present.is_empty() { 0.0 } else { min as f32 },
                binary_scale_factor: 0,
                bits_per_value: 0,
                data: Vec::new(),
            };
        }

        // value = R + X * 2^E with X < 2^16
        let binary_scale_factor = (range / 65535.0).log2().ceil() as i16;
        let scale = 2f64.powi(binary_scale_factor as i32);

        let mut data = Vec::with_capacity(present.len() * 2);
        for v in &present {
            let packed = ((v - min) / scale).round().min(65535.0) as u16;
            data.extend_from_slice(&packed.to_be_bytes());
        }

        Self {
            packed_count: present.len() as u32,
            reference_value: min as f32,
            binary_scale_factor,
            bits_per_value: 16,
            data,
        }
    }
}

fn sign_magnitude32(value: i32) -> [u8; 4] {
    let magnitude = value.unsigned_abs() & 0x7FFF_FFFF;
    let raw = if value < 0 {
        magnitude | 0x8000_0000
    } else {
        magnitude
    };
    raw.to_be_bytes()
}

pub(crate) fn sign_magnitude16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let raw = if value < 0 { magnitude | 0x8000 } else { magnitude };
    raw.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_era5_message() {
        let data = Grib2Builder::new_era5().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 2);
        assert_eq!(data[6], 0);
        assert_eq!(&data[data.len() - 4..], b"7777");

        let length = u64::from_be_bytes(data[8..16].try_into().unwrap());
        assert_eq!(length as usize, data.len());
    }

    #[test]
    fn test_missing_values_add_bitmap() {
        let plain = Grib2Builder::new_era5()
            .with_grid(4, 2, 10.0, 0.0, 1.0)
            .with_data((1..=8).map(|v| v as f32).collect())
            .build();
        let masked = Grib2Builder::new_era5()
            .with_grid(4, 2, 10.0, 0.0, 1.0)
            .with_data(vec![1.0, f32::NAN, 3.0, 4.0, 5.0, 6.0, 7.0, f32::NAN])
            .build();

        // one bitmap byte, two fewer packed values
        assert_eq!(masked.len(), plain.len() + 1 - 2 * 2);
    }

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(sign_magnitude32(-90_000_000), (90_000_000u32 | 0x8000_0000).to_be_bytes());
        assert_eq!(sign_magnitude32(5), [0, 0, 0, 5]);
        assert_eq!(sign_magnitude16(-3), [0x80, 0x03]);
    }
}
