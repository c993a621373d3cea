//! GRIB2 data unpacking.
//!
//! Only simple packing (template 5.0) is implemented, which is what the CDS
//! delivers for ERA5 single-level fields.

use crate::Grib2Error;

/// Unpack simple packed GRIB2 data.
///
/// `value = (R + X * 2^E) * 10^-D`. Points switched off in the bitmap come
/// back as `None` and consume no packed bits.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: u32,
    bits_per_value: u8,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bitmap: Option<&[u8]>,
) -> Result<Vec<Option<f32>>, Grib2Error> {
    let num_points = num_points as usize;
    let present = |i: usize| match bitmap {
        Some(bm) => bm.get(i / 8).map_or(false, |byte| (byte >> (7 - i % 8)) & 1 == 1),
        None => true,
    };

    let reference = reference_value as f64;
    let decimal_scale = 10f64.powi(-(decimal_scale_factor as i32));

    if bits_per_value == 0 {
        // Constant field: every present value is the reference value
        let value = (reference * decimal_scale) as f32;
        return Ok((0..num_points)
            .map(|i| present(i).then_some(value))
            .collect());
    }

    let binary_scale = 2f64.powi(binary_scale_factor as i32);
    let bits = bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0;
    for i in 0..num_points {
        if !present(i) {
            values.push(None);
            continue;
        }

        let packed_value = extract_bits(packed_data, bit_position, bits)
            .map_err(|e| Grib2Error::UnpackingError(format!("Point {}: {}", i, e)))?;
        bit_position += bits;

        let value = (reference + packed_value as f64 * binary_scale) * decimal_scale;
        values.push(Some(value as f32));
    }

    Ok(values)
}

/// Extract `num_bits` bits, MSB first, starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, String> {
    if num_bits > 32 || num_bits == 0 {
        return Err(format!("Invalid number of bits: {}", num_bits));
    }
    if start_bit + num_bits > data.len() * 8 {
        return Err("Not enough data to extract bits".to_string());
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let bit = (data[absolute_bit / 8] >> (7 - absolute_bit % 8)) & 1;
        result = (result << 1) | bit as u32;
    }

    Ok(result)
}
