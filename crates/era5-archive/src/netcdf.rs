//! NetCDF support: extraction of multi-time downloads and single-image reads.
//!
//! Downloads contain `(time, latitude, longitude)` variables, possibly packed
//! as shorts with `scale_factor`/`add_offset`. Archive files hold one unpacked
//! `float` variable on `(latitude, longitude)`.

use std::path::{Path, PathBuf};

use netcdf::AttributeValue;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cf_time::TimeUnits;
use crate::error::{ArchiveError, ArchiveResult};
use crate::extract::ArchiveExtractor;
use crate::layout::{ArchiveEntry, ImageFormat};
use crate::reader::{Attributes, GridField, ImageFileReader};

const TIME_NAMES: [&str; 2] = ["time", "valid_time"];
const LAT_NAMES: [&str; 2] = ["latitude", "lat"];
const LON_NAMES: [&str; 2] = ["longitude", "lon"];
/// Attributes copied into archive files and image metadata.
const KEPT_ATTRIBUTES: [&str; 3] = ["units", "long_name", "standard_name"];

fn nc_err(path: &Path, e: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::NetCdf(format!("{}: {}", path.display(), e))
}

fn find_variable<'f>(
    file: &'f netcdf::File,
    names: &[&str],
) -> Option<netcdf::Variable<'f>> {
    names.iter().find_map(|name| file.variable(name))
}

fn string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        _ => None,
    }
}

/// Apply CF packing attributes to raw values; fill values become NaN.
fn unpack(var: &netcdf::Variable, raw: Vec<f64>) -> Vec<f32> {
    let scale = f64_attr(var, "scale_factor").unwrap_or(1.0);
    let offset = f64_attr(var, "add_offset").unwrap_or(0.0);
    let fill = f64_attr(var, "_FillValue");
    let missing = f64_attr(var, "missing_value");

    raw.into_iter()
        .map(|v| {
            if Some(v) == fill || Some(v) == missing || v.is_nan() {
                f32::NAN
            } else {
                (v * scale + offset) as f32
            }
        })
        .collect()
}

fn kept_attributes(var: &netcdf::Variable) -> Attributes {
    let mut attributes = Attributes::new();
    for name in KEPT_ATTRIBUTES {
        if let Some(value) = string_attr(var, name) {
            attributes.insert(name.to_string(), Value::from(value));
        }
    }
    attributes
}

fn read_axis(file: &netcdf::File, names: &[&str], path: &Path) -> ArchiveResult<Vec<f64>> {
    let var = find_variable(file, names).ok_or_else(|| ArchiveError::InvalidField {
        path: path.to_path_buf(),
        reason: format!("none of the coordinate variables {:?} found", names),
    })?;
    var.get_values::<f64, _>(..).map_err(|e| nc_err(path, e))
}

/// Splits `(time, latitude, longitude)` downloads into one file per time step
/// and variable.
#[derive(Debug, Default)]
pub struct NetCdfArchiveExtractor;

impl NetCdfArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    fn write_entry(
        path: &Path,
        variable: &str,
        values: &[f32],
        lats: &[f64],
        lons: &[f64],
        attributes: &Attributes,
        timestamp: &str,
    ) -> ArchiveResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = netcdf::create(path).map_err(|e| nc_err(path, e))?;
        file.add_attribute("valid_time", timestamp)
            .map_err(|e| nc_err(path, e))?;
        file.add_dimension("latitude", lats.len())
            .map_err(|e| nc_err(path, e))?;
        file.add_dimension("longitude", lons.len())
            .map_err(|e| nc_err(path, e))?;

        {
            let mut lat_var = file
                .add_variable::<f64>("latitude", &["latitude"])
                .map_err(|e| nc_err(path, e))?;
            lat_var
                .put_attribute("units", "degrees_north")
                .map_err(|e| nc_err(path, e))?;
            lat_var.put_values(lats, ..).map_err(|e| nc_err(path, e))?;
        }
        {
            let mut lon_var = file
                .add_variable::<f64>("longitude", &["longitude"])
                .map_err(|e| nc_err(path, e))?;
            lon_var
                .put_attribute("units", "degrees_east")
                .map_err(|e| nc_err(path, e))?;
            lon_var.put_values(lons, ..).map_err(|e| nc_err(path, e))?;
        }
        {
            let mut data_var = file
                .add_variable::<f32>(variable, &["latitude", "longitude"])
                .map_err(|e| nc_err(path, e))?;
            for (name, value) in attributes {
                if let Some(text) = value.as_str() {
                    data_var
                        .put_attribute(name, text)
                        .map_err(|e| nc_err(path, e))?;
                }
            }
            data_var.put_values(values, ..).map_err(|e| nc_err(path, e))?;
        }

        Ok(())
    }
}

impl ArchiveExtractor for NetCdfArchiveExtractor {
    fn format(&self) -> ImageFormat {
        ImageFormat::NetCdf
    }

    #[instrument(skip(self), fields(staged = %staged_file.display()))]
    fn extract(
        &self,
        staged_file: &Path,
        archive_root: &Path,
        product: &str,
    ) -> ArchiveResult<Vec<PathBuf>> {
        let file = netcdf::open(staged_file).map_err(|e| nc_err(staged_file, e))?;

        let time_var =
            find_variable(&file, &TIME_NAMES).ok_or_else(|| ArchiveError::InvalidField {
                path: staged_file.to_path_buf(),
                reason: "no time variable".to_string(),
            })?;
        let time_name = time_var.name();
        let units = string_attr(&time_var, "units")
            .and_then(|u| TimeUnits::parse(&u))
            .ok_or_else(|| ArchiveError::InvalidField {
                path: staged_file.to_path_buf(),
                reason: "time variable has no usable units".to_string(),
            })?;
        let times: Vec<f64> = time_var
            .get_values::<f64, _>(..)
            .map_err(|e| nc_err(staged_file, e))?;

        let lats = read_axis(&file, &LAT_NAMES, staged_file)?;
        let lons = read_axis(&file, &LON_NAMES, staged_file)?;

        let data_vars: Vec<netcdf::Variable> = file
            .variables()
            .filter(|var| {
                let dims = var.dimensions();
                dims.len() == 3 && dims[0].name() == time_name
            })
            .collect();

        let mut written = Vec::with_capacity(times.len() * data_vars.len());
        for (t, &time_value) in times.iter().enumerate() {
            let timestamp = units.to_datetime(time_value);
            for var in &data_vars {
                let name = var.name();
                let raw = var
                    .get_values::<f64, _>((t, .., ..))
                    .map_err(|e| nc_err(staged_file, e))?;
                let values = unpack(var, raw);

                let entry = ArchiveEntry::new(product, timestamp, &name, ImageFormat::NetCdf);
                let path = entry.path(archive_root);
                Self::write_entry(
                    &path,
                    &name,
                    &values,
                    &lats,
                    &lons,
                    &kept_attributes(var),
                    &timestamp.to_string(),
                )?;

                debug!(path = %path.display(), "Wrote NetCDF image");
                written.push(path);
            }
        }

        info!(
            times = times.len(),
            variables = data_vars.len(),
            files = written.len(),
            "Extracted NetCDF download into archive"
        );
        Ok(written)
    }
}

/// Reader for single-image NetCDF archive files.
#[derive(Debug, Default)]
pub struct NetCdfImageReader;

impl NetCdfImageReader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageFileReader for NetCdfImageReader {
    fn format(&self) -> ImageFormat {
        ImageFormat::NetCdf
    }

    fn read_field(&self, path: &Path, variable: &str) -> ArchiveResult<GridField> {
        let file = netcdf::open(path).map_err(|e| nc_err(path, e))?;

        let var = file
            .variable(variable)
            .ok_or_else(|| ArchiveError::InvalidField {
                path: path.to_path_buf(),
                reason: format!("variable '{}' not in file", variable),
            })?;

        let raw = match var.dimensions().len() {
            2 => var.get_values::<f64, _>(..),
            // a leftover time axis of length one
            3 => var.get_values::<f64, _>((0, .., ..)),
            n => {
                return Err(ArchiveError::InvalidField {
                    path: path.to_path_buf(),
                    reason: format!("expected a 2-D variable, found {} dimensions", n),
                })
            }
        }
        .map_err(|e| nc_err(path, e))?;

        let values = unpack(&var, raw);
        let lats = read_axis(&file, &LAT_NAMES, path)?;
        let lons = read_axis(&file, &LON_NAMES, path)?;

        GridField::from_axes(variable, values, &lats, &lons, kept_attributes(&var)).map_err(
            |reason| ArchiveError::InvalidField {
                path: path.to_path_buf(),
                reason,
            },
        )
    }
}
