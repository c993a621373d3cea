//! Decoding of single archive files into 2-D fields.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use ndarray::Array2;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use era5_common::VariableLookup;
use grib2_parser::{
    describe_grib1_level, fallback_grib1_parameter_name, fallback_parameter_name, GribMessage,
    GribReader, LevelTable,
};

use crate::error::{ArchiveError, ArchiveResult};
use crate::layout::ImageFormat;

/// Free-form attributes attached to a variable.
pub type Attributes = Map<String, Value>;

/// One decoded field with its coordinates, all shaped (rows, cols).
#[derive(Debug, Clone)]
pub struct GridField {
    pub variable: String,
    pub values: Array2<f32>,
    pub lons: Array2<f64>,
    pub lats: Array2<f64>,
    pub attributes: Attributes,
}

impl GridField {
    /// Build a field from a row-major value vector and 1-D axes.
    pub fn from_axes(
        variable: impl Into<String>,
        values: Vec<f32>,
        lats: &[f64],
        lons: &[f64],
        attributes: Attributes,
    ) -> Result<Self, String> {
        let shape = (lats.len(), lons.len());
        let values = Array2::from_shape_vec(shape, values)
            .map_err(|e| format!("values do not fit a {:?} grid: {}", shape, e))?;

        Ok(Self {
            variable: variable.into(),
            values,
            lons: Array2::from_shape_fn(shape, |(_, c)| lons[c]),
            lats: Array2::from_shape_fn(shape, |(r, _)| lats[r]),
            attributes,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// Reads one variable from one archive file.
pub trait ImageFileReader: Send + Sync {
    fn format(&self) -> ImageFormat;

    fn read_field(&self, path: &Path, variable: &str) -> ArchiveResult<GridField>;
}

/// Reader for single-parameter GRIB archive files of either edition.
pub struct GribImageReader {
    lookup: Arc<dyn VariableLookup>,
    product: String,
    levels: LevelTable,
}

impl GribImageReader {
    pub fn new(lookup: Arc<dyn VariableLookup>, product: impl Into<String>) -> Self {
        Self {
            lookup,
            product: product.into(),
            levels: LevelTable::single_levels(),
        }
    }
}

impl ImageFileReader for GribImageReader {
    fn format(&self) -> ImageFormat {
        ImageFormat::Grib
    }

    fn read_field(&self, path: &Path, variable: &str) -> ArchiveResult<GridField> {
        let data = Bytes::from(std::fs::read(path)?);
        let mut reader = GribReader::new(data);

        let message = reader
            .next_message()?
            .ok_or_else(|| ArchiveError::InvalidField {
                path: path.to_path_buf(),
                reason: "no GRIB message".to_string(),
            })?;
        if reader.next_message()?.is_some() {
            warn!(path = %path.display(), "Archive file holds more than one message, using the first");
        }

        let values = message.unpack_data()?;
        let lats = message.latitudes()?;
        let lons = message.longitudes()?;

        let (fallback_name, level, (code_key, code)) = match &message {
            GribMessage::Edition1(m) => {
                let (table, number) = m.parameter_code();
                (
                    fallback_grib1_parameter_name(table, number),
                    describe_grib1_level(m.product.level_type, m.product.level_value),
                    ("grib1_code", vec![table, number]),
                )
            }
            GribMessage::Edition2(m) => {
                let (discipline, category, number) = m.parameter_code();
                let pd = &m.product_definition;
                (
                    fallback_parameter_name(discipline, category, number),
                    self.levels.describe(pd.level_type, pd.level_value),
                    ("grib2_code", vec![discipline, category, number]),
                )
            }
        };

        let mut attributes = Attributes::new();
        match self.lookup.find(&self.product, variable) {
            Some(info) => {
                attributes.insert("long_name".into(), Value::from(info.long_name));
                attributes.insert("units".into(), Value::from(info.units));
            }
            None => {
                debug!(variable = %variable, "Variable not in table, attributes from GRIB codes only");
                attributes.insert("long_name".into(), Value::from(fallback_name));
            }
        }
        attributes.insert("level".into(), Value::from(level));
        attributes.insert(code_key.into(), Value::from(code));

        GridField::from_axes(variable, values, &lats, &lons, attributes).map_err(|reason| {
            ArchiveError::InvalidField {
                path: path.to_path_buf(),
                reason,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use era5_common::VariableTable;
    use test_utils::{indexed_field, Grib1Builder, Grib2Builder};

    fn reader() -> GribImageReader {
        let table = VariableTable::embedded().unwrap();
        GribImageReader::new(Arc::new(table), "ERA5")
    }

    #[test]
    fn test_read_grib_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA5_AN_20170101_0000_t2m.grb");
        std::fs::write(
            &path,
            Grib2Builder::new_era5()
                .with_data(indexed_field(0, 19, 36))
                .build(),
        )
        .unwrap();

        let field = reader().read_field(&path, "t2m").unwrap();

        assert_eq!(field.shape(), (19, 36));
        assert_eq!(field.values[[1, 2]], 38.0);
        assert_eq!(field.lats[[1, 2]], 80.0);
        assert_eq!(field.lons[[1, 2]], 20.0);
        assert_eq!(field.attributes["units"], "K");
        assert_eq!(field.attributes["level"], "2 m above ground");
    }

    #[test]
    fn test_read_grib1_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA5_AN_20170101_0000_swvl1.grb");
        std::fs::write(
            &path,
            Grib1Builder::new_era5()
                .with_parameter(128, 39)
                .with_level(112, 7)
                .with_data(indexed_field(1, 19, 36))
                .build(),
        )
        .unwrap();

        let field = reader().read_field(&path, "swvl1").unwrap();

        assert_eq!(field.shape(), (19, 36));
        assert_eq!(field.values[[2, 3]], 10_075.0);
        assert_eq!(field.lats[[2, 3]], 70.0);
        assert_eq!(field.lons[[2, 3]], 30.0);
        assert_eq!(field.attributes["units"], "m**3 m**-3");
        assert_eq!(field.attributes["level"], "0-7 cm below land surface");
        assert_eq!(field.attributes["grib1_code"], serde_json::json!([128, 39]));
    }

    #[test]
    fn test_read_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.grb");
        std::fs::write(&path, b"").unwrap();

        let err = reader().read_field(&path, "t2m").unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidField { .. }));
    }

    #[test]
    fn test_field_from_axes_shape_check() {
        let err = GridField::from_axes("x", vec![1.0; 5], &[0.0, 1.0], &[0.0, 1.0], Attributes::new());
        assert!(err.is_err());
    }
}
