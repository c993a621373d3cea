//! Timestamp-addressed access to an archive of single-image files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use ndarray::{Array2, Zip};
use tracing::{debug, info, instrument};

use era5_common::VariableLookup;

use crate::error::{ArchiveError, ArchiveResult};
use crate::layout::{detect_format, ArchiveEntry, ImageFormat};
use crate::reader::{Attributes, GribImageReader, ImageFileReader};

/// Variable holding the land-sea mask.
pub const LAND_SEA_MASK: &str = "lsm";

/// All requested variables at one timestamp.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub timestamp: NaiveDateTime,
    pub data: BTreeMap<String, Array2<f32>>,
    pub lons: Array2<f64>,
    pub lats: Array2<f64>,
    pub metadata: BTreeMap<String, Attributes>,
}

impl ImageRecord {
    pub fn shape(&self) -> (usize, usize) {
        self.lons.dim()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }
}

/// A source of images addressed by timestamp.
pub trait ImageSource {
    /// Read every variable at `timestamp`.
    ///
    /// Fails with [`ArchiveError::ImageNotFound`] when a file is absent.
    fn read(&mut self, timestamp: NaiveDateTime) -> ArchiveResult<ImageRecord>;
}

/// Reads images from an archive laid out by [`ArchiveEntry`].
pub struct ImageDataset {
    root: PathBuf,
    product: String,
    variables: Vec<String>,
    mask_seapoints: bool,
    reader: Box<dyn ImageFileReader>,
    sea_mask: Option<Array2<bool>>,
}

impl std::fmt::Debug for ImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDataset")
            .field("root", &self.root)
            .field("product", &self.product)
            .field("variables", &self.variables)
            .field("format", &self.reader.format())
            .field("mask_seapoints", &self.mask_seapoints)
            .finish()
    }
}

impl ImageDataset {
    /// Open an archive, choosing the reader from the files found under `root`.
    ///
    /// Requested names may be request names or in-file names; they are
    /// resolved to in-file names through `lookup`.
    #[instrument(skip(variables, lookup), fields(root = %root.display()))]
    pub fn open(
        root: &Path,
        product: &str,
        variables: &[String],
        mask_seapoints: bool,
        lookup: Arc<dyn VariableLookup>,
    ) -> ArchiveResult<Self> {
        let format = detect_format(root)?;
        let reader: Box<dyn ImageFileReader> = match format {
            ImageFormat::Grib => Box::new(GribImageReader::new(lookup.clone(), product)),
            ImageFormat::NetCdf => netcdf_reader()?,
        };

        let variables: Vec<String> = variables
            .iter()
            .map(|name| {
                lookup
                    .find(product, name)
                    .map(|info| info.short_name)
                    .unwrap_or_else(|| name.clone())
            })
            .collect();

        info!(format = %format, variables = ?variables, mask_seapoints, "Opened image dataset");
        Ok(Self::with_reader(root, product, variables, mask_seapoints, reader))
    }

    /// Use `reader` for every file; names are taken as in-file names.
    pub fn with_reader(
        root: &Path,
        product: &str,
        variables: Vec<String>,
        mask_seapoints: bool,
        reader: Box<dyn ImageFileReader>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            product: product.to_string(),
            variables,
            mask_seapoints,
            reader,
            sea_mask: None,
        }
    }

    pub fn format(&self) -> ImageFormat {
        self.reader.format()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    fn entry_path(&self, timestamp: NaiveDateTime, variable: &str) -> PathBuf {
        ArchiveEntry::new(&self.product, timestamp, variable, self.reader.format())
            .path(&self.root)
    }

    fn load_sea_mask(&self, timestamp: NaiveDateTime) -> ArchiveResult<Array2<bool>> {
        let path = self.entry_path(timestamp, LAND_SEA_MASK);
        if !path.exists() {
            return Err(ArchiveError::MissingVariable {
                variable: LAND_SEA_MASK.to_string(),
                timestamp,
            });
        }

        let lsm = self.reader.read_field(&path, LAND_SEA_MASK)?;
        let mask = lsm.values.mapv(|v| v < 0.5);
        debug!(
            sea_points = mask.iter().filter(|&&sea| sea).count(),
            "Loaded sea mask"
        );
        Ok(mask)
    }
}

#[cfg(feature = "netcdf")]
fn netcdf_reader() -> ArchiveResult<Box<dyn ImageFileReader>> {
    Ok(Box::new(crate::netcdf::NetCdfImageReader::new()))
}

#[cfg(not(feature = "netcdf"))]
fn netcdf_reader() -> ArchiveResult<Box<dyn ImageFileReader>> {
    Err(ArchiveError::FormatDisabled {
        format: "NetCDF",
        feature: "netcdf",
    })
}

impl ImageSource for ImageDataset {
    fn read(&mut self, timestamp: NaiveDateTime) -> ArchiveResult<ImageRecord> {
        let mut data = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        let mut coords: Option<(Array2<f64>, Array2<f64>)> = None;

        for variable in &self.variables {
            let path = self.entry_path(timestamp, variable);
            if !path.exists() {
                return Err(ArchiveError::ImageNotFound { timestamp, path });
            }

            let field = self.reader.read_field(&path, variable)?;
            let shape = field.shape();
            if let Some(expected) = coords.as_ref().map(|(lons, _)| lons.dim()) {
                if expected != shape {
                    return Err(ArchiveError::ShapeMismatch {
                        variable: variable.clone(),
                        expected,
                        found: shape,
                    });
                }
            } else {
                coords = Some((field.lons, field.lats));
            }

            data.insert(variable.clone(), field.values);
            metadata.insert(variable.clone(), field.attributes);
        }

        let (lons, lats) = coords.ok_or_else(|| ArchiveError::InvalidField {
            path: self.root.clone(),
            reason: "no variables requested".to_string(),
        })?;

        if self.mask_seapoints {
            if self.sea_mask.is_none() {
                self.sea_mask = Some(self.load_sea_mask(timestamp)?);
            }
            if let Some(mask) = &self.sea_mask {
                for (variable, values) in data.iter_mut() {
                    if values.dim() != mask.dim() {
                        return Err(ArchiveError::ShapeMismatch {
                            variable: variable.clone(),
                            expected: mask.dim(),
                            found: values.dim(),
                        });
                    }
                    Zip::from(values).and(mask).for_each(|v, &sea| {
                        if sea {
                            *v = f32::NAN;
                        }
                    });
                }
            }
        }

        Ok(ImageRecord {
            timestamp,
            data,
            lons,
            lats,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::GridField;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Serves fields from memory and counts reads.
    struct MemoryReader {
        fields: BTreeMap<String, GridField>,
        reads: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl ImageFileReader for MemoryReader {
        fn format(&self) -> ImageFormat {
            ImageFormat::Grib
        }

        fn read_field(&self, path: &Path, variable: &str) -> ArchiveResult<GridField> {
            self.reads.lock().unwrap().push(path.to_path_buf());
            self.fields
                .get(variable)
                .cloned()
                .ok_or_else(|| ArchiveError::InvalidField {
                    path: path.to_path_buf(),
                    reason: "not served".into(),
                })
        }
    }

    fn field(variable: &str, values: Vec<f32>) -> GridField {
        GridField::from_axes(variable, values, &[10.0, 0.0], &[0.0, 90.0, 180.0], Attributes::new())
            .unwrap()
    }

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn touch(root: &Path, timestamp: NaiveDateTime, variable: &str) {
        let path = ArchiveEntry::new("ERA5", timestamp, variable, ImageFormat::Grib).path(root);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn dataset(
        root: &Path,
        variables: &[&str],
        mask: bool,
        fields: Vec<GridField>,
    ) -> (ImageDataset, Arc<Mutex<Vec<PathBuf>>>) {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let reader = MemoryReader {
            fields: fields.into_iter().map(|f| (f.variable.clone(), f)).collect(),
            reads: reads.clone(),
        };
        let ds = ImageDataset::with_reader(
            root,
            "ERA5",
            variables.iter().map(|v| v.to_string()).collect(),
            mask,
            Box::new(reader),
        );
        (ds, reads)
    }

    #[test]
    fn test_read_collects_requested_variables() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ts(6), "t2m");
        touch(dir.path(), ts(6), "swvl1");

        let (mut ds, reads) = dataset(
            dir.path(),
            &["t2m", "swvl1"],
            false,
            vec![field("t2m", vec![1.0; 6]), field("swvl1", vec![0.5; 6])],
        );

        let image = ds.read(ts(6)).unwrap();
        assert_eq!(image.variables().collect::<Vec<_>>(), vec!["swvl1", "t2m"]);
        assert_eq!(image.shape(), (2, 3));
        assert_eq!(image.lats[[0, 1]], 10.0);
        assert_eq!(reads.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_file_is_image_not_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ts(0), "t2m");

        let (mut ds, _) = dataset(dir.path(), &["t2m"], false, vec![field("t2m", vec![1.0; 6])]);

        let err = ds.read(ts(12)).unwrap_err();
        assert!(matches!(err, ArchiveError::ImageNotFound { .. }));
    }

    #[test]
    fn test_sea_points_are_masked_with_cached_mask() {
        let dir = tempfile::tempdir().unwrap();
        for hour in [0, 6] {
            touch(dir.path(), ts(hour), "t2m");
        }
        touch(dir.path(), ts(0), "lsm");

        let lsm = field("lsm", vec![1.0, 0.0, 0.6, 0.4, 1.0, 0.0]);
        let (mut ds, reads) = dataset(
            dir.path(),
            &["t2m"],
            true,
            vec![field("t2m", vec![2.0; 6]), lsm],
        );

        let first = ds.read(ts(0)).unwrap();
        let values: Vec<f32> = first.data["t2m"].iter().copied().collect();
        assert_eq!(values[0], 2.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 2.0);
        assert!(values[3].is_nan());

        // no lsm file at 06:00, the cached mask is reused
        let second = ds.read(ts(6)).unwrap();
        assert!(second.data["t2m"][[1, 2]].is_nan());
        assert_eq!(reads.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_land_sea_mask() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ts(0), "t2m");

        let (mut ds, _) = dataset(dir.path(), &["t2m"], true, vec![field("t2m", vec![2.0; 6])]);

        let err = ds.read(ts(0)).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::MissingVariable { ref variable, .. } if variable == "lsm"
        ));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ts(0), "t2m");
        touch(dir.path(), ts(0), "lsm");

        let small_lsm =
            GridField::from_axes("lsm", vec![1.0; 2], &[0.0], &[0.0, 90.0], Attributes::new())
                .unwrap();
        let (mut ds, _) = dataset(
            dir.path(),
            &["t2m"],
            true,
            vec![field("t2m", vec![2.0; 6]), small_lsm],
        );

        let err = ds.read(ts(0)).unwrap_err();
        assert!(matches!(err, ArchiveError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_open_empty_root_is_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let lookup = Arc::new(era5_common::VariableTable::embedded().unwrap());

        let err = ImageDataset::open(dir.path(), "ERA5", &["t2m".to_string()], false, lookup)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownFormat(_)));
    }
}
