//! On-disk archive layout.
//!
//! Images are stored one file per timestamp and variable:
//!
//! ```text
//! <root>/<YYYY>/<PRODUCT>_AN_<YYYYMMDD>_<HHMM>_<variable>.<grb|nc>
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ArchiveError, ArchiveResult};

/// File encoding of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Grib,
    NetCdf,
}

impl ImageFormat {
    /// Extension used for archive entries.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Grib => "grb",
            ImageFormat::NetCdf => "nc",
        }
    }

    /// Name used in retrieval requests and dataset attributes.
    pub fn label(&self) -> &'static str {
        match self {
            ImageFormat::Grib => "grib",
            ImageFormat::NetCdf => "netcdf",
        }
    }

    /// Recognize any GRIB or NetCDF extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "grb" | "grib" | "grib2" | "grb2" => Some(ImageFormat::Grib),
            "nc" | "nc4" | "netcdf" => Some(ImageFormat::NetCdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// NetCDF when the `netcdf` feature is built in, GRIB otherwise.
impl Default for ImageFormat {
    fn default() -> Self {
        if cfg!(feature = "netcdf") {
            ImageFormat::NetCdf
        } else {
            ImageFormat::Grib
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One archive file, keyed by timestamp and variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub product: String,
    pub timestamp: NaiveDateTime,
    pub variable: String,
    pub format: ImageFormat,
}

impl ArchiveEntry {
    pub fn new(
        product: impl Into<String>,
        timestamp: NaiveDateTime,
        variable: impl Into<String>,
        format: ImageFormat,
    ) -> Self {
        Self {
            product: product.into(),
            timestamp,
            variable: variable.into(),
            format,
        }
    }

    /// File name without directory, e.g. `ERA5_AN_20170101_0600_swvl1.grb`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_AN_{}_{}.{}",
            self.product,
            self.timestamp.format("%Y%m%d_%H%M"),
            self.variable,
            self.format.extension()
        )
    }

    /// Full path below `root`, inside the year folder.
    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(self.timestamp.format("%Y").to_string())
            .join(self.file_name())
    }

    /// Parse a file name produced by [`ArchiveEntry::file_name`].
    ///
    /// Variable names may contain underscores.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        let format = ImageFormat::from_extension(ext)?;

        let (product, rest) = stem.split_once("_AN_")?;
        let mut parts = rest.splitn(3, '_');
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y%m%d").ok()?;
        let time = NaiveTime::parse_from_str(parts.next()?, "%H%M").ok()?;
        let variable = parts.next().filter(|v| !v.is_empty())?;

        Some(Self::new(product, date.and_time(time), variable, format))
    }
}

/// Determine the archive format from the first image file found under `root`.
pub fn detect_format(root: &Path) -> ArchiveResult<ImageFormat> {
    let mut entries: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    entries.sort();

    for path in entries {
        if let Some(format) = ImageFormat::from_path(&path) {
            debug!(path = %path.display(), format = %format, "Detected archive format");
            return Ok(format);
        }
    }

    Err(ArchiveError::UnknownFormat(root.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_entry_path() {
        let entry = ArchiveEntry::new("ERA5", ts("2017-01-01 06:00"), "swvl1", ImageFormat::Grib);

        assert_eq!(entry.file_name(), "ERA5_AN_20170101_0600_swvl1.grb");
        assert_eq!(
            entry.path(Path::new("/data/era5")),
            PathBuf::from("/data/era5/2017/ERA5_AN_20170101_0600_swvl1.grb")
        );
    }

    #[test]
    fn test_entry_parse_round_trip() {
        let entry = ArchiveEntry::new(
            "ERA5",
            ts("2018-12-31 18:00"),
            "P0_1_8",
            ImageFormat::NetCdf,
        );

        assert_eq!(ArchiveEntry::parse(&entry.file_name()), Some(entry));
        assert_eq!(ArchiveEntry::parse("ERA5_AN_2018_swvl1.nc"), None);
        assert_eq!(ArchiveEntry::parse("notes.txt"), None);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("GRIB2"), Some(ImageFormat::Grib));
        assert_eq!(ImageFormat::from_extension("nc4"), Some(ImageFormat::NetCdf));
        assert_eq!(ImageFormat::from_extension("txt"), None);
        assert_eq!(ImageFormat::NetCdf.label(), "netcdf");
    }

    #[test]
    fn test_default_format_follows_features() {
        #[cfg(feature = "netcdf")]
        assert_eq!(ImageFormat::default(), ImageFormat::NetCdf);
        #[cfg(not(feature = "netcdf"))]
        assert_eq!(ImageFormat::default(), ImageFormat::Grib);
    }

    #[test]
    fn test_detect_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2017")).unwrap();
        std::fs::write(dir.path().join("README"), "archive").unwrap();
        std::fs::write(
            dir.path().join("2017").join("ERA5_AN_20170101_0000_lsm.nc"),
            b"",
        )
        .unwrap();

        assert_eq!(detect_format(dir.path()).unwrap(), ImageFormat::NetCdf);
    }

    #[test]
    fn test_detect_format_unknown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), "1,2,3").unwrap();

        let err = detect_format(dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownFormat(_)));
    }
}
