//! ERA5 image archive.
//!
//! Downloads are split into one file per timestamp and variable below a
//! year-partitioned root (see [`layout`]). The archive is read back one
//! timestamp at a time through [`ImageDataset`].
//!
//! GRIB2 is always supported. NetCDF needs the `netcdf` feature and the
//! netCDF C library.

pub mod cf_time;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod layout;
#[cfg(feature = "netcdf")]
pub mod netcdf;
pub mod reader;

pub use dataset::{ImageDataset, ImageRecord, ImageSource, LAND_SEA_MASK};
pub use error::{ArchiveError, ArchiveResult};
pub use extract::{ArchiveExtractor, GribArchiveExtractor};
pub use layout::{detect_format, ArchiveEntry, ImageFormat};
#[cfg(feature = "netcdf")]
pub use netcdf::{NetCdfArchiveExtractor, NetCdfImageReader};
pub use reader::{Attributes, GribImageReader, GridField, ImageFileReader};

use std::sync::Arc;

use era5_common::VariableLookup;

/// Extractor for downloads in `format`.
pub fn extractor_for(
    format: ImageFormat,
    lookup: Arc<dyn VariableLookup>,
) -> ArchiveResult<Box<dyn ArchiveExtractor>> {
    match format {
        ImageFormat::Grib => Ok(Box::new(GribArchiveExtractor::new(lookup))),
        #[cfg(feature = "netcdf")]
        ImageFormat::NetCdf => Ok(Box::new(NetCdfArchiveExtractor::new())),
        #[cfg(not(feature = "netcdf"))]
        ImageFormat::NetCdf => Err(ArchiveError::FormatDisabled {
            format: "NetCDF",
            feature: "netcdf",
        }),
    }
}
