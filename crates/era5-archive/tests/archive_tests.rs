//! End-to-end tests: staged GRIB1, GRIB2 and NetCDF downloads -> archive -> images.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};

use era5_archive::{
    detect_format, extractor_for, ArchiveError, ImageDataset, ImageFormat, ImageSource,
};
use era5_common::VariableTable;
use test_utils::{half_land_mask, indexed_field, Grib1Builder, Grib2Builder};

// ============================================================================
// Fixtures
// ============================================================================

const ROWS: usize = 19;
const COLS: usize = 36;

fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2017, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// Two days at 00/12 with soil moisture, temperature and the land-sea mask.
fn stage_download(dir: &Path) -> PathBuf {
    let mut data = Vec::new();
    let mut step = 0;
    for day in [1u8, 2] {
        for hour in [0u8, 12] {
            // swvl1
            data.extend(
                Grib2Builder::new_era5()
                    .with_reference_time(2017, 1, day, hour)
                    .with_discipline(2)
                    .with_parameter(0, 25)
                    .with_level(106, 0)
                    .with_data(indexed_field(step, ROWS, COLS))
                    .build(),
            );
            // t2m
            data.extend(
                Grib2Builder::new_era5()
                    .with_reference_time(2017, 1, day, hour)
                    .with_constant_value(273.0)
                    .build(),
            );
            // lsm
            data.extend(
                Grib2Builder::new_era5()
                    .with_reference_time(2017, 1, day, hour)
                    .with_discipline(2)
                    .with_parameter(0, 0)
                    .with_level(1, 0)
                    .with_values_from(half_land_mask)
                    .build(),
            );
            step += 1;
        }
    }

    let path = dir.join("20170101_20170102.grb");
    std::fs::write(&path, data).unwrap();
    path
}

fn lookup() -> Arc<VariableTable> {
    Arc::new(VariableTable::embedded().unwrap())
}

fn extracted_archive() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let staged = stage_download(dir.path());
    let root = dir.path().join("archive");

    let extractor = extractor_for(ImageFormat::Grib, lookup()).unwrap();
    let written = extractor.extract(&staged, &root, "ERA5").unwrap();
    assert_eq!(written.len(), 12);

    (dir, root)
}

// ============================================================================
// Extraction and reading
// ============================================================================

#[test]
fn test_extracted_archive_is_grib() {
    let (_dir, root) = extracted_archive();
    assert_eq!(detect_format(&root).unwrap(), ImageFormat::Grib);
    assert!(root.join("2017/ERA5_AN_20170102_1200_lsm.grb").exists());
}

#[test]
fn test_read_image_by_request_name() {
    let (_dir, root) = extracted_archive();

    let variables = vec![
        "volumetric_soil_water_layer_1".to_string(),
        "t2m".to_string(),
    ];
    let mut dataset = ImageDataset::open(&root, "ERA5", &variables, false, lookup()).unwrap();
    assert_eq!(dataset.format(), ImageFormat::Grib);
    assert_eq!(dataset.variables(), &["swvl1".to_string(), "t2m".to_string()]);

    let image = dataset.read(ts(2, 0)).unwrap();
    assert_eq!(image.shape(), (ROWS, COLS));
    // third time step in the staged file
    assert_eq!(image.data["swvl1"][[3, 4]], (20_000 + 3 * COLS + 4) as f32);
    assert_eq!(image.data["t2m"][[0, 0]], 273.0);
    assert_eq!(image.metadata["t2m"]["units"], "K");
}

#[test]
fn test_masked_read_sets_sea_points_to_nan() {
    let (_dir, root) = extracted_archive();

    let mut dataset =
        ImageDataset::open(&root, "ERA5", &["swvl1".to_string()], true, lookup()).unwrap();
    let image = dataset.read(ts(1, 12)).unwrap();

    let values = &image.data["swvl1"];
    // column 0 is lon 0 (land), column 18 is lon 180 (sea)
    assert_eq!(values[[5, 0]], (10_000 + 5 * COLS) as f32);
    assert!(values[[5, 18]].is_nan());
    assert!(values[[5, 35]].is_nan());
}

#[test]
fn test_read_missing_timestamp() {
    let (_dir, root) = extracted_archive();

    let mut dataset =
        ImageDataset::open(&root, "ERA5", &["swvl1".to_string()], false, lookup()).unwrap();
    let err = dataset.read(ts(1, 6)).unwrap_err();
    assert!(matches!(err, ArchiveError::ImageNotFound { .. }));
}

// ============================================================================
// GRIB1 downloads
// ============================================================================

/// One day at 00/12 with soil moisture and the land-sea mask, encoded the way
/// the CDS serves ERA5 GRIB (edition 1, table 128).
fn stage_grib1_download(dir: &Path) -> PathBuf {
    let mut data = Vec::new();
    for (step, hour) in [0u8, 12].into_iter().enumerate() {
        data.extend(
            Grib1Builder::new_era5()
                .with_reference_time(2017, 1, 1, hour)
                .with_parameter(128, 39)
                .with_level(112, 7)
                .with_data(indexed_field(step, ROWS, COLS))
                .build(),
        );
        data.extend(
            Grib1Builder::new_era5()
                .with_reference_time(2017, 1, 1, hour)
                .with_parameter(128, 172)
                .with_values_from(half_land_mask)
                .build(),
        );
    }

    let path = dir.join("20170101_20170101.grb");
    std::fs::write(&path, data).unwrap();
    path
}

#[test]
fn test_grib1_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let staged = stage_grib1_download(dir.path());
    let root = dir.path().join("archive");

    let extractor = extractor_for(ImageFormat::Grib, lookup()).unwrap();
    let written = extractor.extract(&staged, &root, "ERA5").unwrap();
    assert_eq!(written.len(), 4);
    assert!(root.join("2017/ERA5_AN_20170101_1200_swvl1.grb").exists());
    assert!(root.join("2017/ERA5_AN_20170101_0000_lsm.grb").exists());

    let mut dataset =
        ImageDataset::open(&root, "ERA5", &["swvl1".to_string()], true, lookup()).unwrap();
    let image = dataset.read(ts(1, 12)).unwrap();

    let values = &image.data["swvl1"];
    assert_eq!(values[[2, 3]], (10_000 + 2 * COLS + 3) as f32);
    assert!(values[[2, 20]].is_nan());
    assert_eq!(image.metadata["swvl1"]["level"], "0-7 cm below land surface");
}

// ============================================================================
// NetCDF downloads
// ============================================================================

/// Two time steps on 2017-01-01 at 00/12: float soil moisture and a land-sea
/// mask packed as shorts.
#[cfg(feature = "netcdf")]
fn stage_netcdf_download(dir: &Path) -> PathBuf {
    let path = dir.join("20170101_20170101.nc");
    let (lats, lons) = test_utils::global_axes(10.0);
    let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let hours: Vec<f64> = [ts(1, 0), ts(1, 12)]
        .iter()
        .map(|t| (*t - epoch).num_hours() as f64)
        .collect();

    let mut file = netcdf::create(&path).unwrap();
    file.add_dimension("time", hours.len()).unwrap();
    file.add_dimension("latitude", lats.len()).unwrap();
    file.add_dimension("longitude", lons.len()).unwrap();

    let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
    time.put_attribute("units", "hours since 1900-01-01 00:00:00.0")
        .unwrap();
    time.put_values(&hours, ..).unwrap();

    let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
    lat.put_values(&lats, ..).unwrap();
    let mut lon = file.add_variable::<f64>("longitude", &["longitude"]).unwrap();
    lon.put_values(&lons, ..).unwrap();

    let mut swvl1 = file
        .add_variable::<f32>("swvl1", &["time", "latitude", "longitude"])
        .unwrap();
    swvl1.put_attribute("units", "m**3 m**-3").unwrap();
    let mut values = indexed_field(0, ROWS, COLS);
    values.extend(indexed_field(1, ROWS, COLS));
    swvl1.put_values(&values, ..).unwrap();

    let mut lsm = file
        .add_variable::<i16>("lsm", &["time", "latitude", "longitude"])
        .unwrap();
    lsm.put_attribute("scale_factor", 0.5f64).unwrap();
    lsm.put_attribute("add_offset", 0.0f64).unwrap();
    let mut packed = Vec::with_capacity(values.len());
    for _ in &hours {
        for &la in &lats {
            packed.extend(lons.iter().map(|&lo| (half_land_mask(la, lo) * 2.0) as i16));
        }
    }
    lsm.put_values(&packed, ..).unwrap();

    path
}

#[cfg(feature = "netcdf")]
#[test]
fn test_netcdf_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let staged = stage_netcdf_download(dir.path());
    let root = dir.path().join("archive");

    let extractor = extractor_for(ImageFormat::NetCdf, lookup()).unwrap();
    let written = extractor.extract(&staged, &root, "ERA5").unwrap();
    assert_eq!(written.len(), 4);
    assert_eq!(detect_format(&root).unwrap(), ImageFormat::NetCdf);
    assert!(root.join("2017/ERA5_AN_20170101_1200_swvl1.nc").exists());

    let mut dataset =
        ImageDataset::open(&root, "ERA5", &["swvl1".to_string()], true, lookup()).unwrap();
    assert_eq!(dataset.format(), ImageFormat::NetCdf);

    let image = dataset.read(ts(1, 12)).unwrap();
    assert_eq!(image.shape(), (ROWS, COLS));
    let values = &image.data["swvl1"];
    assert_eq!(values[[4, 5]], (10_000 + 4 * COLS + 5) as f32);
    // unpacked mask is 0 east of 180
    assert!(values[[4, 30]].is_nan());
    assert_eq!(image.metadata["swvl1"]["units"], "m**3 m**-3");
}

#[cfg(not(feature = "netcdf"))]
#[test]
fn test_netcdf_extractor_needs_feature() {
    let err = extractor_for(ImageFormat::NetCdf, lookup()).err().unwrap();
    assert!(matches!(err, ArchiveError::FormatDisabled { .. }));
}
