//! Splitting of downloaded files into per-timestamp, per-variable archive files.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument};

use era5_common::VariableLookup;
use grib2_parser::{
    fallback_grib1_parameter_name, fallback_parameter_name, GribMessage, GribReader,
};

use crate::error::ArchiveResult;
use crate::layout::{ArchiveEntry, ImageFormat};

/// Splits one downloaded file into canonical archive entries.
pub trait ArchiveExtractor: Send + Sync {
    /// Format of the files this extractor consumes and produces.
    fn format(&self) -> ImageFormat;

    /// Write the entries of `staged_file` below `archive_root` and return their
    /// paths in first-seen order.
    fn extract(
        &self,
        staged_file: &Path,
        archive_root: &Path,
        product: &str,
    ) -> ArchiveResult<Vec<PathBuf>>;
}

/// Copies each GRIB message into the file of its valid time and variable.
///
/// Edition 1 and edition 2 messages may be mixed in one download.
///
/// Files touched by one extraction are truncated before their first message
/// is written, so re-running an extraction does not duplicate messages.
pub struct GribArchiveExtractor {
    lookup: Arc<dyn VariableLookup>,
}

impl GribArchiveExtractor {
    pub fn new(lookup: Arc<dyn VariableLookup>) -> Self {
        Self { lookup }
    }

    fn variable_name(&self, product: &str, message: &GribMessage) -> String {
        match message {
            GribMessage::Edition1(message) => {
                let (table, number) = message.parameter_code();
                self.lookup
                    .find_grib1(product, table, number)
                    .map(|info| info.short_name)
                    .unwrap_or_else(|| fallback_grib1_parameter_name(table, number))
            }
            GribMessage::Edition2(message) => {
                let (discipline, category, number) = message.parameter_code();
                let pd = &message.product_definition;

                self.lookup
                    .find_grib2(
                        product,
                        discipline,
                        category,
                        number,
                        pd.level_type,
                        pd.level_value,
                    )
                    .map(|info| info.short_name)
                    .unwrap_or_else(|| fallback_parameter_name(discipline, category, number))
            }
        }
    }
}

impl ArchiveExtractor for GribArchiveExtractor {
    fn format(&self) -> ImageFormat {
        ImageFormat::Grib
    }

    #[instrument(skip(self), fields(staged = %staged_file.display()))]
    fn extract(
        &self,
        staged_file: &Path,
        archive_root: &Path,
        product: &str,
    ) -> ArchiveResult<Vec<PathBuf>> {
        let data = Bytes::from(std::fs::read(staged_file)?);
        let mut reader = GribReader::new(data);

        let mut written: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut messages = 0usize;

        while let Some(message) = reader.next_message()? {
            let valid_time = message.valid_time()?.naive_utc();
            let variable = self.variable_name(product, &message);

            let entry = ArchiveEntry::new(product, valid_time, variable, ImageFormat::Grib);
            let path = entry.path(archive_root);

            let first_write = seen.insert(path.clone());
            if first_write {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                written.push(path.clone());
            }

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(first_write)
                .append(!first_write)
                .open(&path)?;
            file.write_all(message.raw())?;
            messages += 1;

            debug!(
                path = %path.display(),
                offset = message.offset(),
                edition = message.edition(),
                "Wrote GRIB message"
            );
        }

        info!(
            messages = messages,
            files = written.len(),
            "Extracted GRIB messages into archive"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use era5_common::VariableTable;
    use test_utils::{Grib1Builder, Grib2Builder};

    fn extractor() -> GribArchiveExtractor {
        GribArchiveExtractor::new(Arc::new(VariableTable::embedded().unwrap()))
    }

    fn staged_file(dir: &Path) -> PathBuf {
        let mut data = Vec::new();
        for hour in [0u8, 6] {
            // 2 m temperature
            data.extend(
                Grib2Builder::new_era5()
                    .with_reference_time(2017, 1, 31, hour)
                    .with_constant_value(270.0)
                    .build(),
            );
            // land-sea mask
            data.extend(
                Grib2Builder::new_era5()
                    .with_reference_time(2017, 1, 31, hour)
                    .with_discipline(2)
                    .with_parameter(0, 0)
                    .with_level(1, 0)
                    .with_constant_value(1.0)
                    .build(),
            );
        }
        // unknown parameter, valid one day later through the forecast hour
        data.extend(
            Grib2Builder::new_era5()
                .with_reference_time(2017, 12, 31, 18)
                .with_forecast_hour(6)
                .with_parameter(1, 99)
                .with_level(1, 0)
                .build(),
        );

        let path = dir.join("20170131_20170131.grb");
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_extract_splits_by_time_and_variable() {
        let dir = tempfile::tempdir().unwrap();
        let staged = staged_file(dir.path());
        let root = dir.path().join("archive");

        let paths = extractor().extract(&staged, &root, "ERA5").unwrap();

        let names: Vec<String> = paths
            .iter()
            .map(|p| p.strip_prefix(&root).unwrap().display().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "2017/ERA5_AN_20170131_0000_t2m.grb",
                "2017/ERA5_AN_20170131_0000_lsm.grb",
                "2017/ERA5_AN_20170131_0600_t2m.grb",
                "2017/ERA5_AN_20170131_0600_lsm.grb",
                "2018/ERA5_AN_20180101_0000_P0_1_99.grb",
            ]
        );
        for path in &paths {
            let bytes = std::fs::read(path).unwrap();
            assert_eq!(&bytes[0..4], b"GRIB");
        }
    }

    #[test]
    fn test_extract_grib1_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = Vec::new();
        for hour in [0u8, 12] {
            data.extend(
                Grib1Builder::new_era5()
                    .with_reference_time(2017, 2, 1, hour)
                    .with_parameter(128, 39)
                    .with_level(112, 7)
                    .with_constant_value(0.25)
                    .build(),
            );
        }
        data.extend(
            Grib1Builder::new_era5()
                .with_reference_time(2017, 2, 1, 0)
                .with_parameter(200, 1)
                .build(),
        );
        let staged = dir.path().join("20170201_20170201.grb");
        std::fs::write(&staged, &data).unwrap();
        let root = dir.path().join("archive");

        let paths = extractor().extract(&staged, &root, "ERA5").unwrap();

        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "ERA5_AN_20170201_0000_swvl1.grb",
                "ERA5_AN_20170201_1200_swvl1.grb",
                "ERA5_AN_20170201_0000_T200_1.grb",
            ]
        );
        let first = std::fs::read(&paths[0]).unwrap();
        assert_eq!(first[7], 1);
    }

    #[test]
    fn test_extract_twice_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let staged = staged_file(dir.path());
        let root = dir.path().join("archive");

        let first = extractor().extract(&staged, &root, "ERA5").unwrap();
        let size = std::fs::metadata(&first[0]).unwrap().len();

        extractor().extract(&staged, &root, "ERA5").unwrap();
        assert_eq!(std::fs::metadata(&first[0]).unwrap().len(), size);
    }
}
