//! Retrieval requests for the ERA5 single-levels dataset.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use era5_archive::ImageFormat;
use era5_common::{DateWindow, HourSteps, VariableSet};

/// Dataset the requests are submitted to.
pub const ERA5_SINGLE_LEVELS: &str = "reanalysis-era5-single-levels";

/// Body of one retrieval request; serializes to the JSON the CDS expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub product_type: String,
    pub format: String,
    pub variable: Vec<String>,
    pub year: Vec<String>,
    pub month: Vec<String>,
    pub day: Vec<String>,
    pub time: Vec<String>,
}

impl RetrievalRequest {
    /// Request covering every day of `window` at every hour step.
    ///
    /// A window never crosses a month boundary, so year and month are single
    /// values.
    pub fn for_window(
        window: &DateWindow,
        variables: &VariableSet,
        steps: &HourSteps,
        format: ImageFormat,
    ) -> Self {
        let start = window.start();
        Self {
            product_type: "reanalysis".to_string(),
            format: format.label().to_string(),
            variable: variables.dl_names(),
            year: vec![start.year().to_string()],
            month: vec![format!("{:02}", start.month())],
            day: window.days().map(|d| format!("{:02}", d.day())).collect(),
            time: steps.request_times(),
        }
    }
}

/// Name of the staging file for `window`, e.g. `20170101_20170131.grb`.
pub fn staging_file_name(window: &DateWindow, format: ImageFormat) -> String {
    format!("{}.{}", window.file_stem(), format.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use era5_common::{VariableLookup, VariableTable, ERA5_PRODUCT};
    use serde_json::json;

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2017, 2, 26).unwrap(),
            NaiveDate::from_ymd_opt(2017, 2, 28).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_request_json_shape() {
        let table = VariableTable::embedded().unwrap();
        let variables = table
            .lookup(ERA5_PRODUCT, &["swvl1".to_string(), "lsm".to_string()])
            .unwrap();
        let steps = HourSteps::new([0, 12]).unwrap();

        let request = RetrievalRequest::for_window(&window(), &variables, &steps, ImageFormat::Grib);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "product_type": "reanalysis",
                "format": "grib",
                "variable": ["volumetric_soil_water_layer_1", "land_sea_mask"],
                "year": ["2017"],
                "month": ["02"],
                "day": ["26", "27", "28"],
                "time": ["00:00", "12:00"],
            })
        );
    }

    #[test]
    fn test_staging_file_name() {
        assert_eq!(
            staging_file_name(&window(), ImageFormat::NetCdf),
            "20170226_20170228.nc"
        );
    }
}
