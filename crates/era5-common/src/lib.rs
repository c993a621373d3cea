//! Common types shared by the ERA5 download and reshuffle tools.

pub mod error;
pub mod grid;
pub mod time;
pub mod variables;

pub use error::{Era5Error, Era5Result};
pub use grid::{
    build_irregular_grid, build_regular_grid, infer_resolution, validate_resolution, SpatialGrid,
    CELL_SIZE_DEG,
};
pub use time::{
    month_windows, parse_date, parse_datetime, parse_end_datetime, timestamps, DateWindow,
    HourSteps, MonthChunks,
};
pub use variables::{
    Grib1Code, Grib2Code, VariableInfo, VariableLookup, VariableSet, VariableTable, ERA5_PRODUCT,
};
