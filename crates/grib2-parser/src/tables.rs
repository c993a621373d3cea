//! GRIB level descriptions and parameter fallback names.

use std::collections::HashMap;

/// Level description, either fixed text or a template with a `{value}` placeholder.
#[derive(Debug, Clone)]
pub enum LevelDescription {
    Static(String),
    Template(String),
}

impl LevelDescription {
    pub fn format(&self, value: u32) -> String {
        match self {
            LevelDescription::Static(s) => s.clone(),
            LevelDescription::Template(t) => t.replace("{value}", &value.to_string()),
        }
    }
}

/// Lookup for first fixed surface types (Code Table 4.5).
#[derive(Debug, Clone, Default)]
pub struct LevelTable {
    levels: HashMap<u8, LevelDescription>,
}

impl LevelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surfaces that occur in single-level reanalysis products.
    pub fn single_levels() -> Self {
        let mut table = Self::new();
        table.add(1, LevelDescription::Static("surface".to_string()));
        table.add(8, LevelDescription::Static("top of atmosphere".to_string()));
        table.add(101, LevelDescription::Static("mean sea level".to_string()));
        table.add(
            103,
            LevelDescription::Template("{value} m above ground".to_string()),
        );
        table.add(
            106,
            LevelDescription::Template("{value} below land surface".to_string()),
        );
        table.add(
            151,
            LevelDescription::Template("soil level {value}".to_string()),
        );
        table
    }

    pub fn add(&mut self, level_type: u8, description: LevelDescription) {
        self.levels.insert(level_type, description);
    }

    /// Returns "Level type {type} value {value}" for unknown types.
    pub fn describe(&self, level_type: u8, level_value: u32) -> String {
        match self.levels.get(&level_type) {
            Some(desc) => desc.format(level_value),
            None => format!("Level type {} value {}", level_type, level_value),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Name for a parameter no table knows about.
pub fn fallback_parameter_name(discipline: u8, category: u8, number: u8) -> String {
    format!("P{}_{}_{}", discipline, category, number)
}

/// Name for a GRIB1 parameter no table knows about, e.g. `T128_39`.
pub fn fallback_grib1_parameter_name(table: u8, number: u8) -> String {
    format!("T{}_{}", table, number)
}

/// Description of a GRIB1 level (Code Table 3).
///
/// Layer types keep the top and bottom in the two bytes of `level_value`.
pub fn describe_grib1_level(level_type: u8, level_value: u16) -> String {
    let [top, bottom] = level_value.to_be_bytes();
    match level_type {
        1 => "surface".to_string(),
        8 => "top of atmosphere".to_string(),
        102 => "mean sea level".to_string(),
        105 => format!("{} m above ground", level_value),
        111 => format!("{} cm below land surface", level_value),
        112 => format!("{}-{} cm below land surface", top, bottom),
        _ => format!("Level type {} value {}", level_type, level_value),
    }
}
