//! Variable reference data.
//!
//! Translates between the names used in retrieval requests (`dl_name`), the
//! names found inside data files (`short_name`) and GRIB parameter codes.
//! The table is loaded once and handed to whoever needs it through the
//! [`VariableLookup`] trait.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Era5Error, Era5Result};

/// Product name used in archive file names and table keys.
pub const ERA5_PRODUCT: &str = "ERA5";

const EMBEDDED_TABLE: &str = include_str!("../data/variables.yaml");

/// GRIB2 identification of a parameter.
///
/// Level fields are only compared when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grib2Code {
    pub discipline: u8,
    pub category: u8,
    pub number: u8,
    #[serde(default)]
    pub level_type: Option<u8>,
    #[serde(default)]
    pub level_value: Option<u32>,
}

impl Grib2Code {
    pub fn matches(
        &self,
        discipline: u8,
        category: u8,
        number: u8,
        level_type: u8,
        level_value: u32,
    ) -> bool {
        self.discipline == discipline
            && self.category == category
            && self.number == number
            && self.level_type.map_or(true, |lt| lt == level_type)
            && self.level_value.map_or(true, |lv| lv == level_value)
    }
}

/// GRIB1 identification of a parameter: local table version and number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grib1Code {
    pub table: u8,
    pub number: u8,
}

/// One row of the variable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub short_name: String,
    pub dl_name: String,
    pub long_name: String,
    pub units: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub grib2: Option<Grib2Code>,
    #[serde(default)]
    pub grib1: Option<Grib1Code>,
}

impl VariableInfo {
    /// True if `name` is either the short or the request name.
    pub fn is_named(&self, name: &str) -> bool {
        self.short_name == name || self.dl_name == name
    }
}

/// Ordered set of resolved variables, without duplicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableSet(Vec<VariableInfo>);

impl VariableSet {
    pub fn new(variables: impl IntoIterator<Item = VariableInfo>) -> Self {
        let mut set: Vec<VariableInfo> = Vec::new();
        for var in variables {
            if !set.iter().any(|v| v.dl_name == var.dl_name) {
                set.push(var);
            }
        }
        Self(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableInfo> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names to put into retrieval requests.
    pub fn dl_names(&self) -> Vec<String> {
        self.0.iter().map(|v| v.dl_name.clone()).collect()
    }

    /// Names used inside files and archive paths.
    pub fn short_names(&self) -> Vec<String> {
        self.0.iter().map(|v| v.short_name.clone()).collect()
    }
}

/// Read access to variable reference data.
pub trait VariableLookup: Send + Sync {
    /// Variables requested when the user names none.
    fn default_variables(&self, product: &str) -> Era5Result<VariableSet>;

    /// Resolve user supplied names (short or request names).
    fn lookup(&self, product: &str, names: &[String]) -> Era5Result<VariableSet>;

    /// Find a single variable by short or request name.
    fn find(&self, product: &str, name: &str) -> Option<VariableInfo>;

    /// Find the variable a GRIB2 message encodes.
    fn find_grib2(
        &self,
        product: &str,
        discipline: u8,
        category: u8,
        number: u8,
        level_type: u8,
        level_value: u32,
    ) -> Option<VariableInfo>;

    /// Find the variable a GRIB1 message encodes.
    fn find_grib1(&self, product: &str, table: u8, number: u8) -> Option<VariableInfo>;
}

/// Variable table keyed by product (upper case).
#[derive(Debug, Clone)]
pub struct VariableTable {
    products: BTreeMap<String, Vec<VariableInfo>>,
}

impl VariableTable {
    /// The table compiled into the binary.
    pub fn embedded() -> Era5Result<Self> {
        Self::from_yaml(EMBEDDED_TABLE)
    }

    pub fn from_yaml(yaml: &str) -> Era5Result<Self> {
        let raw: BTreeMap<String, Vec<VariableInfo>> = serde_yaml::from_str(yaml)?;
        let products = raw
            .into_iter()
            .map(|(product, vars)| (product.to_ascii_uppercase(), vars))
            .collect();
        Ok(Self { products })
    }

    pub fn from_file(path: &Path) -> Era5Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Era5Error::VariableTableRead(path.to_path_buf(), e))?;
        debug!(path = %path.display(), "Loaded variable table");
        Self::from_yaml(&yaml)
    }

    /// Load from `path` if given, otherwise use the embedded table.
    pub fn load(path: Option<&Path>) -> Era5Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::embedded(),
        }
    }

    pub fn products(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }

    fn variables(&self, product: &str) -> Era5Result<&[VariableInfo]> {
        self.products
            .get(&product.to_ascii_uppercase())
            .map(Vec::as_slice)
            .ok_or_else(|| Era5Error::UnknownProduct(product.to_string()))
    }
}

impl VariableLookup for VariableTable {
    fn default_variables(&self, product: &str) -> Era5Result<VariableSet> {
        let vars = self.variables(product)?;
        Ok(VariableSet::new(vars.iter().filter(|v| v.default).cloned()))
    }

    fn lookup(&self, product: &str, names: &[String]) -> Era5Result<VariableSet> {
        let vars = self.variables(product)?;

        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let info = vars
                .iter()
                .find(|v| v.is_named(name))
                .ok_or_else(|| Era5Error::UnknownVariable {
                    product: product.to_string(),
                    name: name.clone(),
                })?;
            resolved.push(info.clone());
        }
        Ok(VariableSet::new(resolved))
    }

    fn find(&self, product: &str, name: &str) -> Option<VariableInfo> {
        self.variables(product)
            .ok()?
            .iter()
            .find(|v| v.is_named(name))
            .cloned()
    }

    fn find_grib2(
        &self,
        product: &str,
        discipline: u8,
        category: u8,
        number: u8,
        level_type: u8,
        level_value: u32,
    ) -> Option<VariableInfo> {
        self.variables(product)
            .ok()?
            .iter()
            .find(|v| {
                v.grib2.as_ref().is_some_and(|code| {
                    code.matches(discipline, category, number, level_type, level_value)
                })
            })
            .cloned()
    }

    fn find_grib1(&self, product: &str, table: u8, number: u8) -> Option<VariableInfo> {
        let code = Grib1Code { table, number };
        self.variables(product)
            .ok()?
            .iter()
            .find(|v| v.grib1 == Some(code))
            .cloned()
    }
}
