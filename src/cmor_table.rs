//! Variable tables: the target definition of every standardized variable.
//!
//! A table file is TOML with two kinds of sections. `[coordinates.<dimension>]`
//! defines a dimension (its axis, output name, standard name, units and, for
//! scalar dimensions like `height2m`, its value). `[mips.<table>]` gives the
//! frequency of a table and, under `[mips.<table>.variables.<short_name>]`, the
//! variables it defines:
//!
//! ```toml
//! projects = ["OBS6"]
//!
//! [coordinates.time]
//! axis = "T"
//! out_name = "time"
//! standard_name = "time"
//! long_name = "time"
//! units = "days since 1850-1-1 00:00:00.0"
//!
//! [mips.Amon]
//! frequency = "mon"
//!
//! [mips.Amon.variables.pr]
//! standard_name = "precipitation_flux"
//! long_name = "Precipitation"
//! units = "kg m-2 s-1"
//! dimensions = ["longitude", "latitude", "time"]
//! ```
//!
//! A subset of the CMIP6 tables covering the ERA-Interim variables is built in.
use std::{io::Read, path::Path};

use indexmap::IndexMap;
use serde::{de::Error, Deserialize};

use crate::cube::Axis;

pub(crate) static BUILTIN_TABLE_TOML: &str = include_str!("configs/obs6_table.toml");

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Could not parse variable table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("No variable table available for project '{0}'")]
    UnknownProject(String),
    #[error("Table '{0}' is not defined")]
    UnknownMip(String),
    #[error("Variable '{short_name}' is not defined in table '{mip}'")]
    UnknownVariable { mip: String, short_name: String },
    #[error("Variable '{short_name}' refers to undefined dimension '{dimension}'")]
    UnknownDimension { short_name: String, dimension: String },
}

/// How often a table's variables are sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Frequency {
    #[serde(rename = "1hr")]
    #[strum(serialize = "1hr")]
    Hourly,
    #[serde(rename = "6hr")]
    #[strum(serialize = "6hr")]
    SixHourly,
    Day,
    Mon,
    Yr,
    Fx,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinateInfo {
    pub axis: Axis,
    pub out_name: String,
    pub standard_name: String,
    pub long_name: String,
    pub units: String,
    /// Value of a scalar (size one) coordinate such as the 2 m height.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub positive: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariableEntry {
    standard_name: String,
    long_name: String,
    units: String,
    dimensions: Vec<String>,
    #[serde(default)]
    positive: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MipEntry {
    frequency: Frequency,
    #[serde(default)]
    variables: IndexMap<String, VariableEntry>,
}

/// The fully resolved definition of one variable in one table.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub short_name: String,
    pub mip: String,
    pub frequency: Frequency,
    /// Empty for variables with no CF standard name.
    pub standard_name: String,
    pub long_name: String,
    pub units: String,
    pub positive: Option<String>,
    /// Dimension names in table order, e.g. `["longitude", "latitude", "time", "height2m"]`.
    pub dimensions: Vec<String>,
    /// Coordinate definitions keyed by the axis they describe.
    pub coordinates: IndexMap<Axis, CoordinateInfo>,
}

impl VariableDefinition {
    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.dimensions.iter().any(|d| d == dimension)
    }

    pub fn standard_name(&self) -> Option<&str> {
        if self.standard_name.is_empty() {
            None
        } else {
            Some(&self.standard_name)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableTable {
    /// Projects this table serves; an empty list accepts any project.
    #[serde(default)]
    projects: Vec<String>,
    coordinates: IndexMap<String, CoordinateInfo>,
    mips: IndexMap<String, MipEntry>,
}

impl VariableTable {
    pub fn from_toml_str(s: &str) -> Result<Self, TableError> {
        let table: Self = toml::from_str(s)?;
        Ok(table)
    }

    pub fn from_toml_file(p: &Path) -> Result<Self, TableError> {
        let mut f = std::fs::File::open(p).map_err(|e| {
            toml::de::Error::custom(format!("error opening TOML file {}: {e}", p.display()))
        })?;
        let mut buf = String::new();
        f.read_to_string(&mut buf).map_err(|e| {
            toml::de::Error::custom(format!("error reading TOML file {}: {e}", p.display()))
        })?;
        Self::from_toml_str(&buf)
    }

    pub fn builtin() -> Result<Self, TableError> {
        Self::from_toml_str(BUILTIN_TABLE_TOML)
    }

    /// Get the table for `project`: the given table file if there is one, otherwise the
    /// built-in table. Either way the table must list the project (or no projects at all).
    pub fn for_project(project: &str, table_file: Option<&Path>) -> Result<Self, TableError> {
        let table = match table_file {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::builtin()?,
        };
        if table.projects.is_empty() || table.projects.iter().any(|p| p == project) {
            Ok(table)
        } else {
            Err(TableError::UnknownProject(project.to_string()))
        }
    }

    pub fn mips(&self) -> impl Iterator<Item = &str> {
        self.mips.keys().map(|k| k.as_str())
    }

    pub fn get_variable(&self, mip: &str, short_name: &str) -> Result<VariableDefinition, TableError> {
        let mip_entry = self
            .mips
            .get(mip)
            .ok_or_else(|| TableError::UnknownMip(mip.to_string()))?;
        let var = mip_entry
            .variables
            .get(short_name)
            .ok_or_else(|| TableError::UnknownVariable {
                mip: mip.to_string(),
                short_name: short_name.to_string(),
            })?;

        let mut coordinates = IndexMap::new();
        for dim in var.dimensions.iter() {
            let coord = self
                .coordinates
                .get(dim)
                .ok_or_else(|| TableError::UnknownDimension {
                    short_name: short_name.to_string(),
                    dimension: dim.to_string(),
                })?;
            coordinates.insert(coord.axis, coord.clone());
        }

        Ok(VariableDefinition {
            short_name: short_name.to_string(),
            mip: mip.to_string(),
            frequency: mip_entry.frequency,
            standard_name: var.standard_name.clone(),
            long_name: var.long_name.clone(),
            units: var.units.clone(),
            positive: var.positive.clone(),
            dimensions: var.dimensions.clone(),
            coordinates,
        })
    }
}
