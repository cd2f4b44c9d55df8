//! Dataset configuration: global attributes stamped on every output file and the
//! registry of variables to standardize.
//!
//! The configuration is TOML. The `[attributes]` table must give `dataset_id`,
//! `project_id`, `tier`, `version`, `modeling_realm`, `source`, `reference` and
//! `comment`; any other string keys are passed through to the output files. The
//! comment may contain a `{year}` placeholder, replaced by the current year when a
//! run starts.
//!
//! Each `[variables.<name>]` table describes one variable. The simple case reads
//! one raw variable from every file matching one pattern:
//!
//! ```toml
//! [variables.tas]
//! mip = "Amon"
//! raw = "t2m"
//! file = "ERA-Interim_t2m_monthly_*.nc"
//! ```
//!
//! Variables computed from several raw variables list one pattern per raw variable
//! and the operator that combines them. Files are matched up by the last
//! underscore-separated part of their name (the year):
//!
//! ```toml
//! [variables.hfds]
//! mip = "Omon"
//! raw = ["ssr", "str", "slhf", "sshf"]
//! files = [
//!     "ERA-Interim_ssr_monthly_*.nc",
//!     "ERA-Interim_str_monthly_*.nc",
//!     "ERA-Interim_slhf_monthly_*.nc",
//!     "ERA-Interim_sshf_monthly_*.nc",
//! ]
//! operator = "sum"
//! ```
//!
//! The table name is the output short name unless a `short_name` key is given, so
//! that e.g. daily and monthly `tas` can both be configured (`[variables.tas_day]`
//! with `short_name = "tas"`).
//!
//! Datasets that ship one file with extra structure can ask for two more steps.
//! `select` keeps the single point of a dimension whose coordinate has the given
//! value, dropping that dimension and recording the value as a global attribute.
//! `climatology` replaces a 12-step month axis by the month midpoints of one year:
//!
//! ```toml
//! [variables.albDiffiTr13]
//! mip = "Amon"
//! raw = "Delta_albedo"
//! file = "albedo_IGBPgen.nc"
//! select = { coord = "Vegetation transition code", value = 2 }
//! climatology = { coord = "Month", year = 2010 }
//! ```
//!
//! Attribute values can be overridden from the environment with variables named
//! `CMORIZE_ATTRIBUTES_<KEY>`, e.g. `CMORIZE_ATTRIBUTES_COMMENT`.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;

pub(crate) static ERA_INTERIM_TOML: &str = include_str!("configs/era_interim.toml");
pub(crate) static DUVEILLER2018_TOML: &str = include_str!("configs/duveiller2018.toml");
pub const ENV_PREFIX: &str = "CMORIZE_ATTRIBUTES_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {} does not exist", .0.display())]
    MissingFile(PathBuf),
    #[error("Could not load the dataset configuration")]
    Load,
    #[error("Variable '{name}' is misconfigured: {reason}")]
    InvalidVariable { name: String, reason: String },
}

impl ConfigError {
    fn invalid<N: ToString, R: ToString>(name: N, reason: R) -> Self {
        Self::InvalidVariable {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Dataset configurations built into the program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinDataset {
    #[default]
    #[strum(serialize = "era-interim")]
    EraInterim,
    Duveiller2018,
}

impl BuiltinDataset {
    pub fn toml(&self) -> &'static str {
        match self {
            BuiltinDataset::EraInterim => ERA_INTERIM_TOML,
            BuiltinDataset::Duveiller2018 => DUVEILLER2018_TOML,
        }
    }
}

/// Attributes describing the dataset as a whole.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetAttributes {
    pub dataset_id: String,
    pub project_id: String,
    pub tier: u32,
    pub version: String,
    pub modeling_realm: String,
    pub source: String,
    pub reference: String,
    pub comment: String,
    /// Any other attributes, written to the output files as they are.
    #[serde(flatten)]
    pub extra: IndexMap<String, String>,
}

impl DatasetAttributes {
    /// Replace the `{year}` placeholder in the comment.
    pub fn resolve_comment_year(&mut self, year: i32) {
        self.comment = self.comment.replace("{year}", &year.to_string());
    }

    /// All attributes as strings, in a stable order, with the target table added as `mip`.
    pub fn for_mip(&self, mip: &str) -> IndexMap<String, String> {
        let mut attrs = IndexMap::new();
        attrs.insert("dataset_id".to_string(), self.dataset_id.clone());
        attrs.insert("project_id".to_string(), self.project_id.clone());
        attrs.insert("tier".to_string(), self.tier.to_string());
        attrs.insert("version".to_string(), self.version.clone());
        attrs.insert("modeling_realm".to_string(), self.modeling_realm.clone());
        attrs.insert("source".to_string(), self.source.clone());
        attrs.insert("reference".to_string(), self.reference.clone());
        attrs.insert("comment".to_string(), self.comment.clone());
        for (k, v) in self.extra.iter() {
            attrs.insert(k.clone(), v.clone());
        }
        attrs.insert("mip".to_string(), mip.to_string());
        attrs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CombineOperator {
    Sum,
}

/// The raw variable name(s) a variable is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawSource {
    Single(String),
    Multiple(Vec<String>),
}

impl RawSource {
    pub fn names(&self) -> Vec<&str> {
        match self {
            RawSource::Single(s) => vec![s.as_str()],
            RawSource::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// The glob pattern(s), relative to the input directory, that find a variable's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilePatterns {
    Single(String),
    Multiple(Vec<String>),
}

impl FilePatterns {
    pub fn patterns(&self) -> Vec<&str> {
        match self {
            FilePatterns::Single(s) => vec![s.as_str()],
            FilePatterns::Multiple(v) => v.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// Keep the point of dimension `coord` at `value` and drop the dimension.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointSelection {
    /// Variable, standard or long name of the coordinate
    pub coord: String,
    pub value: f64,
}

/// Replace the 12 steps of a month dimension by a monthly climatology time axis
/// in `year`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonthlyClimatology {
    #[serde(default = "default_month_coord")]
    pub coord: String,
    pub year: i32,
}

fn default_month_coord() -> String {
    "time".to_string()
}

/// One configured variable, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// Key of the variable in the configuration
    pub name: String,
    pub short_name: String,
    pub mip: String,
    pub raw: RawSource,
    pub files: FilePatterns,
    pub operator: Option<CombineOperator>,
    pub select: Option<PointSelection>,
    pub climatology: Option<MonthlyClimatology>,
}

impl VariableSpec {
    /// The optional dataset-specific steps, for display.
    fn steps(&self) -> String {
        let select = self
            .select
            .as_ref()
            .map(|s| format!("select {} = {}", s.coord, s.value));
        let clim = self
            .climatology
            .as_ref()
            .map(|c| format!("{} climatology from '{}'", c.year, c.coord));
        select.into_iter().chain(clim).join("; ")
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariableEntry {
    #[serde(default)]
    short_name: Option<String>,
    mip: String,
    raw: RawSource,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    files: Option<Vec<String>>,
    #[serde(default)]
    operator: Option<CombineOperator>,
    #[serde(default)]
    select: Option<PointSelection>,
    #[serde(default)]
    climatology: Option<MonthlyClimatology>,
}

impl VariableEntry {
    fn into_spec(self, name: &str) -> Result<VariableSpec, ConfigError> {
        let files = match (self.file, self.files) {
            (Some(file), None) => FilePatterns::Single(file),
            (None, Some(files)) => FilePatterns::Multiple(files),
            (Some(_), Some(_)) => return Err(ConfigError::invalid(name, "only one of 'file' and 'files' may be given")),
            (None, None) => return Err(ConfigError::invalid(name, "one of 'file' or 'files' is required")),
        };

        match (&files, &self.raw, self.operator) {
            (FilePatterns::Single(_), RawSource::Single(_), None) => (),
            (FilePatterns::Single(_), RawSource::Multiple(_), _) => {
                return Err(ConfigError::invalid(name, "a single file pattern needs a single raw variable"))
            }
            (FilePatterns::Single(_), _, Some(op)) => {
                return Err(ConfigError::invalid(
                    name,
                    format!("operator '{op}' needs several file patterns"),
                ))
            }
            (FilePatterns::Multiple(_), _, None) => {
                return Err(ConfigError::invalid(name, "several file patterns need an operator"))
            }
            (FilePatterns::Multiple(patterns), raw, Some(_)) => {
                let nraw = raw.names().len();
                if patterns.len() < 2 {
                    return Err(ConfigError::invalid(name, "'files' must list at least two patterns"));
                }
                if nraw != patterns.len() {
                    return Err(ConfigError::invalid(
                        name,
                        format!(
                            "{} file patterns were given, but {nraw} raw variables; these must match",
                            patterns.len()
                        ),
                    ));
                }
            }
        }

        Ok(VariableSpec {
            name: name.to_string(),
            short_name: self.short_name.unwrap_or_else(|| name.to_string()),
            mip: self.mip,
            raw: self.raw,
            files,
            operator: self.operator,
            select: self.select,
            climatology: self.climatology,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    attributes: DatasetAttributes,
    #[serde(default)]
    variables: IndexMap<String, VariableEntry>,
}

fn with_env_overrides(base: Figment, env_prefix: &str) -> Figment {
    let env = Env::prefixed(env_prefix)
        .map(|key| format!("attributes.{}", key.as_str().to_ascii_lowercase()).into());
    base.merge(env)
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub attributes: DatasetAttributes,
    /// Variables in the order they were configured
    pub variables: Vec<VariableSpec>,
}

impl DatasetConfig {
    /// Load the configuration from `config_file`, or the built-in ERA-Interim configuration
    /// if none is given, applying attribute overrides from the environment.
    pub fn load(config_file: Option<&Path>) -> error_stack::Result<Self, ConfigError> {
        Self::from_figment(Self::figment(config_file, ENV_PREFIX)?)
    }

    pub fn figment(config_file: Option<&Path>, env_prefix: &str) -> error_stack::Result<Figment, ConfigError> {
        let base = match config_file {
            Some(p) if !p.exists() => return Err(ConfigError::MissingFile(p.to_path_buf()).into()),
            Some(p) => Figment::from(Toml::file(p)),
            None => Figment::from(Toml::string(BuiltinDataset::default().toml())),
        };
        Ok(with_env_overrides(base, env_prefix))
    }

    /// Load one of the built-in dataset configurations, applying attribute overrides
    /// from the environment.
    pub fn builtin(dataset: BuiltinDataset) -> error_stack::Result<Self, ConfigError> {
        let base = Figment::from(Toml::string(dataset.toml()));
        Self::from_figment(with_env_overrides(base, ENV_PREFIX))
    }

    pub fn from_figment(figment: Figment) -> error_stack::Result<Self, ConfigError> {
        let file: ConfigFile = figment.extract().change_context(ConfigError::Load)?;
        Self::from_config_file(file)
    }

    pub fn from_toml_str(s: &str) -> error_stack::Result<Self, ConfigError> {
        Self::from_figment(Figment::from(Toml::string(s)))
    }

    fn from_config_file(file: ConfigFile) -> error_stack::Result<Self, ConfigError> {
        let variables: Vec<VariableSpec> = file
            .variables
            .into_iter()
            .map(|(name, entry)| entry.into_spec(&name))
            .try_collect()?;
        Ok(Self {
            attributes: file.attributes,
            variables,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Render the configuration as tables, for `--check-config-only`.
    pub fn summary(&self) -> String {
        let mut attr_builder = tabled::builder::Builder::new();
        attr_builder.push_record(["attribute", "value"]);
        for (k, v) in self.attributes.for_mip("<per variable>") {
            attr_builder.push_record([k, v]);
        }

        let mut var_builder = tabled::builder::Builder::new();
        var_builder.push_record(["name", "short_name", "mip", "raw", "files", "operator", "steps"]);
        for var in self.variables.iter() {
            var_builder.push_record([
                var.name.clone(),
                var.short_name.clone(),
                var.mip.clone(),
                var.raw.names().join(", "),
                var.files.patterns().join(" "),
                var.operator.map(|op| op.to_string()).unwrap_or_default(),
                var.steps(),
            ]);
        }

        let mut attr_table = attr_builder.build();
        attr_table
            .with(tabled::settings::style::Style::blank())
            .with(tabled::settings::Alignment::left());
        let mut var_table = var_builder.build();
        var_table
            .with(tabled::settings::style::Style::blank())
            .with(tabled::settings::Alignment::left());
        format!("{attr_table}\n\n{var_table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ATTRS: &str = r#"
    [attributes]
    dataset_id = "ERA-Interim"
    version = "1"
    tier = 3
    modeling_realm = "reanaly"
    project_id = "OBS6"
    source = "www.ecmwf.int"
    reference = "era-interim"
    comment = "Contains modified Copernicus Climate Change Service Information {year}"
    "#;

    #[test]
    fn test_builtin_config() {
        let cfg = DatasetConfig::from_toml_str(ERA_INTERIM_TOML).expect("built-in config should load");
        assert_eq!(cfg.attributes.dataset_id, "ERA-Interim");
        assert_eq!(cfg.attributes.tier, 3);
        // file order is kept
        assert_eq!(cfg.variables[0].name, "clt_day");
        assert_eq!(cfg.variables[0].short_name, "clt");

        let hfds = cfg.variable("hfds").unwrap();
        assert_eq!(hfds.short_name, "hfds");
        assert_eq!(hfds.operator, Some(CombineOperator::Sum));
        assert_eq!(hfds.raw.names(), ["ssr", "str", "slhf", "sshf"]);
        assert_eq!(hfds.files.patterns().len(), 4);
    }

    #[test]
    fn test_duveiller_config() {
        let cfg = DatasetConfig::builtin(BuiltinDataset::Duveiller2018).unwrap();
        assert_eq!(cfg.attributes.dataset_id, "Duveiller2018");
        let alb = cfg.variable("albDiffiTr13").unwrap();
        assert_eq!(alb.raw.names(), ["Delta_albedo"]);
        let select = alb.select.as_ref().unwrap();
        assert_eq!(select.coord, "Vegetation transition code");
        assert_eq!(select.value, 2.0);
        assert_eq!(
            alb.climatology,
            Some(MonthlyClimatology {
                coord: "Month".to_string(),
                year: 2010
            })
        );
        assert!(cfg.summary().contains("2010 climatology from 'Month'"));

        let era = DatasetConfig::builtin("era-interim".parse().unwrap()).unwrap();
        assert!(era.variables.iter().all(|v| v.select.is_none() && v.climatology.is_none()));
    }

    #[test]
    fn test_climatology_default_coord() {
        let toml_str = format!(
            "{ATTRS}\n[variables.tas]\nmip = \"Amon\"\nraw = \"t2m\"\nfile = \"a.nc\"\nclimatology = {{ year = 2000 }}\n"
        );
        let cfg = DatasetConfig::from_toml_str(&toml_str).unwrap();
        let clim = cfg.variables[0].climatology.as_ref().unwrap();
        assert_eq!(clim.coord, "time");
        assert_eq!(clim.year, 2000);
    }

    #[test]
    fn test_comment_year_and_extras() {
        let toml_str = format!("{ATTRS}\nuser = \"someone\"\n");
        let mut cfg = DatasetConfig::from_toml_str(&toml_str).unwrap();
        assert!(cfg.variables.is_empty());
        cfg.attributes.resolve_comment_year(2024);
        assert_eq!(
            cfg.attributes.comment,
            "Contains modified Copernicus Climate Change Service Information 2024"
        );

        let attrs = cfg.attributes.for_mip("Amon");
        assert_eq!(attrs["user"], "someone");
        assert_eq!(attrs["mip"], "Amon");
        assert_eq!(attrs["tier"], "3");
    }

    #[test]
    fn test_missing_attribute() {
        let toml_str = ATTRS.replace("project_id = \"OBS6\"", "");
        let err = DatasetConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Load));
    }

    #[rstest]
    #[case::both_file_kinds(r#"raw = "t2m"
        file = "a_*.nc"
        files = ["b_*.nc", "c_*.nc"]
        operator = "sum""#)]
    #[case::no_files(r#"raw = "t2m""#)]
    #[case::sum_count_mismatch(r#"raw = ["ssr", "str"]
        files = ["a_*.nc", "b_*.nc", "c_*.nc"]
        operator = "sum""#)]
    #[case::single_pattern_many_raw(r#"raw = ["ssr", "str"]
        file = "a_*.nc""#)]
    #[case::no_operator(r#"raw = ["ssr", "str"]
        files = ["a_*.nc", "b_*.nc"]"#)]
    #[case::operator_single_file(r#"raw = "ssr"
        file = "a_*.nc"
        operator = "sum""#)]
    #[case::one_pattern_sum(r#"raw = ["ssr"]
        files = ["a_*.nc"]
        operator = "sum""#)]
    fn test_invalid_variables(#[case] body: &str) {
        let toml_str = format!("{ATTRS}\n[variables.hfds]\nmip = \"Omon\"\n{body}\n");
        let err = DatasetConfig::from_toml_str(&toml_str).unwrap_err();
        assert!(
            matches!(err.current_context(), ConfigError::InvalidVariable { .. }),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.toml");
        std::fs::write(&path, ATTRS).unwrap();

        // unique prefix so that this test cannot interfere with others
        let prefix = "CMORIZE_TEST_ENV_OVERRIDE_";
        std::env::set_var(format!("{prefix}COMMENT"), "overridden");
        let figment = DatasetConfig::figment(Some(&path), prefix).unwrap();
        let cfg = DatasetConfig::from_figment(figment).unwrap();
        std::env::remove_var(format!("{prefix}COMMENT"));
        assert_eq!(cfg.attributes.comment, "overridden");
        assert_eq!(cfg.attributes.dataset_id, "ERA-Interim");
    }

    #[test]
    fn test_missing_file() {
        let err = DatasetConfig::load(Some(Path::new("/does/not/exist.toml"))).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::MissingFile(_)));
    }
}
