//! Turn one group of raw files into one standardized output file.
//!
//! [`cmorize_group`] runs the steps in order: look up the target definition,
//! load and combine the raw variables, stamp the dataset attributes, apply the
//! raw-variable rules, normalize the coordinates, resample sub-daily data for
//! daily tables, convert to the target units and save.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::cmor_table::{Frequency, VariableTable};
use crate::config::{CombineOperator, DatasetAttributes, VariableSpec};
use crate::cube::{Axis, Cube};
use crate::nc_utils::load_cube;
use crate::resolver::FileGroup;
use crate::save::{save_variable, stamp_global_attributes, LOCAL_KEYS};
use crate::units::Unit;

pub mod climatology;
pub mod coords;
pub mod frequency;
pub mod rules;
pub mod select;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("No definition for variable '{short_name}' in table '{mip}'")]
    Definition { mip: String, short_name: String },
    #[error("Could not load variable '{var}' from {}", .path.display())]
    Load { var: String, path: PathBuf },
    #[error("Group {0} does not have one file per raw variable")]
    GroupSize(String),
    #[error("Could not combine the raw variables into '{0}'")]
    Combine(String),
    #[error("Could not apply the correction for raw variable '{0}'")]
    Rule(String),
    #[error("Could not set the global attributes")]
    Attributes,
    #[error("Could not normalize the {0} coordinate")]
    Coordinate(Axis),
    #[error("Cube has no {0} coordinate, but the target variable needs one")]
    MissingAxis(Axis),
    #[error("Could not select a single point of '{0}'")]
    Select(String),
    #[error("Could not build a climatology time axis from '{0}'")]
    Climatology(String),
    #[error("Could not resample to daily values")]
    Resample,
    #[error("Could not convert the data to '{0}'")]
    Units(String),
    #[error("Could not save the standardized variable")]
    Save,
}

/// What every transform of a run shares.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub attributes: &'a DatasetAttributes,
    pub table: &'a VariableTable,
    pub out_dir: &'a Path,
}

/// Load the raw variables of `group` and combine them into one cube.
///
/// The result keeps the raw name of a single variable (so that the raw rules
/// can find it) and is renamed to the short name when several are summed.
pub fn load_and_combine(spec: &VariableSpec, group: &FileGroup) -> error_stack::Result<Cube, TransformError> {
    let raw_names = spec.raw.names();
    if raw_names.len() != group.paths.len() {
        return Err(TransformError::GroupSize(group.key.clone()).into());
    }

    let mut cubes = raw_names.iter().zip(group.paths.iter()).map(|(var, path)| {
        log::debug!("Loading '{var}' from {}", path.display());
        load_cube(path, var).change_context_lazy(|| TransformError::Load {
            var: var.to_string(),
            path: path.clone(),
        })
    });

    let mut cube = cubes
        .next()
        .ok_or_else(|| TransformError::GroupSize(group.key.clone()))??;

    match spec.operator {
        None => {}
        Some(CombineOperator::Sum) => {
            for other in cubes {
                let other = other?;
                let combine_err = || TransformError::Combine(spec.short_name.clone());
                cube.check_same_units(&other).change_context_lazy(combine_err)?;
                cube.add(&other).change_context_lazy(combine_err)?;
            }
            cube.var_name = spec.short_name.clone();
        }
    }
    Ok(cube)
}

/// Standardize one file group of `spec` and write it to the output directory.
pub fn cmorize_group(
    spec: &VariableSpec,
    group: &FileGroup,
    ctx: &TransformContext,
) -> error_stack::Result<PathBuf, TransformError> {
    log::info!("CMORizing variable '{}' from input files {group}", spec.short_name);
    let attributes = ctx.attributes.for_mip(&spec.mip);
    let definition = ctx
        .table
        .get_variable(&spec.mip, &spec.short_name)
        .change_context_lazy(|| TransformError::Definition {
            mip: spec.mip.clone(),
            short_name: spec.short_name.clone(),
        })?;

    let mut cube = load_and_combine(spec, group)?;
    // stamping replaces all attributes, so it comes before the rules that add `positive`
    stamp_global_attributes(&mut cube, &attributes).change_context(TransformError::Attributes)?;
    if let Some(selection) = &spec.select {
        select::select_point(&mut cube, selection)?;
    }
    rules::apply_raw_rule(&mut cube, &definition)?;
    if let Some(positive) = &definition.positive {
        cube.attributes
            .entry("positive".to_string())
            .or_insert_with(|| positive.as_str().into());
    }

    cube.var_name = definition.short_name.clone();
    cube.standard_name = definition.standard_name().map(|s| s.to_string());
    cube.long_name = Some(definition.long_name.clone());
    cube.round_to_f32();

    if let Some(climatology) = &spec.climatology {
        climatology::set_monthly_climatology(&mut cube, climatology)?;
    }
    coords::fix_coordinates(&mut cube, &definition)?;
    if definition.frequency == Frequency::Day {
        frequency::resample_daily(&mut cube, &definition.short_name)?;
    }

    let target =
        Unit::parse(&definition.units).change_context_lazy(|| TransformError::Units(definition.units.clone()))?;
    cube.convert_units(&target)
        .change_context_lazy(|| TransformError::Units(definition.units.clone()))?;

    log::debug!("Saving cube\n{cube}");
    log::info!("Expected output size is {:.1}GB", cube.output_size_gb());
    save_variable(&cube, &definition.short_name, ctx.out_dir, &attributes, LOCAL_KEYS)
        .change_context(TransformError::Save)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetConfig, FilePatterns, RawSource};
    use crate::nc_utils::get_string_attr;
    use crate::test_utils::{write_raw_file, RawFileSpec};
    use approx::assert_abs_diff_eq;

    fn context_parts() -> (DatasetAttributes, VariableTable) {
        let mut config = DatasetConfig::load(None).unwrap();
        config.attributes.resolve_comment_year(2024);
        (config.attributes, VariableTable::builtin().unwrap())
    }

    fn single(path: PathBuf) -> FileGroup {
        FileGroup {
            key: path.display().to_string(),
            paths: vec![path],
        }
    }

    #[test]
    fn test_monthly_temperature() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let path = in_dir.path().join("ERA-Interim_t2m_monthly_2000.nc");
        let raw = RawFileSpec::new("t2m", "K").with_packing(0.01, 270.0).monthly(2000, 12);
        write_raw_file(&path, &raw).unwrap();

        let (attributes, table) = context_parts();
        let ctx = TransformContext {
            attributes: &attributes,
            table: &table,
            out_dir: out_dir.path(),
        };
        let config = DatasetConfig::load(None).unwrap();
        let spec = config.variable("tas").unwrap();
        let out = cmorize_group(spec, &single(path), &ctx).unwrap();
        assert!(out.ends_with("OBS6_ERA-Interim_reanaly_1_Amon_tas_200001-200012.nc"));

        let ds = netcdf::open(&out).unwrap();
        let var = ds.variable("tas").unwrap();
        assert_eq!(get_string_attr(&var, "standard_name").as_deref(), Some("air_temperature"));
        let lat: Vec<f64> = ds.variable("lat").unwrap().get_values(netcdf::Extents::All).unwrap();
        assert!(lat.windows(2).all(|w| w[0] < w[1]));
        assert!(ds.variable("height").is_some());
        assert!(ds.attribute("comment").is_some());
    }

    #[test]
    fn test_sum_combines_fluxes() {
        let in_dir = tempfile::tempdir().unwrap();
        let raw_names = ["ssr", "str"];
        let mut paths = vec![];
        for raw in raw_names {
            let path = in_dir.path().join(format!("ERA-Interim_{raw}_monthly_2000.nc"));
            write_raw_file(&path, &RawFileSpec::new(raw, "J m**-2").monthly(2000, 2)).unwrap();
            paths.push(path);
        }
        let spec = VariableSpec {
            name: "hfds".to_string(),
            short_name: "hfds".to_string(),
            mip: "Omon".to_string(),
            raw: RawSource::Multiple(raw_names.iter().map(|s| s.to_string()).collect()),
            files: FilePatterns::Multiple(vec![]),
            operator: Some(CombineOperator::Sum),
            select: None,
            climatology: None,
        };
        let group = FileGroup {
            key: "2000".to_string(),
            paths: paths.clone(),
        };
        let cube = load_and_combine(&spec, &group).unwrap();
        let single = load_cube(&paths[0], "ssr").unwrap();
        assert_eq!(cube.var_name, "hfds");
        assert_abs_diff_eq!(cube.data[[1, 1, 1]], 2.0 * single.data[[1, 1, 1]], epsilon = 1e-6);

        let short = FileGroup {
            key: "2000".to_string(),
            paths: paths[..1].to_vec(),
        };
        let err = load_and_combine(&spec, &short).unwrap_err();
        assert!(matches!(err.current_context(), TransformError::GroupSize(_)));
    }

    #[test]
    fn test_sum_rejects_mixed_units() {
        let in_dir = tempfile::tempdir().unwrap();
        let ssr = in_dir.path().join("ERA-Interim_ssr_monthly_2000.nc");
        let str_ = in_dir.path().join("ERA-Interim_str_monthly_2000.nc");
        write_raw_file(&ssr, &RawFileSpec::new("ssr", "J m**-2").monthly(2000, 2)).unwrap();
        write_raw_file(&str_, &RawFileSpec::new("str", "W m**-2").monthly(2000, 2)).unwrap();
        let spec = VariableSpec {
            name: "hfds".to_string(),
            short_name: "hfds".to_string(),
            mip: "Omon".to_string(),
            raw: RawSource::Multiple(vec!["ssr".to_string(), "str".to_string()]),
            files: FilePatterns::Multiple(vec![]),
            operator: Some(CombineOperator::Sum),
            select: None,
            climatology: None,
        };
        let group = FileGroup {
            key: "2000".to_string(),
            paths: vec![ssr, str_],
        };
        let err = load_and_combine(&spec, &group).unwrap_err();
        assert!(matches!(err.current_context(), TransformError::Combine(name) if name == "hfds"));
    }

    #[test]
    fn test_unknown_definition() {
        let out_dir = tempfile::tempdir().unwrap();
        let (attributes, table) = context_parts();
        let ctx = TransformContext {
            attributes: &attributes,
            table: &table,
            out_dir: out_dir.path(),
        };
        let spec = VariableSpec {
            name: "nope".to_string(),
            short_name: "nope".to_string(),
            mip: "Amon".to_string(),
            raw: RawSource::Single("x".to_string()),
            files: FilePatterns::Single("*.nc".to_string()),
            operator: None,
            select: None,
            climatology: None,
        };
        let err = cmorize_group(&spec, &single(PathBuf::from("missing.nc")), &ctx).unwrap_err();
        assert!(matches!(err.current_context(), TransformError::Definition { .. }));
    }
}
