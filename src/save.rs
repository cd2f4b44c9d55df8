//! Writing standardized cubes: file naming, global attributes and the netCDF layout.
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::ArrayD;
use netcdf::Extents;

use crate::cube::{AttrValue, Axis, Coord, Cube};
use crate::nc_utils::attr_from_cube;
use crate::time::TimeUnits;

/// Fill value of the output data variables.
pub const FILL_VALUE: f32 = 1e20;

/// Attributes written on the data variable rather than the file.
pub const LOCAL_KEYS: &[&str] = &["positive"];

const BOUNDS_DIM: &str = "bnds";

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("Required attribute '{0}' is missing")]
    MissingAttribute(String),
    #[error("Could not work out the time range of the output from its time coordinate")]
    TimeRange,
    #[error("Could not create output file {}", .0.display())]
    Create(PathBuf),
    #[error("Error writing '{0}' to the output file")]
    Write(String),
}

impl SaveError {
    fn write<S: ToString>(what: S) -> Self {
        Self::Write(what.to_string())
    }
}

fn required<'a>(attributes: &'a IndexMap<String, String>, key: &str) -> Result<&'a str, SaveError> {
    attributes
        .get(key)
        .map(|s| s.as_str())
        .ok_or_else(|| SaveError::MissingAttribute(key.to_string()))
}

/// Replace all attributes of `cube` with the global attributes of a standardized file.
///
/// `attributes` are the dataset attributes for this output (see
/// [`crate::config::DatasetAttributes::for_mip`]). The dataset ID goes into the
/// title; the rest are copied, after the provenance attributes.
pub fn stamp_global_attributes(cube: &mut Cube, attributes: &IndexMap<String, String>) -> Result<(), SaveError> {
    let dataset_id = required(attributes, "dataset_id")?;
    let mut stamped: IndexMap<String, AttrValue> = IndexMap::new();
    stamped.insert(
        "title".to_string(),
        format!(
            "{dataset_id} data reformatted by cmorize-rs v{}",
            env!("CARGO_PKG_VERSION")
        )
        .into(),
    );
    for key in ["version", "tier", "source", "reference", "comment"] {
        stamped.insert(key.to_string(), required(attributes, key)?.into());
    }
    stamped.insert("user".to_string(), env_or_unknown(&["USER", "USERNAME"]).into());
    stamped.insert("host".to_string(), env_or_unknown(&["HOSTNAME", "HOST"]).into());
    stamped.insert(
        "history".to_string(),
        format!("Created on {}", Utc::now().format("%Y-%m-%d %H:%M:%S")).into(),
    );
    stamped.insert("project_id".to_string(), required(attributes, "project_id")?.into());

    for (k, v) in attributes.iter() {
        if k != "dataset_id" && !stamped.contains_key(k) {
            stamped.insert(k.clone(), v.as_str().into());
        }
    }
    cube.attributes = stamped;
    Ok(())
}

fn env_or_unknown(names: &[&str]) -> String {
    names
        .iter()
        .find_map(|n| std::env::var(n).ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// The standard output file name:
/// `<project>_<dataset>_<realm>_<version>_<mip>_<short_name>[_<YYYYMM>-<YYYYMM>].nc`.
///
/// The time range comes from the time dimension. A single time step covers its whole
/// year; cubes without a time dimension (fixed fields) get no time range.
pub fn output_file_name(
    cube: &Cube,
    short_name: &str,
    attributes: &IndexMap<String, String>,
) -> Result<String, SaveError> {
    let mut parts = vec![
        required(attributes, "project_id")?.to_string(),
        required(attributes, "dataset_id")?.to_string(),
        required(attributes, "modeling_realm")?.to_string(),
        required(attributes, "version")?.to_string(),
        required(attributes, "mip")?.to_string(),
        short_name.to_string(),
    ];

    if let Some(tdim) = cube.dim_of_axis(Axis::T) {
        parts.push(time_range(&cube.dim_coords()[tdim])?);
    }

    Ok(format!("{}.nc", parts.join("_").replace(' ', "_")))
}

fn time_range(time: &Coord) -> Result<String, SaveError> {
    let units = TimeUnits::parse(&time.units).map_err(|_| SaveError::TimeRange)?;
    let first = time.points.first().ok_or(SaveError::TimeRange)?;
    let last = time.points.last().ok_or(SaveError::TimeRange)?;
    let first = units.to_datetime(*first).map_err(|_| SaveError::TimeRange)?;
    let last = units.to_datetime(*last).map_err(|_| SaveError::TimeRange)?;
    if time.len() == 1 {
        Ok(format!("{0}01-{0}12", first.year()))
    } else {
        Ok(format!(
            "{}{:02}-{}{:02}",
            first.year(),
            first.month(),
            last.year(),
            last.month()
        ))
    }
}

/// Save `cube` into `out_dir` under its standard name and return the path written.
///
/// Data are written as 32-bit floats with missing values set to [`FILL_VALUE`];
/// coordinates as 64-bit floats with `<name>_bnds` bounds.
pub fn save_variable(
    cube: &Cube,
    short_name: &str,
    out_dir: &Path,
    attributes: &IndexMap<String, String>,
    local_keys: &[&str],
) -> error_stack::Result<PathBuf, SaveError> {
    let out_path = out_dir.join(output_file_name(cube, short_name, attributes)?);
    write_cube(cube, &out_path, local_keys)?;
    Ok(out_path)
}

/// Write `cube` to `out_path` in the standardized layout.
///
/// Cube attributes listed in `local_keys` go on the data variable, all others
/// become global attributes.
pub fn write_cube(cube: &Cube, out_path: &Path, local_keys: &[&str]) -> error_stack::Result<(), SaveError> {
    let mut nc = netcdf::create(out_path).change_context_lazy(|| SaveError::Create(out_path.to_path_buf()))?;

    for (key, value) in cube.attributes.iter() {
        if !local_keys.contains(&key.as_str()) {
            nc.add_attribute(key, attr_from_cube(value))
                .change_context_lazy(|| SaveError::write(key))?;
        }
    }
    nc.add_attribute("Conventions", "CF/CMOR")
        .change_context_lazy(|| SaveError::write("Conventions"))?;

    if cube.dim_coords().iter().any(|c| c.bounds.is_some()) {
        nc.add_dimension(BOUNDS_DIM, 2)
            .change_context_lazy(|| SaveError::write(BOUNDS_DIM))?;
    }
    for coord in cube.dim_coords() {
        nc.add_dimension(&coord.var_name, coord.len())
            .change_context_lazy(|| SaveError::write(&coord.var_name))?;
        write_coord(&mut nc, coord, Some(&coord.var_name))?;
    }
    for coord in cube.scalar_coords() {
        write_coord(&mut nc, coord, None)?;
    }

    let dims: Vec<&str> = cube.dim_coords().iter().map(|c| c.var_name.as_str()).collect();
    let mut var = nc
        .add_variable::<f32>(&cube.var_name, &dims)
        .change_context_lazy(|| SaveError::write(&cube.var_name))?;
    var.set_fill_value(FILL_VALUE)
        .change_context_lazy(|| SaveError::write("_FillValue"))?;
    if let Some(name) = &cube.standard_name {
        var.put_attribute("standard_name", name.as_str())
            .change_context_lazy(|| SaveError::write("standard_name"))?;
    }
    if let Some(name) = &cube.long_name {
        var.put_attribute("long_name", name.as_str())
            .change_context_lazy(|| SaveError::write("long_name"))?;
    }
    if let Some(units) = &cube.units {
        var.put_attribute("units", units.to_string())
            .change_context_lazy(|| SaveError::write("units"))?;
    }
    for key in local_keys {
        if let Some(value) = cube.attributes.get(*key) {
            var.put_attribute(key, attr_from_cube(value))
                .change_context_lazy(|| SaveError::write(key))?;
        }
    }
    if !cube.scalar_coords().is_empty() {
        let names: Vec<&str> = cube.scalar_coords().iter().map(|c| c.var_name.as_str()).collect();
        var.put_attribute("coordinates", names.join(" "))
            .change_context_lazy(|| SaveError::write("coordinates"))?;
    }

    let data: ArrayD<f32> = cube
        .data
        .mapv(|v| if v.is_finite() { v as f32 } else { FILL_VALUE });
    var.put(data.view(), Extents::All)
        .change_context_lazy(|| SaveError::write(&cube.var_name))?;

    log::debug!("Wrote {}", out_path.display());
    Ok(())
}

/// Write a coordinate variable, along dimension `dim`, or as a scalar variable if `dim` is `None`.
fn write_coord(nc: &mut netcdf::FileMut, coord: &Coord, dim: Option<&str>) -> error_stack::Result<(), SaveError> {
    let name = coord.var_name.as_str();
    let dims: Vec<&str> = dim.into_iter().collect();
    let bounds_name = format!("{name}_bnds");

    {
        let mut var = nc
            .add_variable::<f64>(name, &dims)
            .change_context_lazy(|| SaveError::write(name))?;
        if let Some(axis) = coord.guess_axis() {
            var.put_attribute("axis", axis.to_string())
                .change_context_lazy(|| SaveError::write(name))?;
        }
        if let Some(standard_name) = &coord.standard_name {
            var.put_attribute("standard_name", standard_name.as_str())
                .change_context_lazy(|| SaveError::write(name))?;
        }
        if let Some(long_name) = &coord.long_name {
            var.put_attribute("long_name", long_name.as_str())
                .change_context_lazy(|| SaveError::write(name))?;
        }
        var.put_attribute("units", coord.units.as_str())
            .change_context_lazy(|| SaveError::write(name))?;
        for (key, value) in coord.attributes.iter() {
            if key == "axis" || key == "bounds" {
                continue;
            }
            var.put_attribute(key, attr_from_cube(value))
                .change_context_lazy(|| SaveError::write(name))?;
        }
        if dim.is_some() && coord.bounds.is_some() {
            var.put_attribute("bounds", bounds_name.as_str())
                .change_context_lazy(|| SaveError::write(name))?;
        }

        if dim.is_some() {
            var.put(coord.points.view(), Extents::All)
                .change_context_lazy(|| SaveError::write(name))?;
        } else {
            var.put_value(coord.points[0], Extents::All)
                .change_context_lazy(|| SaveError::write(name))?;
        }
    }

    if let (Some(dim), Some(bounds)) = (dim, &coord.bounds) {
        let mut bvar = nc
            .add_variable::<f64>(&bounds_name, &[dim, BOUNDS_DIM])
            .change_context_lazy(|| SaveError::write(&bounds_name))?;
        bvar.put(bounds.view(), Extents::All)
            .change_context_lazy(|| SaveError::write(&bounds_name))?;
    }
    Ok(())
}
