//! Helpers for reading raw netCDF variables into [`Cube`]s.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};
use netcdf::{AttributeValue, Extents};

use crate::cube::{AttrValue, Coord, Cube};
use crate::time::TimeUnits;
use crate::units::Unit;

/// Attributes that describe how values are stored on disk, and so must not be
/// carried into the cube (its values are already unpacked and masked).
const STORAGE_ATTRIBUTES: &[&str] = &[
    "_FillValue",
    "missing_value",
    "scale_factor",
    "add_offset",
    "units",
    "standard_name",
    "long_name",
    "bounds",
];

#[derive(Debug, thiserror::Error)]
pub enum NcError {
    #[error("Could not open netCDF file {}", .0.display())]
    Open(PathBuf),
    #[error("Variable '{var}' not found in {}", .path.display())]
    MissingVariable { var: String, path: PathBuf },
    #[error("Error reading variable '{0}'")]
    Read(String),
    #[error("Error writing '{0}'")]
    Write(String),
    #[error("Coordinate variable '{0}' is not one-dimensional")]
    CoordNotOneDim(String),
    #[error("Could not assemble a cube from variable '{0}'")]
    Cube(String),
}

impl NcError {
    pub fn read<S: ToString>(name: S) -> Self {
        Self::Read(name.to_string())
    }

    pub fn write<S: ToString>(name: S) -> Self {
        Self::Write(name.to_string())
    }
}

/// Interpret a numeric attribute value as a single `f64`, taking the first
/// element of array values. Returns `None` for strings.
pub fn attr_as_f64(value: &AttributeValue) -> Option<f64> {
    let v = match value {
        AttributeValue::Uchar(v) => *v as f64,
        AttributeValue::Schar(v) => *v as f64,
        AttributeValue::Ushort(v) => *v as f64,
        AttributeValue::Short(v) => *v as f64,
        AttributeValue::Uint(v) => *v as f64,
        AttributeValue::Int(v) => *v as f64,
        AttributeValue::Ulonglong(v) => *v as f64,
        AttributeValue::Longlong(v) => *v as f64,
        AttributeValue::Float(v) => *v as f64,
        AttributeValue::Double(v) => *v,
        AttributeValue::Shorts(v) => *v.first()? as f64,
        AttributeValue::Ints(v) => *v.first()? as f64,
        AttributeValue::Floats(v) => *v.first()? as f64,
        AttributeValue::Doubles(v) => *v.first()?,
        _ => return None,
    };
    Some(v)
}

/// Convert a netCDF attribute value into the simpler set of values cubes carry.
/// Returns `None` for types with no reasonable equivalent.
pub fn attr_to_cube(value: AttributeValue) -> Option<AttrValue> {
    let v = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Strs(s) => AttrValue::Str(s.join(" ")),
        AttributeValue::Uchar(v) => AttrValue::Int(v as i64),
        AttributeValue::Schar(v) => AttrValue::Int(v as i64),
        AttributeValue::Ushort(v) => AttrValue::Int(v as i64),
        AttributeValue::Short(v) => AttrValue::Int(v as i64),
        AttributeValue::Uint(v) => AttrValue::Int(v as i64),
        AttributeValue::Int(v) => AttrValue::Int(v as i64),
        AttributeValue::Longlong(v) => AttrValue::Int(v),
        AttributeValue::Float(v) => AttrValue::Double(v as f64),
        AttributeValue::Double(v) => AttrValue::Double(v),
        AttributeValue::Floats(v) => AttrValue::Doubles(v.into_iter().map(|x| x as f64).collect()),
        AttributeValue::Doubles(v) => AttrValue::Doubles(v),
        _ => return None,
    };
    Some(v)
}

/// Convert a cube attribute value into a netCDF attribute value for writing.
pub fn attr_from_cube(value: &AttrValue) -> AttributeValue {
    match value {
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Int(i) => match i32::try_from(*i) {
            Ok(i) => AttributeValue::Int(i),
            Err(_) => AttributeValue::Longlong(*i),
        },
        AttrValue::Double(v) => AttributeValue::Double(*v),
        AttrValue::Doubles(v) => AttributeValue::Doubles(v.clone()),
    }
}

pub fn get_string_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(s) => Some(s.join(" ")),
        _ => None,
    }
}

pub fn get_numeric_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    let value = var.attribute_value(name)?.ok()?;
    attr_as_f64(&value)
}

/// Read a variable's values as `f64`, replacing fill and missing values with NaN
/// and applying `scale_factor`/`add_offset` packing.
pub fn read_unpacked(var: &netcdf::Variable) -> error_stack::Result<ArrayD<f64>, NcError> {
    let varname = var.name();
    let mut data = var
        .get::<f64, _>(Extents::All)
        .change_context_lazy(|| NcError::read(&varname))?;

    let fill = get_numeric_attr(var, "_FillValue");
    let missing = get_numeric_attr(var, "missing_value");
    let scale = get_numeric_attr(var, "scale_factor").unwrap_or(1.0);
    let offset = get_numeric_attr(var, "add_offset").unwrap_or(0.0);

    data.mapv_inplace(|v| {
        if Some(v) == fill || Some(v) == missing || !v.is_finite() {
            f64::NAN
        } else {
            v * scale + offset
        }
    });
    Ok(data)
}

fn copy_attributes<'a, I: Iterator<Item = netcdf::Attribute<'a>>>(
    attrs: I,
    target: &mut IndexMap<String, AttrValue>,
    owner: &str,
) -> error_stack::Result<(), NcError> {
    for attr in attrs {
        if STORAGE_ATTRIBUTES.iter().any(|&a| a == attr.name()) {
            continue;
        }
        let value = attr
            .value()
            .change_context_lazy(|| NcError::read(format!("{owner}:{}", attr.name())))?;
        if let Some(value) = attr_to_cube(value) {
            target.insert(attr.name().to_string(), value);
        }
    }
    Ok(())
}

fn read_coord(ds: &netcdf::File, var: &netcdf::Variable) -> error_stack::Result<Coord, NcError> {
    let name = var.name();
    let points = read_unpacked(var)?
        .into_dimensionality::<Ix1>()
        .change_context_lazy(|| NcError::CoordNotOneDim(name.clone()))?;
    let units = get_string_attr(var, "units").unwrap_or_else(|| "1".to_string());

    let mut coord = Coord::new(&name, points, units);
    coord.standard_name = get_string_attr(var, "standard_name");
    coord.long_name = get_string_attr(var, "long_name");

    copy_attributes(var.attributes(), &mut coord.attributes, &name)?;

    if let Some(AttrValue::Str(cal)) = coord.attributes.get("calendar") {
        TimeUnits::check_calendar(cal).change_context_lazy(|| NcError::read(&name))?;
    }

    if let Some(bounds_name) = get_string_attr(var, "bounds") {
        if let Some(bvar) = ds.variable(&bounds_name) {
            let bounds: Array2<f64> = read_unpacked(&bvar)?
                .into_dimensionality::<Ix2>()
                .change_context_lazy(|| NcError::read(&bounds_name))?;
            coord.bounds = Some(bounds);
        }
    }

    Ok(coord)
}

/// Load one variable from a netCDF file as a cube.
///
/// Dimensions with a coordinate variable of the same name get that as their
/// coordinate; other dimensions get an index coordinate. Units that cannot be
/// parsed (e.g. "(0 - 1)") leave the cube's units unknown rather than failing,
/// so that a later step can set them explicitly.
pub fn load_cube(path: &Path, var_name: &str) -> error_stack::Result<Cube, NcError> {
    let ds = netcdf::open(path).change_context_lazy(|| NcError::Open(path.to_path_buf()))?;
    let var = ds
        .variable(var_name)
        .ok_or_else(|| NcError::MissingVariable {
            var: var_name.to_string(),
            path: path.to_path_buf(),
        })?;

    let data = read_unpacked(&var)?;
    let mut coords = vec![];
    for dim in var.dimensions() {
        let dimname = dim.name();
        let coord = match ds.variable(&dimname) {
            Some(cvar) => read_coord(&ds, &cvar)?,
            None => Coord::new(
                &dimname,
                Array1::range(0.0, dim.len() as f64, 1.0),
                "1",
            ),
        };
        coords.push(coord);
    }

    let mut cube =
        Cube::new(var_name, data, coords).change_context_lazy(|| NcError::Cube(var_name.to_string()))?;
    cube.standard_name = get_string_attr(&var, "standard_name");
    cube.long_name = get_string_attr(&var, "long_name");
    cube.units = match get_string_attr(&var, "units") {
        Some(u) => match Unit::parse(&u) {
            Ok(unit) => Some(unit),
            Err(e) => {
                log::debug!("Ignoring netCDF variable '{var_name}' invalid units '{u}': {e}");
                None
            }
        },
        None => None,
    };

    // Global attributes first so that variable attributes of the same name win.
    copy_attributes(ds.attributes(), &mut cube.attributes, var_name)?;
    copy_attributes(var.attributes(), &mut cube.attributes, var_name)?;

    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{write_raw_file, RawFileSpec};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_load_packed_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA-Interim_t2m_daily_2000.nc");
        let spec = RawFileSpec::new("t2m", "K").with_packing(0.01, 250.0);
        write_raw_file(&path, &spec).unwrap();

        let cube = load_cube(&path, "t2m").unwrap();
        assert_eq!(cube.shape(), spec.shape().as_slice());
        assert_eq!(cube.units.as_ref().unwrap().to_string(), "K");
        // one value was written as the fill value
        assert!(cube.data.iter().any(|v| v.is_nan()));
        let expected = spec.expected_values();
        for (got, want) in cube.data.iter().zip(expected.iter()) {
            if want.is_nan() {
                assert!(got.is_nan());
            } else {
                assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
            }
        }

        let lat = cube.coord("latitude").unwrap();
        assert!(lat.points[0] > lat.points[1], "raw latitude should be decreasing");
        assert_eq!(lat.units, "degrees_north");
    }

    #[test]
    fn test_invalid_units_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA-Interim_tcc_daily_2000.nc");
        write_raw_file(&path, &RawFileSpec::new("tcc", "(0 - 1)")).unwrap();
        let cube = load_cube(&path, "tcc").unwrap();
        assert!(cube.units.is_none());
    }

    #[test]
    fn test_missing_variable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ERA-Interim_tcc_daily_2000.nc");
        write_raw_file(&path, &RawFileSpec::new("tcc", "(0 - 1)")).unwrap();
        let err = load_cube(&path, "t2m").unwrap_err();
        assert!(matches!(err.current_context(), NcError::MissingVariable { .. }));
    }
}
