//! Bring the coordinates of a cube in line with its target definition.
use error_stack::ResultExt;

use crate::cmor_table::{CoordinateInfo, VariableDefinition};
use crate::cube::{Axis, Coord, Cube, CubeError};
use crate::time::{TimeUnits, CMOR_TIME_UNITS};
use crate::units::Unit;

use super::TransformError;

const AXES: [Axis; 4] = [Axis::T, Axis::X, Axis::Y, Axis::Z];

/// Normalize the coordinates of `cube` for `definition`:
///
/// 1. latitude is made increasing,
/// 2. a length-one time dimension is made scalar if the variable has no time dimension,
/// 3. scalar coordinates the definition requires (e.g. 2 m height) are added,
/// 4. every axis of the definition gets the target names and units, and guessed
///    bounds if it has more than one point and no bounds yet.
pub fn fix_coordinates(cube: &mut Cube, definition: &VariableDefinition) -> error_stack::Result<(), TransformError> {
    make_latitude_increasing(cube);

    if !definition.coordinates.contains_key(&Axis::T) {
        if let Some(dim) = cube.dim_of_axis(Axis::T) {
            if cube.shape()[dim] == 1 {
                log::debug!("Making the time dimension of fixed field '{}' scalar", cube.var_name);
                cube.demote_dim_to_scalar(dim)
                    .change_context(TransformError::Coordinate(Axis::T))?;
            }
        }
    }

    add_scalar_coords(cube, definition)?;

    for axis in AXES {
        let Some(coord_def) = definition.coordinates.get(&axis) else {
            continue;
        };
        let coord = cube
            .coord_by_axis_mut(axis)
            .ok_or(TransformError::MissingAxis(axis))?;
        fix_coordinate(coord, axis, coord_def).change_context(TransformError::Coordinate(axis))?;
    }

    Ok(())
}

/// Reverse the latitude dimension if it runs north to south.
pub fn make_latitude_increasing(cube: &mut Cube) {
    let Some(dim) = cube.dim_of_axis(Axis::Y) else {
        return;
    };
    let points = &cube.dim_coords()[dim].points;
    if points.len() > 1 && points[0] > points[points.len() - 1] {
        log::debug!("Reversing latitude of '{}'", cube.var_name);
        cube.reverse_dim(dim);
    }
}

fn add_scalar_coords(cube: &mut Cube, definition: &VariableDefinition) -> error_stack::Result<(), TransformError> {
    for coord_def in definition.coordinates.values() {
        let Some(value) = coord_def.value else {
            continue;
        };
        let mut coord = Coord::scalar(&coord_def.out_name, value, &coord_def.units)
            .with_standard_name(&coord_def.standard_name)
            .with_long_name(&coord_def.long_name);
        if let Some(positive) = &coord_def.positive {
            coord = coord.with_attribute("positive", positive.as_str());
        }
        cube.add_scalar_coord(coord)
            .change_context(TransformError::Coordinate(coord_def.axis))?;
    }
    Ok(())
}

fn fix_coordinate(coord: &mut Coord, axis: Axis, coord_def: &CoordinateInfo) -> error_stack::Result<(), CubeError> {
    match axis {
        Axis::T => convert_time(coord)?,
        Axis::Z => convert_linear(coord, &coord_def.units)?,
        _ => (),
    }

    coord.standard_name = Some(coord_def.standard_name.clone());
    coord.var_name = coord_def.out_name.clone();
    coord.long_name = Some(coord_def.long_name.clone());
    if let Some(positive) = &coord_def.positive {
        coord.attributes.insert("positive".to_string(), positive.as_str().into());
    }
    if coord.len() > 1 && coord.bounds.is_none() {
        coord.guess_bounds()?;
    }
    Ok(())
}

fn convert_time(coord: &mut Coord) -> error_stack::Result<(), CubeError> {
    let unknown = || CubeError::UnknownUnits(coord.var_name.clone());
    let from = TimeUnits::parse(&coord.units).change_context_lazy(unknown)?;
    let to = TimeUnits::parse(CMOR_TIME_UNITS).change_context_lazy(unknown)?;
    coord.points.mapv_inplace(|t| from.convert_value(t, &to));
    if let Some(bounds) = coord.bounds.as_mut() {
        bounds.mapv_inplace(|t| from.convert_value(t, &to));
    }
    coord.units = CMOR_TIME_UNITS.to_string();
    Ok(())
}

fn convert_linear(coord: &mut Coord, target: &str) -> error_stack::Result<(), CubeError> {
    let from = Unit::parse(&coord.units).map_err(CubeError::from)?;
    let to = Unit::parse(target).map_err(CubeError::from)?;
    let conversion = from.conversion_to(&to).map_err(CubeError::from)?;
    if !conversion.is_identity() {
        coord.points.mapv_inplace(|v| conversion.apply(v));
        if let Some(bounds) = coord.bounds.as_mut() {
            bounds.mapv_inplace(|v| conversion.apply(v));
        }
    }
    coord.units = target.to_string();
    Ok(())
}
