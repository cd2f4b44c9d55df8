//! Reduce an extra dimension to a single point.
use error_stack::ResultExt;
use ndarray::Axis as ArrayAxis;

use crate::config::PointSelection;
use crate::cube::{AttrValue, Cube, CubeError};

use super::TransformError;

/// Keep the point of `selection.coord` equal to `selection.value`, removing that
/// dimension from the cube. The value is recorded as an attribute named after the
/// coordinate.
pub fn select_point(cube: &mut Cube, selection: &PointSelection) -> error_stack::Result<(), TransformError> {
    let select_err = || TransformError::Select(selection.coord.clone());
    let dim = cube
        .find_dim(&selection.coord)
        .ok_or_else(|| CubeError::CoordNotFound(selection.coord.clone()))
        .change_context_lazy(select_err)?;
    let coord = &cube.dim_coords()[dim];
    let index = coord
        .points
        .iter()
        .position(|p| (p - selection.value).abs() <= 1e-6 * selection.value.abs().max(1.0))
        .ok_or_else(|| {
            error_stack::Report::new(select_err()).attach_printable(format!(
                "no point equals {}, available points are {}",
                selection.value, coord.points
            ))
        })?;
    log::info!(
        "Selecting {} = {} (index {index}) from '{}'",
        coord.name(),
        selection.value,
        cube.var_name
    );

    let data = cube.data.select(ArrayAxis(dim), &[index]);
    let mut coords = cube.dim_coords().to_vec();
    coords[dim].points = coords[dim].points.select(ArrayAxis(0), &[index]);
    coords[dim].bounds = coords[dim].bounds.as_ref().map(|b| b.select(ArrayAxis(0), &[index]));
    cube.replace_data(data, coords).change_context_lazy(select_err)?;
    cube.demote_dim_to_scalar(dim).change_context_lazy(select_err)?;
    cube.remove_scalar_coord(&selection.coord);

    let value = if selection.value.fract() == 0.0 {
        AttrValue::from(selection.value as i64)
    } else {
        AttrValue::from(selection.value)
    };
    cube.attributes.insert(selection.coord.clone(), value);
    Ok(())
}
