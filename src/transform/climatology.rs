//! Time axis for monthly climatologies, which come with a plain month index
//! instead of real dates.
use chrono::{NaiveDate, NaiveDateTime};
use error_stack::ResultExt;
use ndarray::{Array1, Array2};

use crate::config::MonthlyClimatology;
use crate::cube::{Coord, Cube, CubeError};
use crate::time::TimeUnits;

use super::TransformError;

pub const CLIMATOLOGY_TIME_UNITS: &str = "days since 1950-01-01";

fn first_of_month(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

/// Points and bounds of the twelve months of `year`: bounds are the first days
/// of consecutive months, points the middle between them.
pub fn monthly_time_axis(year: i32) -> Result<(Array1<f64>, Array2<f64>), TransformError> {
    let units = TimeUnits::parse(CLIMATOLOGY_TIME_UNITS)
        .map_err(|_| TransformError::Climatology(CLIMATOLOGY_TIME_UNITS.to_string()))?;
    let mut points = Array1::zeros(12);
    let mut bounds = Array2::zeros((12, 2));
    for month in 1..=12u32 {
        let start = first_of_month(year, month);
        let end = if month == 12 {
            first_of_month(year + 1, 1)
        } else {
            first_of_month(year, month + 1)
        };
        let (Some(start), Some(end)) = (start, end) else {
            return Err(TransformError::Climatology(format!("year {year}")));
        };
        let i = month as usize - 1;
        bounds[[i, 0]] = units.from_datetime(start);
        bounds[[i, 1]] = units.from_datetime(end);
        points[i] = 0.5 * (bounds[[i, 0]] + bounds[[i, 1]]);
    }
    Ok((points, bounds))
}

/// Replace the month dimension named `climatology.coord` with a time coordinate
/// for the months of `climatology.year`.
pub fn set_monthly_climatology(
    cube: &mut Cube,
    climatology: &MonthlyClimatology,
) -> error_stack::Result<(), TransformError> {
    let clim_err = || TransformError::Climatology(climatology.coord.clone());
    let dim = cube
        .find_dim(&climatology.coord)
        .ok_or_else(|| CubeError::CoordNotFound(climatology.coord.clone()))
        .change_context_lazy(clim_err)?;

    let (points, bounds) = monthly_time_axis(climatology.year)?;
    let mut time = Coord::new("time", points, CLIMATOLOGY_TIME_UNITS)
        .with_standard_name("time")
        .with_long_name("time")
        .with_attribute("calendar", "gregorian");
    time.bounds = Some(bounds);
    log::info!(
        "Using the months of {} as time axis of '{}'",
        climatology.year,
        cube.var_name
    );
    cube.replace_dim_coord(dim, time).change_context_lazy(clim_err)?;
    Ok(())
}
