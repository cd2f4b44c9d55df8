//! Aggregation of sub-daily data to daily values.
//!
//! ERA-Interim daily downloads come in 3, 6 or 12 hourly steps. Accumulated and
//! extreme fields are stamped at the end of their interval, so a value stamped
//! 00:00 belongs to the previous day; those are shifted back by one second before
//! grouping by calendar day.
use chrono::{Duration, NaiveDate};
use error_stack::ResultExt;
use indexmap::IndexMap;
use ndarray::{Array2, ArrayD, ArrayView1, Axis as ArrayAxis};

use crate::cube::{Axis, Cube};
use crate::time::TimeUnits;

use super::TransformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Reducer {
    Max,
    Min,
    Sum,
    Mean,
}

impl Reducer {
    /// Reduce one lane of values, ignoring NaNs. A lane with only NaNs reduces to NaN.
    pub fn reduce(&self, values: ArrayView1<f64>) -> f64 {
        let mut valid = values.iter().copied().filter(|v| !v.is_nan()).peekable();
        if valid.peek().is_none() {
            return f64::NAN;
        }
        match self {
            Reducer::Max => valid.fold(f64::NEG_INFINITY, f64::max),
            Reducer::Min => valid.fold(f64::INFINITY, f64::min),
            Reducer::Sum => valid.sum(),
            Reducer::Mean => {
                let (sum, n) = valid.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                sum / n as f64
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRule {
    /// Move every time stamp one second earlier before grouping.
    pub shift_back: bool,
    pub reducer: Reducer,
}

const END_STAMPED_SUM: DailyRule = DailyRule {
    shift_back: true,
    reducer: Reducer::Sum,
};

static DAILY_RULES: &[(&str, DailyRule)] = &[
    ("tasmax", DailyRule { shift_back: true, reducer: Reducer::Max }),
    ("tasmin", DailyRule { shift_back: true, reducer: Reducer::Min }),
    ("pr", END_STAMPED_SUM),
    ("rsds", END_STAMPED_SUM),
    ("hfds", END_STAMPED_SUM),
    ("evspsbl", END_STAMPED_SUM),
    ("rsdt", END_STAMPED_SUM),
    ("rss", END_STAMPED_SUM),
    ("prsn", END_STAMPED_SUM),
];

/// How the sub-daily values of a variable are turned into daily values. Variables
/// without an entry are averaged without shifting.
pub fn daily_rule(short_name: &str) -> DailyRule {
    DAILY_RULES
        .iter()
        .find(|(name, _)| *name == short_name)
        .map(|(_, rule)| *rule)
        .unwrap_or(DailyRule {
            shift_back: false,
            reducer: Reducer::Mean,
        })
}

/// Aggregate `cube` to one value per calendar day using the rule for `short_name`.
///
/// The time coordinate must already be in CF units. The result has one time point
/// at 12:00 of each day, in order of first appearance, with bounds regenerated.
pub fn resample_daily(cube: &mut Cube, short_name: &str) -> error_stack::Result<(), TransformError> {
    let rule = daily_rule(short_name);
    let tdim = cube
        .dim_of_axis(Axis::T)
        .ok_or(TransformError::MissingAxis(Axis::T))?;
    let time = &cube.dim_coords()[tdim];
    let units = TimeUnits::parse(&time.units).change_context(TransformError::Resample)?;

    let mut days: IndexMap<NaiveDate, Vec<usize>> = IndexMap::new();
    for (i, &t) in time.points.iter().enumerate() {
        let mut stamp = units.to_datetime(t).change_context(TransformError::Resample)?;
        if rule.shift_back {
            stamp -= Duration::seconds(1);
        }
        days.entry(stamp.date()).or_default().push(i);
    }
    log::debug!(
        "Reducing {} time steps of '{short_name}' to {} days with {}",
        time.len(),
        days.len(),
        rule.reducer
    );

    let mut daily_slices = vec![];
    for indices in days.values() {
        let subset = cube.data.select(ArrayAxis(tdim), indices);
        let reduced = subset
            .map_axis(ArrayAxis(tdim), |lane| rule.reducer.reduce(lane))
            .insert_axis(ArrayAxis(tdim));
        daily_slices.push(reduced);
    }
    let views: Vec<_> = daily_slices.iter().map(|a| a.view()).collect();
    let data: ArrayD<f64> =
        ndarray::concatenate(ArrayAxis(tdim), &views).change_context(TransformError::Resample)?;

    let mut new_time = time.clone();
    new_time.points = days
        .keys()
        .map(|day| units.from_datetime(day.and_hms_opt(12, 0, 0).unwrap_or_default()))
        .collect();
    new_time.bounds = None;
    if new_time.len() > 1 {
        new_time.guess_bounds().change_context(TransformError::Resample)?;
    } else if let Some(day) = days.keys().next() {
        let start = units.from_datetime(day.and_hms_opt(0, 0, 0).unwrap_or_default());
        let end = units.from_datetime((*day + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap_or_default());
        new_time.bounds = Some(Array2::from_shape_vec((1, 2), vec![start, end]).change_context(TransformError::Resample)?);
    }

    let mut coords = cube.dim_coords().to_vec();
    coords[tdim] = new_time;
    cube.replace_data(data, coords).change_context(TransformError::Resample)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::Coord;
    use crate::time::CMOR_TIME_UNITS;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};
    use rstest::rstest;

    /// Two days of 6-hourly data stamped 06, 12, 18, 00 (end of interval) on a
    /// 1x2 grid, values 1..=8 at the first grid point and 10x that at the second.
    fn six_hourly_cube(short_name: &str) -> Cube {
        // 2000-01-01 is day 54786 since 1850-01-01
        let points = Array1::from_iter((1..=8).map(|i| 54786.0 + 0.25 * i as f64));
        let time = Coord::new("time", points, CMOR_TIME_UNITS).with_standard_name("time");
        let lon = Coord::new("lon", array![0.0, 180.0], "degrees_east");
        let data = ArrayD::from_shape_fn(vec![8, 2], |idx| (idx[0] + 1) as f64 * if idx[1] == 0 { 1.0 } else { 10.0 });
        Cube::new(short_name, data, vec![time, lon]).unwrap()
    }

    #[rstest]
    #[case(Reducer::Max, array![1.0, f64::NAN, 3.0], 3.0)]
    #[case(Reducer::Min, array![2.0, 1.0, f64::NAN], 1.0)]
    #[case(Reducer::Sum, array![1.0, 2.0, f64::NAN], 3.0)]
    #[case(Reducer::Mean, array![1.0, f64::NAN, 2.0], 1.5)]
    fn test_reducers_ignore_nan(#[case] reducer: Reducer, #[case] values: Array1<f64>, #[case] expected: f64) {
        assert_abs_diff_eq!(reducer.reduce(values.view()), expected);
        assert!(reducer.reduce(array![f64::NAN, f64::NAN].view()).is_nan());
    }

    #[test]
    fn test_daily_rules() {
        assert_eq!(daily_rule("tasmax").reducer, Reducer::Max);
        assert_eq!(daily_rule("pr"), END_STAMPED_SUM);
        assert_eq!(
            daily_rule("tas"),
            DailyRule {
                shift_back: false,
                reducer: Reducer::Mean
            }
        );
    }

    #[test]
    fn test_end_stamped_sum() {
        let mut cube = six_hourly_cube("pr");
        resample_daily(&mut cube, "pr").unwrap();
        // the 00:00 stamps belong to the day before, so each day gets four values
        assert_eq!(cube.shape(), &[2, 2]);
        assert_abs_diff_eq!(cube.data[[0, 0]], 1.0 + 2.0 + 3.0 + 4.0);
        assert_abs_diff_eq!(cube.data[[1, 0]], 5.0 + 6.0 + 7.0 + 8.0);
        assert_abs_diff_eq!(cube.data[[1, 1]], 260.0);

        let time = cube.coord("time").unwrap();
        assert_abs_diff_eq!(time.points[0], 54786.5);
        assert_abs_diff_eq!(time.points[1], 54787.5);
        let bounds = time.bounds.as_ref().unwrap();
        assert_abs_diff_eq!(bounds[[0, 0]], 54786.0);
        assert_abs_diff_eq!(bounds[[1, 1]], 54788.0);
    }

    #[test]
    fn test_unshifted_mean() {
        let mut cube = six_hourly_cube("tas");
        resample_daily(&mut cube, "tas").unwrap();
        // without the shift, the last 00:00 stamp starts a third day
        assert_eq!(cube.shape(), &[3, 2]);
        assert_abs_diff_eq!(cube.data[[0, 0]], 2.0);
        assert_abs_diff_eq!(cube.data[[1, 0]], 5.5);
        assert_abs_diff_eq!(cube.data[[2, 0]], 8.0);
    }

    #[test]
    fn test_extremes_and_single_day() {
        let mut cube = six_hourly_cube("tasmax");
        resample_daily(&mut cube, "tasmax").unwrap();
        assert_abs_diff_eq!(cube.data[[0, 1]], 40.0);

        let mut cube = six_hourly_cube("tasmin");
        cube.data.slice_axis_inplace(ArrayAxis(0), ndarray::Slice::from(0..4));
        let mut coords = cube.dim_coords().to_vec();
        coords[0].points = coords[0].points.slice(ndarray::s![0..4]).to_owned();
        let data = cube.data.clone();
        cube.replace_data(data, coords).unwrap();

        resample_daily(&mut cube, "tasmin").unwrap();
        assert_eq!(cube.shape(), &[1, 2]);
        assert_abs_diff_eq!(cube.data[[0, 0]], 1.0);
        let bounds = cube.coord("time").unwrap().bounds.clone().unwrap();
        assert_abs_diff_eq!(bounds[[0, 0]], 54786.0);
        assert_abs_diff_eq!(bounds[[0, 1]], 54787.0);
    }

    #[test]
    fn test_daily_input_is_unchanged() {
        // one noon stamp per day for three days
        let points = array![54786.5, 54787.5, 54788.5];
        let time = Coord::new("time", points.clone(), CMOR_TIME_UNITS).with_standard_name("time");
        let lon = Coord::new("lon", array![0.0, 180.0], "degrees_east");
        let data = ArrayD::from_shape_fn(vec![3, 2], |idx| 271.3 + idx[0] as f64 * 0.7 - idx[1] as f64);
        let mut cube = Cube::new("tas", data.clone(), vec![time, lon]).unwrap();

        resample_daily(&mut cube, "tas").unwrap();
        assert_eq!(cube.shape(), &[3, 2]);
        for (out, orig) in cube.data.iter().zip(data.iter()) {
            assert_abs_diff_eq!(out, orig, epsilon = 1e-9);
        }
        let time = cube.coord("time").unwrap();
        for (out, orig) in time.points.iter().zip(points.iter()) {
            assert_abs_diff_eq!(out, orig, epsilon = 1e-9);
        }
    }
}
