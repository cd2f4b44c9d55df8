//! Fixtures shared by unit and integration tests: small in-memory cubes and
//! synthetic raw files laid out like ERA-Interim and Duveiller2018 downloads.
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use error_stack::ResultExt;
use ndarray::{Array1, ArrayD, IxDyn};
use netcdf::Extents;

use crate::cube::{Coord, Cube};
use crate::nc_utils::NcError;
use crate::time::TimeUnits;
use crate::units::Unit;

pub const RAW_TIME_UNITS: &str = "hours since 1900-01-01 00:00:00.0";
const PACKED_FILL: i16 = -32767;
const UNPACKED_FILL: f32 = -32767.0;

/// A (time, latitude, longitude) cube in kelvin with decreasing latitude and
/// distinct values everywhere.
pub fn simple_cube() -> Cube {
    let time = Coord::new("time", ndarray::array![0.0, 6.0], RAW_TIME_UNITS)
        .with_standard_name("time")
        .with_attribute("calendar", "gregorian");
    let lat = Coord::new("latitude", ndarray::array![10.0, 0.0, -10.0], "degrees_north")
        .with_long_name("latitude");
    let lon = Coord::new("longitude", ndarray::array![0.0, 180.0], "degrees_east")
        .with_long_name("longitude");
    let data = ArrayD::from_shape_fn(IxDyn(&[2, 3, 2]), |idx| {
        280.0 + idx[0] as f64 + 0.1 * idx[1] as f64 + 0.01 * idx[2] as f64
    });
    Cube::new("t2m", data, vec![time, lat, lon])
        .expect("simple cube coordinates fit its data")
        .with_units(Unit::parse("K").expect("K is a known unit"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cadence {
    Hours(f64),
    Monthly,
}

/// Description of a synthetic raw file.
///
/// Values are `base + t + 0.1 * level + 0.01 * lat + 0.001 * lon` (indices), except
/// the very first element, which is written as the fill value.
#[derive(Debug, Clone)]
pub struct RawFileSpec {
    pub var: String,
    pub units: String,
    pub base: f64,
    pub start: NaiveDateTime,
    pub cadence: Cadence,
    pub ntime: usize,
    pub levels: Option<Vec<f64>>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub packing: Option<(f64, f64)>,
}

impl RawFileSpec {
    pub fn new<V: ToString, U: ToString>(var: V, units: U) -> Self {
        Self {
            var: var.to_string(),
            units: units.to_string(),
            base: 1.0,
            start: NaiveDate::from_ymd_opt(2000, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default(),
            cadence: Cadence::Hours(6.0),
            ntime: 4,
            levels: None,
            latitudes: vec![10.0, 0.0, -10.0],
            longitudes: vec![0.0, 90.0, 180.0, 270.0],
            packing: None,
        }
    }

    pub fn with_base(mut self, base: f64) -> Self {
        self.base = base;
        self
    }

    pub fn with_packing(mut self, scale_factor: f64, add_offset: f64) -> Self {
        self.packing = Some((scale_factor, add_offset));
        self
    }

    pub fn with_times(mut self, start: NaiveDateTime, step_hours: f64, ntime: usize) -> Self {
        self.start = start;
        self.cadence = Cadence::Hours(step_hours);
        self.ntime = ntime;
        self
    }

    /// Monthly means: one time step per month, stamped on the first of the month.
    pub fn monthly(mut self, year: i32, nmonths: u32) -> Self {
        self.start = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        self.cadence = Cadence::Monthly;
        self.ntime = nmonths as usize;
        self
    }

    pub fn with_levels(mut self, levels: Vec<f64>) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        let mut shape = vec![self.ntime];
        if let Some(levels) = &self.levels {
            shape.push(levels.len());
        }
        shape.push(self.latitudes.len());
        shape.push(self.longitudes.len());
        shape
    }

    pub fn time_points(&self) -> Vec<f64> {
        let units = TimeUnits::parse(RAW_TIME_UNITS).expect("raw time units are valid");
        match self.cadence {
            Cadence::Monthly => {
                let year = chrono::Datelike::year(&self.start);
                (0..self.ntime as u32)
                    .map(|m| {
                        let dt = NaiveDate::from_ymd_opt(year + (m / 12) as i32, m % 12 + 1, 1)
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                            .unwrap_or_default();
                        units.from_datetime(dt)
                    })
                    .collect()
            }
            Cadence::Hours(step) => {
                let t0 = units.from_datetime(self.start);
                (0..self.ntime).map(|i| t0 + i as f64 * step).collect()
            }
        }
    }

    /// The values a reader should get back after unpacking, with NaN for the fill value.
    pub fn expected_values(&self) -> ArrayD<f64> {
        let mut values = self.physical_values().mapv(|v| match self.packing {
            Some((scale, offset)) => ((v - offset) / scale).round() * scale + offset,
            None => v as f32 as f64,
        });
        if let Some(first) = values.iter_mut().next() {
            *first = f64::NAN;
        }
        values
    }

    fn physical_values(&self) -> ArrayD<f64> {
        let has_levels = self.levels.is_some();
        ArrayD::from_shape_fn(IxDyn(&self.shape()), |idx| {
            let (lev, lat, lon) = if has_levels {
                (idx[1], idx[2], idx[3])
            } else {
                (0, idx[1], idx[2])
            };
            self.base + idx[0] as f64 + 0.1 * lev as f64 + 0.01 * lat as f64 + 0.001 * lon as f64
        })
    }
}

/// Write a raw file described by `spec`, in the layout of an ERA-Interim download:
/// time in hours since 1900, latitude decreasing, optional pressure levels in millibars.
pub fn write_raw_file(path: &Path, spec: &RawFileSpec) -> error_stack::Result<(), NcError> {
    let write_err = || NcError::write(path.display());
    let mut ds = netcdf::create(path).change_context_lazy(write_err)?;
    ds.add_attribute("Conventions", "CF-1.6")
        .change_context_lazy(write_err)?;

    let mut dims = vec!["time"];
    ds.add_dimension("time", spec.ntime).change_context_lazy(write_err)?;
    let time_points = Array1::from(spec.time_points());
    write_coord(&mut ds, "time", &time_points, &[
        ("units", RAW_TIME_UNITS),
        ("long_name", "time"),
        ("calendar", "gregorian"),
    ])?;

    if let Some(levels) = &spec.levels {
        dims.push("level");
        ds.add_dimension("level", levels.len()).change_context_lazy(write_err)?;
        write_coord(&mut ds, "level", &Array1::from(levels.clone()), &[
            ("units", "millibars"),
            ("long_name", "pressure_level"),
        ])?;
    }

    dims.push("latitude");
    ds.add_dimension("latitude", spec.latitudes.len()).change_context_lazy(write_err)?;
    write_coord(&mut ds, "latitude", &Array1::from(spec.latitudes.clone()), &[
        ("units", "degrees_north"),
        ("long_name", "latitude"),
    ])?;

    dims.push("longitude");
    ds.add_dimension("longitude", spec.longitudes.len()).change_context_lazy(write_err)?;
    write_coord(&mut ds, "longitude", &Array1::from(spec.longitudes.clone()), &[
        ("units", "degrees_east"),
        ("long_name", "longitude"),
    ])?;

    let values = spec.physical_values();
    match spec.packing {
        Some((scale, offset)) => {
            let mut packed = values.mapv(|v| ((v - offset) / scale).round() as i16);
            if let Some(first) = packed.iter_mut().next() {
                *first = PACKED_FILL;
            }
            let mut var = ds.add_variable::<i16>(&spec.var, &dims).change_context_lazy(write_err)?;
            var.put_attribute("scale_factor", scale).change_context_lazy(write_err)?;
            var.put_attribute("add_offset", offset).change_context_lazy(write_err)?;
            var.put_attribute("_FillValue", PACKED_FILL).change_context_lazy(write_err)?;
            var.put_attribute("missing_value", PACKED_FILL).change_context_lazy(write_err)?;
            var.put_attribute("units", spec.units.as_str()).change_context_lazy(write_err)?;
            var.put(packed.view(), Extents::All).change_context_lazy(write_err)?;
        }
        None => {
            let mut unpacked = values.mapv(|v| v as f32);
            if let Some(first) = unpacked.iter_mut().next() {
                *first = UNPACKED_FILL;
            }
            let mut var = ds.add_variable::<f32>(&spec.var, &dims).change_context_lazy(write_err)?;
            var.put_attribute("_FillValue", UNPACKED_FILL).change_context_lazy(write_err)?;
            var.put_attribute("units", spec.units.as_str()).change_context_lazy(write_err)?;
            var.put(unpacked.view(), Extents::All).change_context_lazy(write_err)?;
        }
    }

    Ok(())
}

pub const TRANSITION_CODES: [f64; 3] = [1.0, 2.0, 3.0];
pub const TRANSITION_LATITUDES: [f64; 3] = [10.0, 0.0, -10.0];
pub const TRANSITION_LONGITUDES: [f64; 4] = [0.0, 90.0, 180.0, 270.0];

/// Value written at (transition, month, latitude, longitude) indices by
/// [`write_transition_file`].
pub fn transition_value(itr: usize, month: usize, lat: usize, lon: usize) -> f64 {
    (itr as f64 + 0.1 * month as f64 + 0.01 * lat as f64 + 0.001 * lon as f64) as f32 as f64
}

/// Write an albedo-change file like the Duveiller2018 download: `Delta_albedo`
/// over (transition code, 12 month indices, decreasing latitude, longitude).
pub fn write_transition_file(path: &Path) -> error_stack::Result<(), NcError> {
    let write_err = || NcError::write(path.display());
    let mut ds = netcdf::create(path).change_context_lazy(write_err)?;

    ds.add_dimension("iTr", TRANSITION_CODES.len()).change_context_lazy(write_err)?;
    write_coord(&mut ds, "iTr", &Array1::from(TRANSITION_CODES.to_vec()), &[
        ("units", "1"),
        ("long_name", "Vegetation transition code"),
    ])?;
    ds.add_dimension("Month", 12).change_context_lazy(write_err)?;
    write_coord(&mut ds, "Month", &Array1::range(1.0, 13.0, 1.0), &[("units", "1"), ("long_name", "Month")])?;
    ds.add_dimension("lat", TRANSITION_LATITUDES.len()).change_context_lazy(write_err)?;
    write_coord(&mut ds, "lat", &Array1::from(TRANSITION_LATITUDES.to_vec()), &[
        ("units", "degrees_north"),
        ("long_name", "latitude"),
    ])?;
    ds.add_dimension("lon", TRANSITION_LONGITUDES.len()).change_context_lazy(write_err)?;
    write_coord(&mut ds, "lon", &Array1::from(TRANSITION_LONGITUDES.to_vec()), &[
        ("units", "degrees_east"),
        ("long_name", "longitude"),
    ])?;

    let shape = [TRANSITION_CODES.len(), 12, TRANSITION_LATITUDES.len(), TRANSITION_LONGITUDES.len()];
    let values = ArrayD::from_shape_fn(IxDyn(&shape), |idx| transition_value(idx[0], idx[1], idx[2], idx[3]) as f32);
    let mut var = ds
        .add_variable::<f32>("Delta_albedo", &["iTr", "Month", "lat", "lon"])
        .change_context_lazy(write_err)?;
    var.put_attribute("units", "1").change_context_lazy(write_err)?;
    var.put_attribute("long_name", "albedo change").change_context_lazy(write_err)?;
    var.put(values.view(), Extents::All).change_context_lazy(write_err)?;
    Ok(())
}

fn write_coord(
    ds: &mut netcdf::FileMut,
    name: &str,
    points: &Array1<f64>,
    attributes: &[(&str, &str)],
) -> error_stack::Result<(), NcError> {
    let mut var = ds
        .add_variable::<f64>(name, &[name])
        .change_context_lazy(|| NcError::write(name))?;
    for (key, value) in attributes {
        var.put_attribute(key, *value)
            .change_context_lazy(|| NcError::write(name))?;
    }
    var.put(points.view(), Extents::All)
        .change_context_lazy(|| NcError::write(name))?;
    Ok(())
}
