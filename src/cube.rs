//! In-memory representation of one physical field.
//!
//! A [`Cube`] holds an N-dimensional array of values (missing values are NaN),
//! one dimension coordinate per array axis, any number of scalar coordinates
//! and an ordered set of attributes. Cubes are owned by the transform that loads
//! them and are modified in place through the normalization steps.
use std::fmt::Display;

use indexmap::IndexMap;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayD, Axis as ArrayAxis};

use crate::units::{Unit, UnitError};

#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("Data shape {got:?} does not match the expected shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Coordinate '{name}' has {got} points, but the dimension it describes has length {expected}")]
    CoordLength {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Coordinate '{0}' differs between the two cubes")]
    CoordMismatch(String),
    #[error("Cube does not have a coordinate '{0}'")]
    CoordNotFound(String),
    #[error("Coordinate '{name}' must have exactly one point to be scalar, it has {len}")]
    NotScalar { name: String, len: usize },
    #[error("Coordinate '{0}' needs at least two points to guess bounds")]
    TooFewPoints(String),
    #[error("Units of '{0}' are unknown, cannot convert them")]
    UnknownUnits(String),
    #[error("Units of '{a}' ({a_units}) and '{b}' ({b_units}) are not the same")]
    UnitsDiffer {
        a: String,
        a_units: String,
        b: String,
        b_units: String,
    },
    #[error(transparent)]
    Units(#[from] UnitError),
}

/// Attribute values carried on cubes and coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Double(f64),
    Doubles(Vec<f64>),
}

impl Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Str(s) => write!(f, "{s}"),
            AttrValue::Int(i) => write!(f, "{i}"),
            AttrValue::Double(v) => write!(f, "{v}"),
            AttrValue::Doubles(v) => write!(f, "[{}]", v.iter().join(", ")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

/// The four spatiotemporal axes a coordinate may describe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, strum::Display, strum::EnumString,
)]
pub enum Axis {
    T,
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coord {
    pub var_name: String,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
    pub units: String,
    pub points: Array1<f64>,
    /// Cell bounds, shape (n, 2)
    pub bounds: Option<Array2<f64>>,
    pub attributes: IndexMap<String, AttrValue>,
}

impl Coord {
    pub fn new<S: ToString, U: ToString>(var_name: S, points: Array1<f64>, units: U) -> Self {
        Self {
            var_name: var_name.to_string(),
            standard_name: None,
            long_name: None,
            units: units.to_string(),
            points,
            bounds: None,
            attributes: IndexMap::new(),
        }
    }

    pub fn scalar<S: ToString, U: ToString>(var_name: S, value: f64, units: U) -> Self {
        Self::new(var_name, Array1::from_elem(1, value), units)
    }

    pub fn with_standard_name<S: ToString>(mut self, name: S) -> Self {
        self.standard_name = Some(name.to_string());
        self
    }

    pub fn with_long_name<S: ToString>(mut self, name: S) -> Self {
        self.long_name = Some(name.to_string());
        self
    }

    pub fn with_attribute<S: ToString, V: Into<AttrValue>>(mut self, key: S, value: V) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The most descriptive name available: standard name, then long name, then variable name.
    pub fn name(&self) -> &str {
        self.standard_name
            .as_deref()
            .or(self.long_name.as_deref())
            .unwrap_or(&self.var_name)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.var_name == name
            || self.standard_name.as_deref() == Some(name)
            || self.long_name.as_deref() == Some(name)
    }

    /// Work out which axis this coordinate describes from its metadata.
    ///
    /// An explicit `axis` attribute wins, then standard names and units, then
    /// conventional variable names.
    pub fn guess_axis(&self) -> Option<Axis> {
        if let Some(AttrValue::Str(axis)) = self.attributes.get("axis") {
            if let Ok(axis) = axis.to_ascii_uppercase().parse::<Axis>() {
                return Some(axis);
            }
        }

        match self.standard_name.as_deref() {
            Some("longitude" | "grid_longitude" | "projection_x_coordinate") => return Some(Axis::X),
            Some("latitude" | "grid_latitude" | "projection_y_coordinate") => return Some(Axis::Y),
            Some("time") => return Some(Axis::T),
            Some("air_pressure" | "height" | "depth" | "altitude" | "model_level_number") => {
                return Some(Axis::Z)
            }
            _ => (),
        }

        if self.units.contains(" since ") {
            return Some(Axis::T);
        }
        if self.attributes.contains_key("positive") {
            return Some(Axis::Z);
        }
        match self.units.as_str() {
            "degrees_east" | "degree_east" => return Some(Axis::X),
            "degrees_north" | "degree_north" => return Some(Axis::Y),
            "Pa" | "hPa" | "mbar" | "millibar" | "millibars" => return Some(Axis::Z),
            _ => (),
        }

        match self.var_name.to_ascii_lowercase().as_str() {
            "lon" | "longitude" => Some(Axis::X),
            "lat" | "latitude" => Some(Axis::Y),
            "time" => Some(Axis::T),
            "level" | "lev" | "plev" | "height" | "depth" => Some(Axis::Z),
            _ => None,
        }
    }

    /// Replace the bounds with contiguous cells whose edges lie halfway between
    /// neighboring points; the outermost edges are extrapolated by half a step.
    pub fn guess_bounds(&mut self) -> Result<(), CubeError> {
        let n = self.points.len();
        if n < 2 {
            return Err(CubeError::TooFewPoints(self.var_name.clone()));
        }

        let p = &self.points;
        let mut bounds = Array2::zeros((n, 2));
        for i in 0..n {
            let lower = if i == 0 {
                p[0] - (p[1] - p[0]) / 2.0
            } else {
                (p[i - 1] + p[i]) / 2.0
            };
            let upper = if i == n - 1 {
                p[n - 1] + (p[n - 1] - p[n - 2]) / 2.0
            } else {
                (p[i] + p[i + 1]) / 2.0
            };
            bounds[[i, 0]] = lower;
            bounds[[i, 1]] = upper;
        }
        self.bounds = Some(bounds);
        Ok(())
    }

    fn points_close(&self, other: &Coord) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(other.points.iter())
                .all(|(a, b)| (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0))
    }
}

#[derive(Debug, Clone)]
pub struct Cube {
    pub var_name: String,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
    /// `None` when the source did not give units we understand.
    pub units: Option<Unit>,
    pub data: ArrayD<f64>,
    pub attributes: IndexMap<String, AttrValue>,
    dim_coords: Vec<Coord>,
    scalar_coords: Vec<Coord>,
}

impl Cube {
    /// Create a cube, checking that there is one coordinate per data dimension
    /// and that each coordinate's length matches its dimension.
    pub fn new<S: ToString>(
        var_name: S,
        data: ArrayD<f64>,
        dim_coords: Vec<Coord>,
    ) -> Result<Self, CubeError> {
        check_coords_fit(data.shape(), &dim_coords)?;
        Ok(Self {
            var_name: var_name.to_string(),
            standard_name: None,
            long_name: None,
            units: None,
            data,
            attributes: IndexMap::new(),
            dim_coords,
            scalar_coords: vec![],
        })
    }

    pub fn with_units(mut self, units: Unit) -> Self {
        self.units = Some(units);
        self
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn dim_coords(&self) -> &[Coord] {
        &self.dim_coords
    }

    pub fn scalar_coords(&self) -> &[Coord] {
        &self.scalar_coords
    }

    /// Index of the dimension described by the coordinate with this name.
    pub fn find_dim(&self, name: &str) -> Option<usize> {
        self.dim_coords.iter().position(|c| c.matches_name(name))
    }

    pub fn coord(&self, name: &str) -> Option<&Coord> {
        self.dim_coords
            .iter()
            .chain(self.scalar_coords.iter())
            .find(|c| c.matches_name(name))
    }

    /// Mutable access to a coordinate by name.
    ///
    /// Callers must not change the number of points of a dimension coordinate;
    /// use [`Cube::replace_dim_coord`] for that.
    pub fn coord_mut(&mut self, name: &str) -> Option<&mut Coord> {
        self.dim_coords
            .iter_mut()
            .chain(self.scalar_coords.iter_mut())
            .find(|c| c.matches_name(name))
    }

    /// The dimension index of the coordinate describing `axis`, if it is a dimension coordinate.
    pub fn dim_of_axis(&self, axis: Axis) -> Option<usize> {
        self.dim_coords
            .iter()
            .position(|c| c.guess_axis() == Some(axis))
    }

    /// The coordinate describing `axis`, searching dimension coordinates before scalar ones.
    pub fn coord_by_axis(&self, axis: Axis) -> Option<&Coord> {
        self.dim_coords
            .iter()
            .chain(self.scalar_coords.iter())
            .find(|c| c.guess_axis() == Some(axis))
    }

    /// Mutable version of [`Cube::coord_by_axis`], with the same caveat as [`Cube::coord_mut`].
    pub fn coord_by_axis_mut(&mut self, axis: Axis) -> Option<&mut Coord> {
        self.dim_coords
            .iter_mut()
            .chain(self.scalar_coords.iter_mut())
            .find(|c| c.guess_axis() == Some(axis))
    }

    pub fn replace_dim_coord(&mut self, dim: usize, coord: Coord) -> Result<(), CubeError> {
        let expected = self.data.len_of(ArrayAxis(dim));
        if coord.len() != expected {
            return Err(CubeError::CoordLength {
                got: coord.len(),
                name: coord.var_name,
                expected,
            });
        }
        self.dim_coords[dim] = coord;
        Ok(())
    }

    /// Replace the data and dimension coordinates together, e.g. after aggregating along an axis.
    pub fn replace_data(&mut self, data: ArrayD<f64>, dim_coords: Vec<Coord>) -> Result<(), CubeError> {
        check_coords_fit(data.shape(), &dim_coords)?;
        self.data = data;
        self.dim_coords = dim_coords;
        Ok(())
    }

    pub fn add_scalar_coord(&mut self, coord: Coord) -> Result<(), CubeError> {
        if coord.len() != 1 {
            return Err(CubeError::NotScalar {
                len: coord.len(),
                name: coord.var_name,
            });
        }
        self.scalar_coords.retain(|c| c.var_name != coord.var_name);
        self.scalar_coords.push(coord);
        Ok(())
    }

    pub fn remove_scalar_coord(&mut self, name: &str) -> Option<Coord> {
        let idx = self.scalar_coords.iter().position(|c| c.matches_name(name))?;
        Some(self.scalar_coords.remove(idx))
    }

    /// Turn a length-1 dimension into a scalar coordinate, dropping that axis from the data.
    pub fn demote_dim_to_scalar(&mut self, dim: usize) -> Result<(), CubeError> {
        let len = self.data.len_of(ArrayAxis(dim));
        if len != 1 {
            return Err(CubeError::NotScalar {
                name: self.dim_coords[dim].var_name.clone(),
                len,
            });
        }
        let coord = self.dim_coords.remove(dim);
        let data = std::mem::take(&mut self.data);
        self.data = data.index_axis_move(ArrayAxis(dim), 0);
        self.scalar_coords.push(coord);
        Ok(())
    }

    /// Reverse one dimension: the data along that axis, the coordinate points,
    /// and the bounds (both the cell order and the lower/upper order).
    ///
    /// Applying this twice restores the original cube exactly.
    pub fn reverse_dim(&mut self, dim: usize) {
        self.data.invert_axis(ArrayAxis(dim));
        let coord = &mut self.dim_coords[dim];
        coord.points.invert_axis(ArrayAxis(0));
        if let Some(bounds) = coord.bounds.as_mut() {
            bounds.invert_axis(ArrayAxis(0));
            bounds.invert_axis(ArrayAxis(1));
        }
    }

    pub fn scale(&mut self, factor: f64) {
        self.data.mapv_inplace(|v| v * factor);
    }

    /// Round every value to the nearest `f32`, which is the precision the data are written with.
    pub fn round_to_f32(&mut self) {
        self.data.mapv_inplace(|v| v as f32 as f64);
    }

    /// Combine `other` into this cube elementwise. The shapes and dimension
    /// coordinate points must agree; metadata of `self` is kept.
    pub fn combine_with<F: Fn(f64, f64) -> f64>(&mut self, other: &Cube, op: F) -> Result<(), CubeError> {
        if self.shape() != other.shape() {
            return Err(CubeError::ShapeMismatch {
                expected: self.shape().to_vec(),
                got: other.shape().to_vec(),
            });
        }
        for (mine, theirs) in self.dim_coords.iter().zip(other.dim_coords.iter()) {
            if !mine.points_close(theirs) {
                return Err(CubeError::CoordMismatch(mine.name().to_string()));
            }
        }
        ndarray::Zip::from(&mut self.data)
            .and(&other.data)
            .for_each(|a, &b| *a = op(*a, b));
        Ok(())
    }

    pub fn add(&mut self, other: &Cube) -> Result<(), CubeError> {
        self.combine_with(other, |a, b| a + b)
    }

    pub fn subtract(&mut self, other: &Cube) -> Result<(), CubeError> {
        self.combine_with(other, |a, b| a - b)
    }

    /// Convert the data to new units, erroring if the current units are unknown
    /// or not convertible.
    pub fn convert_units(&mut self, target: &Unit) -> Result<(), CubeError> {
        let current = self
            .units
            .as_ref()
            .ok_or_else(|| CubeError::UnknownUnits(self.var_name.clone()))?;
        let conversion = current.conversion_to(target)?;
        if !conversion.is_identity() {
            self.data.mapv_inplace(|v| conversion.apply(v));
        }
        self.units = Some(target.clone());
        Ok(())
    }

    /// Check that two cubes are in the same units, as required before adding or subtracting them.
    pub fn check_same_units(&self, other: &Cube) -> Result<(), CubeError> {
        let same = match (&self.units, &other.units) {
            (Some(a), Some(b)) => a.is_equivalent(b),
            (None, None) => true,
            _ => false,
        };
        if same {
            Ok(())
        } else {
            let fmt = |u: &Option<Unit>| u.as_ref().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string());
            Err(CubeError::UnitsDiffer {
                a: self.var_name.clone(),
                a_units: fmt(&self.units),
                b: other.var_name.clone(),
                b_units: fmt(&other.units),
            })
        }
    }

    pub fn name(&self) -> &str {
        self.standard_name
            .as_deref()
            .or(self.long_name.as_deref())
            .unwrap_or(&self.var_name)
    }

    /// Size in GiB the data will occupy when written as 32-bit floats.
    pub fn output_size_gb(&self) -> f64 {
        self.data.len() as f64 * 4.0 / 2f64.powi(30)
    }
}

impl Display for Cube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let units = self
            .units
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let dims = self
            .dim_coords
            .iter()
            .map(|c| format!("{}: {}", c.name(), c.len()))
            .join("; ");
        write!(f, "{} / ({units}) ({dims})", self.name())?;
        for c in self.scalar_coords.iter() {
            write!(f, "\n    scalar {}: {} {}", c.name(), c.points[0], c.units)?;
        }
        for (k, v) in self.attributes.iter() {
            write!(f, "\n    {k}: {v}")?;
        }
        Ok(())
    }
}

fn check_coords_fit(shape: &[usize], coords: &[Coord]) -> Result<(), CubeError> {
    if shape.len() != coords.len() {
        return Err(CubeError::ShapeMismatch {
            expected: coords.iter().map(|c| c.len()).collect(),
            got: shape.to_vec(),
        });
    }
    for (&n, c) in shape.iter().zip(coords.iter()) {
        if c.len() != n {
            return Err(CubeError::CoordLength {
                name: c.var_name.clone(),
                expected: n,
                got: c.len(),
            });
        }
    }
    Ok(())
}
