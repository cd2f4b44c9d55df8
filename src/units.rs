//! Physical units as they appear in `units` attributes of geophysical netCDF files.
//!
//! This is not a complete UDUNITS implementation. A [`Unit`] is a
//! product of known symbols raised to integer powers (e.g. `kg m-2 s-1`), which
//! covers what the CMORization pipeline needs: multiplying and dividing units when a
//! rule changes the meaning of the data, and converting values between two units of
//! the same dimension. Time units with a reference epoch ("days since ...") are handled
//! by [`crate::time`] instead.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("Unknown unit '{unit}' (in '{full}')")]
    UnknownUnit { unit: String, full: String },
    #[error("Cannot convert from '{from}' to '{to}', they have different dimensions")]
    Incompatible { from: String, to: String },
    #[error("Unit '{0}' has an offset from its base unit and can only be converted on its own")]
    OffsetInCompound(String),
}

impl UnitError {
    fn unknown<U: ToString, F: ToString>(unit: U, full: F) -> Self {
        Self::UnknownUnit {
            unit: unit.to_string(),
            full: full.to_string(),
        }
    }
}

/// Number of base dimensions tracked: mass, length, time, temperature, plane angle.
const NDIM: usize = 5;

struct BaseUnit {
    scale: f64,
    offset: f64,
    dims: [i32; NDIM],
}

const fn base(scale: f64, dims: [i32; NDIM]) -> BaseUnit {
    BaseUnit {
        scale,
        offset: 0.0,
        dims,
    }
}

const DIMLESS: [i32; NDIM] = [0, 0, 0, 0, 0];
const MASS: [i32; NDIM] = [1, 0, 0, 0, 0];
const LENGTH: [i32; NDIM] = [0, 1, 0, 0, 0];
const TIME: [i32; NDIM] = [0, 0, 1, 0, 0];
const TEMPERATURE: [i32; NDIM] = [0, 0, 0, 1, 0];
const ANGLE: [i32; NDIM] = [0, 0, 0, 0, 1];
const PRESSURE: [i32; NDIM] = [1, -1, -2, 0, 0];
const FORCE: [i32; NDIM] = [1, 1, -2, 0, 0];
const ENERGY: [i32; NDIM] = [1, 2, -2, 0, 0];
const POWER: [i32; NDIM] = [1, 2, -3, 0, 0];

fn lookup_base(symbol: &str) -> Option<BaseUnit> {
    let b = match symbol {
        "1" => base(1.0, DIMLESS),
        "%" | "percent" => base(0.01, DIMLESS),
        "kg" => base(1.0, MASS),
        "g" => base(1e-3, MASS),
        "m" | "meter" | "metre" => base(1.0, LENGTH),
        "km" => base(1e3, LENGTH),
        "cm" => base(1e-2, LENGTH),
        "mm" => base(1e-3, LENGTH),
        "s" | "sec" | "second" => base(1.0, TIME),
        "min" | "minute" => base(60.0, TIME),
        "h" | "hr" | "hour" => base(3600.0, TIME),
        "d" | "day" => base(86400.0, TIME),
        "K" => base(1.0, TEMPERATURE),
        "degC" | "celsius" => BaseUnit {
            scale: 1.0,
            offset: 273.15,
            dims: TEMPERATURE,
        },
        "degrees_north" | "degrees_east" | "degree_north" | "degree_east" | "degrees"
        | "degree" => base(1.0, ANGLE),
        "Pa" => base(1.0, PRESSURE),
        "hPa" | "mbar" | "millibar" | "millibars" => base(100.0, PRESSURE),
        "N" => base(1.0, FORCE),
        "J" => base(1.0, ENERGY),
        "W" => base(1.0, POWER),
        _ => return None,
    };
    Some(b)
}

#[derive(Debug, Clone, PartialEq)]
struct UnitTerm {
    symbol: String,
    exponent: i32,
}

/// A parsed physical unit, see the [module documentation](crate::units).
///
/// The symbols are kept as written so that converting `hPa` to `Pa` is a
/// real conversion rather than a relabeling, and [`Display`] gives back
/// a readable unit string (`m-2 kg day-1`, not a normalized SI form).
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    terms: Vec<UnitTerm>,
}

/// Linear conversion between two units: `new = old * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub scale: f64,
    pub offset: f64,
}

impl UnitConversion {
    pub fn apply(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

fn term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<sym>[A-Za-z_%]+|1)(?:\^|\*\*)?(?<exp>[-+]?\d+)?$")
            .expect("unit term regex must be valid")
    })
}

impl Unit {
    pub fn dimensionless() -> Self {
        Self { terms: vec![] }
    }

    /// Parse a unit string such as `kg m-2 s-1`, `m s**-2`, `W/m2` or `%`.
    ///
    /// Terms are separated by whitespace, `.` or `*`; a single `/` divides
    /// everything after it. Unknown symbols and anything else (parentheses,
    /// free text) are errors, so the caller can treat the unit as unknown.
    pub fn parse(s: &str) -> Result<Self, UnitError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UnitError::unknown("", s));
        }

        let (numer, denom) = match s.split_once('/') {
            Some((n, d)) => (n, Some(d)),
            None => (s, None),
        };

        let mut terms = Self::parse_terms(numer, s)?;
        if let Some(denom) = denom {
            let denom = denom.trim().trim_start_matches('(').trim_end_matches(')');
            for mut t in Self::parse_terms(denom, s)? {
                t.exponent = -t.exponent;
                terms.push(t);
            }
        }

        Ok(Self::simplified(terms))
    }

    fn parse_terms(part: &str, full: &str) -> Result<Vec<UnitTerm>, UnitError> {
        let re = term_regex();
        let mut terms = vec![];
        let part = part.replace("**", "^");
        for token in part
            .split(|c: char| c.is_whitespace() || c == '.' || c == '*')
            .filter(|t| !t.is_empty())
        {
            let caps = re
                .captures(token)
                .ok_or_else(|| UnitError::unknown(token, full))?;
            let symbol = &caps["sym"];
            let exponent = match caps.name("exp") {
                Some(e) => e
                    .as_str()
                    .parse::<i32>()
                    .map_err(|_| UnitError::unknown(token, full))?,
                None => 1,
            };

            if lookup_base(symbol).is_none() {
                return Err(UnitError::unknown(symbol, full));
            }
            if symbol == "1" {
                continue;
            }
            terms.push(UnitTerm {
                symbol: symbol.to_string(),
                exponent,
            });
        }
        Ok(terms)
    }

    fn simplified(terms: Vec<UnitTerm>) -> Self {
        let mut merged: Vec<UnitTerm> = vec![];
        for t in terms {
            if let Some(existing) = merged.iter_mut().find(|m| m.symbol == t.symbol) {
                existing.exponent += t.exponent;
            } else {
                merged.push(t);
            }
        }
        merged.retain(|t| t.exponent != 0);
        Self { terms: merged }
    }

    /// The unit obtained by multiplying a quantity in `self` by one in `other`.
    pub fn multiply(&self, other: &Unit) -> Unit {
        let terms = self.terms.iter().chain(other.terms.iter()).cloned().collect();
        Self::simplified(terms)
    }

    /// The unit obtained by dividing a quantity in `self` by one in `other`.
    pub fn divide(&self, other: &Unit) -> Unit {
        let inverted = other.terms.iter().map(|t| UnitTerm {
            symbol: t.symbol.clone(),
            exponent: -t.exponent,
        });
        let terms = self.terms.iter().cloned().chain(inverted).collect();
        Self::simplified(terms)
    }

    pub fn is_dimensionless(&self) -> bool {
        self.si_form().map(|(_, _, dims)| dims == DIMLESS).unwrap_or(false)
    }

    /// Scale, offset and dimension exponents relative to the SI base units.
    fn si_form(&self) -> Result<(f64, f64, [i32; NDIM]), UnitError> {
        let mut scale = 1.0;
        let mut offset = 0.0;
        let mut dims = DIMLESS;
        for t in self.terms.iter() {
            let b = lookup_base(&t.symbol).ok_or_else(|| UnitError::unknown(&t.symbol, self))?;
            if b.offset != 0.0 {
                if self.terms.len() > 1 || t.exponent != 1 {
                    return Err(UnitError::OffsetInCompound(self.to_string()));
                }
                offset = b.offset;
            }
            scale *= b.scale.powi(t.exponent);
            for (d, bd) in dims.iter_mut().zip(b.dims.iter()) {
                *d += bd * t.exponent;
            }
        }
        Ok((scale, offset, dims))
    }

    /// Compute the conversion from values in `self` to values in `target`.
    pub fn conversion_to(&self, target: &Unit) -> Result<UnitConversion, UnitError> {
        let (from_scale, from_offset, from_dims) = self.si_form()?;
        let (to_scale, to_offset, to_dims) = target.si_form()?;
        if from_dims != to_dims {
            return Err(UnitError::Incompatible {
                from: self.to_string(),
                to: target.to_string(),
            });
        }

        Ok(UnitConversion {
            scale: from_scale / to_scale,
            offset: (from_offset - to_offset) / to_scale,
        })
    }

    /// True if the two units describe the same quantity with the same scale.
    pub fn is_equivalent(&self, other: &Unit) -> bool {
        self.conversion_to(other)
            .map(|c| (c.scale - 1.0).abs() < 1e-12 && c.offset.abs() < 1e-12)
            .unwrap_or(false)
    }
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "1");
        }

        let mut first = true;
        for t in self.terms.iter() {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if t.exponent == 1 {
                write!(f, "{}", t.symbol)?;
            } else {
                write!(f, "{}{}", t.symbol, t.exponent)?;
            }
        }
        Ok(())
    }
}
