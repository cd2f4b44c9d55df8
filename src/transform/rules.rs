//! Corrections for raw ERA-Interim variables whose units or sign conventions
//! do not describe the data the way the target tables do.
//!
//! Each raw variable name maps to at most one [`RawRule`]. Accumulated fields
//! are stored per day but labelled without the "per day", water amounts are
//! given as depth of water, and fractions are unitless where a percentage
//! is wanted.
use error_stack::ResultExt;

use crate::cmor_table::VariableDefinition;
use crate::cube::{AttrValue, Cube, CubeError};
use crate::units::Unit;

use super::TransformError;

pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Direction in which a flux counts as positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawRule {
    /// Depth of water per day to mass of water per area per day. When
    /// `force_metres` is set, the raw units (e.g. "m of water equivalent")
    /// are replaced by metres first.
    WaterDepthToMass { force_metres: bool },
    /// Energy accumulated over a day to a mean flux, optionally flipping the
    /// sign to match the target direction.
    AccumulatedFlux { positive: Direction, flip_sign: bool },
    /// Only the direction is missing.
    Positive(Direction),
    /// Fraction (0 - 1) to the target units (percent).
    FractionToPercent,
    /// Geopotential to geopotential height.
    GeopotentialToHeight,
}

static RULES: &[(&str, RawRule)] = &[
    ("e", RawRule::WaterDepthToMass { force_metres: true }),
    ("sf", RawRule::WaterDepthToMass { force_metres: true }),
    ("tp", RawRule::WaterDepthToMass { force_metres: false }),
    ("pev", RawRule::WaterDepthToMass { force_metres: false }),
    ("ssr", RawRule::AccumulatedFlux { positive: Direction::Down, flip_sign: false }),
    ("ssrd", RawRule::AccumulatedFlux { positive: Direction::Down, flip_sign: false }),
    ("tisr", RawRule::AccumulatedFlux { positive: Direction::Down, flip_sign: false }),
    ("hfds", RawRule::AccumulatedFlux { positive: Direction::Down, flip_sign: false }),
    ("str", RawRule::AccumulatedFlux { positive: Direction::Down, flip_sign: false }),
    ("slhf", RawRule::AccumulatedFlux { positive: Direction::Up, flip_sign: true }),
    ("sshf", RawRule::AccumulatedFlux { positive: Direction::Up, flip_sign: true }),
    ("iews", RawRule::Positive(Direction::Down)),
    ("inss", RawRule::Positive(Direction::Down)),
    ("lsm", RawRule::FractionToPercent),
    ("tcc", RawRule::FractionToPercent),
    ("z", RawRule::GeopotentialToHeight),
];

/// The rule for a raw variable name, if it needs one.
pub fn rule_for(raw_name: &str) -> Option<RawRule> {
    RULES
        .iter()
        .find(|(name, _)| *name == raw_name)
        .map(|(_, rule)| *rule)
}

fn parse_fixed(units: &str) -> Result<Unit, CubeError> {
    Ok(Unit::parse(units)?)
}

fn known_units(cube: &Cube) -> Result<&Unit, CubeError> {
    cube.units
        .as_ref()
        .ok_or_else(|| CubeError::UnknownUnits(cube.var_name.clone()))
}

impl RawRule {
    pub fn apply(&self, cube: &mut Cube, definition: &VariableDefinition) -> Result<(), CubeError> {
        match self {
            RawRule::WaterDepthToMass { force_metres } => {
                if *force_metres {
                    cube.units = Some(parse_fixed("m")?);
                }
                let units = known_units(cube)?.multiply(&parse_fixed("kg m-3 day-1")?);
                cube.units = Some(units);
                cube.scale(1000.0);
            }
            RawRule::AccumulatedFlux { positive, flip_sign } => {
                let units = known_units(cube)?.multiply(&parse_fixed("day-1")?);
                cube.units = Some(units);
                if *flip_sign {
                    cube.scale(-1.0);
                }
                set_positive(cube, *positive);
            }
            RawRule::Positive(positive) => set_positive(cube, *positive),
            RawRule::FractionToPercent => {
                cube.units = Some(Unit::parse(&definition.units)?);
                cube.scale(100.0);
            }
            RawRule::GeopotentialToHeight => {
                let units = known_units(cube)?.divide(&parse_fixed("m s-2")?);
                cube.units = Some(units);
                cube.scale(1.0 / STANDARD_GRAVITY);
            }
        }
        Ok(())
    }
}

fn set_positive(cube: &mut Cube, direction: Direction) {
    cube.attributes
        .insert("positive".to_string(), AttrValue::Str(direction.to_string()));
}

/// Apply the rule for the cube's current (raw) variable name, if there is one.
pub fn apply_raw_rule(cube: &mut Cube, definition: &VariableDefinition) -> error_stack::Result<(), TransformError> {
    let raw_name = cube.var_name.clone();
    if let Some(rule) = rule_for(&raw_name) {
        log::debug!("Applying {rule:?} to raw variable '{raw_name}'");
        rule.apply(cube, definition)
            .change_context_lazy(|| TransformError::Rule(raw_name.clone()))?;
    }
    Ok(())
}
