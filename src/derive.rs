//! Variables computed from other variables: the cloud radiative effects.
use error_stack::ResultExt;
use indexmap::IndexMap;

use crate::cube::Cube;

#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    #[error("Unknown derived variable '{0}'")]
    Unknown(String),
    #[error("Input variable '{0}' is required but was not given")]
    MissingInput(String),
    #[error("Could not calculate '{0}'")]
    Calculate(String),
}

/// Input cubes keyed by short name.
#[derive(Debug, Default, Clone)]
pub struct CubeSet(IndexMap<String, Cube>);

impl CubeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: ToString>(&mut self, short_name: S, cube: Cube) {
        self.0.insert(short_name.to_string(), cube);
    }

    pub fn get(&self, short_name: &str) -> Result<&Cube, DeriveError> {
        self.0
            .get(short_name)
            .ok_or_else(|| DeriveError::MissingInput(short_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Cube)> for CubeSet {
    fn from_iter<T: IntoIterator<Item = (String, Cube)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub trait DerivedVariable {
    /// Short name of the derived variable.
    fn short_name(&self) -> &'static str;

    /// Short names of the variables needed to compute this one.
    fn required(&self) -> &'static [&'static str];

    fn standard_name(&self) -> &'static str;

    fn long_name(&self) -> &'static str;

    fn calculate(&self, cubes: &CubeSet) -> error_stack::Result<Cube, DeriveError>;
}

/// `minuend - subtrahend`, keeping the units of the minuend.
fn difference(cubes: &CubeSet, minuend: &str, subtrahend: &str, derived: &dyn DerivedVariable) -> error_stack::Result<Cube, DeriveError> {
    let calc_err = || DeriveError::Calculate(derived.short_name().to_string());
    let mut result = cubes.get(minuend)?.clone();
    let other = cubes.get(subtrahend)?;
    result.check_same_units(other).change_context_lazy(calc_err)?;
    result.subtract(other).change_context_lazy(calc_err)?;
    set_names(&mut result, derived);
    Ok(result)
}

fn set_names(cube: &mut Cube, derived: &dyn DerivedVariable) {
    cube.var_name = derived.short_name().to_string();
    cube.standard_name = Some(derived.standard_name().to_string());
    cube.long_name = Some(derived.long_name().to_string());
}

/// Longwave cloud radiative effect: clear-sky minus all-sky outgoing longwave flux.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lwcre;

impl DerivedVariable for Lwcre {
    fn short_name(&self) -> &'static str {
        "lwcre"
    }

    fn required(&self) -> &'static [&'static str] {
        &["rlut", "rlutcs"]
    }

    fn standard_name(&self) -> &'static str {
        "toa_longwave_cloud_radiative_effect"
    }

    fn long_name(&self) -> &'static str {
        "TOA Longwave Cloud Radiative Effect"
    }

    fn calculate(&self, cubes: &CubeSet) -> error_stack::Result<Cube, DeriveError> {
        difference(cubes, "rlutcs", "rlut", self)
    }
}

/// Shortwave cloud radiative effect: clear-sky minus all-sky outgoing shortwave flux.
#[derive(Debug, Clone, Copy, Default)]
pub struct Swcre;

impl DerivedVariable for Swcre {
    fn short_name(&self) -> &'static str {
        "swcre"
    }

    fn required(&self) -> &'static [&'static str] {
        &["rsut", "rsutcs"]
    }

    fn standard_name(&self) -> &'static str {
        "toa_shortwave_cloud_radiative_effect"
    }

    fn long_name(&self) -> &'static str {
        "TOA Shortwave Cloud Radiative Effect"
    }

    fn calculate(&self, cubes: &CubeSet) -> error_stack::Result<Cube, DeriveError> {
        difference(cubes, "rsutcs", "rsut", self)
    }
}

/// Net cloud radiative effect, the sum of [`Lwcre`] and [`Swcre`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Netcre;

impl DerivedVariable for Netcre {
    fn short_name(&self) -> &'static str {
        "netcre"
    }

    fn required(&self) -> &'static [&'static str] {
        &["rlut", "rlutcs", "rsut", "rsutcs"]
    }

    fn standard_name(&self) -> &'static str {
        "toa_net_cloud_radiative_effect"
    }

    fn long_name(&self) -> &'static str {
        "TOA Net Cloud Radiative Effect"
    }

    fn calculate(&self, cubes: &CubeSet) -> error_stack::Result<Cube, DeriveError> {
        let calc_err = || DeriveError::Calculate(self.short_name().to_string());
        let mut result = Lwcre.calculate(cubes)?;
        let swcre = Swcre.calculate(cubes)?;
        result.check_same_units(&swcre).change_context_lazy(calc_err)?;
        result.add(&swcre).change_context_lazy(calc_err)?;
        set_names(&mut result, self);
        Ok(result)
    }
}

/// Look up a derived variable by its short name.
pub fn get_derived(short_name: &str) -> Result<Box<dyn DerivedVariable>, DeriveError> {
    match short_name {
        "lwcre" => Ok(Box::new(Lwcre)),
        "swcre" => Ok(Box::new(Swcre)),
        "netcre" => Ok(Box::new(Netcre)),
        _ => Err(DeriveError::Unknown(short_name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::simple_cube;
    use crate::units::Unit;
    use approx::assert_abs_diff_eq;

    fn flux(name: &str, value: f64) -> Cube {
        let mut cube = simple_cube();
        cube.var_name = name.to_string();
        cube.units = Some(Unit::parse("W m-2").unwrap());
        cube.data.fill(value);
        cube
    }

    fn inputs() -> CubeSet {
        [("rlut", 240.0), ("rlutcs", 265.0), ("rsut", 100.0), ("rsutcs", 53.0)]
            .into_iter()
            .map(|(n, v)| (n.to_string(), flux(n, v)))
            .collect()
    }

    #[test]
    fn test_cloud_radiative_effects() {
        let cubes = inputs();
        let lw = Lwcre.calculate(&cubes).unwrap();
        assert_abs_diff_eq!(lw.data[[0, 0, 0]], 25.0);
        assert_eq!(lw.var_name, "lwcre");
        assert_eq!(lw.units, cubes.get("rlutcs").unwrap().units);

        let sw = Swcre.calculate(&cubes).unwrap();
        assert_abs_diff_eq!(sw.data[[1, 1, 1]], -47.0);

        let net = get_derived("netcre").unwrap().calculate(&cubes).unwrap();
        assert_abs_diff_eq!(net.data[[1, 2, 0]], -22.0);
        assert_eq!(net.standard_name.as_deref(), Some("toa_net_cloud_radiative_effect"));
    }

    #[test]
    fn test_missing_and_mismatched_inputs() {
        let mut cubes = inputs();
        let mut bad = flux("rsut", 1.0);
        bad.units = Some(Unit::parse("K").unwrap());
        cubes.insert("rsut", bad);
        let err = Netcre.calculate(&cubes).unwrap_err();
        assert!(matches!(err.current_context(), DeriveError::Calculate(name) if name == "swcre"));

        let only_lw: CubeSet = [("rlut".to_string(), flux("rlut", 1.0))].into_iter().collect();
        let err = Lwcre.calculate(&only_lw).unwrap_err();
        assert!(matches!(err.current_context(), DeriveError::MissingInput(name) if name == "rlutcs"));

        assert!(get_derived("tas").is_err());
    }
}
