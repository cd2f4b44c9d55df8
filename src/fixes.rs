//! Corrections for known problems in model output.
//!
//! A [`Fix`] repairs one variable of one model. Fixes are looked up by project,
//! model and short name with [`get_fixes`]; most combinations have none.
use crate::cube::Cube;

/// A correction for one variable of one model. Both steps default to doing nothing.
pub trait Fix: Send + Sync {
    /// Correct names, units or attributes. Runs before [`Fix::fix_data`].
    fn fix_metadata(&self, _cube: &mut Cube) {}

    /// Correct the data values. Metadata must not change.
    fn fix_data(&self, _cube: &mut Cube) {}
}

/// Multiply the data by a constant, for variables stored in the wrong units or with the
/// wrong sign but labelled correctly.
#[derive(Debug, Clone, Copy)]
pub struct ScaleData(pub f64);

impl Fix for ScaleData {
    fn fix_data(&self, cube: &mut Cube) {
        cube.scale(self.0);
    }
}

/// Replace an incorrect standard name.
#[derive(Debug, Clone, Copy)]
pub struct StandardName(pub &'static str);

impl Fix for StandardName {
    fn fix_metadata(&self, cube: &mut Cube) {
        cube.standard_name = Some(self.0.to_string());
    }
}

type FixFactory = fn() -> Box<dyn Fix>;

fn inmcm4_gpp() -> Box<dyn Fix> {
    Box::new(ScaleData(-1.0))
}

fn inmcm4_lai() -> Box<dyn Fix> {
    Box::new(ScaleData(0.01))
}

fn inmcm4_nbp() -> Box<dyn Fix> {
    Box::new(StandardName(
        "surface_net_downward_mass_flux_of_carbon_dioxide_expressed_as_carbon_due_to_all_land_processes",
    ))
}

fn inmcm4_fgco2() -> Box<dyn Fix> {
    Box::new(StandardName(
        "surface_downward_mass_flux_of_carbon_dioxide_expressed_as_carbon",
    ))
}

static FIXES: &[(&str, &str, &str, FixFactory)] = &[
    ("CMIP5", "inmcm4", "gpp", inmcm4_gpp),
    ("CMIP5", "inmcm4", "lai", inmcm4_lai),
    ("CMIP5", "inmcm4", "nbp", inmcm4_nbp),
    ("CMIP5", "inmcm4", "fgco2", inmcm4_fgco2),
];

/// All fixes registered for this variable, in the order they should run.
pub fn get_fixes(project: &str, model: &str, short_name: &str) -> Vec<Box<dyn Fix>> {
    FIXES
        .iter()
        .filter(|(p, m, v, _)| {
            p.eq_ignore_ascii_case(project) && m.eq_ignore_ascii_case(model) && *v == short_name
        })
        .map(|(_, _, _, make)| make())
        .collect()
}

/// Apply every fix for the variable to `cube`: all metadata fixes, then all data fixes.
/// Returns how many fixes were found.
pub fn apply_fixes(cube: &mut Cube, project: &str, model: &str, short_name: &str) -> usize {
    let fixes = get_fixes(project, model, short_name);
    for fix in fixes.iter() {
        fix.fix_metadata(cube);
    }
    for fix in fixes.iter() {
        fix.fix_data(cube);
    }
    if fixes.is_empty() {
        log::debug!("No fixes for {project} {model} {short_name}");
    } else {
        log::info!("Applied {} fix(es) to {project} {model} {short_name}", fixes.len());
    }
    fixes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::simple_cube;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_gpp_sign() {
        let mut cube = simple_cube();
        cube.standard_name = Some("gross_primary_productivity_of_biomass_expressed_as_carbon".to_string());
        let original = cube.clone();
        assert_eq!(apply_fixes(&mut cube, "CMIP5", "inmcm4", "gpp"), 1);
        assert_abs_diff_eq!(cube.data[[1, 2, 1]], -original.data[[1, 2, 1]]);
        assert_eq!(cube.standard_name, original.standard_name);
        assert_eq!(cube.units, original.units);
    }

    #[test]
    fn test_lai_scale() {
        let mut cube = simple_cube();
        let original = cube.clone();
        apply_fixes(&mut cube, "CMIP5", "inmcm4", "lai");
        assert_abs_diff_eq!(cube.data[[0, 0, 0]], original.data[[0, 0, 0]] * 0.01);
        assert_eq!(cube.attributes, original.attributes);
    }

    #[test]
    fn test_standard_names() {
        let mut cube = simple_cube();
        let original = cube.clone();
        apply_fixes(&mut cube, "cmip5", "INMCM4", "fgco2");
        assert_eq!(
            cube.standard_name.as_deref(),
            Some("surface_downward_mass_flux_of_carbon_dioxide_expressed_as_carbon")
        );
        assert_eq!(cube.data, original.data);

        apply_fixes(&mut cube, "CMIP5", "inmcm4", "nbp");
        assert!(cube.standard_name.unwrap().ends_with("due_to_all_land_processes"));
    }

    #[test]
    fn test_no_fixes() {
        assert!(get_fixes("CMIP5", "inmcm4", "tas").is_empty());
        assert!(get_fixes("CMIP6", "inmcm4", "gpp").is_empty());
        let mut cube = simple_cube();
        let original = cube.clone();
        assert_eq!(apply_fixes(&mut cube, "CMIP5", "other-model", "gpp"), 0);
        assert_eq!(cube.data, original.data);
    }
}
