//! Compute a derived variable (e.g. the net cloud radiative effect) from its inputs.
use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use cmorize_rs::{
    derive::{get_derived, CubeSet},
    logging::init_logging,
    nc_utils::load_cube,
    save::{write_cube, LOCAL_KEYS},
};
use error_stack::ResultExt;

/// Compute a derived variable from the files containing its inputs.
///
/// Each input is given as SHORT_NAME=FILE, e.g. `rlut=rlut_Amon_2000.nc`; the
/// variable with that name is read from the file.
#[derive(Debug, Parser)]
struct Cli {
    /// Short name of the variable to derive: lwcre, swcre or netcre.
    variable: String,

    /// Where to write the derived variable.
    output_file: PathBuf,

    /// Inputs as SHORT_NAME=FILE pairs.
    #[clap(short, long = "input", value_parser = parse_input)]
    inputs: Vec<(String, PathBuf)>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

fn parse_input(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected SHORT_NAME=FILE, got '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected SHORT_NAME=FILE, got '{s}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: Cli) -> error_stack::Result<(), CliError> {
    init_logging(clargs.verbosity.log_level_filter(), None)
        .change_context_lazy(|| CliError::context("Could not set up logging"))?;
    let derived = get_derived(&clargs.variable)
        .change_context_lazy(|| CliError::context("Cannot derive the requested variable"))?;

    let mut cubes = CubeSet::new();
    for required in derived.required() {
        let (_, path) = clargs
            .inputs
            .iter()
            .find(|(name, _)| name.as_str() == *required)
            .ok_or_else(|| CliError::MissingInput(required.to_string()))?;
        let cube = load_cube(path, required).change_context_lazy(|| {
            CliError::context(format!("Error reading '{required}' from {}", path.display()))
        })?;
        cubes.insert(*required, cube);
    }

    let result = derived
        .calculate(&cubes)
        .change_context_lazy(|| CliError::context(format!("Error calculating {}", clargs.variable)))?;
    log::info!("Derived {result}");

    write_cube(&result, &clargs.output_file, LOCAL_KEYS).change_context_lazy(|| {
        CliError::context(format!("Error writing {}", clargs.output_file.display()))
    })?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("No input file given for required variable '{0}' (use --input {0}=FILE)")]
    MissingInput(String),

    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
