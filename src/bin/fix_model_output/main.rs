//! Apply the known corrections for one model variable and write the corrected file.
use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use cmorize_rs::{
    fixes::apply_fixes,
    logging::init_logging,
    nc_utils::load_cube,
    save::{write_cube, LOCAL_KEYS},
};
use error_stack::ResultExt;

/// Correct known problems in one variable of a model output file.
///
/// Fixes are looked up by project, model and variable name; if there are none,
/// the variable is copied unchanged (with a warning).
#[derive(Debug, Parser)]
struct Cli {
    /// The netCDF file to read.
    input_file: PathBuf,

    /// Where to write the corrected variable.
    output_file: PathBuf,

    /// Name of the variable in the input file.
    #[clap(short = 'n', long)]
    var_name: String,

    /// Project the model output belongs to, e.g. CMIP5.
    #[clap(short, long)]
    project: String,

    /// Model name, e.g. inmcm4.
    #[clap(short, long)]
    model: String,

    /// Short name to look up fixes for, if different from the variable name.
    #[clap(short, long)]
    short_name: Option<String>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
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
    let mut cube = load_cube(&clargs.input_file, &clargs.var_name).change_context_lazy(|| {
        CliError::context(format!(
            "Error reading '{}' from {}",
            clargs.var_name,
            clargs.input_file.display()
        ))
    })?;

    let short_name = clargs.short_name.as_deref().unwrap_or(&clargs.var_name);
    let nfixes = apply_fixes(&mut cube, &clargs.project, &clargs.model, short_name);
    if nfixes == 0 {
        log::warn!(
            "No fixes are defined for {} {} {short_name}, output will match the input",
            clargs.project,
            clargs.model
        );
    }

    write_cube(&cube, &clargs.output_file, LOCAL_KEYS).change_context_lazy(|| {
        CliError::context(format!(
            "Error writing {}",
            clargs.output_file.display()
        ))
    })?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
