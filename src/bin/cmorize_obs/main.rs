use std::process::ExitCode;

use chrono::Datelike;
use clap::Parser;
use cmorize_rs::{
    cmor_table::VariableTable,
    config::{DatasetConfig, VariableSpec},
    dispatch::{default_worker_count, run_batch},
    logging::init_logging,
    resolver::resolve_file_groups,
    transform::{cmorize_group, TransformContext},
};
use error_stack::ResultExt;

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: cli::Cli) -> error_stack::Result<(), CliError> {
    init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref())
        .change_context_lazy(|| CliError::context("Could not set up logging"))?;
    let config = match clargs.config.as_deref() {
        Some(path) => DatasetConfig::load(Some(path)),
        None => DatasetConfig::builtin(clargs.dataset),
    };
    let mut config = config.change_context_lazy(|| CliError::context("Error loading the dataset configuration"))?;
    config
        .attributes
        .resolve_comment_year(chrono::Local::now().year());

    if clargs.check_config_only {
        println!("{}", config.summary());
        return Ok(());
    }

    let variables = select_variables(&config, &clargs.variables)?;
    let table = VariableTable::for_project(&config.attributes.project_id, clargs.table.as_deref())
        .change_context_lazy(|| CliError::context("Error loading the variable table"))?;

    std::fs::create_dir_all(&clargs.output_dir).change_context_lazy(|| {
        CliError::context(format!(
            "Error creating output directory {}",
            clargs.output_dir.display()
        ))
    })?;

    let ctx = TransformContext {
        attributes: &config.attributes,
        table: &table,
        out_dir: &clargs.output_dir,
    };
    let workers = clargs
        .workers
        .map(|n| n.get())
        .unwrap_or_else(default_worker_count);

    let results = run_batch(
        &variables,
        |spec| resolve_file_groups(&clargs.input_dir, spec),
        |spec, group| cmorize_group(spec, group, &ctx),
        workers,
    )
    .change_context_lazy(|| CliError::context("CMORization did not complete"))?;

    log::info!(
        "Wrote {} files to {}",
        results.len(),
        clargs.output_dir.display()
    );
    Ok(())
}

/// The configured variables to process, all of them if `names` is empty.
fn select_variables(config: &DatasetConfig, names: &[String]) -> error_stack::Result<Vec<VariableSpec>, CliError> {
    if names.is_empty() {
        return Ok(config.variables.clone());
    }

    names
        .iter()
        .map(|name| {
            config
                .variable(name)
                .cloned()
                .ok_or_else(|| error_stack::Report::new(CliError::UnknownVariable(name.clone())))
        })
        .collect()
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("Variable '{0}' is not in the dataset configuration")]
    UnknownVariable(String),

    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
