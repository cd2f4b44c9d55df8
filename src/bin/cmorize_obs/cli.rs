//! Command line interface definitions
use std::{num::NonZeroUsize, path::PathBuf};

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use cmorize_rs::config::BuiltinDataset;

/// Reformat raw observational/reanalysis netCDF files into standardized (CMOR) files.
///
/// Every variable in the dataset configuration is processed in turn. The input
/// files of a variable are standardized in parallel; if any of them fails, the
/// others are allowed to finish and the program stops with an error before
/// starting the next variable.
#[derive(Debug, Parser)]
pub(crate) struct Cli {
    /// Directory containing the raw netCDF files.
    #[clap(short, long)]
    pub(crate) input_dir: PathBuf,

    /// Directory to write the standardized files to. Created if needed.
    #[clap(short, long)]
    pub(crate) output_dir: PathBuf,

    /// Dataset configuration TOML file. If not given, the built-in configuration
    /// chosen with --dataset is used.
    #[clap(short, long, conflicts_with = "dataset")]
    pub(crate) config: Option<PathBuf>,

    /// Built-in dataset configuration to use: "era-interim" or "duveiller2018".
    #[clap(short, long, default_value_t)]
    pub(crate) dataset: BuiltinDataset,

    /// Variable table TOML file to use instead of the built-in table.
    #[clap(short, long)]
    pub(crate) table: Option<PathBuf>,

    /// Only process these configured variables (may be repeated).
    #[clap(long = "variable")]
    pub(crate) variables: Vec<String>,

    /// Maximum number of input files to process at once. Defaults to two
    /// workers per three CPUs.
    #[clap(short, long)]
    pub(crate) workers: Option<NonZeroUsize>,

    /// Also write the log messages to this file. An existing file is overwritten.
    #[clap(long)]
    pub(crate) log_file: Option<PathBuf>,

    /// Print the loaded configuration and exit without processing anything.
    #[clap(long)]
    pub(crate) check_config_only: bool,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,
}
