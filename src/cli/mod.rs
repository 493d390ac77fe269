//! Command-line parsing for the run controller.
//!
//! Argument parsing stays here; `app` maps the parsed flags onto `RunConfig`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::domain::AcquisitionMode;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "onhm", version, about = "Incremental run controller for the NHM-PRMS simulation")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover the baseline, pull driving data, run and verify the engine,
    /// then post-process the outputs.
    Run(RunArgs),
    /// Print the baseline and pull window without running anything.
    Plan(RunArgs),
}

/// Overrides on top of the `ONHM_*` environment configuration.
#[derive(Debug, Parser, Clone, Default)]
pub struct RunArgs {
    /// Working directory holding the control file, restart/ and outputs.
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Treat this date as today (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    pub today: Option<NaiveDate>,

    /// Days of driving data the source may still revise.
    #[arg(long)]
    pub provisional_days: Option<u32>,

    /// What to do when driving data is still incomplete after the retry.
    #[arg(long, value_enum)]
    pub acquisition: Option<AcquisitionMode>,

    /// Ask the engine to write a checkpoint at the end of the run.
    #[arg(long)]
    pub save_final_state: bool,

    /// After a verified run, write a checkpoint shifted back by the
    /// provisional lag.
    #[arg(long)]
    pub lagged_checkpoint: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,
}
