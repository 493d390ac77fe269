//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads and validates `RunConfig`
//! - wires the production collaborators into the controller
//! - prints the plan or the run report

use chrono::{Local, NaiveDate};
use clap::Parser;

use crate::checkpoint::{CheckpointLister, DirectoryLister, VolumeLister};
use crate::cli::{Command, RunArgs};
use crate::collab::{CommandPostProcessor, CommandVerifier, HttpFetcher, PrmsEngine};
use crate::config::{CheckpointSource, RunConfig};
use crate::domain::RunOutcome;
use crate::error::AppError;

pub mod pipeline;

use pipeline::{Collaborators, RunController};

/// Entry point for the `onhm` binary.
pub fn run() -> Result<(), AppError> {
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Plan(args) => handle_plan(args),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_plan(args: RunArgs) -> Result<(), AppError> {
    init_logging(args.verbose);
    let config = config_from_args(&args)?;
    let today = today_from_args(&args);

    let services = Services::from_config(&config);
    let controller = RunController::new(&config, services.collaborators());
    let plan = controller.plan(today).map_err(AppError::from)?;

    println!("{}", crate::report::format_plan(&plan, &config));
    Ok(())
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    init_logging(args.verbose);
    let config = config_from_args(&args)?;
    config.validate()?;
    let today = today_from_args(&args);

    let services = Services::from_config(&config);
    let controller = RunController::new(&config, services.collaborators());
    let report = controller.run(today)?;

    println!("{}", crate::report::format_run_report(&report, &config));

    match report.outcome {
        RunOutcome::Verified => Ok(()),
        RunOutcome::Failed => Err(AppError::new(
            5,
            format!(
                "Engine run {} .. {} failed (engine status {}, verifier status {}).",
                report.engine_window.start,
                report.engine_window.end,
                report.engine_status,
                report
                    .verifier_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "not run".to_string()),
            ),
        )),
    }
}

pub fn config_from_args(args: &RunArgs) -> Result<RunConfig, AppError> {
    let mut config = RunConfig::from_env()?;
    apply_args(&mut config, args);
    Ok(config)
}

/// CLI flags win over the environment.
pub fn apply_args(config: &mut RunConfig, args: &RunArgs) {
    if let Some(dir) = &args.work_dir {
        config.work_dir = dir.clone();
    }
    if let Some(days) = args.provisional_days {
        config.provisional_days = days;
    }
    if let Some(mode) = args.acquisition {
        config.acquisition_mode = mode;
    }
    config.save_final_state |= args.save_final_state;
    config.lagged_checkpoint |= args.lagged_checkpoint;
}

fn today_from_args(args: &RunArgs) -> NaiveDate {
    args.today.unwrap_or_else(|| Local::now().date_naive())
}

/// Production collaborators, owned for the duration of one invocation.
struct Services {
    lister: Box<dyn CheckpointLister>,
    fetcher: HttpFetcher,
    engine: PrmsEngine,
    verifier: CommandVerifier,
    post: CommandPostProcessor,
}

impl Services {
    fn from_config(config: &RunConfig) -> Self {
        let lister: Box<dyn CheckpointLister> = match &config.checkpoint_source {
            CheckpointSource::Directory => Box::new(DirectoryLister),
            CheckpointSource::Volume { volume, image, mount } => {
                Box::new(VolumeLister::new(volume.clone(), image.clone(), mount.clone()))
            }
        };
        Self {
            lister,
            fetcher: HttpFetcher::new(config.fetch_url.clone()),
            engine: PrmsEngine,
            verifier: CommandVerifier {
                program: config.verifier_path.clone(),
            },
            post: CommandPostProcessor {
                program: config.postprocessor_path.clone(),
            },
        }
    }

    fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            lister: self.lister.as_ref(),
            fetcher: &self.fetcher,
            engine: &self.engine,
            verifier: &self.verifier,
            post: &self.post,
        }
    }
}

/// Rewrite argv so a bare work directory means `run`.
///
/// Rules:
/// - `onhm`                     -> `onhm run`
/// - `onhm DIR`                 -> `onhm run --work-dir DIR`
/// - `onhm --flag ...`          -> `onhm run --flag ...`
/// - `onhm --help/--version/-h` -> unchanged
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    if matches!(arg1.as_str(), "run" | "plan") {
        return argv;
    }

    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
        return argv;
    }

    let rest = argv.split_off(2);
    argv.truncate(1);
    argv.extend(["run".to_string(), "--work-dir".to_string(), arg1]);
    argv.extend(rest);
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_directory_becomes_run() {
        assert_eq!(
            rewrite_args(argv(&["onhm", "/var/lib/nhm", "-v"])),
            argv(&["onhm", "run", "--work-dir", "/var/lib/nhm", "-v"])
        );
        assert_eq!(rewrite_args(argv(&["onhm"])), argv(&["onhm", "run"]));
        assert_eq!(
            rewrite_args(argv(&["onhm", "--today", "2019-11-10"])),
            argv(&["onhm", "run", "--today", "2019-11-10"])
        );
        assert_eq!(rewrite_args(argv(&["onhm", "plan"])), argv(&["onhm", "plan"]));
    }

    #[test]
    fn flags_override_config() {
        let mut config = RunConfig::default();
        let args = RunArgs {
            provisional_days: Some(10),
            lagged_checkpoint: true,
            ..RunArgs::default()
        };
        apply_args(&mut config, &args);
        assert_eq!(config.provisional_days, 10);
        assert!(config.lagged_checkpoint);
        assert!(!config.save_final_state);
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = crate::cli::Cli::parse_from(argv(&[
            "onhm",
            "run",
            "--today",
            "2019-11-10",
            "--acquisition",
            "best-effort",
        ]));
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.today, NaiveDate::from_ymd_opt(2019, 11, 10));
        assert_eq!(args.acquisition, Some(crate::domain::AcquisitionMode::BestEffort));
    }
}
