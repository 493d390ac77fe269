//! External collaborators of the run controller.
//!
//! The controller only sees the traits; the production implementations here
//! shell out to the engine, verifier and converter, and call the fetch
//! service over HTTP. Every call blocks until the collaborator finishes.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use chrono::{Datelike, NaiveDate};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::domain::PullWindow;

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open log {path}: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Status(String),
}

/// Whether the fetch service delivered every day of the requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Complete,
    Incomplete,
}

pub trait DataFetcher {
    fn fetch(&self, window: PullWindow) -> Result<FetchStatus, CollabError>;
}

/// One engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub engine_path: PathBuf,
    pub work_dir: PathBuf,
    pub load_initial_state: bool,
    pub save_final_state: bool,
    pub control_file: PathBuf,
    pub initial_state_file: Option<PathBuf>,
    pub final_state_file: Option<PathBuf>,
    pub log_file: PathBuf,
}

pub trait Engine {
    /// Run to completion and return the exit status.
    fn run(&self, request: &EngineRequest) -> Result<i32, CollabError>;
}

pub trait Verifier {
    /// Returns 0 when the run in `work_dir` is verified.
    fn verify(&self, work_dir: &Path, log_file_name: &str, min_elapsed_minutes: u32) -> Result<i32, CollabError>;
}

pub trait PostProcessor {
    /// Convert one output variable's tabular file into the archival format.
    fn convert(&self, work_dir: &Path, variable: &str) -> Result<(), CollabError>;
}

fn status_code(status: ExitStatus) -> i32 {
    // Killed by a signal: no code.
    status.code().unwrap_or(-1)
}

/// Runs the PRMS executable with `-set` overrides on top of the control file.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrmsEngine;

impl PrmsEngine {
    pub fn args(request: &EngineRequest) -> Vec<String> {
        let mut args = vec![
            "-C".to_string(),
            request.control_file.display().to_string(),
            "-set".to_string(),
            "start_time".to_string(),
            prms_time(request.start),
            "-set".to_string(),
            "end_time".to_string(),
            prms_time(request.end),
            "-set".to_string(),
            "init_vars_from_file".to_string(),
            flag(request.load_initial_state),
        ];
        if let (true, Some(file)) = (request.load_initial_state, &request.initial_state_file) {
            args.extend(["-set".to_string(), "var_init_file".to_string(), file.display().to_string()]);
        }
        args.extend([
            "-set".to_string(),
            "save_vars_to_file".to_string(),
            flag(request.save_final_state),
        ]);
        if let (true, Some(file)) = (request.save_final_state, &request.final_state_file) {
            args.extend(["-set".to_string(), "var_save_file".to_string(), file.display().to_string()]);
        }
        args
    }
}

fn prms_time(date: NaiveDate) -> String {
    format!("{},{},{},0,0,0", date.year(), date.month(), date.day())
}

fn flag(on: bool) -> String {
    let value = if on { "1" } else { "0" };
    value.to_string()
}

impl Engine for PrmsEngine {
    fn run(&self, request: &EngineRequest) -> Result<i32, CollabError> {
        let log_path = request.work_dir.join(&request.log_file);
        let log_err = |source| CollabError::Log {
            path: log_path.clone(),
            source,
        };
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(log_err)?;
        let log_stderr = log.try_clone().map_err(log_err)?;

        let args = Self::args(request);
        tracing::debug!(engine = %request.engine_path.display(), ?args, "starting engine");
        let status = Command::new(&request.engine_path)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_stderr))
            .status()
            .map_err(|source| CollabError::Spawn {
                program: request.engine_path.clone(),
                source,
            })?;
        Ok(status_code(status))
    }
}

/// Runs an external verifier as `<program> <work_dir> <log_file_name> <min_minutes>`.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    pub program: PathBuf,
}

impl Verifier for CommandVerifier {
    fn verify(&self, work_dir: &Path, log_file_name: &str, min_elapsed_minutes: u32) -> Result<i32, CollabError> {
        let status = Command::new(&self.program)
            .arg(work_dir)
            .arg(log_file_name)
            .arg(min_elapsed_minutes.to_string())
            .current_dir(work_dir)
            .status()
            .map_err(|source| CollabError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(status_code(status))
    }
}

/// Runs an external converter as `<program> <work_dir> <variable>`.
#[derive(Debug, Clone)]
pub struct CommandPostProcessor {
    pub program: PathBuf,
}

impl PostProcessor for CommandPostProcessor {
    fn convert(&self, work_dir: &Path, variable: &str) -> Result<(), CollabError> {
        let status = Command::new(&self.program)
            .arg(work_dir)
            .arg(variable)
            .current_dir(work_dir)
            .status()
            .map_err(|source| CollabError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(CollabError::Status(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}

/// Asks the fetch/regrid service to produce driving data for a window.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    complete: bool,
    #[serde(default)]
    message: Option<String>,
}

impl DataFetcher for HttpFetcher {
    fn fetch(&self, window: PullWindow) -> Result<FetchStatus, CollabError> {
        let start = window.start.format("%Y-%m-%d").to_string();
        let end = window.end.format("%Y-%m-%d").to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[("start_date", &start), ("end_date", &end)])
            .send()?;

        if !resp.status().is_success() {
            return Err(CollabError::Status(format!(
                "fetch service returned status {}",
                resp.status()
            )));
        }

        let body: FetchResponse = resp.json()?;
        if let Some(message) = &body.message {
            tracing::info!(%start, %end, message, "fetch service");
        }
        Ok(if body.complete {
            FetchStatus::Complete
        } else {
            FetchStatus::Incomplete
        })
    }
}
