//! Error types.
//!
//! Each component returns its own `thiserror` enum so callers can match on the
//! failing condition. The binary collapses them into `AppError`, which carries
//! the process exit code.

use std::path::PathBuf;

use chrono::NaiveDate;

use crate::checkpoint::CheckpointError;

/// Configuration problems found while loading or validating `RunConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("Work directory does not exist: {0}")]
    MissingWorkDir(PathBuf),

    #[error("No engine executable configured (set ONHM_ENGINE_PATH)")]
    MissingEngine,

    #[error("No output variables configured for post-processing")]
    NoOutputVariables,

    #[error("Engine window starts after it ends: {start} > {end}")]
    InvertedEngineWindow { start: NaiveDate, end: NaiveDate },

    #[error(
        "ONHM_SAVE_FINAL_STATE and ONHM_LAGGED_CHECKPOINT are exclusive: \
         a final-state checkpoint would always be newer than the lagged one"
    )]
    ConflictingCheckpointModes,
}

/// Fatal controller halts. Each variant names the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("checkpoint discovery failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("pull window {start}..{end} is empty; nothing to run")]
    EmptyPullWindow { start: NaiveDate, end: NaiveDate },

    #[error("engine window {start}..{end} is empty; nothing to simulate")]
    EmptyEngineWindow { start: NaiveDate, end: NaiveDate },

    #[error("driving data still incomplete for {start}..{end} after one retry")]
    IncompleteDataWindow { start: NaiveDate, end: NaiveDate },

    #[error("data fetch for {start}..{end} failed: {reason}")]
    Fetch {
        start: NaiveDate,
        end: NaiveDate,
        reason: String,
    },

    #[error("could not clear verification marker {path}: {source}")]
    Housekeeping {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not promote staged checkpoint {staged} to {target}: {source}")]
    CheckpointPromotion {
        staged: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },

    #[error("engine invocation for {start}..{end} could not be started: {reason}")]
    Engine {
        start: NaiveDate,
        end: NaiveDate,
        reason: String,
    },

    #[error("verifier could not be run in {work_dir}: {reason}")]
    Verifier { work_dir: PathBuf, reason: String },

    #[error("lagged checkpoint run to {date} exited with status {status}")]
    LaggedCheckpointFailed { date: NaiveDate, status: i32 },

    #[error("post-processing of '{variable}' failed: {reason}")]
    PostProcess { variable: String, reason: String },
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Checkpoint(_) => 3,
            RunError::EmptyPullWindow { .. }
            | RunError::EmptyEngineWindow { .. }
            | RunError::IncompleteDataWindow { .. }
            | RunError::Fetch { .. } => 4,
            RunError::Housekeeping { .. }
            | RunError::CheckpointPromotion { .. }
            | RunError::Engine { .. }
            | RunError::Verifier { .. }
            | RunError::LaggedCheckpointFailed { .. } => 5,
            RunError::PostProcess { .. } => 6,
        }
    }
}

/// Process-level error: a message plus the exit code the binary returns.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::new(2, format!("Configuration error: {err}"))
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        AppError::new(err.exit_code(), format!("Run halted: {err}"))
    }
}
