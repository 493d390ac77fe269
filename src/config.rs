//! Controller configuration.
//!
//! Everything the controller needs to know about its deployment lives in one
//! `RunConfig`: loaded from `ONHM_*` environment variables (a `.env` file is
//! honored), overridden by CLI flags, then validated once before the run.

use std::path::PathBuf;

use chrono::NaiveDate;

use crate::domain::AcquisitionMode;
use crate::error::ConfigError;

pub const DEFAULT_PROVISIONAL_DAYS: u32 = 59;

pub const DEFAULT_OUTPUT_VARIABLES: [&str; 6] = [
    "dprst_stor_hru",
    "gwres_stor",
    "hru_impervstor",
    "hru_intcpstor",
    "pkwater_equiv",
    "soil_moist_tot",
];

/// Where restart files are listed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSource {
    /// `<work_dir>/<restart_dir>` on the local filesystem.
    Directory,
    /// `<mount>/<restart_dir>` inside a named container volume.
    Volume {
        volume: String,
        image: String,
        mount: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub work_dir: PathBuf,
    /// Relative to `work_dir` (or to the volume mount).
    pub restart_dir: PathBuf,
    pub checkpoint_extension: String,
    pub checkpoint_source: CheckpointSource,

    pub engine_path: PathBuf,
    pub control_file: PathBuf,
    pub log_file: PathBuf,
    /// Engine window; each end defaults from the pull window when unset.
    pub engine_start: Option<NaiveDate>,
    pub engine_end: Option<NaiveDate>,
    pub save_final_state: bool,
    /// Re-run the engine to leave a checkpoint `provisional_days` before the
    /// end of the pull window.
    pub lagged_checkpoint: bool,

    pub provisional_days: u32,
    pub acquisition_mode: AcquisitionMode,
    pub fetch_url: String,

    pub verifier_path: PathBuf,
    pub verify_log_name: String,
    pub min_elapsed_minutes: u32,

    pub postprocessor_path: PathBuf,
    pub output_variables: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/nhm/NHM-PRMS_CONUS"),
            restart_dir: PathBuf::from("restart"),
            checkpoint_extension: "restart".to_string(),
            checkpoint_source: CheckpointSource::Directory,
            engine_path: PathBuf::new(),
            control_file: PathBuf::from("./NHM-PRMS.control"),
            log_file: PathBuf::from("./prms.log"),
            engine_start: None,
            engine_end: None,
            save_final_state: false,
            lagged_checkpoint: false,
            provisional_days: DEFAULT_PROVISIONAL_DAYS,
            acquisition_mode: AcquisitionMode::Strict,
            fetch_url: "http://localhost:8000/fetch".to_string(),
            verifier_path: PathBuf::from("prms_verifier"),
            verify_log_name: "prms.out".to_string(),
            min_elapsed_minutes: 1,
            postprocessor_path: PathBuf::from("prms_outputs2_ncf"),
            output_variables: DEFAULT_OUTPUT_VARIABLES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup, starting from the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("ONHM_WORK_DIR") {
            cfg.work_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_RESTART_DIR") {
            cfg.restart_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_CHECKPOINT_EXT") {
            cfg.checkpoint_extension = v.trim_start_matches('.').to_string();
        }
        if let Some(volume) = get("ONHM_CHECKPOINT_VOLUME") {
            cfg.checkpoint_source = CheckpointSource::Volume {
                volume,
                image: get("ONHM_CHECKPOINT_IMAGE").unwrap_or_else(|| "alpine".to_string()),
                mount: get("ONHM_CHECKPOINT_MOUNT").unwrap_or_else(|| "/nhm".to_string()),
            };
        }

        if let Some(v) = get("ONHM_ENGINE_PATH") {
            cfg.engine_path = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_CONTROL_FILE") {
            cfg.control_file = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_LOG_FILE") {
            cfg.log_file = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_ENGINE_START") {
            cfg.engine_start = Some(parse_date("ONHM_ENGINE_START", &v)?);
        }
        if let Some(v) = get("ONHM_ENGINE_END") {
            cfg.engine_end = Some(parse_date("ONHM_ENGINE_END", &v)?);
        }
        if let Some(v) = get("ONHM_SAVE_FINAL_STATE") {
            cfg.save_final_state = parse_bool("ONHM_SAVE_FINAL_STATE", &v)?;
        }
        if let Some(v) = get("ONHM_LAGGED_CHECKPOINT") {
            cfg.lagged_checkpoint = parse_bool("ONHM_LAGGED_CHECKPOINT", &v)?;
        }

        if let Some(v) = get("ONHM_PROVISIONAL_DAYS") {
            cfg.provisional_days = parse_u32("ONHM_PROVISIONAL_DAYS", &v)?;
        }
        if let Some(v) = get("ONHM_ACQUISITION_MODE") {
            cfg.acquisition_mode = match v.to_ascii_lowercase().as_str() {
                "strict" => AcquisitionMode::Strict,
                "best-effort" | "best_effort" => AcquisitionMode::BestEffort,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "ONHM_ACQUISITION_MODE",
                        value: v,
                    });
                }
            };
        }
        if let Some(v) = get("ONHM_FETCH_URL") {
            cfg.fetch_url = v;
        }

        if let Some(v) = get("ONHM_VERIFIER") {
            cfg.verifier_path = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_VERIFY_LOG") {
            cfg.verify_log_name = v;
        }
        if let Some(v) = get("ONHM_MIN_ELAPSED_MINUTES") {
            cfg.min_elapsed_minutes = parse_u32("ONHM_MIN_ELAPSED_MINUTES", &v)?;
        }

        if let Some(v) = get("ONHM_POSTPROCESSOR") {
            cfg.postprocessor_path = PathBuf::from(v);
        }
        if let Some(v) = get("ONHM_OUTPUT_VARIABLES") {
            cfg.output_variables = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(cfg)
    }

    /// Checks that must hold before the controller touches anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingEngine);
        }
        if !self.work_dir.is_dir() {
            return Err(ConfigError::MissingWorkDir(self.work_dir.clone()));
        }
        if self.output_variables.is_empty() {
            return Err(ConfigError::NoOutputVariables);
        }
        if self.fetch_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ONHM_FETCH_URL",
                value: String::new(),
            });
        }
        if let (Some(start), Some(end)) = (self.engine_start, self.engine_end) {
            if start > end {
                return Err(ConfigError::InvertedEngineWindow { start, end });
            }
        }
        if self.save_final_state && self.lagged_checkpoint {
            return Err(ConfigError::ConflictingCheckpointModes);
        }
        Ok(())
    }

    pub fn restart_path(&self) -> PathBuf {
        self.work_dir.join(&self.restart_dir)
    }

    /// Directory handed to the checkpoint lister. A volume lister resolves it
    /// against its own mount point.
    pub fn checkpoint_listing_dir(&self) -> PathBuf {
        match self.checkpoint_source {
            CheckpointSource::Directory => self.restart_path(),
            CheckpointSource::Volume { .. } => self.restart_dir.clone(),
        }
    }
}

fn parse_date(key: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_u32(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
