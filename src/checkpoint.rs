//! Checkpoint discovery.
//!
//! Restart files are named `<YYYY-MM-DD>.<ext>`. The newest one is the
//! simulation baseline: the only source the controller trusts for where the
//! previous run left off.
//!
//! Listing goes through `CheckpointLister` so the same locator works against
//! a local directory or a container volume.

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::NaiveDate;

const DATE_TOKEN_LEN: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("no checkpoint files found in {dir}")]
    NoCheckpointFound { dir: PathBuf },

    #[error("checkpoint file name '{name}' does not start with a YYYY-MM-DD date")]
    MalformedCheckpointName { name: String },

    #[error("cannot list checkpoints in {dir}: {reason}")]
    CheckpointListingUnavailable { dir: PathBuf, reason: String },
}

/// Lists the file names in a checkpoint directory.
pub trait CheckpointLister {
    fn list_checkpoints(&self, dir: &Path) -> Result<Vec<String>, CheckpointError>;
}

/// Lists a directory on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryLister;

impl CheckpointLister for DirectoryLister {
    fn list_checkpoints(&self, dir: &Path) -> Result<Vec<String>, CheckpointError> {
        let unavailable = |e: std::io::Error| CheckpointError::CheckpointListingUnavailable {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(unavailable)? {
            let entry = entry.map_err(unavailable)?;
            if entry.file_type().map_err(unavailable)?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }
}

/// Lists a directory inside a named container volume by running a throwaway
/// container: `docker run --rm -v <volume>:<mount> <image> ls -1 <mount>/<dir>`.
#[derive(Debug, Clone)]
pub struct VolumeLister {
    pub docker: PathBuf,
    pub volume: String,
    pub image: String,
    pub mount: String,
}

impl VolumeLister {
    pub fn new(volume: impl Into<String>, image: impl Into<String>, mount: impl Into<String>) -> Self {
        Self {
            docker: PathBuf::from("docker"),
            volume: volume.into(),
            image: image.into(),
            mount: mount.into(),
        }
    }

    fn command(&self, dir: &Path) -> Command {
        let target = Path::new(&self.mount).join(dir);
        let mut cmd = Command::new(&self.docker);
        cmd.arg("run")
            .arg("--rm")
            .arg("-v")
            .arg(format!("{}:{}", self.volume, self.mount))
            .arg(&self.image)
            .arg("ls")
            .arg("-1")
            .arg(target);
        cmd
    }
}

impl CheckpointLister for VolumeLister {
    fn list_checkpoints(&self, dir: &Path) -> Result<Vec<String>, CheckpointError> {
        let unavailable = |reason: String| CheckpointError::CheckpointListingUnavailable {
            dir: dir.to_path_buf(),
            reason,
        };
        let output = self
            .command(dir)
            .output()
            .map_err(|e| unavailable(format!("failed to run {}: {e}", self.docker.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!(
                "listing in volume '{}' exited with {}: {}",
                self.volume,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Parse the leading `YYYY-MM-DD` token of a checkpoint file name.
pub fn checkpoint_date(name: &str) -> Result<NaiveDate, CheckpointError> {
    let malformed = || CheckpointError::MalformedCheckpointName {
        name: name.to_string(),
    };
    let token = name.get(..DATE_TOKEN_LEN).ok_or_else(malformed)?;
    NaiveDate::parse_from_str(token, "%Y-%m-%d").map_err(|_| malformed())
}

/// Return the most recent checkpoint date in `dir`.
///
/// Only names ending in `.<extension>` are considered.
pub fn latest_checkpoint(
    lister: &dyn CheckpointLister,
    dir: &Path,
    extension: &str,
) -> Result<NaiveDate, CheckpointError> {
    let suffix = format!(".{extension}");
    let mut dates = lister
        .list_checkpoints(dir)?
        .iter()
        .filter(|name| name.ends_with(&suffix))
        .map(|name| checkpoint_date(name))
        .collect::<Result<Vec<_>, _>>()?;

    dates.sort_unstable_by(|a, b| b.cmp(a));
    let latest = dates
        .first()
        .copied()
        .ok_or_else(|| CheckpointError::NoCheckpointFound {
            dir: dir.to_path_buf(),
        })?;

    tracing::debug!(dir = %dir.display(), found = dates.len(), %latest, "checkpoints listed");
    Ok(latest)
}

/// Relative path of the restart file for `date`.
pub fn checkpoint_file(restart_dir: &Path, date: NaiveDate, extension: &str) -> PathBuf {
    restart_dir.join(format!("{}.{extension}", date.format("%Y-%m-%d")))
}

/// Suffix for checkpoints the engine has written but nobody has vouched for.
pub const STAGED_SUFFIX: &str = "pending";

/// Where the engine writes a checkpoint before it is trusted. The extra
/// suffix keeps it out of `latest_checkpoint`.
pub fn staged_checkpoint_file(restart_dir: &Path, date: NaiveDate, extension: &str) -> PathBuf {
    restart_dir.join(format!("{}.{extension}.{STAGED_SUFFIX}", date.format("%Y-%m-%d")))
}
