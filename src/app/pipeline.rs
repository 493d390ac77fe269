//! The run controller.
//!
//! One invocation walks the stages in order and stops at the first fatal
//! condition:
//! checkpoint discovery -> pull window -> data fetch (one retry) -> engine ->
//! verification -> post-processing -> optional lagged checkpoint.
//!
//! Checkpoints the engine writes land under a staged name and only become
//! visible to checkpoint discovery once their run is accepted.
//!
//! Every collaborator call blocks. Nothing here guards against two controllers
//! sharing a work directory; that has to be prevented by whoever schedules
//! the runs.

use std::path::{Path, PathBuf};

use chrono::{Days, NaiveDate};

use crate::checkpoint::{self, CheckpointLister};
use crate::collab::{DataFetcher, Engine, EngineRequest, FetchStatus, PostProcessor, Verifier};
use crate::config::RunConfig;
use crate::domain::{AcquisitionMode, Acquired, EngineWindow, PullWindow, RunOutcome, RunStage};
use crate::error::RunError;
use crate::plan::compute_pull_window;

/// Verification markers are files in the work directory starting with this.
pub const VERIFIED_MARKER_PREFIX: &str = "PRMS_VERIFIED_";

/// The external services one controller run talks to.
pub struct Collaborators<'a> {
    pub lister: &'a dyn CheckpointLister,
    pub fetcher: &'a dyn DataFetcher,
    pub engine: &'a dyn Engine,
    pub verifier: &'a dyn Verifier,
    pub post: &'a dyn PostProcessor,
}

/// Baseline and pull window, computed without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub baseline: NaiveDate,
    pub restart_date: NaiveDate,
    pub window: PullWindow,
}

/// What one controller invocation did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub plan: RunPlan,
    pub acquired: Acquired,
    pub engine_window: EngineWindow,
    pub engine_status: i32,
    pub verifier_status: Option<i32>,
    pub outcome: RunOutcome,
    pub stages: Vec<RunStage>,
    pub markers_cleared: usize,
    pub post_processed: Vec<String>,
    /// Checkpoint promoted from this run's final state, if one was saved.
    pub final_checkpoint: Option<NaiveDate>,
    pub lagged_checkpoint: Option<NaiveDate>,
}

pub struct RunController<'a> {
    config: &'a RunConfig,
    collab: Collaborators<'a>,
}

impl<'a> RunController<'a> {
    pub fn new(config: &'a RunConfig, collab: Collaborators<'a>) -> Self {
        Self { config, collab }
    }

    /// `Start -> BaselineKnown -> WindowPlanned`.
    pub fn plan(&self, today: NaiveDate) -> Result<RunPlan, RunError> {
        let dir = self.config.checkpoint_listing_dir();
        let baseline = checkpoint::latest_checkpoint(
            self.collab.lister,
            &dir,
            &self.config.checkpoint_extension,
        )
        .inspect_err(|e| tracing::error!(dir = %dir.display(), "{e}"))?;

        let restart_date = next_day(baseline);
        tracing::info!(%baseline, %restart_date, "baseline known");

        let window = compute_pull_window(restart_date, today, self.config.provisional_days);
        tracing::info!(start = %window.start, end = %window.end, days = window.days(), "pull window planned");

        Ok(RunPlan {
            baseline,
            restart_date,
            window,
        })
    }

    /// Execute the whole pipeline.
    ///
    /// Halts return `Err`. A run that executes but fails the engine or the
    /// verifier returns `Ok` with `RunOutcome::Failed`.
    pub fn run(&self, today: NaiveDate) -> Result<RunReport, RunError> {
        let mut stages = vec![RunStage::Start];

        let plan = self.plan(today)?;
        stages.push(RunStage::BaselineKnown);
        if !plan.window.is_runnable() {
            return Err(RunError::EmptyPullWindow {
                start: plan.window.start,
                end: plan.window.end,
            });
        }
        stages.push(RunStage::WindowPlanned);

        // Acquisition can only pull the end in, so this bound is checked
        // before anything is fetched.
        let engine_start = self.config.engine_start.unwrap_or(plan.restart_date);
        check_engine_window(engine_start, self.config.engine_end.unwrap_or(plan.window.end))?;

        let acquired = self.acquire(plan.window)?;
        stages.push(RunStage::DataAcquired);

        let engine_window = EngineWindow {
            start: engine_start,
            end: self.config.engine_end.unwrap_or(acquired.window().end),
        };
        check_engine_window(engine_window.start, engine_window.end)?;

        let markers_cleared = self.clear_markers()?;

        let request = self.engine_request(plan.baseline, engine_window, self.config.save_final_state);
        tracing::info!(start = %engine_window.start, end = %engine_window.end, "invoking engine");
        let engine_status = self
            .collab
            .engine
            .run(&request)
            .inspect_err(|_| self.discard_staged(&request))
            .map_err(|e| RunError::Engine {
                start: engine_window.start,
                end: engine_window.end,
                reason: e.to_string(),
            })?;
        stages.push(RunStage::EngineInvoked);

        let mut report = RunReport {
            plan,
            acquired,
            engine_window,
            engine_status,
            verifier_status: None,
            outcome: RunOutcome::Failed,
            stages,
            markers_cleared,
            post_processed: Vec::new(),
            final_checkpoint: None,
            lagged_checkpoint: None,
        };

        if engine_status != 0 {
            tracing::error!(status = engine_status, "engine exited with an error");
            self.discard_staged(&request);
            report.stages.push(RunStage::Failed);
            return Ok(report);
        }

        let verifier_status = self.verify().inspect_err(|_| self.discard_staged(&request))?;
        report.verifier_status = Some(verifier_status);
        if verifier_status != 0 || !self.has_marker() {
            tracing::error!(status = verifier_status, "engine run failed verification");
            self.discard_staged(&request);
            report.stages.push(RunStage::Failed);
            return Ok(report);
        }
        tracing::info!("engine run verified");
        report.outcome = RunOutcome::Verified;
        report.stages.push(RunStage::Verified);

        if self.config.save_final_state {
            self.promote_staged(&request, engine_window.end)?;
            report.final_checkpoint = Some(engine_window.end);
        }

        for variable in &self.config.output_variables {
            self.collab
                .post
                .convert(&self.config.work_dir, variable)
                .map_err(|e| RunError::PostProcess {
                    variable: variable.clone(),
                    reason: e.to_string(),
                })?;
            report.post_processed.push(variable.clone());
        }
        tracing::info!(variables = report.post_processed.len(), "post-processing complete");
        report.stages.push(RunStage::PostProcessed);

        if self.config.lagged_checkpoint {
            report.lagged_checkpoint = self.lagged_checkpoint(plan.baseline, engine_window.start, acquired.window())?;
            report.stages.push(RunStage::LaggedCheckpoint);
        }

        Ok(report)
    }

    /// `WindowPlanned -> DataAcquired`, with the single shortened retry.
    fn acquire(&self, window: PullWindow) -> Result<Acquired, RunError> {
        let fetch = |w: PullWindow| {
            self.collab.fetcher.fetch(w).map_err(|e| RunError::Fetch {
                start: w.start,
                end: w.end,
                reason: e.to_string(),
            })
        };

        if fetch(window)? == FetchStatus::Complete {
            return Ok(Acquired::Full(window));
        }

        let shortened = window.shorten_end();
        tracing::warn!(end = %window.end, retry_end = %shortened.end, "driving data incomplete, retrying one day shorter");
        if shortened.is_runnable() && fetch(shortened)? == FetchStatus::Complete {
            return Ok(Acquired::Shortened(shortened));
        }

        match self.config.acquisition_mode {
            AcquisitionMode::Strict => {
                tracing::error!(start = %shortened.start, end = %shortened.end, "driving data incomplete after retry");
                Err(RunError::IncompleteDataWindow {
                    start: shortened.start,
                    end: shortened.end,
                })
            }
            AcquisitionMode::BestEffort => {
                tracing::warn!(start = %shortened.start, end = %shortened.end, "continuing on partial driving data");
                Ok(Acquired::Partial(shortened))
            }
        }
    }

    /// Remove verification markers left by earlier invocations.
    fn clear_markers(&self) -> Result<usize, RunError> {
        let markers = verification_markers(&self.config.work_dir).map_err(|source| RunError::Housekeeping {
            path: self.config.work_dir.clone(),
            source,
        })?;
        for path in &markers {
            tracing::debug!(path = %path.display(), "removing stale verification marker");
            std::fs::remove_file(path).map_err(|source| RunError::Housekeeping {
                path: path.clone(),
                source,
            })?;
        }
        Ok(markers.len())
    }

    fn has_marker(&self) -> bool {
        verification_markers(&self.config.work_dir)
            .map(|m| !m.is_empty())
            .unwrap_or(false)
    }

    fn verify(&self) -> Result<i32, RunError> {
        self.collab
            .verifier
            .verify(
                &self.config.work_dir,
                &self.config.verify_log_name,
                self.config.min_elapsed_minutes,
            )
            .map_err(|e| RunError::Verifier {
                work_dir: self.config.work_dir.clone(),
                reason: e.to_string(),
            })
    }

    /// Second engine run that leaves a checkpoint `provisional_days` before
    /// the end of the pulled data, so the next baseline sits outside the
    /// provisional region. Not verified.
    fn lagged_checkpoint(
        &self,
        baseline: NaiveDate,
        engine_start: NaiveDate,
        pulled: PullWindow,
    ) -> Result<Option<NaiveDate>, RunError> {
        let Some(date) = pulled
            .end
            .checked_sub_days(Days::new(u64::from(self.config.provisional_days)))
        else {
            return Ok(None);
        };
        if date < engine_start {
            tracing::warn!(%date, %engine_start, "lagged checkpoint date precedes engine start, skipping");
            return Ok(None);
        }

        let window = EngineWindow {
            start: engine_start,
            end: date,
        };
        let request = self.engine_request(baseline, window, true);
        tracing::info!(%date, "writing lagged checkpoint");
        let status = self.collab.engine.run(&request).map_err(|e| RunError::Engine {
            start: window.start,
            end: window.end,
            reason: e.to_string(),
        })?;
        if status != 0 {
            self.discard_staged(&request);
            return Err(RunError::LaggedCheckpointFailed { date, status });
        }
        self.promote_staged(&request, date)?;
        Ok(Some(date))
    }

    /// Rename the staged final state of an accepted run to its real name.
    fn promote_staged(&self, request: &EngineRequest, date: NaiveDate) -> Result<(), RunError> {
        let Some(staged) = &request.final_state_file else {
            return Ok(());
        };
        let cfg = self.config;
        let staged = cfg.work_dir.join(staged);
        let target = cfg
            .work_dir
            .join(checkpoint::checkpoint_file(&cfg.restart_dir, date, &cfg.checkpoint_extension));
        std::fs::rename(&staged, &target).map_err(|source| RunError::CheckpointPromotion {
            staged: staged.clone(),
            target: target.clone(),
            source,
        })?;
        tracing::info!(path = %target.display(), "checkpoint promoted");
        Ok(())
    }

    /// Drop whatever final state a rejected run left behind.
    fn discard_staged(&self, request: &EngineRequest) {
        let Some(staged) = &request.final_state_file else {
            return;
        };
        let path = self.config.work_dir.join(staged);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::warn!(path = %path.display(), "discarded checkpoint of rejected run"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "could not discard staged checkpoint: {e}"),
        }
    }

    fn engine_request(&self, baseline: NaiveDate, window: EngineWindow, save: bool) -> EngineRequest {
        let cfg = self.config;
        let ext = &cfg.checkpoint_extension;
        EngineRequest {
            start: window.start,
            end: window.end,
            engine_path: cfg.engine_path.clone(),
            work_dir: cfg.work_dir.clone(),
            load_initial_state: true,
            save_final_state: save,
            control_file: cfg.control_file.clone(),
            initial_state_file: Some(checkpoint::checkpoint_file(&cfg.restart_dir, baseline, ext)),
            final_state_file: save.then(|| checkpoint::staged_checkpoint_file(&cfg.restart_dir, window.end, ext)),
            log_file: cfg.log_file.clone(),
        }
    }
}

fn check_engine_window(start: NaiveDate, end: NaiveDate) -> Result<(), RunError> {
    if start > end {
        tracing::error!(%start, %end, "nothing to simulate");
        return Err(RunError::EmptyEngineWindow { start, end });
    }
    Ok(())
}

fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

/// Verification marker files currently in `work_dir`.
pub fn verification_markers(work_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(work_dir)? {
        let entry = entry?;
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(VERIFIED_MARKER_PREFIX)
        {
            out.push(entry.path());
        }
    }
    Ok(out)
}
