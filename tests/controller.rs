//! Controller scenarios driven with in-memory collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use onhm_runner::app::pipeline::{verification_markers, Collaborators, RunController, RunReport};
use onhm_runner::checkpoint::{CheckpointError, CheckpointLister, DirectoryLister};
use onhm_runner::collab::{CollabError, DataFetcher, Engine, EngineRequest, FetchStatus, PostProcessor, Verifier};
use onhm_runner::config::RunConfig;
use onhm_runner::domain::{AcquisitionMode, Acquired, PullWindow, RunOutcome, RunStage};
use onhm_runner::error::RunError;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

struct Listing(Result<Vec<&'static str>, ()>);

impl CheckpointLister for Listing {
    fn list_checkpoints(&self, dir: &Path) -> Result<Vec<String>, CheckpointError> {
        match &self.0 {
            Ok(names) => Ok(names.iter().map(|s| s.to_string()).collect()),
            Err(()) => Err(CheckpointError::CheckpointListingUnavailable {
                dir: dir.to_path_buf(),
                reason: "volume unreachable".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct FakeFetcher {
    replies: RefCell<VecDeque<FetchStatus>>,
    calls: RefCell<Vec<PullWindow>>,
}

impl FakeFetcher {
    fn replying(replies: &[FetchStatus]) -> Self {
        Self {
            replies: RefCell::new(replies.iter().copied().collect()),
            calls: RefCell::default(),
        }
    }
}

impl DataFetcher for FakeFetcher {
    fn fetch(&self, window: PullWindow) -> Result<FetchStatus, CollabError> {
        self.calls.borrow_mut().push(window);
        Ok(self.replies.borrow_mut().pop_front().unwrap_or(FetchStatus::Complete))
    }
}

struct FakeEngine {
    statuses: RefCell<VecDeque<i32>>,
    calls: RefCell<Vec<EngineRequest>>,
    markers_at_start: RefCell<Vec<usize>>,
}

impl FakeEngine {
    fn exiting(statuses: &[i32]) -> Self {
        Self {
            statuses: RefCell::new(statuses.iter().copied().collect()),
            calls: RefCell::default(),
            markers_at_start: RefCell::default(),
        }
    }
}

impl Engine for FakeEngine {
    fn run(&self, request: &EngineRequest) -> Result<i32, CollabError> {
        let markers = verification_markers(&request.work_dir).unwrap().len();
        self.markers_at_start.borrow_mut().push(markers);
        self.calls.borrow_mut().push(request.clone());
        if let Some(path) = &request.final_state_file {
            let path = request.work_dir.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"state").unwrap();
        }
        Ok(self.statuses.borrow_mut().pop_front().unwrap_or(0))
    }
}

struct FakeVerifier {
    status: i32,
    write_marker: bool,
    calls: Cell<usize>,
}

impl FakeVerifier {
    fn new(status: i32, write_marker: bool) -> Self {
        Self {
            status,
            write_marker,
            calls: Cell::new(0),
        }
    }
}

impl Verifier for FakeVerifier {
    fn verify(&self, work_dir: &Path, log_file_name: &str, min_elapsed_minutes: u32) -> Result<i32, CollabError> {
        assert_eq!(log_file_name, "prms.out");
        assert_eq!(min_elapsed_minutes, 1);
        self.calls.set(self.calls.get() + 1);
        if self.write_marker {
            std::fs::write(work_dir.join("PRMS_VERIFIED_now"), b"").unwrap();
        }
        Ok(self.status)
    }
}

#[derive(Default)]
struct FakePost {
    fail_on: Option<&'static str>,
    calls: RefCell<Vec<String>>,
}

impl PostProcessor for FakePost {
    fn convert(&self, _work_dir: &Path, variable: &str) -> Result<(), CollabError> {
        self.calls.borrow_mut().push(variable.to_string());
        if self.fail_on == Some(variable) {
            return Err(CollabError::Status("converter exited with 1".to_string()));
        }
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: RunConfig,
    lister: Listing,
    fetcher: FakeFetcher,
    engine: FakeEngine,
    verifier: FakeVerifier,
    post: FakePost,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            work_dir: dir.path().to_path_buf(),
            engine_path: PathBuf::from("prms"),
            ..RunConfig::default()
        };
        Self {
            _dir: dir,
            config,
            lister: Listing(Ok(vec!["2019-09-01.restart", "2019-09-08.restart", "2019-08-15.restart"])),
            fetcher: FakeFetcher::default(),
            engine: FakeEngine::exiting(&[]),
            verifier: FakeVerifier::new(0, true),
            post: FakePost::default(),
        }
    }

    fn controller<'a>(&'a self, lister: &'a dyn CheckpointLister) -> RunController<'a> {
        RunController::new(
            &self.config,
            Collaborators {
                lister,
                fetcher: &self.fetcher,
                engine: &self.engine,
                verifier: &self.verifier,
                post: &self.post,
            },
        )
    }

    fn run(&self, today: NaiveDate) -> Result<RunReport, RunError> {
        self.controller(&self.lister).run(today)
    }

    /// Seed a real restart directory so runs can be chained on disk.
    fn seed_restart(&self, names: &[&str]) {
        let dir = self.config.restart_path();
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            std::fs::write(dir.join(name), b"state").unwrap();
        }
    }

    fn restart_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.config.restart_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn engine_calls(&self) -> usize {
        self.engine.calls.borrow().len()
    }
}

fn today() -> NaiveDate {
    d(2019, 11, 10)
}

#[test]
fn verified_run_plans_window_from_latest_checkpoint() {
    let h = Harness::new();
    let report = h.run(today()).unwrap();

    assert_eq!(report.plan.baseline, d(2019, 9, 8));
    assert_eq!(report.plan.restart_date, d(2019, 9, 9));
    assert_eq!(report.plan.window, PullWindow::new(d(2019, 9, 9), d(2019, 11, 9)));
    assert_eq!(report.acquired, Acquired::Full(report.plan.window));
    assert_eq!(report.outcome, RunOutcome::Verified);

    let calls = h.engine.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].start, d(2019, 9, 9));
    assert_eq!(calls[0].end, d(2019, 11, 9));
    assert!(calls[0].load_initial_state);
    assert_eq!(calls[0].initial_state_file, Some(PathBuf::from("restart/2019-09-08.restart")));
    assert!(!calls[0].save_final_state);
    assert_eq!(calls[0].final_state_file, None);

    assert_eq!(h.post.calls.borrow().len(), 6);
    assert_eq!(
        report.stages,
        vec![
            RunStage::Start,
            RunStage::BaselineKnown,
            RunStage::WindowPlanned,
            RunStage::DataAcquired,
            RunStage::EngineInvoked,
            RunStage::Verified,
            RunStage::PostProcessed,
        ]
    );
}

#[test]
fn missing_checkpoints_halt_before_engine() {
    let mut h = Harness::new();
    h.lister = Listing(Ok(vec![]));
    let err = h.run(today()).unwrap_err();
    assert!(matches!(err, RunError::Checkpoint(CheckpointError::NoCheckpointFound { .. })));
    assert_eq!(h.engine_calls(), 0);
    assert!(h.fetcher.calls.borrow().is_empty());
}

#[test]
fn listing_failure_is_not_an_empty_listing() {
    let mut h = Harness::new();
    h.lister = Listing(Err(()));
    let err = h.run(today()).unwrap_err();
    assert!(matches!(
        err,
        RunError::Checkpoint(CheckpointError::CheckpointListingUnavailable { .. })
    ));
    assert_eq!(h.engine_calls(), 0);
}

#[test]
fn verifier_failure_skips_post_processing() {
    let mut h = Harness::new();
    h.verifier = FakeVerifier::new(1, false);
    let report = h.run(today()).unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.verifier_status, Some(1));
    assert!(h.post.calls.borrow().is_empty());
    assert_eq!(report.stages.last(), Some(&RunStage::Failed));
}

#[test]
fn zero_status_without_marker_is_not_verified() {
    let mut h = Harness::new();
    h.verifier = FakeVerifier::new(0, false);
    let report = h.run(today()).unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert!(h.post.calls.borrow().is_empty());
}

#[test]
fn engine_error_skips_verification() {
    let mut h = Harness::new();
    h.engine = FakeEngine::exiting(&[3]);
    let report = h.run(today()).unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.engine_status, 3);
    assert_eq!(h.verifier.calls.get(), 0);
    assert!(h.post.calls.borrow().is_empty());
}

#[test]
fn incomplete_fetch_retries_once_one_day_shorter() {
    let mut h = Harness::new();
    h.fetcher = FakeFetcher::replying(&[FetchStatus::Incomplete, FetchStatus::Complete]);
    let report = h.run(today()).unwrap();

    let calls = h.fetcher.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].start, calls[0].start);
    assert_eq!(calls[1].end, d(2019, 11, 8));
    assert_eq!(report.acquired, Acquired::Shortened(PullWindow::new(d(2019, 9, 9), d(2019, 11, 8))));
    assert_eq!(report.engine_window.end, d(2019, 11, 8));
}

#[test]
fn strict_mode_halts_after_single_retry() {
    let mut h = Harness::new();
    h.fetcher = FakeFetcher::replying(&[FetchStatus::Incomplete, FetchStatus::Incomplete, FetchStatus::Complete]);
    let err = h.run(today()).unwrap_err();
    match err {
        RunError::IncompleteDataWindow { start, end } => {
            assert_eq!(start, d(2019, 9, 9));
            assert_eq!(end, d(2019, 11, 8));
        }
        other => panic!("expected IncompleteDataWindow, got {other:?}"),
    }
    assert_eq!(h.fetcher.calls.borrow().len(), 2);
    assert_eq!(h.engine_calls(), 0);
}

#[test]
fn best_effort_mode_runs_on_partial_data() {
    let mut h = Harness::new();
    h.config.acquisition_mode = AcquisitionMode::BestEffort;
    h.fetcher = FakeFetcher::replying(&[FetchStatus::Incomplete, FetchStatus::Incomplete]);
    let report = h.run(today()).unwrap();
    assert!(matches!(report.acquired, Acquired::Partial(_)));
    assert_eq!(h.engine_calls(), 1);
    assert_eq!(report.outcome, RunOutcome::Verified);
}

#[test]
fn stale_markers_are_removed_before_engine_runs() {
    let mut h = Harness::new();
    std::fs::write(h.config.work_dir.join("PRMS_VERIFIED_2019-09-08"), b"").unwrap();
    std::fs::write(h.config.work_dir.join("PRMS_VERIFIED_old"), b"").unwrap();
    // A verifier that reports success but leaves no marker: the stale ones
    // must not count.
    h.verifier = FakeVerifier::new(0, false);

    let report = h.run(today()).unwrap();
    assert_eq!(report.markers_cleared, 2);
    assert_eq!(*h.engine.markers_at_start.borrow(), vec![0]);
    assert_eq!(report.outcome, RunOutcome::Failed);
}

#[test]
fn configured_engine_window_is_independent_of_pull_window() {
    let mut h = Harness::new();
    h.config.engine_start = Some(d(2019, 6, 2));
    h.config.engine_end = Some(d(2019, 9, 8));
    h.config.save_final_state = true;
    let report = h.run(today()).unwrap();

    let calls = h.engine.calls.borrow();
    assert_eq!(calls[0].start, d(2019, 6, 2));
    assert_eq!(calls[0].end, d(2019, 9, 8));
    assert_eq!(calls[0].final_state_file, Some(PathBuf::from("restart/2019-09-08.restart.pending")));
    assert_eq!(report.plan.window.end, d(2019, 11, 9));
    assert_eq!(report.final_checkpoint, Some(d(2019, 9, 8)));
    assert_eq!(h.restart_entries(), vec!["2019-09-08.restart"]);
}

#[test]
fn lagged_checkpoint_runs_engine_a_second_time() {
    let mut h = Harness::new();
    h.config.lagged_checkpoint = true;
    let report = h.run(today()).unwrap();

    assert_eq!(report.lagged_checkpoint, Some(d(2019, 9, 11)));
    assert_eq!(h.verifier.calls.get(), 1);
    let calls = h.engine.calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].start, d(2019, 9, 9));
    assert_eq!(calls[1].end, d(2019, 9, 11));
    assert!(calls[1].save_final_state);
    assert_eq!(calls[1].final_state_file, Some(PathBuf::from("restart/2019-09-11.restart.pending")));
    assert_eq!(report.stages.last(), Some(&RunStage::LaggedCheckpoint));
    assert_eq!(report.final_checkpoint, None);
    assert_eq!(h.restart_entries(), vec!["2019-09-11.restart"]);
}

#[test]
fn failed_lagged_checkpoint_halts() {
    let mut h = Harness::new();
    h.config.lagged_checkpoint = true;
    h.engine = FakeEngine::exiting(&[0, 9]);
    let err = h.run(today()).unwrap_err();
    assert!(matches!(err, RunError::LaggedCheckpointFailed { status: 9, .. }));
    assert!(h.restart_entries().is_empty());
}

#[test]
fn lagged_checkpoint_is_not_attempted_after_failed_run() {
    let mut h = Harness::new();
    h.config.lagged_checkpoint = true;
    h.verifier = FakeVerifier::new(2, false);
    let report = h.run(today()).unwrap();
    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(h.engine_calls(), 1);
    assert_eq!(report.lagged_checkpoint, None);
}

#[test]
fn post_processing_failure_names_the_variable() {
    let mut h = Harness::new();
    h.post = FakePost {
        fail_on: Some("pkwater_equiv"),
        ..FakePost::default()
    };
    let err = h.run(today()).unwrap_err();
    match err {
        RunError::PostProcess { variable, .. } => assert_eq!(variable, "pkwater_equiv"),
        other => panic!("expected PostProcess, got {other:?}"),
    }
    assert_eq!(h.post.calls.borrow().len(), 5);
}

#[test]
fn restart_after_yesterday_has_nothing_to_simulate() {
    for latest in ["2019-11-09.restart", "2019-11-20.restart"] {
        let mut h = Harness::new();
        h.lister = Listing(Ok(vec![latest]));
        let err = h.run(today()).unwrap_err();
        assert!(matches!(err, RunError::EmptyEngineWindow { .. }), "{latest}: {err:?}");
        assert!(h.fetcher.calls.borrow().is_empty(), "{latest}: fetched anyway");
        assert_eq!(h.engine_calls(), 0);
    }
}

#[test]
fn configured_engine_start_past_pull_end_skips_fetch() {
    let mut h = Harness::new();
    h.config.engine_start = Some(d(2019, 11, 10));
    let err = h.run(today()).unwrap_err();
    assert!(matches!(err, RunError::EmptyEngineWindow { .. }));
    assert!(h.fetcher.calls.borrow().is_empty());
}

#[test]
fn rejected_run_leaves_previous_baseline_in_place() {
    let cases = [
        (FakeEngine::exiting(&[0]), FakeVerifier::new(1, false)),
        (FakeEngine::exiting(&[4]), FakeVerifier::new(0, true)),
    ];
    for (engine, verifier) in cases {
        let mut h = Harness::new();
        h.config.save_final_state = true;
        h.engine = engine;
        h.verifier = verifier;
        h.seed_restart(&["2019-09-08.restart"]);

        let report = h.controller(&DirectoryLister).run(today()).unwrap();
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(report.final_checkpoint, None);
        assert_eq!(h.restart_entries(), vec!["2019-09-08.restart"]);

        let next = h.controller(&DirectoryLister).plan(d(2019, 11, 11)).unwrap();
        assert_eq!(next.baseline, d(2019, 9, 8));
    }
}

#[test]
fn verified_final_state_becomes_next_baseline() {
    let mut h = Harness::new();
    h.config.save_final_state = true;
    h.seed_restart(&["2019-09-08.restart"]);

    let report = h.controller(&DirectoryLister).run(today()).unwrap();
    assert_eq!(report.outcome, RunOutcome::Verified);
    assert_eq!(report.final_checkpoint, Some(d(2019, 11, 9)));
    assert_eq!(h.restart_entries(), vec!["2019-09-08.restart", "2019-11-09.restart"]);

    let next = h.controller(&DirectoryLister).plan(d(2019, 11, 11)).unwrap();
    assert_eq!(next.baseline, d(2019, 11, 9));
}
