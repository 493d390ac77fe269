//! Shared domain types.
//!
//! These are the values that flow between the controller stages:
//!
//! - series files read back from the engine (`TimeSeries`, `SeriesLayout`)
//! - date windows (`PullWindow`, `EngineWindow`)
//! - run results (`RunOutcome`, `RunStage`)

use chrono::{Days, NaiveDate};
use clap::ValueEnum;
use nalgebra::DMatrix;

/// Which on-disk shape a tabular series file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesLayout {
    /// Comma-delimited with a header row and six leading date/time columns.
    Dated,
    /// Comma-delimited engine output. The header's trailing tokens are the
    /// 1-based destination feature index of each data column; every data
    /// row starts with a single date label.
    Remapped,
    /// Space-delimited climate-by-HRU input without a header row. Each row
    /// starts with six date/time columns (year, month, day, ...).
    Cbh,
}

impl SeriesLayout {
    /// Number of leading non-data columns on every row.
    pub fn leading_columns(self) -> usize {
        match self {
            SeriesLayout::Dated | SeriesLayout::Cbh => 6,
            SeriesLayout::Remapped => 1,
        }
    }

    pub fn delimiter(self) -> u8 {
        match self {
            SeriesLayout::Dated | SeriesLayout::Remapped => b',',
            SeriesLayout::Cbh => b' ',
        }
    }
}

/// A cell the remapped reader could not place and skipped instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSkip {
    /// 0-based data row.
    pub row: usize,
    /// 0-based physical column, including the label column.
    pub column: usize,
    pub reason: String,
}

/// A dense `[timestep, feature]` matrix read from one series file.
///
/// Row `i` represents `base_date + i` days. The date columns of later rows are
/// never consulted.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub base_date: Option<NaiveDate>,
    pub values: DMatrix<f64>,
    pub skipped: Vec<CellSkip>,
}

impl TimeSeries {
    pub fn new(base_date: Option<NaiveDate>, values: DMatrix<f64>) -> Self {
        Self {
            base_date,
            values,
            skipped: Vec::new(),
        }
    }

    pub fn timestep_count(&self) -> usize {
        self.values.nrows()
    }

    pub fn feature_count(&self) -> usize {
        self.values.ncols()
    }

    /// Calendar date of timestep `i`.
    pub fn date_of(&self, i: usize) -> Option<NaiveDate> {
        self.base_date?.checked_add_days(Days::new(i as u64))
    }

    /// Values of timestep `i`, in destination feature order.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.values.row(i).iter().copied().collect()
    }
}

/// Inclusive date range of driving data to acquire.
///
/// `start > end` is representable: the planner never rejects a window, the
/// controller decides whether it is runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PullWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Inclusive day count; zero or negative for a degenerate window.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn is_runnable(&self) -> bool {
        self.start <= self.end
    }

    /// The same window with its last day dropped.
    pub fn shorten_end(&self) -> Self {
        Self {
            start: self.start,
            end: self.end.pred_opt().unwrap_or(self.end),
        }
    }
}

/// Inclusive date range the engine simulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Whether a partially satisfied pull window may still feed the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AcquisitionMode {
    /// Halt when the shortened window is still incomplete.
    Strict,
    /// Log and continue on whatever data landed.
    BestEffort,
}

/// How much of the pull window the fetcher delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Full(PullWindow),
    /// Retry succeeded on the shortened window.
    Shortened(PullWindow),
    /// Best-effort mode proceeding without a complete window.
    Partial(PullWindow),
}

impl Acquired {
    pub fn window(&self) -> PullWindow {
        match *self {
            Acquired::Full(w) | Acquired::Shortened(w) | Acquired::Partial(w) => w,
        }
    }
}

/// Result of one engine invocation after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Verified,
    Failed,
}

/// Pipeline states, in the order the controller visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Start,
    BaselineKnown,
    WindowPlanned,
    DataAcquired,
    EngineInvoked,
    Verified,
    Failed,
    PostProcessed,
    LaggedCheckpoint,
}

impl RunStage {
    pub fn label(self) -> &'static str {
        match self {
            RunStage::Start => "start",
            RunStage::BaselineKnown => "baseline known",
            RunStage::WindowPlanned => "window planned",
            RunStage::DataAcquired => "data acquired",
            RunStage::EngineInvoked => "engine invoked",
            RunStage::Verified => "verified",
            RunStage::Failed => "failed",
            RunStage::PostProcessed => "post-processed",
            RunStage::LaggedCheckpoint => "lagged checkpoint",
        }
    }
}
