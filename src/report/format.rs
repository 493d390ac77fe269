//! Plain-text run summaries for the terminal.
//!
//! Formatting lives here so the controller stays free of presentation and
//! output changes stay in one file.

use crate::app::pipeline::{RunPlan, RunReport};
use crate::config::RunConfig;
use crate::domain::{Acquired, RunOutcome};

/// Baseline and pull window, as printed by `onhm plan`.
pub fn format_plan(plan: &RunPlan, config: &RunConfig) -> String {
    let mut out = String::new();
    out.push_str("=== onhm - run plan ===\n");
    out.push_str(&format!("Work dir: {}\n", config.work_dir.display()));
    out.push_str(&format!("Last simulation date: {}\n", plan.baseline));
    out.push_str(&format!("Restart date: {}\n", plan.restart_date));
    out.push_str(&format!(
        "Pull window: {} .. {} ({} days, provisional lag {})\n",
        plan.window.start,
        plan.window.end,
        plan.window.days(),
        config.provisional_days
    ));
    if plan.window.start == plan.restart_date {
        out.push_str("Pull start reset to restart date.\n");
    }
    out
}

/// Full summary of a controller run.
pub fn format_run_report(report: &RunReport, config: &RunConfig) -> String {
    let mut out = format_plan(&report.plan, config);

    let acquired = match report.acquired {
        Acquired::Full(w) => format!("{} .. {} (complete)", w.start, w.end),
        Acquired::Shortened(w) => format!("{} .. {} (shortened by one day)", w.start, w.end),
        Acquired::Partial(w) => format!("{} .. {} (partial, best effort)", w.start, w.end),
    };
    out.push_str(&format!("Acquired: {acquired}\n"));
    out.push_str(&format!(
        "Engine window: {} .. {} (exit status {})\n",
        report.engine_window.start, report.engine_window.end, report.engine_status
    ));
    if report.markers_cleared > 0 {
        out.push_str(&format!("Stale verification markers removed: {}\n", report.markers_cleared));
    }
    if let Some(status) = report.verifier_status {
        out.push_str(&format!("Verifier status: {status}\n"));
    }

    let outcome = match report.outcome {
        RunOutcome::Verified => "VERIFIED",
        RunOutcome::Failed => "FAILED",
    };
    out.push_str(&format!("Outcome: {outcome}\n"));

    if !report.post_processed.is_empty() {
        out.push_str(&format!("Post-processed: {}\n", report.post_processed.join(", ")));
    }
    if let Some(date) = report.final_checkpoint {
        out.push_str(&format!("Final-state checkpoint: {date}\n"));
    }
    if let Some(date) = report.lagged_checkpoint {
        out.push_str(&format!("Lagged checkpoint: {date}\n"));
    }

    let trail: Vec<&str> = report.stages.iter().map(|s| s.label()).collect();
    out.push_str(&format!("Stages: {}\n", trail.join(" -> ")));
    out
}
