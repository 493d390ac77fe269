//! Pull-window planning.
//!
//! Driving data ends yesterday (today's values are incomplete) and normally
//! starts `lag` days before that, so provisional values that the source may
//! still revise are pulled again. When the restart date is older than that,
//! the window is stretched back to it: continuity of the input series across
//! restarts comes before the provisional-data margin.

use chrono::{Days, NaiveDate};

use crate::domain::PullWindow;

/// Compute the pull window for a run restarting at `restart_date`.
///
/// Never fails, and never rejects the result: a restart date after yesterday
/// still gets the nominal window back. Whether there is anything to simulate
/// is the controller's call.
pub fn compute_pull_window(restart_date: NaiveDate, today: NaiveDate, lag_days: u32) -> PullWindow {
    let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let nominal_start = end
        .checked_sub_days(Days::new(u64::from(lag_days)))
        .unwrap_or(NaiveDate::MIN);

    if restart_date < nominal_start {
        tracing::info!(%restart_date, %nominal_start, "pull start reset to restart date");
        PullWindow::new(restart_date, end)
    } else {
        PullWindow::new(nominal_start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn fallback_engages_for_old_restart() {
        let w = compute_pull_window(d(2019, 9, 9), d(2019, 11, 10), 59);
        assert_eq!(w.start, d(2019, 9, 9));
        assert_eq!(w.end, d(2019, 11, 9));
    }

    #[test]
    fn recent_restart_keeps_lag_window() {
        let w = compute_pull_window(d(2019, 11, 1), d(2019, 11, 10), 59);
        assert_eq!(w.start, d(2019, 9, 11));
        assert_eq!(w.end, d(2019, 11, 9));
    }

    #[test]
    fn restart_in_future_keeps_nominal_window() {
        let w = compute_pull_window(d(2019, 12, 1), d(2019, 11, 10), 0);
        assert_eq!(w.start, d(2019, 11, 9));
        assert_eq!(w.end, d(2019, 11, 9));

        let w = compute_pull_window(d(2019, 12, 1), d(2019, 11, 10), 59);
        assert_eq!(w.start, d(2019, 9, 11));
    }

    proptest! {
        #[test]
        fn end_is_always_yesterday(offset in 0i64..20_000, back in -400i64..4_000, lag in 0u32..400) {
            let today = d(1980, 1, 1) + chrono::Duration::days(offset);
            let restart = today - chrono::Duration::days(back);
            let w = compute_pull_window(restart, today, lag);
            prop_assert_eq!(w.end, today.pred_opt().unwrap());
            prop_assert!(w.start <= w.end - chrono::Duration::days(i64::from(lag)));
            prop_assert_eq!(w.start, restart.min(w.end - chrono::Duration::days(i64::from(lag))));
        }
    }
}
