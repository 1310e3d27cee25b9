//! Event-level report windows
//!
//! Navigation sources report at up to three deadlines (2 days, 7 days, and
//! the end of the event report window); event sources only at the end of the
//! window. Reports go out one hour after the deadline that closes the window
//! they fall in.

use crate::types::{CommonSourceInfo, SourceType};
use chrono::{DateTime, TimeDelta, Utc};

const EARLY_DEADLINES: [TimeDelta; 2] = [TimeDelta::days(2), TimeDelta::days(7)];

/// Delay between a window's deadline and its report time.
pub const REPORT_DELAY_AFTER_DEADLINE: TimeDelta = TimeDelta::hours(1);

/// Ordered window deadlines for a source. Never empty.
pub fn event_level_report_deadlines(source: &CommonSourceInfo) -> Vec<DateTime<Utc>> {
    let window_end = source.event_report_window_time;
    let mut deadlines = Vec::with_capacity(EARLY_DEADLINES.len() + 1);

    if source.source_type == SourceType::Navigation {
        deadlines.extend(
            EARLY_DEADLINES
                .iter()
                .map(|offset| source.source_time + *offset)
                .filter(|deadline| *deadline < window_end),
        );
    }
    deadlines.push(window_end);
    deadlines
}

pub fn num_report_windows(source: &CommonSourceInfo) -> usize {
    event_level_report_deadlines(source).len()
}

/// Report time for a real trigger at `trigger_time`.
pub fn event_level_report_time(source: &CommonSourceInfo, trigger_time: DateTime<Utc>) -> DateTime<Utc> {
    let deadlines = event_level_report_deadlines(source);
    let deadline = deadlines
        .iter()
        .copied()
        .find(|deadline| trigger_time <= *deadline)
        .unwrap_or(window_end(&deadlines, source));
    deadline + REPORT_DELAY_AFTER_DEADLINE
}

/// Report time for window `index`, clamped to the last window.
pub fn report_time_at_window(source: &CommonSourceInfo, index: usize) -> DateTime<Utc> {
    let deadlines = event_level_report_deadlines(source);
    let deadline = deadlines
        .get(index)
        .copied()
        .unwrap_or(window_end(&deadlines, source));
    deadline + REPORT_DELAY_AFTER_DEADLINE
}

fn window_end(deadlines: &[DateTime<Utc>], source: &CommonSourceInfo) -> DateTime<Utc> {
    deadlines
        .last()
        .copied()
        .unwrap_or(source.event_report_window_time)
}
