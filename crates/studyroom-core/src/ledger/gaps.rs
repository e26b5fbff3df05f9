//! Dead-time detection over a day's session history.
//!
//! Finds idle stretches between recorded sessions. Purely derived data for
//! display; nothing here mutates the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapKind {
    /// Local midnight to the first session of the day.
    StartOfDay,
    /// Between two recorded sessions.
    BetweenSessions,
    /// Last recorded session to the start of the one still running.
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadTimeGap {
    pub kind: GapKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DeadTimeGap {
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 60_000.0
    }
}

/// Detector for idle time between sessions.
pub struct DeadTimeDetector {
    /// Minimum gap duration to report (in minutes).
    threshold_minutes: f64,
}

impl DeadTimeDetector {
    /// Create a detector with the default 10 minute threshold.
    pub fn new() -> Self {
        Self {
            threshold_minutes: 10.0,
        }
    }

    pub fn with_threshold(mut self, minutes: f64) -> Self {
        self.threshold_minutes = minutes.max(0.0);
        self
    }

    /// Find dead time in one day.
    ///
    /// # Arguments
    /// * `sessions` - the day's recorded sessions, in any order
    /// * `day_start` - local midnight of the day, as an instant
    /// * `in_progress_start` - estimated start of an uncommitted session
    ///
    /// # Returns
    /// Gaps sorted by start time
    pub fn find_gaps(
        &self,
        sessions: &[SessionEntry],
        day_start: DateTime<Utc>,
        in_progress_start: Option<DateTime<Utc>>,
    ) -> Vec<DeadTimeGap> {
        let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = sessions
            .iter()
            .map(|s| (s.started_at(), s.completed_at))
            .collect();
        spans.sort_by_key(|(start, _)| *start);

        let mut gaps = Vec::new();

        let Some(&(first_start, _)) = spans.first() else {
            if let Some(start) = in_progress_start {
                self.push_if_long(&mut gaps, GapKind::StartOfDay, day_start, start);
            }
            return gaps;
        };

        self.push_if_long(&mut gaps, GapKind::StartOfDay, day_start, first_start);

        let mut last_end = spans[0].1;
        for &(start, end) in spans.iter().skip(1) {
            self.push_if_long(&mut gaps, GapKind::BetweenSessions, last_end, start);
            // Overlapping sessions (clock skew) must not move the cursor back.
            if end > last_end {
                last_end = end;
            }
        }

        if let Some(start) = in_progress_start {
            let gap = DeadTimeGap {
                kind: GapKind::InProgress,
                start: last_end,
                end: start,
            };
            if gap.duration_minutes() > self.threshold_minutes {
                gaps.push(gap);
            }
        }

        gaps
    }

    fn push_if_long(
        &self,
        gaps: &mut Vec<DeadTimeGap>,
        kind: GapKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        let gap = DeadTimeGap { kind, start, end };
        if gap.duration_minutes() >= self.threshold_minutes {
            gaps.push(gap);
        }
    }
}

impl Default for DeadTimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntrySource;
    use crate::timer::TimerMode;
    use chrono::{Duration, NaiveDate};

    fn midnight() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn focus_ending_at(minutes_after_midnight: i64, duration_min: u32) -> SessionEntry {
        SessionEntry::full(
            TimerMode::Focus,
            duration_min,
            midnight() + Duration::minutes(minutes_after_midnight),
            EntrySource::Timer,
        )
    }

    #[test]
    fn reports_start_of_day_and_between_gaps() {
        // 08:00-08:50, then 09:30-10:20
        let sessions = vec![focus_ending_at(530, 50), focus_ending_at(620, 50)];
        let gaps = DeadTimeDetector::new().find_gaps(&sessions, midnight(), None);

        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].kind, GapKind::StartOfDay);
        assert_eq!(gaps[0].duration_minutes(), 480.0);
        assert_eq!(gaps[1].kind, GapKind::BetweenSessions);
        assert_eq!(gaps[1].duration_minutes(), 40.0);
    }

    #[test]
    fn short_gaps_are_ignored() {
        // 00:00-00:50 then 00:55-01:45
        let sessions = vec![focus_ending_at(50, 50), focus_ending_at(105, 50)];
        let gaps = DeadTimeDetector::new().find_gaps(&sessions, midnight(), None);
        assert!(gaps.is_empty());
    }

    #[test]
    fn threshold_is_inclusive_between_sessions() {
        let sessions = vec![focus_ending_at(50, 50), focus_ending_at(110, 50)];
        let gaps = DeadTimeDetector::new().find_gaps(&sessions, midnight(), None);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].duration_minutes(), 10.0);
    }

    #[test]
    fn in_progress_gap_must_exceed_threshold() {
        let sessions = vec![focus_ending_at(50, 50)];
        let exactly = midnight() + Duration::minutes(60);
        let gaps = DeadTimeDetector::new().find_gaps(&sessions, midnight(), Some(exactly));
        assert!(gaps.iter().all(|g| g.kind != GapKind::InProgress));

        let later = midnight() + Duration::minutes(75);
        let gaps = DeadTimeDetector::new().find_gaps(&sessions, midnight(), Some(later));
        let last = gaps.last().unwrap();
        assert_eq!(last.kind, GapKind::InProgress);
        assert_eq!(last.duration_minutes(), 25.0);
    }

    #[test]
    fn unordered_input_is_sorted() {
        let sessions = vec![focus_ending_at(620, 50), focus_ending_at(530, 50)];
        let gaps = DeadTimeDetector::new().with_threshold(30.0).find_gaps(&sessions, midnight(), None);
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0].start <= gaps[1].start);
    }

    #[test]
    fn empty_day_with_running_session_reports_start_of_day() {
        let start = midnight() + Duration::hours(9);
        let gaps = DeadTimeDetector::new().find_gaps(&[], midnight(), Some(start));
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, GapKind::StartOfDay);
    }
}
