use chrono::{NaiveDateTime, Timelike};

use crate::cron::{CronRecurrence, in_recurrence};
use crate::states::ScheduleState;

/// A reusable fragment of a schedule: a recurrence plus an optional
/// time-of-day window, evaluated in the schedule's local time.
///
/// A period is defined only within a single local day; when both times are
/// set, `begintime < endtime`. Wrapping across midnight is expressed with
/// two periods and the schedule-level adjacency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningPeriod {
    pub name: String,
    pub begintime: Option<chrono::NaiveTime>,
    pub endtime: Option<chrono::NaiveTime>,
    pub recurrence: CronRecurrence,
}

impl RunningPeriod {
    /// Desired state of this period at a local timestamp.
    ///
    /// The recurrence gates first: a date outside the recurrence is
    /// `Stopped`. Within the recurrence the time-of-day window applies:
    ///
    /// - neither time set: `Running` all day
    /// - only endtime: `Stopped` at/after it, `Any` before
    /// - only begintime: `Running` at/after it, `Any` before
    /// - both: `Running` within `[begintime, endtime)`, `Stopped` outside
    #[must_use]
    pub fn desired_state(&self, local: NaiveDateTime) -> ScheduleState {
        if !in_recurrence(&self.recurrence, local.date()) {
            return ScheduleState::Stopped;
        }

        // Sub-second precision is not meaningful for HH:MM windows.
        let t = local.time().with_nanosecond(0).unwrap_or(local.time());

        match (self.begintime, self.endtime) {
            (None, None) => ScheduleState::Running,
            (None, Some(end)) => {
                if t >= end {
                    ScheduleState::Stopped
                } else {
                    ScheduleState::Any
                }
            }
            (Some(begin), None) => {
                if t >= begin {
                    ScheduleState::Running
                } else {
                    ScheduleState::Any
                }
            }
            (Some(begin), Some(end)) => {
                if begin <= t && t < end {
                    ScheduleState::Running
                } else {
                    ScheduleState::Stopped
                }
            }
        }
    }
}
