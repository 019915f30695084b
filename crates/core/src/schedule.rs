use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::period::RunningPeriod;
use crate::states::ScheduleState;

/// A fixed state that short-circuits all period logic on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStatus {
    Running,
    Stopped,
}

impl OverrideStatus {
    /// The schedule state this override maps to.
    #[must_use]
    pub fn as_schedule_state(self) -> ScheduleState {
        match self {
            Self::Running => ScheduleState::Running,
            Self::Stopped => ScheduleState::Stopped,
        }
    }
}

/// Marker period name reported when `override_status` decides the state.
pub const OVERRIDE_PERIOD_NAME: &str = "override_status";

/// A period within a schedule, with the resource size requested while the
/// period is the authoritative one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodEntry {
    pub period: RunningPeriod,
    pub desired_size: Option<String>,
}

/// The evaluated state of a schedule at an instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub state: ScheduleState,
    /// Requested resource size of the authoritative period, when running.
    pub desired_size: Option<String>,
    /// Name of the period that decided the state, when one did.
    pub period_name: Option<String>,
}

impl DesiredState {
    fn stopped() -> Self {
        Self {
            state: ScheduleState::Stopped,
            desired_size: None,
            period_name: None,
        }
    }
}

/// A named schedule: a timezone, an ordered set of periods, and the flags
/// that shape the decision function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub name: String,
    pub timezone: Tz,
    pub periods: Vec<PeriodEntry>,
    pub override_status: Option<OverrideStatus>,
    pub description: Option<String>,
    /// Names of maintenance windows honored by this schedule.
    pub maintenance_windows: Vec<String>,
    pub stop_new_instances: bool,
    pub use_maintenance_window: bool,
    pub enforced: bool,
    pub hibernate: bool,
    pub retain_running: bool,
}

impl Schedule {
    /// Evaluate the schedule at `dt`, including the adjacency check.
    ///
    /// The instant is converted to the schedule's timezone first. When the
    /// plain evaluation is `Stopped` and the schedule has more than one
    /// period, the minute before and the minute after are also evaluated;
    /// if both are `Running` the instant sits in the notch between two
    /// back-to-back periods and the future evaluation's result is used
    /// instead. The prior-minute evaluation only confirms adjacency; its
    /// identity is discarded.
    #[must_use]
    pub fn desired_state(&self, dt: DateTime<Utc>) -> DesiredState {
        let local = dt.with_timezone(&self.timezone).naive_local();
        let result = self.desired_state_at(local);

        if result.state == ScheduleState::Stopped && self.periods.len() > 1 {
            let prev = self.desired_state_at(local - Duration::minutes(1));
            let next = self.desired_state_at(local + Duration::minutes(1));
            if prev.state == ScheduleState::Running && next.state == ScheduleState::Running {
                return next;
            }
        }

        result
    }

    /// Evaluate the schedule at an already-localized timestamp, without the
    /// adjacency check.
    fn desired_state_at(&self, local: NaiveDateTime) -> DesiredState {
        if let Some(override_status) = self.override_status {
            return DesiredState {
                state: override_status.as_schedule_state(),
                desired_size: None,
                period_name: Some(OVERRIDE_PERIOD_NAME.to_owned()),
            };
        }

        let evaluated: Vec<(&PeriodEntry, ScheduleState)> = self
            .periods
            .iter()
            .map(|entry| (entry, entry.period.desired_state(local)))
            .collect();

        // Priority composition: Running > Any > Stopped.
        let running: Vec<&PeriodEntry> = evaluated
            .iter()
            .filter(|(_, state)| *state == ScheduleState::Running)
            .map(|(entry, _)| *entry)
            .collect();

        if let Some(authoritative) = most_authoritative(&running) {
            return DesiredState {
                state: ScheduleState::Running,
                desired_size: authoritative.desired_size.clone(),
                period_name: Some(authoritative.period.name.clone()),
            };
        }

        if evaluated
            .iter()
            .any(|(_, state)| *state == ScheduleState::Any)
        {
            return DesiredState {
                state: ScheduleState::Any,
                desired_size: None,
                period_name: None,
            };
        }

        DesiredState::stopped()
    }
}

/// Of several concurrently running periods, the most authoritative is the
/// one that started most recently (latest `begintime`). A period without a
/// `begintime` is never more authoritative than one with a defined one.
fn most_authoritative<'a>(running: &[&'a PeriodEntry]) -> Option<&'a PeriodEntry> {
    let mut latest: Option<&PeriodEntry> = None;
    for &entry in running {
        match latest {
            None => latest = Some(entry),
            Some(current) => match (entry.period.begintime, current.period.begintime) {
                (None, _) => {}
                (Some(_), None) => latest = Some(entry),
                (Some(candidate), Some(best)) => {
                    if candidate > best {
                        latest = Some(entry);
                    }
                }
            },
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::Tz;

    use super::*;
    use crate::cron::CronRecurrence;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn period(name: &str, begin: Option<(u32, u32)>, end: Option<(u32, u32)>) -> RunningPeriod {
        RunningPeriod {
            name: name.into(),
            begintime: begin.map(|(h, m)| time(h, m)),
            endtime: end.map(|(h, m)| time(h, m)),
            recurrence: CronRecurrence::default(),
        }
    }

    fn entry(name: &str, begin: Option<(u32, u32)>, end: Option<(u32, u32)>) -> PeriodEntry {
        PeriodEntry {
            period: period(name, begin, end),
            desired_size: None,
        }
    }

    fn sized_entry(
        name: &str,
        begin: Option<(u32, u32)>,
        end: Option<(u32, u32)>,
        size: &str,
    ) -> PeriodEntry {
        PeriodEntry {
            period: period(name, begin, end),
            desired_size: Some(size.into()),
        }
    }

    fn schedule(periods: Vec<PeriodEntry>) -> Schedule {
        Schedule {
            name: "test".into(),
            timezone: chrono_tz::UTC,
            periods,
            override_status: None,
            description: None,
            maintenance_windows: Vec::new(),
            stop_new_instances: true,
            use_maintenance_window: true,
            enforced: false,
            hibernate: false,
            retain_running: false,
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn override_status_short_circuits() {
        let mut sched = schedule(vec![entry("office", Some((9, 0)), Some((17, 0)))]);
        sched.override_status = Some(OverrideStatus::Running);
        // 3am, far outside the period.
        let result = sched.desired_state(utc(2024, 3, 4, 3, 0));
        assert_eq!(result.state, ScheduleState::Running);
        assert_eq!(result.period_name.as_deref(), Some(OVERRIDE_PERIOD_NAME));
        assert!(result.desired_size.is_none());

        sched.override_status = Some(OverrideStatus::Stopped);
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Stopped);
        assert_eq!(result.period_name.as_deref(), Some(OVERRIDE_PERIOD_NAME));
    }

    #[test]
    fn single_period_runs_within_window() {
        let sched = schedule(vec![entry("office", Some((9, 0)), Some((17, 0)))]);
        assert_eq!(
            sched.desired_state(utc(2024, 3, 4, 12, 0)).state,
            ScheduleState::Running
        );
        assert_eq!(
            sched.desired_state(utc(2024, 3, 4, 18, 0)).state,
            ScheduleState::Stopped
        );
    }

    #[test]
    fn timezone_localization() {
        let mut sched = schedule(vec![entry("office", Some((9, 0)), Some((17, 0)))]);
        sched.timezone = "America/New_York".parse::<Tz>().unwrap();
        // 14:00 UTC on 2024-03-04 is 09:00 in New York (EST, UTC-5).
        assert_eq!(
            sched.desired_state(utc(2024, 3, 4, 14, 0)).state,
            ScheduleState::Running
        );
        // 13:55 UTC is 08:55 local: before the window.
        assert_eq!(
            sched.desired_state(utc(2024, 3, 4, 13, 55)).state,
            ScheduleState::Stopped
        );
    }

    #[test]
    fn running_beats_any_beats_stopped() {
        // A: begintime-only period that is Any before 22:00.
        // B: plain window currently Running.
        let sched = schedule(vec![
            entry("late", Some((22, 0)), None),
            sized_entry("office", Some((9, 0)), Some((17, 0)), "m5.large"),
        ]);
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Running);
        assert_eq!(result.desired_size.as_deref(), Some("m5.large"));
        assert_eq!(result.period_name.as_deref(), Some("office"));
    }

    #[test]
    fn any_beats_stopped() {
        let sched = schedule(vec![
            entry("late", Some((22, 0)), None),
            entry("office", Some((9, 0)), Some((11, 0))),
        ]);
        // 12:00: office is Stopped, late is Any.
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Any);
        assert!(result.period_name.is_none());
    }

    #[test]
    fn most_recent_start_is_authoritative() {
        let sched = schedule(vec![
            sized_entry("early", Some((9, 0)), Some((18, 0)), "t3.small"),
            sized_entry("midday", Some((10, 0)), Some((16, 0)), "m5.xlarge"),
        ]);
        // 11:00: both running; midday started later and wins.
        let result = sched.desired_state(utc(2024, 3, 4, 11, 0));
        assert_eq!(result.state, ScheduleState::Running);
        assert_eq!(result.desired_size.as_deref(), Some("m5.xlarge"));
        assert_eq!(result.period_name.as_deref(), Some("midday"));
        // 9:30: only the early one is running.
        let result = sched.desired_state(utc(2024, 3, 4, 9, 30));
        assert_eq!(result.desired_size.as_deref(), Some("t3.small"));
    }

    #[test]
    fn undefined_begintime_is_never_more_authoritative() {
        let sched = schedule(vec![
            entry("all-day", None, None),
            sized_entry("office", Some((9, 0)), Some((17, 0)), "m5.large"),
        ]);
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.period_name.as_deref(), Some("office"));
        assert_eq!(result.desired_size.as_deref(), Some("m5.large"));
    }

    #[test]
    fn adjacency_bridges_back_to_back_periods() {
        let sched = schedule(vec![
            entry("morning", Some((4, 0)), Some((12, 0))),
            sized_entry("afternoon", Some((12, 1)), Some((17, 0)), "c5.large"),
        ]);
        // Exactly 12:00: morning has ended ([begin, end) is exclusive) and
        // afternoon has not begun, but 11:59 and 12:01 are both running.
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Running);
        assert_eq!(result.period_name.as_deref(), Some("afternoon"));
        assert_eq!(result.desired_size.as_deref(), Some("c5.large"));
    }

    #[test]
    fn adjacency_with_touching_periods() {
        let sched = schedule(vec![
            entry("morning", Some((4, 0)), Some((12, 0))),
            entry("afternoon", Some((12, 0)), Some((17, 0))),
        ]);
        // 12:00 is directly inside the second period here; no notch.
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Running);
        assert_eq!(result.period_name.as_deref(), Some("afternoon"));
    }

    #[test]
    fn no_adjacency_for_single_period() {
        let sched = schedule(vec![entry("morning", Some((4, 0)), Some((12, 0)))]);
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Stopped);
    }

    #[test]
    fn no_adjacency_when_gap_is_real() {
        let sched = schedule(vec![
            entry("morning", Some((4, 0)), Some((12, 0))),
            entry("evening", Some((18, 0)), Some((22, 0))),
        ]);
        let result = sched.desired_state(utc(2024, 3, 4, 14, 0));
        assert_eq!(result.state, ScheduleState::Stopped);
    }

    #[test]
    fn all_periods_stopped_is_stopped() {
        let sched = schedule(vec![
            entry("morning", Some((4, 0)), Some((8, 0))),
            entry("evening", Some((18, 0)), Some((22, 0))),
        ]);
        let result = sched.desired_state(utc(2024, 3, 4, 12, 0));
        assert_eq!(result.state, ScheduleState::Stopped);
        assert!(result.period_name.is_none());
        assert!(result.desired_size.is_none());
    }
}
