use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

use crate::cron::{CronExpr, CronRecurrence};
use crate::period::RunningPeriod;
use crate::schedule::{PeriodEntry, Schedule};

static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("valid regex"));
static WINDOW_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mw-[0-9a-f]{17}$").expect("valid regex"));
static WINDOW_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-.]{3,128}$").expect("valid regex"));

/// Minutes of lead slack added before a window's start so that resources are
/// up when the window begins, regardless of where the poll lands.
const LEAD_SLACK_MINUTES: u32 = 10;

/// An error validating the consistency of a maintenance window.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaintenanceWindowError {
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("empty region name")]
    EmptyRegion,

    #[error("invalid window id: {0}")]
    InvalidWindowId(String),

    #[error("invalid maintenance window name: {0}")]
    InvalidWindowName(String),

    #[error("invalid duration: {0} (must be 1-24 hours)")]
    InvalidDuration(u32),
}

/// A provider-managed maintenance window.
///
/// The provider treats `(name, window_id)` as unique within an account and
/// region; several windows may share a name, and a schedule referencing a
/// window name honors all of them. The provider only reports the *next*
/// execution time, so an execution that is currently running is only known
/// from the persisted mirror (see the maintenance-window context in the
/// scheduler crate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub account: String,
    pub region: String,
    pub window_id: String,
    pub window_name: String,
    pub timezone: Tz,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub duration_hours: u32,
}

impl MaintenanceWindow {
    /// Validate the window's fields against the provider's documented
    /// constraints.
    pub fn validate(&self) -> Result<(), MaintenanceWindowError> {
        if !ACCOUNT_RE.is_match(&self.account) {
            return Err(MaintenanceWindowError::InvalidAccountId(
                self.account.clone(),
            ));
        }
        if self.region.is_empty() {
            return Err(MaintenanceWindowError::EmptyRegion);
        }
        if !WINDOW_ID_RE.is_match(&self.window_id) {
            return Err(MaintenanceWindowError::InvalidWindowId(
                self.window_id.clone(),
            ));
        }
        if !WINDOW_NAME_RE.is_match(&self.window_name) {
            return Err(MaintenanceWindowError::InvalidWindowName(
                self.window_name.clone(),
            ));
        }
        if self.duration_hours < 1 || self.duration_hours > 24 {
            return Err(MaintenanceWindowError::InvalidDuration(self.duration_hours));
        }
        Ok(())
    }

    /// Mirror sort key: `<name>:<window_id>`.
    #[must_use]
    pub fn name_id(&self) -> String {
        format!("{}:{}", self.window_name, self.window_id)
    }

    /// Mirror partition key: `<account>:<region>`.
    #[must_use]
    pub fn account_region(&self) -> String {
        format!("{}:{}", self.account, self.region)
    }

    /// Whether an execution of this window is active at `dt`, including the
    /// scheduling-interval lead slack before the start.
    #[must_use]
    pub fn is_running_at(&self, dt: DateTime<Utc>, scheduling_interval_minutes: u32) -> bool {
        let Some(next) = self.next_execution_time else {
            return false;
        };
        let begin =
            next - Duration::minutes(i64::from(scheduling_interval_minutes + LEAD_SLACK_MINUTES));
        let end = next + Duration::hours(i64::from(self.duration_hours));
        begin <= dt && dt < end
    }

    /// Build the synthetic enforced schedule covering this window's span.
    ///
    /// The span starts `scheduling_interval + 10` minutes before the
    /// window's start time so instances are up when it begins, and is split
    /// at midnight into up to three periods so each stays within a single
    /// local day. Returns `None` when the window has no next execution.
    #[must_use]
    pub fn to_schedule(&self, scheduling_interval_minutes: u32) -> Option<Schedule> {
        let next = self.next_execution_time?;
        let start = next
            .with_timezone(&self.timezone)
            .with_second(0)
            .and_then(|dt| dt.with_nanosecond(0))?;

        let begin_dt =
            start - Duration::minutes(i64::from(scheduling_interval_minutes + LEAD_SLACK_MINUTES));
        let end_dt = start + Duration::hours(i64::from(self.duration_hours));

        let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 0)?;

        let periods: Vec<RunningPeriod> = if begin_dt.date_naive() == end_dt.date_naive() {
            vec![window_period(
                format!("{}-period", self.window_name),
                Some(begin_dt.time()),
                Some(end_dt.time()),
                &begin_dt,
            )]
        } else if end_dt - begin_dt <= Duration::hours(24) {
            vec![
                window_period(
                    format!("{}-period-1", self.window_name),
                    Some(begin_dt.time()),
                    Some(end_of_day),
                    &begin_dt,
                ),
                window_period(
                    format!("{}-period-2", self.window_name),
                    Some(midnight),
                    Some(end_dt.time()),
                    &end_dt,
                ),
            ]
        } else {
            // Spans of more than 24 hours get a full middle day.
            let middle = end_dt - Duration::days(1);
            vec![
                window_period(
                    format!("{}-period-1", self.window_name),
                    Some(begin_dt.time()),
                    Some(end_of_day),
                    &begin_dt,
                ),
                window_period(format!("{}-period-2", self.window_name), None, None, &middle),
                window_period(
                    format!("{}-period-3", self.window_name),
                    Some(midnight),
                    Some(end_dt.time()),
                    &end_dt,
                ),
            ]
        };

        Some(Schedule {
            name: self.window_name.clone(),
            timezone: self.timezone,
            periods: periods
                .into_iter()
                .map(|period| PeriodEntry {
                    period,
                    desired_size: None,
                })
                .collect(),
            override_status: None,
            description: Some(format!("{} maintenance window", self.window_name)),
            maintenance_windows: Vec::new(),
            stop_new_instances: true,
            use_maintenance_window: true,
            enforced: true,
            hibernate: false,
            retain_running: false,
        })
    }
}

/// Parse a provider-formatted execution timestamp.
///
/// The provider emits minute-precision ISO 8601, with the offset shorthand
/// `Z` when the window was created without an explicit timezone
/// (`2023-06-27T00:00Z`) and a numeric offset otherwise
/// (`2023-06-27T03:00-04:00`). Full RFC 3339 with seconds, which the mirror
/// itself writes, is accepted too.
#[must_use]
pub fn parse_execution_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(rest) = s.strip_suffix('Z') {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M") {
            return Some(naive.and_utc());
        }
    }
    None
}

/// A period pinned to the day and month of `anchor`, in the window's local
/// calendar.
fn window_period(
    name: String,
    begintime: Option<NaiveTime>,
    endtime: Option<NaiveTime>,
    anchor: &DateTime<Tz>,
) -> RunningPeriod {
    RunningPeriod {
        name,
        begintime,
        endtime,
        recurrence: CronRecurrence {
            monthdays: CronExpr::Value(anchor.day()),
            months: CronExpr::Value(anchor.month()),
            weekdays: CronExpr::All,
        },
    }
}
