use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::NaiveTime;
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cron::{CronParseError, CronRecurrence, parse_monthdays, parse_months, parse_weekdays};
use crate::period::RunningPeriod;
use crate::schedule::{OverrideStatus, PeriodEntry, Schedule};

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("valid regex"));

/// A period configuration rejected at validation time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidPeriodDefinition {
    #[error("period name is required")]
    MissingName,

    #[error("invalid {field} \"{value}\", must match HH:MM (24-hour, zero-padded)")]
    InvalidTime { field: &'static str, value: String },

    #[error("begintime {begin} must be earlier than endtime {end}")]
    BeginNotBeforeEnd { begin: String, end: String },

    #[error("must contain at least one of begintime, endtime, weekdays, months, monthdays")]
    Empty,

    #[error(transparent)]
    Recurrence(#[from] CronParseError),
}

/// The string-typed, persisted form of a period: times as `HH:MM` and
/// recurrence fields as sets of grammar tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begintime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthdays: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PeriodDefinition {
    /// Validate the definition without building the evaluator object.
    pub fn validate(&self) -> Result<(), InvalidPeriodDefinition> {
        self.to_running_period().map(|_| ())
    }

    /// Resolve into the evaluator object, validating along the way.
    pub fn to_running_period(&self) -> Result<RunningPeriod, InvalidPeriodDefinition> {
        if self.name.is_empty() {
            return Err(InvalidPeriodDefinition::MissingName);
        }

        let begintime = self
            .begintime
            .as_deref()
            .map(|s| parse_time(s, "begintime"))
            .transpose()?;
        let endtime = self
            .endtime
            .as_deref()
            .map(|s| parse_time(s, "endtime"))
            .transpose()?;

        if let (Some(begin), Some(end)) = (begintime, endtime) {
            if begin >= end {
                return Err(InvalidPeriodDefinition::BeginNotBeforeEnd {
                    begin: self.begintime.clone().unwrap_or_default(),
                    end: self.endtime.clone().unwrap_or_default(),
                });
            }
        }

        if self.begintime.is_none()
            && self.endtime.is_none()
            && self.weekdays.is_none()
            && self.monthdays.is_none()
            && self.months.is_none()
        {
            return Err(InvalidPeriodDefinition::Empty);
        }

        let recurrence = CronRecurrence {
            monthdays: parse_monthdays(self.monthdays.as_ref())?,
            months: parse_months(self.months.as_ref())?,
            weekdays: parse_weekdays(self.weekdays.as_ref())?,
        };

        Ok(RunningPeriod {
            name: self.name.clone(),
            begintime,
            endtime,
            recurrence,
        })
    }
}

fn parse_time(value: &str, field: &'static str) -> Result<NaiveTime, InvalidPeriodDefinition> {
    if !TIME_RE.is_match(value) {
        return Err(InvalidPeriodDefinition::InvalidTime {
            field,
            value: value.to_owned(),
        });
    }
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| InvalidPeriodDefinition::InvalidTime {
        field,
        value: value.to_owned(),
    })
}

/// A reference from a schedule to a period, optionally requesting a
/// resource size while that period is authoritative.
///
/// Serialized as `"name"` or `"name@size"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodRef {
    pub name: String,
    pub desired_size: Option<String>,
}

impl PeriodRef {
    /// Reference a period by name, without a size request.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired_size: None,
        }
    }

    /// Reference a period by name with a requested size.
    #[must_use]
    pub fn with_size(name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired_size: Some(size.into()),
        }
    }
}

impl std::str::FromStr for PeriodRef {
    type Err = InvalidScheduleDefinition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, size) = match s.split_once('@') {
            Some((name, size)) => (name.trim(), Some(size.trim())),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            return Err(InvalidScheduleDefinition::InvalidPeriodRef(s.to_owned()));
        }
        Ok(Self {
            name: name.to_owned(),
            desired_size: size.filter(|s| !s.is_empty()).map(ToOwned::to_owned),
        })
    }
}

impl TryFrom<String> for PeriodRef {
    type Error = InvalidScheduleDefinition;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodRef> for String {
    fn from(value: PeriodRef) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for PeriodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.desired_size {
            Some(size) => write!(f, "{}@{}", self.name, size),
            None => f.write_str(&self.name),
        }
    }
}

/// A schedule configuration rejected at validation time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidScheduleDefinition {
    #[error("schedule name is required")]
    MissingName,

    #[error("unknown timezone {0}")]
    UnknownTimezone(String),

    #[error("invalid override_status {0}, valid values are running and stopped")]
    InvalidOverrideStatus(String),

    #[error("at least one period must be specified for a schedule without override_status")]
    NoPeriods,

    #[error("invalid period reference: {0}")]
    InvalidPeriodRef(String),

    #[error("unable to find period definition for {0}")]
    UnknownPeriod(String),

    #[error("unknown schedule {0}")]
    UnknownSchedule(String),

    #[error("period {name}: {source}")]
    Period {
        name: String,
        source: InvalidPeriodDefinition,
    },
}

/// The string-typed, persisted form of a schedule.
///
/// Boolean flags are optional in the serialized form; absent values take
/// their documented defaults (`stop_new_instances` and
/// `use_maintenance_window` true, the rest false) on resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub periods: Vec<PeriodRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_windows: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_new_instances: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_maintenance_window: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforced: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hibernate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_running: Option<bool>,
}

impl ScheduleDefinition {
    /// Validate the definition's own fields (not its period references).
    pub fn validate(&self) -> Result<(), InvalidScheduleDefinition> {
        if self.name.is_empty() {
            return Err(InvalidScheduleDefinition::MissingName);
        }
        if let Some(tz) = &self.timezone {
            tz.parse::<Tz>()
                .map_err(|_| InvalidScheduleDefinition::UnknownTimezone(tz.clone()))?;
        }
        self.override_status()?;
        if self.periods.is_empty() && self.override_status.is_none() {
            return Err(InvalidScheduleDefinition::NoPeriods);
        }
        Ok(())
    }

    /// The parsed override status, if any. Matching is case-insensitive.
    pub fn override_status(&self) -> Result<Option<OverrideStatus>, InvalidScheduleDefinition> {
        match self.override_status.as_deref() {
            None => Ok(None),
            Some(s) if s.eq_ignore_ascii_case("running") => Ok(Some(OverrideStatus::Running)),
            Some(s) if s.eq_ignore_ascii_case("stopped") => Ok(Some(OverrideStatus::Stopped)),
            Some(other) => Err(InvalidScheduleDefinition::InvalidOverrideStatus(
                other.to_owned(),
            )),
        }
    }

    /// The schedule's timezone, falling back to the given default when
    /// unset.
    pub fn resolve_timezone(&self, default: Tz) -> Result<Tz, InvalidScheduleDefinition> {
        match &self.timezone {
            Some(tz) => tz
                .parse::<Tz>()
                .map_err(|_| InvalidScheduleDefinition::UnknownTimezone(tz.clone())),
            None => Ok(default),
        }
    }

    /// Resolve into the evaluator object, looking up referenced period
    /// definitions through `resolve`.
    pub fn to_schedule(
        &self,
        resolve: impl Fn(&str) -> Option<PeriodDefinition>,
        default_timezone: Tz,
    ) -> Result<Schedule, InvalidScheduleDefinition> {
        self.validate()?;

        let mut entries = Vec::with_capacity(self.periods.len());
        for period_ref in &self.periods {
            let definition = resolve(&period_ref.name)
                .ok_or_else(|| InvalidScheduleDefinition::UnknownPeriod(period_ref.name.clone()))?;
            let period = definition.to_running_period().map_err(|source| {
                InvalidScheduleDefinition::Period {
                    name: period_ref.name.clone(),
                    source,
                }
            })?;
            entries.push(PeriodEntry {
                period,
                desired_size: period_ref.desired_size.clone(),
            });
        }

        Ok(Schedule {
            name: self.name.clone(),
            timezone: self.resolve_timezone(default_timezone)?,
            periods: entries,
            override_status: self.override_status()?,
            description: self.description.clone(),
            maintenance_windows: self.maintenance_windows.clone().unwrap_or_default(),
            stop_new_instances: self.stop_new_instances.unwrap_or(true),
            use_maintenance_window: self.use_maintenance_window.unwrap_or(true),
            enforced: self.enforced.unwrap_or(false),
            hibernate: self.hibernate.unwrap_or(false),
            retain_running: self.retain_running.unwrap_or(false),
        })
    }
}
