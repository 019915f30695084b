use serde::{Deserialize, Serialize};

/// The end of a range expression.
///
/// `Last` is the end-of-domain sentinel (`L`), which resolves to 12 for
/// months, 6 for weekdays, and the number of days in the month for
/// monthdays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeEnd {
    Value(u32),
    Last,
}

/// One sub-expression of a recurrence (days of month, months, or days of
/// week), as a sum type evaluated by exhaustive matching.
///
/// Weekday-shaped variants (`NearestWeekday`, `NthWeekday`, `LastWeekday`)
/// parse in any field but are only legal where the field documents them;
/// field validation rejects the rest before evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CronExpr {
    /// Wildcard (`*` or `?`): contains every value in the domain.
    All,
    /// A single numeric value (possibly parsed from an English name).
    Value(u32),
    /// The last valid value in the domain (`L`).
    Last,
    /// A range with an optional step. `end == None` means "to the end of the
    /// domain" and is produced by step expressions over a single value
    /// (`"5/2"`).
    Range {
        start: u32,
        end: Option<RangeEnd>,
        interval: u32,
    },
    /// A union of sub-expressions; contains a value when any member does.
    Union(Vec<CronExpr>),
    /// The weekday (Mon-Fri) nearest to the given day of month (`15W`).
    NearestWeekday(u32),
    /// The n-th occurrence of a weekday within the month (`Mon#2`).
    NthWeekday { weekday: u32, n: u32 },
    /// The last occurrence of a weekday within the month (`FriL`).
    LastWeekday(u32),
}

impl CronExpr {
    /// Whether this expression is the bare wildcard.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl std::fmt::Display for CronExpr {
    /// Canonical token rendering; `parse` of the rendering yields an equal
    /// expression for every value the parser can produce.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Value(v) => write!(f, "{v}"),
            Self::Last => f.write_str("L"),
            Self::Range {
                start,
                end,
                interval,
            } => {
                match end {
                    Some(RangeEnd::Value(e)) => write!(f, "{start}-{e}")?,
                    Some(RangeEnd::Last) => write!(f, "{start}-L")?,
                    None => write!(f, "{start}")?,
                }
                if *interval != 1 || end.is_none() {
                    write!(f, "/{interval}")?;
                }
                Ok(())
            }
            Self::Union(exprs) => {
                let rendered: Vec<String> = exprs.iter().map(ToString::to_string).collect();
                f.write_str(&rendered.join(","))
            }
            Self::NearestWeekday(day) => write!(f, "{day}W"),
            Self::NthWeekday { weekday, n } => write!(f, "{weekday}#{n}"),
            Self::LastWeekday(weekday) => write!(f, "{weekday}L"),
        }
    }
}

/// The full recurrence of a period: three independent sub-expressions, each
/// defaulting to the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronRecurrence {
    pub monthdays: CronExpr,
    pub months: CronExpr,
    pub weekdays: CronExpr,
}

impl CronRecurrence {
    /// Whether every sub-expression is the wildcard (i.e. the recurrence
    /// places no restriction on the date).
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.monthdays.is_all() && self.months.is_all() && self.weekdays.is_all()
    }
}

impl Default for CronRecurrence {
    fn default() -> Self {
        Self {
            monthdays: CronExpr::All,
            months: CronExpr::All,
            weekdays: CronExpr::All,
        }
    }
}
