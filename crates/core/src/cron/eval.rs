use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};

use super::expr::{CronExpr, CronRecurrence, RangeEnd};

/// Does `date` satisfy the full recurrence?
///
/// Intersection semantics: every sub-expression must contain the date. A
/// wildcard sub-expression is always satisfied.
#[must_use]
pub fn in_recurrence(recurrence: &CronRecurrence, date: NaiveDate) -> bool {
    monthdays_contains(&recurrence.monthdays, date)
        && months_contains(&recurrence.months, date)
        && weekdays_contains(&recurrence.weekdays, date)
}

/// Closed integer interval used as the evaluation domain of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntDomain {
    start: u32,
    end: u32,
}

impl IntDomain {
    fn width(self) -> u32 {
        self.end - self.start
    }

    fn contains(self, value: i64) -> bool {
        i64::from(self.start) <= value && value <= i64::from(self.end)
    }
}

const MONTHS_DOMAIN: IntDomain = IntDomain { start: 1, end: 12 };
const WEEKDAYS_DOMAIN: IntDomain = IntDomain { start: 0, end: 6 };

/// Number of days in the month containing `date`.
fn days_in_month(date: NaiveDate) -> u32 {
    let (next_year, next_month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // First of next month minus one day is always a valid date.
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(31, |d| d.day())
}

/// Weekday of `date` with Monday = 0 .. Sunday = 6.
fn weekday_of(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

/// Does `date` satisfy `expr` interpreted as a months-of-year expression?
///
/// Weekday-shaped variants are rejected by field validation and never reach
/// this function; they evaluate to false.
#[must_use]
pub fn months_contains(expr: &CronExpr, date: NaiveDate) -> bool {
    match expr {
        CronExpr::All => true,
        CronExpr::Value(v) => date.month() == *v,
        CronExpr::Last => date.month() == MONTHS_DOMAIN.end,
        CronExpr::Range {
            start,
            end,
            interval,
        } => expand_range(*start, *end, *interval, MONTHS_DOMAIN, true)
            .contains(&date.month()),
        CronExpr::Union(exprs) => exprs.iter().any(|sub| months_contains(sub, date)),
        CronExpr::NearestWeekday(_) | CronExpr::NthWeekday { .. } | CronExpr::LastWeekday(_) => {
            debug_assert!(false, "weekday variant in months expression");
            false
        }
    }
}

/// Does `date` satisfy `expr` interpreted as a days-of-month expression?
///
/// The domain's upper end is the number of days in `date`'s month, so `L`
/// tracks month length. Monthday ranges never wrap; an `end < start` range
/// is the empty set.
#[must_use]
pub fn monthdays_contains(expr: &CronExpr, date: NaiveDate) -> bool {
    let domain = IntDomain {
        start: 1,
        end: days_in_month(date),
    };

    match expr {
        CronExpr::All => true,
        CronExpr::Value(v) => date.day() == *v,
        CronExpr::Last => date.day() == domain.end,
        CronExpr::Range {
            start,
            end,
            interval,
        } => expand_range(*start, *end, *interval, domain, false).contains(&date.day()),
        CronExpr::Union(exprs) => exprs.iter().any(|sub| monthdays_contains(sub, date)),
        CronExpr::NearestWeekday(day) => {
            resolve_nearest_weekday(*day, date) == Some(date.day())
        }
        CronExpr::NthWeekday { .. } | CronExpr::LastWeekday(_) => {
            debug_assert!(false, "nth/last weekday variant in monthdays expression");
            false
        }
    }
}

/// Does `date` satisfy `expr` interpreted as a days-of-week expression?
#[must_use]
pub fn weekdays_contains(expr: &CronExpr, date: NaiveDate) -> bool {
    let weekday = weekday_of(date);

    match expr {
        CronExpr::All => true,
        CronExpr::Value(v) => weekday == *v,
        CronExpr::Last => weekday == WEEKDAYS_DOMAIN.end,
        CronExpr::Range {
            start,
            end,
            interval,
        } => expand_range(*start, *end, *interval, WEEKDAYS_DOMAIN, true).contains(&weekday),
        CronExpr::Union(exprs) => exprs.iter().any(|sub| weekdays_contains(sub, date)),
        CronExpr::NthWeekday { weekday, n } => {
            resolve_nth_weekday(*weekday, *n, date) == Some(date.day())
        }
        CronExpr::LastWeekday(target) => resolve_last_weekday(*target, date) == date.day(),
        CronExpr::NearestWeekday(_) => {
            debug_assert!(false, "nearest weekday variant in weekdays expression");
            false
        }
    }
}

/// Resolve the weekday (Mon-Fri) nearest to `monthday` within the month of
/// `reference`. A Saturday bumps backward to Friday except on day 1, where
/// it bumps forward to Monday; a Sunday bumps forward to Monday except on
/// the last day of the month, where it bumps backward to Friday.
///
/// Returns `None` when `monthday` does not exist in the reference month
/// (e.g. `31W` in February).
#[must_use]
pub fn resolve_nearest_weekday(monthday: u32, reference: NaiveDate) -> Option<u32> {
    let target = NaiveDate::from_ymd_opt(reference.year(), reference.month(), monthday)?;
    match weekday_of(target) {
        5 => {
            // Saturday
            if monthday == 1 {
                Some(monthday + 2)
            } else {
                Some(monthday - 1)
            }
        }
        6 => {
            // Sunday
            if monthday == days_in_month(reference) {
                Some(monthday - 2)
            } else {
                Some(monthday + 1)
            }
        }
        _ => Some(monthday),
    }
}

/// Resolve the monthday of the n-th occurrence of `weekday` (Monday = 0) in
/// the month of `reference`, or `None` when the n-th occurrence does not
/// exist.
#[must_use]
pub fn resolve_nth_weekday(weekday: u32, n: u32, reference: NaiveDate) -> Option<u32> {
    let first_of_month = reference.with_day(1)?;
    let mut offset = i64::from(weekday) - i64::from(weekday_of(first_of_month));
    if offset < 0 {
        offset += 7;
    }
    #[allow(clippy::cast_sign_loss)]
    let first_occurrence = 1 + offset as u32;
    let nth = first_occurrence + 7 * (n - 1);
    if nth <= days_in_month(reference) {
        Some(nth)
    } else {
        None
    }
}

/// Resolve the monthday of the last occurrence of `weekday` (Monday = 0) in
/// the month of `reference`.
#[must_use]
pub fn resolve_last_weekday(weekday: u32, reference: NaiveDate) -> u32 {
    let last_day = days_in_month(reference);
    let last_date = NaiveDate::from_ymd_opt(reference.year(), reference.month(), last_day)
        .unwrap_or(reference);
    let mut delta = i64::from(weekday_of(last_date)) - i64::from(weekday);
    if delta < 0 {
        delta += 7;
    }
    #[allow(clippy::cast_sign_loss)]
    let result = last_day - delta as u32;
    result
}

/// Expand a range (with step) into the discrete set of contained values.
///
/// When `wrap` is set and `start > end`, the pointer walks to the domain end
/// and then wraps exactly once by subtracting `width + 1`. When `wrap` is
/// unset (monthdays), `start > end` is the empty set. A `start` beyond the
/// domain end is always empty; it never wraps into the next domain.
fn expand_range(
    start: u32,
    end: Option<RangeEnd>,
    interval: u32,
    domain: IntDomain,
    wrap: bool,
) -> BTreeSet<u32> {
    let end = match end {
        Some(RangeEnd::Value(v)) => v,
        Some(RangeEnd::Last) | None => domain.end,
    };

    let mut values = BTreeSet::new();
    if start > domain.end {
        return values;
    }

    let mut will_wrap = start > end;
    if will_wrap && !wrap {
        return values;
    }

    debug_assert!(interval >= 1, "interval is validated at parse time");
    let interval = i64::from(interval.max(1));
    let mut pointer = i64::from(start);
    while will_wrap || pointer <= i64::from(end) {
        if domain.contains(pointer) {
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
            values.insert(pointer as u32);
        }
        pointer += interval;
        if will_wrap && pointer > i64::from(domain.end) {
            pointer -= i64::from(domain.width() + 1);
            will_wrap = false;
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn all_contains_every_date() {
        for d in [date(2024, 1, 1), date(2024, 2, 29), date(2025, 12, 31)] {
            assert!(months_contains(&CronExpr::All, d));
            assert!(monthdays_contains(&CronExpr::All, d));
            assert!(weekdays_contains(&CronExpr::All, d));
        }
    }

    #[test]
    fn month_value_and_last() {
        assert!(months_contains(&CronExpr::Value(3), date(2024, 3, 10)));
        assert!(!months_contains(&CronExpr::Value(3), date(2024, 4, 10)));
        assert!(months_contains(&CronExpr::Last, date(2024, 12, 1)));
        assert!(!months_contains(&CronExpr::Last, date(2024, 11, 30)));
    }

    #[test]
    fn month_range_wraps() {
        // Nov-Feb covers {11, 12, 1, 2}.
        let expr = CronExpr::Range {
            start: 11,
            end: Some(RangeEnd::Value(2)),
            interval: 1,
        };
        assert!(months_contains(&expr, date(2024, 11, 1)));
        assert!(months_contains(&expr, date(2024, 12, 15)));
        assert!(months_contains(&expr, date(2025, 1, 20)));
        assert!(months_contains(&expr, date(2025, 2, 28)));
        assert!(!months_contains(&expr, date(2025, 3, 1)));
        assert!(!months_contains(&expr, date(2024, 10, 31)));
    }

    #[test]
    fn month_union() {
        let expr = CronExpr::Union(vec![CronExpr::Value(1), CronExpr::Value(7)]);
        assert!(months_contains(&expr, date(2024, 1, 5)));
        assert!(months_contains(&expr, date(2024, 7, 5)));
        assert!(!months_contains(&expr, date(2024, 6, 5)));
    }

    #[test]
    fn monthday_last_tracks_month_length() {
        assert!(monthdays_contains(&CronExpr::Last, date(2024, 2, 29)));
        assert!(!monthdays_contains(&CronExpr::Last, date(2024, 2, 28)));
        assert!(monthdays_contains(&CronExpr::Last, date(2023, 2, 28)));
        assert!(monthdays_contains(&CronExpr::Last, date(2024, 4, 30)));
        assert!(monthdays_contains(&CronExpr::Last, date(2024, 1, 31)));
    }

    #[test]
    fn monthday_range_does_not_wrap() {
        // 21-9 would wrap in classic cron; here it is empty.
        let expr = CronExpr::Range {
            start: 21,
            end: Some(RangeEnd::Value(9)),
            interval: 1,
        };
        for day in [1, 9, 21, 25, 30] {
            assert!(
                !monthdays_contains(&expr, date(2024, 4, day)),
                "day {day} should not match a non-wrapping reversed range"
            );
        }
    }

    #[test]
    fn monthday_range_start_beyond_month_end_is_empty() {
        // 30-L in February never runs.
        let expr = CronExpr::Range {
            start: 30,
            end: Some(RangeEnd::Last),
            interval: 1,
        };
        assert!(!monthdays_contains(&expr, date(2024, 2, 28)));
        assert!(!monthdays_contains(&expr, date(2024, 2, 29)));
        // But it does run in longer months.
        assert!(monthdays_contains(&expr, date(2024, 3, 30)));
        assert!(monthdays_contains(&expr, date(2024, 3, 31)));
        assert!(!monthdays_contains(&expr, date(2024, 3, 29)));
        assert!(monthdays_contains(&expr, date(2024, 4, 30)));
    }

    #[test]
    fn monthday_step() {
        // 1-10/3 -> {1, 4, 7, 10}
        let expr = CronExpr::Range {
            start: 1,
            end: Some(RangeEnd::Value(10)),
            interval: 3,
        };
        for day in [1, 4, 7, 10] {
            assert!(monthdays_contains(&expr, date(2024, 5, day)));
        }
        for day in [2, 3, 5, 11] {
            assert!(!monthdays_contains(&expr, date(2024, 5, day)));
        }
    }

    #[test]
    fn monthday_step_from_single_value_runs_to_month_end() {
        // 25/2 -> {25, 27, 29, 31} in a 31-day month.
        let expr = CronExpr::Range {
            start: 25,
            end: None,
            interval: 2,
        };
        for day in [25, 27, 29, 31] {
            assert!(monthdays_contains(&expr, date(2024, 1, day)));
        }
        assert!(!monthdays_contains(&expr, date(2024, 1, 26)));
        // In February 2024 the same expression stops at 29.
        assert!(monthdays_contains(&expr, date(2024, 2, 29)));
        assert!(!monthdays_contains(&expr, date(2024, 2, 28)));
    }

    #[test]
    fn weekday_range_wraps() {
        // Fri-Mon covers {4, 5, 6, 0}.
        let expr = CronExpr::Range {
            start: 4,
            end: Some(RangeEnd::Value(0)),
            interval: 1,
        };
        assert!(weekdays_contains(&expr, date(2024, 3, 1))); // Friday
        assert!(weekdays_contains(&expr, date(2024, 3, 2))); // Saturday
        assert!(weekdays_contains(&expr, date(2024, 3, 3))); // Sunday
        assert!(weekdays_contains(&expr, date(2024, 3, 4))); // Monday
        assert!(!weekdays_contains(&expr, date(2024, 3, 5))); // Tuesday
        assert!(!weekdays_contains(&expr, date(2024, 3, 7))); // Thursday
    }

    #[test]
    fn weekday_start_beyond_domain_is_empty() {
        // 7-3 is malformed (weekdays are 0-6) and never matches.
        let expr = CronExpr::Range {
            start: 7,
            end: Some(RangeEnd::Value(3)),
            interval: 1,
        };
        for day in 1..=7 {
            assert!(!weekdays_contains(&expr, date(2024, 4, day)));
        }
    }

    #[test]
    fn weekday_last_is_sunday() {
        assert!(weekdays_contains(&CronExpr::Last, date(2024, 3, 3)));
        assert!(!weekdays_contains(&CronExpr::Last, date(2024, 3, 4)));
    }

    #[test]
    fn nth_weekday_first_monday_of_april_2024() {
        // April 2024: Mondays are the 1st, 8th, 15th, 22nd, 29th.
        let expr = CronExpr::NthWeekday { weekday: 0, n: 1 };
        assert!(weekdays_contains(&expr, date(2024, 4, 1)));
        for day in [8, 15, 22, 29] {
            assert!(!weekdays_contains(&expr, date(2024, 4, day)));
        }
    }

    #[test]
    fn nth_weekday_resolution() {
        // March 2024 starts on a Friday.
        assert_eq!(resolve_nth_weekday(4, 1, date(2024, 3, 10)), Some(1));
        assert_eq!(resolve_nth_weekday(0, 1, date(2024, 3, 10)), Some(4));
        assert_eq!(resolve_nth_weekday(0, 4, date(2024, 3, 10)), Some(25));
        // There is no 5th Monday in March 2024.
        assert_eq!(resolve_nth_weekday(0, 5, date(2024, 3, 10)), None);
        // But there is a 5th Friday (the 29th).
        assert_eq!(resolve_nth_weekday(4, 5, date(2024, 3, 10)), Some(29));
    }

    #[test]
    fn last_weekday_resolution() {
        // March 2024 ends on Sunday the 31st.
        assert_eq!(resolve_last_weekday(6, date(2024, 3, 1)), 31);
        assert_eq!(resolve_last_weekday(5, date(2024, 3, 1)), 30);
        assert_eq!(resolve_last_weekday(4, date(2024, 3, 1)), 29);
        assert_eq!(resolve_last_weekday(0, date(2024, 3, 1)), 25);
    }

    #[test]
    fn last_weekday_in_expression() {
        let expr = CronExpr::LastWeekday(4);
        assert!(weekdays_contains(&expr, date(2024, 3, 29)));
        assert!(!weekdays_contains(&expr, date(2024, 3, 22)));
    }

    #[test]
    fn nearest_weekday_plain_weekday_is_itself() {
        // 2024-04-10 is a Wednesday.
        assert_eq!(resolve_nearest_weekday(10, date(2024, 4, 1)), Some(10));
    }

    #[test]
    fn nearest_weekday_saturday_bumps_to_friday() {
        // 2024-04-06 is a Saturday -> Friday the 5th.
        assert_eq!(resolve_nearest_weekday(6, date(2024, 4, 1)), Some(5));
    }

    #[test]
    fn nearest_weekday_sunday_bumps_to_monday() {
        // 2024-04-07 is a Sunday -> Monday the 8th.
        assert_eq!(resolve_nearest_weekday(7, date(2024, 4, 1)), Some(8));
    }

    #[test]
    fn nearest_weekday_first_day_saturday_bumps_forward() {
        // 2024-06-01 is a Saturday; backward would leave the month, so the
        // nearest weekday is Monday the 3rd.
        assert_eq!(resolve_nearest_weekday(1, date(2024, 6, 1)), Some(3));
    }

    #[test]
    fn nearest_weekday_last_day_sunday_bumps_backward() {
        // 2024-03-31 is a Sunday; forward would leave the month, so the
        // nearest weekday is Friday the 29th.
        assert_eq!(resolve_nearest_weekday(31, date(2024, 3, 1)), Some(29));
    }

    #[test]
    fn nearest_weekday_nonexistent_day_is_none() {
        assert_eq!(resolve_nearest_weekday(31, date(2024, 2, 1)), None);
        let expr = CronExpr::NearestWeekday(31);
        assert!(!monthdays_contains(&expr, date(2024, 2, 29)));
    }

    #[test]
    fn in_recurrence_is_intersection() {
        // Mondays in April.
        let rec = CronRecurrence {
            monthdays: CronExpr::All,
            months: CronExpr::Value(4),
            weekdays: CronExpr::Value(0),
        };
        assert!(in_recurrence(&rec, date(2024, 4, 1)));
        assert!(in_recurrence(&rec, date(2024, 4, 8)));
        assert!(!in_recurrence(&rec, date(2024, 4, 2)));
        assert!(!in_recurrence(&rec, date(2024, 5, 6))); // Monday, wrong month
    }

    #[test]
    fn contains_is_stable_across_calls() {
        let expr = CronExpr::Range {
            start: 11,
            end: Some(RangeEnd::Value(2)),
            interval: 1,
        };
        let d = date(2024, 12, 25);
        let first = months_contains(&expr, d);
        for _ in 0..10 {
            assert_eq!(months_contains(&expr, d), first);
        }
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(date(2024, 2, 1)), 29);
        assert_eq!(days_in_month(date(2023, 2, 1)), 28);
        assert_eq!(days_in_month(date(2024, 12, 1)), 31);
        assert_eq!(days_in_month(date(2024, 4, 1)), 30);
    }
}
