//! Calendar recurrence grammar for period definitions.
//!
//! A period's recurrence is three independent sub-expressions: days of
//! month, months of year, and days of week. Each is parsed from the token
//! grammar in [`parser`] into the [`CronExpr`] sum type and evaluated
//! against a date by [`eval`].
//!
//! Evaluation is intersection semantics: a date satisfies the recurrence
//! only when every sub-expression contains it. A missing sub-expression is
//! the wildcard and always satisfied. This differs from classic cron, where
//! day-of-month and day-of-week are OR-ed; it is the historical behavior of
//! this scheduler and is relied on by existing schedules.

mod eval;
mod expr;
mod parser;

pub use eval::{
    in_recurrence, monthdays_contains, months_contains, resolve_last_weekday,
    resolve_nearest_weekday, resolve_nth_weekday, weekdays_contains,
};
pub use expr::{CronExpr, CronRecurrence, RangeEnd};
pub use parser::{CronParseError, parse_monthdays, parse_months, parse_weekdays};
