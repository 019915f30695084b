use std::collections::BTreeSet;

use thiserror::Error;

use super::expr::{CronExpr, RangeEnd};

/// Errors from parsing or field-validating a recurrence sub-expression.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronParseError {
    /// The token matched none of the grammar's alternatives.
    #[error("could not parse as any form of recurrence expression: {0}")]
    Unrecognized(String),

    /// A field was given as an empty set of tokens.
    #[error("empty expression set is malformed")]
    EmptySet,

    /// Ranges and steps may not start from the `L` sentinel (`L-5` is
    /// reserved for possible future "last n values" semantics).
    #[error("range may not start with L: {0}")]
    RangeStartsWithLast(String),

    /// Step expressions require an interval of at least 1.
    #[error("step interval must be at least 1: {0}")]
    ZeroInterval(String),

    /// Nth-weekday ordinals are 1 through 5.
    #[error("nth weekday ordinal must be between 1 and 5: {0}")]
    OrdinalOutOfRange(String),

    /// The expression form parsed but is not legal in this field (e.g.
    /// `Mon#1` in a months field).
    #[error("expression form not supported in {field} field: {expr}")]
    UnsupportedInField { field: &'static str, expr: String },

    /// A numeric value is outside the field's domain.
    #[error("value {value} out of range for {field} field ({min}-{max})")]
    ValueOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Parse a months-of-year field. `None` is the wildcard.
pub fn parse_months(tokens: Option<&BTreeSet<String>>) -> Result<CronExpr, CronParseError> {
    let expr = parse_field(tokens, Field::Months)?;
    validate(&expr, Field::Months)?;
    Ok(expr)
}

/// Parse a days-of-month field. `None` is the wildcard.
pub fn parse_monthdays(tokens: Option<&BTreeSet<String>>) -> Result<CronExpr, CronParseError> {
    let expr = parse_field(tokens, Field::Monthdays)?;
    validate(&expr, Field::Monthdays)?;
    Ok(expr)
}

/// Parse a days-of-week field. `None` is the wildcard.
pub fn parse_weekdays(tokens: Option<&BTreeSet<String>>) -> Result<CronExpr, CronParseError> {
    let expr = parse_field(tokens, Field::Weekdays)?;
    validate(&expr, Field::Weekdays)?;
    Ok(expr)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Monthdays,
    Months,
    Weekdays,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Self::Monthdays => "monthdays",
            Self::Months => "months",
            Self::Weekdays => "weekdays",
        }
    }

    /// Numeric domain of the field. Monthdays use the widest possible month
    /// here; the evaluator narrows to the actual month length.
    fn domain(self) -> (u32, u32) {
        match self {
            Self::Monthdays => (1, 31),
            Self::Months => (1, 12),
            Self::Weekdays => (0, 6),
        }
    }
}

// Period definitions are not localized; names are English only, full or
// 3-letter abbreviation, case-insensitive.
const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Resolve a lowercase name against the field's name table. Months are
/// 1-based (Jan=1), weekdays 0-based (Monday=0).
fn name_value(name: &str, field: Field) -> Option<u32> {
    let (names, offset): (&[&str], u32) = match field {
        Field::Months => (&MONTH_NAMES, 1),
        Field::Weekdays => (&WEEKDAY_NAMES, 0),
        Field::Monthdays => return None,
    };
    names
        .iter()
        .position(|full| *full == name || full[..3] == *name)
        .map(|i| u32::try_from(i).unwrap_or(0) + offset)
}

fn parse_field(
    tokens: Option<&BTreeSet<String>>,
    field: Field,
) -> Result<CronExpr, CronParseError> {
    let Some(tokens) = tokens else {
        return Ok(CronExpr::All);
    };
    if tokens.is_empty() {
        return Err(CronParseError::EmptySet);
    }

    let mut exprs = Vec::new();
    for token in tokens {
        // A single config entry may itself carry a comma-separated list.
        for part in token.split(',') {
            exprs.push(parse_single(&part.trim().to_lowercase(), field)?);
        }
    }
    if exprs.len() == 1 {
        Ok(exprs.remove(0))
    } else {
        Ok(CronExpr::Union(exprs))
    }
}

/// Parse one token. Alternatives are tried in a fixed order; the first
/// match wins and an unmatched token reports the generic parse error.
fn parse_single(token: &str, field: Field) -> Result<CronExpr, CronParseError> {
    if token.is_empty() {
        return Err(CronParseError::Unrecognized(token.to_owned()));
    }

    // Single value: numeric literal, English name, or the L sentinel.
    if let Some(expr) = parse_single_value(token, field) {
        return Ok(expr);
    }

    // Wildcards.
    if token == "*" || token == "?" {
        return Ok(CronExpr::All);
    }

    // Step: `expr/n`, where `expr` is a range or a single value.
    if let Some((range_part, interval_part)) = token.split_once('/') {
        return parse_step(token, range_part.trim(), interval_part.trim(), field);
    }

    // Range: `a-b`.
    if token.contains('-') {
        return parse_range(token, 1, field);
    }

    // Nth weekday: `<day>#n`.
    if let Some((day_part, n_part)) = token.split_once('#') {
        let weekday = parse_numeric_or_name(day_part.trim(), field)
            .ok_or_else(|| CronParseError::Unrecognized(token.to_owned()))?;
        let n: u32 = n_part
            .trim()
            .parse()
            .map_err(|_| CronParseError::Unrecognized(token.to_owned()))?;
        if !(1..=5).contains(&n) {
            return Err(CronParseError::OrdinalOutOfRange(token.to_owned()));
        }
        return Ok(CronExpr::NthWeekday { weekday, n });
    }

    // Last weekday: `<day>L` (the bare `L` was consumed above).
    if let Some(day_part) = token.strip_suffix('l') {
        if let Some(weekday) = parse_numeric_or_name(day_part, field) {
            return Ok(CronExpr::LastWeekday(weekday));
        }
    }

    // Nearest weekday: `<monthday>W`.
    if let Some(day_part) = token.strip_suffix('w') {
        if let Ok(day) = day_part.parse::<u32>() {
            return Ok(CronExpr::NearestWeekday(day));
        }
    }

    Err(CronParseError::Unrecognized(token.to_owned()))
}

fn parse_single_value(token: &str, field: Field) -> Option<CronExpr> {
    if let Some(value) = parse_numeric_or_name(token, field) {
        return Some(CronExpr::Value(value));
    }
    if token == "l" {
        return Some(CronExpr::Last);
    }
    None
}

fn parse_numeric_or_name(token: &str, field: Field) -> Option<u32> {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return token.parse().ok();
    }
    name_value(token, field)
}

fn parse_step(
    token: &str,
    range_part: &str,
    interval_part: &str,
    field: Field,
) -> Result<CronExpr, CronParseError> {
    let interval: u32 = interval_part
        .parse()
        .map_err(|_| CronParseError::Unrecognized(token.to_owned()))?;
    if interval == 0 {
        return Err(CronParseError::ZeroInterval(token.to_owned()));
    }

    if range_part.contains('-') {
        return parse_range(range_part, interval, field);
    }

    if range_part == "l" {
        return Err(CronParseError::RangeStartsWithLast(token.to_owned()));
    }
    let start = parse_numeric_or_name(range_part, field)
        .ok_or_else(|| CronParseError::Unrecognized(token.to_owned()))?;

    // A step over a single value runs from that value to the end of the
    // domain, resolved at evaluation time.
    Ok(CronExpr::Range {
        start,
        end: None,
        interval,
    })
}

fn parse_range(token: &str, interval: u32, field: Field) -> Result<CronExpr, CronParseError> {
    let (start_part, end_part) = token
        .split_once('-')
        .ok_or_else(|| CronParseError::Unrecognized(token.to_owned()))?;
    let start_part = start_part.trim();
    let end_part = end_part.trim();

    if start_part == "l" {
        return Err(CronParseError::RangeStartsWithLast(token.to_owned()));
    }
    let start = parse_numeric_or_name(start_part, field)
        .ok_or_else(|| CronParseError::Unrecognized(token.to_owned()))?;

    let end = if end_part == "l" {
        RangeEnd::Last
    } else {
        RangeEnd::Value(
            parse_numeric_or_name(end_part, field)
                .ok_or_else(|| CronParseError::Unrecognized(token.to_owned()))?,
        )
    };

    Ok(CronExpr::Range {
        start,
        end: Some(end),
        interval,
    })
}

/// Field-specific validation: reject weekday-shaped variants where the field
/// does not document them, and numeric values outside the field's domain.
fn validate(expr: &CronExpr, field: Field) -> Result<(), CronParseError> {
    let (min, max) = field.domain();
    let check_value = |value: u32| {
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(CronParseError::ValueOutOfRange {
                field: field.name(),
                value,
                min,
                max,
            })
        }
    };
    let unsupported = || CronParseError::UnsupportedInField {
        field: field.name(),
        expr: expr.to_string(),
    };

    match expr {
        CronExpr::All | CronExpr::Last => Ok(()),
        CronExpr::Value(v) => check_value(*v),
        CronExpr::Range { start, end, .. } => {
            check_value(*start)?;
            if let Some(RangeEnd::Value(e)) = end {
                check_value(*e)?;
            }
            Ok(())
        }
        CronExpr::Union(exprs) => {
            for sub in exprs {
                validate(sub, field)?;
            }
            Ok(())
        }
        CronExpr::NearestWeekday(day) => match field {
            Field::Monthdays => check_value(*day),
            Field::Months | Field::Weekdays => Err(unsupported()),
        },
        CronExpr::NthWeekday { weekday, .. } | CronExpr::LastWeekday(weekday) => match field {
            Field::Weekdays => check_value(*weekday),
            Field::Months | Field::Monthdays => Err(unsupported()),
        },
    }
}
