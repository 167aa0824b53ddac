//! Six-field calendar expressions and next fire time calculation.
//!
//! Fields, in order: `second minute hour day-of-month month day-of-week`.
//! Each field accepts `*`, a literal, a comma-separated list, an `a-b` range,
//! an `a/b` or `*/b` step, or `a-b/c`. Day-of-week is 1 (MON) through 7 (SUN)
//! and accepts `MON`..`SUN`; month accepts `JAN`..`DEC`. Both day fields also
//! accept `?` as a wildcard. All evaluation happens in UTC.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum calendar span searched by [`CronExpression::next_fire`].
pub const SEARCH_LIMIT_YEARS: u32 = 4;

const SEARCH_LIMIT_DAYS: i64 = 366 * SEARCH_LIMIT_YEARS as i64;

const DAY_NAMES: [&str; 7] = ["MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// One of the six positions in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CronField {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl CronField {
    const ALL: [CronField; 6] = [
        CronField::Second,
        CronField::Minute,
        CronField::Hour,
        CronField::DayOfMonth,
        CronField::Month,
        CronField::DayOfWeek,
    ];

    /// Inclusive range of accepted values.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            CronField::Second | CronField::Minute => (0, 59),
            CronField::Hour => (0, 23),
            CronField::DayOfMonth => (1, 31),
            CronField::Month => (1, 12),
            CronField::DayOfWeek => (1, 7),
        }
    }

    fn is_day(self) -> bool {
        matches!(self, CronField::DayOfMonth | CronField::DayOfWeek)
    }

    fn alias(self, token: &str) -> Option<u32> {
        let names: &[&str] = match self {
            CronField::DayOfWeek => &DAY_NAMES,
            CronField::Month => &MONTH_NAMES,
            _ => return None,
        };
        names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .map(|idx| idx as u32 + 1)
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CronField::Second => "second",
            CronField::Minute => "minute",
            CronField::Hour => "hour",
            CronField::DayOfMonth => "day-of-month",
            CronField::Month => "month",
            CronField::DayOfWeek => "day-of-week",
        };
        write!(f, "{s}")
    }
}

/// Errors that can occur when parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// Wrong number of whitespace-separated fields.
    #[error("expected 6 fields (second minute hour day-of-month month day-of-week), found {found}")]
    FieldCount { found: usize },

    /// A token is neither a number nor a known alias.
    #[error("invalid value '{value}' in {field} field")]
    InvalidValue { field: CronField, value: String },

    /// A literal falls outside the field's range.
    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: CronField,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A range whose start is after its end.
    #[error("invalid range {start}-{end} in {field} field")]
    InvalidRange {
        field: CronField,
        start: u32,
        end: u32,
    },

    /// A step that is not a positive integer.
    #[error("invalid step '{step}' in {field} field")]
    InvalidStep { field: CronField, step: String },

    /// No matching instant exists within the search window.
    #[error("'{expression}' has no fire time within {years} years after {from}")]
    SearchBoundExceeded {
        expression: String,
        from: DateTime<Utc>,
        years: u32,
    },
}

/// Set of accepted values for one field, one bit per value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn insert_range(&mut self, start: u32, end: u32, step: u32) {
        let mut value = start;
        while value <= end {
            self.0 |= 1u64 << value;
            match value.checked_add(step) {
                Some(next) => value = next,
                None => break,
            }
        }
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.0 & (1u64 << value) != 0
    }

    /// Smallest accepted value that is `>= value`.
    fn next_from(self, value: u32) -> Option<u32> {
        if value >= 64 {
            return None;
        }
        let masked = self.0 & (u64::MAX << value);
        (masked != 0).then(|| masked.trailing_zeros())
    }

    fn first(self) -> Option<u32> {
        self.next_from(0)
    }
}

/// A parsed six-field calendar expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    expression: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpression {
    /// Parse an expression, failing on the first invalid field.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != CronField::ALL.len() {
            return Err(CronError::FieldCount { found: parts.len() });
        }

        let mut sets = [FieldSet::default(); 6];
        for (slot, (field, text)) in sets.iter_mut().zip(CronField::ALL.into_iter().zip(&parts)) {
            *slot = parse_field(field, text)?;
        }

        Ok(Self {
            expression: parts.join(" "),
            seconds: sets[0],
            minutes: sets[1],
            hours: sets[2],
            days_of_month: sets[3],
            months: sets[4],
            days_of_week: sets[5],
            dom_restricted: !is_wildcard(parts[3]),
            dow_restricted: !is_wildcard(parts[5]),
        })
    }

    /// The normalized expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Smallest matching instant at or after `now`, rounded up to a whole second.
    ///
    /// The search gives up after [`SEARCH_LIMIT_YEARS`] years of calendar time.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let exceeded = || CronError::SearchBoundExceeded {
            expression: self.expression.clone(),
            from: now,
            years: SEARCH_LIMIT_YEARS,
        };

        let start = ceil_to_second(now.naive_utc()).ok_or_else(exceeded)?;
        let limit = start
            .checked_add_signed(Duration::days(SEARCH_LIMIT_DAYS))
            .ok_or_else(exceeded)?;

        let mut candidate = start;
        while candidate <= limit {
            let next = if !self.months.contains(candidate.month()) {
                self.advance_month(candidate)
            } else if !self.matches_day(candidate.date()) {
                start_of_day(candidate.date().succ_opt())
            } else if !self.hours.contains(candidate.hour()) {
                match self.hours.next_from(candidate.hour() + 1) {
                    Some(hour) => candidate.date().and_hms_opt(hour, 0, 0),
                    None => start_of_day(candidate.date().succ_opt()),
                }
            } else if !self.minutes.contains(candidate.minute()) {
                match self.minutes.next_from(candidate.minute() + 1) {
                    Some(minute) => candidate.date().and_hms_opt(candidate.hour(), minute, 0),
                    None => candidate
                        .date()
                        .and_hms_opt(candidate.hour(), 0, 0)
                        .and_then(|t| t.checked_add_signed(Duration::hours(1))),
                }
            } else if !self.seconds.contains(candidate.second()) {
                match self.seconds.next_from(candidate.second() + 1) {
                    Some(second) => candidate.date().and_hms_opt(
                        candidate.hour(),
                        candidate.minute(),
                        second,
                    ),
                    None => candidate
                        .date()
                        .and_hms_opt(candidate.hour(), candidate.minute(), 0)
                        .and_then(|t| t.checked_add_signed(Duration::minutes(1))),
                }
            } else {
                return Ok(candidate.and_utc());
            };

            candidate = next.ok_or_else(exceeded)?;
        }

        Err(exceeded())
    }

    /// The next `n` fire times strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, n: usize) -> Result<Vec<DateTime<Utc>>, CronError> {
        let mut results = Vec::with_capacity(n);
        let mut current = after;
        for _ in 0..n {
            current = self.next_fire(current + Duration::seconds(1))?;
            results.push(current);
        }
        Ok(results)
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().number_from_monday());

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn advance_month(&self, candidate: NaiveDateTime) -> Option<NaiveDateTime> {
        let (year, month) = match self.months.next_from(candidate.month() + 1) {
            Some(month) => (candidate.year(), month),
            None => (candidate.year() + 1, self.months.first()?),
        };
        start_of_day(NaiveDate::from_ymd_opt(year, month, 1))
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn is_wildcard(text: &str) -> bool {
    text == "*" || text == "?"
}

fn start_of_day(date: Option<NaiveDate>) -> Option<NaiveDateTime> {
    date?.and_hms_opt(0, 0, 0)
}

fn ceil_to_second(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let truncated = t.with_nanosecond(0)?;
    if truncated == t {
        Some(t)
    } else {
        truncated.checked_add_signed(Duration::seconds(1))
    }
}

fn parse_field(field: CronField, text: &str) -> Result<FieldSet, CronError> {
    let (min, max) = field.bounds();
    let mut set = FieldSet::default();

    for item in text.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(parse_step(field, step)?)),
            None => (item, None),
        };

        let (start, end) = if base == "*" || (base == "?" && field.is_day()) {
            (min, max)
        } else if let Some((start, end)) = base.split_once('-') {
            let start = parse_value(field, start)?;
            let end = parse_value(field, end)?;
            if start > end {
                return Err(CronError::InvalidRange { field, start, end });
            }
            (start, end)
        } else {
            let value = parse_value(field, base)?;
            // `a/b` runs from `a` to the end of the field
            if step.is_some() { (value, max) } else { (value, value) }
        };

        set.insert_range(start, end, step.unwrap_or(1));
    }

    Ok(set)
}

fn parse_value(field: CronField, token: &str) -> Result<u32, CronError> {
    let value = match token.parse::<u32>() {
        Ok(value) => value,
        Err(_) => field.alias(token).ok_or_else(|| CronError::InvalidValue {
            field,
            value: token.to_string(),
        })?,
    };

    let (min, max) = field.bounds();
    if value < min || value > max {
        return Err(CronError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn parse_step(field: CronField, token: &str) -> Result<u32, CronError> {
    match token.parse::<u32>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(CronError::InvalidStep {
            field,
            step: token.to_string(),
        }),
    }
}
