//! Crontab-style frequency specifications
//!
//! Supports the standard 5-field crontab syntax:
//! ```text
//! ┌───────────── minute (0-59)
//! │ ┌───────────── hour (0-23)
//! │ │ ┌───────────── day of month (1-31)
//! │ │ │ ┌───────────── month (1-12)
//! │ │ │ │ ┌───────────── day of week (1-7, 1=Monday)
//! │ │ │ │ │
//! * * * * *
//! ```
//!
//! Special characters:
//! - `*` - any value
//! - `,` - value list separator (e.g., `1,3,5`)
//! - `-` - inclusive range (e.g., `1-5`)
//! - `/` - step (e.g., `*/5` or `0-30/5`)
//!
//! A range whose right bound is smaller than its left bound wraps around the
//! field: `57-5` on the minute field means minutes 57 through 59 and 0
//! through 5. On the day-of-month field the true upper bound depends on the
//! month being evaluated, so wrapping date ranges are resolved lazily against
//! each candidate month's actual day count.

use crate::types::FrequencyError;
use chrono::{DateTime, Datelike, Month, NaiveDate, Timelike, Utc, Weekday};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

const MINUTES: usize = 60;
const HOURS: usize = 24;
const DATES: usize = 31;
const MONTHS: usize = 12;
const WEEKDAYS: usize = 7;

/// Beyond this year the next-occurrence search gives up.
pub const DEFAULT_MAX_YEAR: i32 = 2050;

/// A parsed crontab-like recurrence rule.
///
/// Each field is kept both as its raw token string and as an admissibility
/// table where every entry is either `None` or the literal field value it
/// stands for, so a lookup doubles as a validity check and a value lookup.
///
/// Two frequencies are equal iff their five raw field strings are equal;
/// `*/1` and `*` describe the same minutes but do not compare equal.
///
/// # Examples
///
/// ```
/// use taskwheel::Frequency;
///
/// // Every 5 minutes
/// let freq = Frequency::parse("*/5 * * * *").unwrap();
///
/// // Every day at 2:30 AM
/// let freq = Frequency::parse("30 2 * * *").unwrap();
///
/// // Every Monday at 9 AM
/// let freq = Frequency::parse("0 9 * * 1").unwrap();
/// ```
#[derive(Clone)]
pub struct Frequency {
    parts: [String; 5],
    minutes: [Option<u8>; MINUTES],
    hours: [Option<u8>; HOURS],
    dates: [Option<u8>; DATES],
    dates_underflow: Option<[Option<u8>; DATES]>,
    dates_overflow: Option<[Option<u8>; DATES]>,
    months: [Option<u8>; MONTHS],
    weekdays: [Option<u8>; WEEKDAYS],
    max_year: i32,
}

impl Frequency {
    /// Parse a 5-field crontab-like specification string.
    ///
    /// Fields are separated by single spaces; doubled spaces make the field
    /// count wrong and are rejected.
    pub fn parse(specification: &str) -> Result<Self, FrequencyError> {
        let fields: Vec<&str> = specification.split(' ').collect();
        if fields.len() != 5 {
            return Err(FrequencyError::InvalidFieldCount(fields.len()));
        }

        let minutes = parse_field::<MINUTES>(fields[0], 0, "minute", None)?;
        let hours = parse_field::<HOURS>(fields[1], 0, "hour", None)?;
        let mut underflow = [None; DATES];
        let mut overflow = [None; DATES];
        let dates = parse_field::<DATES>(fields[2], 1, "day", Some((&mut underflow, &mut overflow)))?;
        let months = parse_field::<MONTHS>(fields[3], 1, "month", None)?;
        let weekdays = parse_field::<WEEKDAYS>(fields[4], 1, "weekday", None)?;

        Ok(Self {
            parts: [
                fields[0].to_string(),
                fields[1].to_string(),
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
            ],
            minutes,
            hours,
            dates,
            dates_underflow: if underflow.iter().all(Option::is_none) {
                None
            } else {
                Some(underflow)
            },
            dates_overflow: if overflow.iter().all(Option::is_none) {
                None
            } else {
                Some(overflow)
            },
            months,
            weekdays,
            max_year: DEFAULT_MAX_YEAR,
        })
    }

    /// Start building a frequency from per-field constraints.
    pub fn builder() -> FrequencyBuilder {
        FrequencyBuilder::default()
    }

    /// Limit the next-occurrence search to years before `max_year`.
    ///
    /// The bound is not part of the specification and does not participate
    /// in equality.
    pub fn with_max_year(mut self, max_year: i32) -> Self {
        self.max_year = max_year;
        self
    }

    /// Every minute: `* * * * *`
    pub fn minutely() -> Self {
        Self::known("* * * * *")
    }

    /// Every hour on the hour: `0 * * * *`
    pub fn hourly() -> Self {
        Self::known("0 * * * *")
    }

    /// Every day at midnight: `0 0 * * *`
    pub fn daily() -> Self {
        Self::known("0 0 * * *")
    }

    /// Every Monday at midnight: `0 0 * * 1`
    pub fn mondays() -> Self {
        Self::known("0 0 * * 1")
    }

    /// Every Tuesday at midnight: `0 0 * * 2`
    pub fn tuesdays() -> Self {
        Self::known("0 0 * * 2")
    }

    /// Every Wednesday at midnight: `0 0 * * 3`
    pub fn wednesdays() -> Self {
        Self::known("0 0 * * 3")
    }

    /// Every Thursday at midnight: `0 0 * * 4`
    pub fn thursdays() -> Self {
        Self::known("0 0 * * 4")
    }

    /// Every Friday at midnight: `0 0 * * 5`
    pub fn fridays() -> Self {
        Self::known("0 0 * * 5")
    }

    /// Every Saturday at midnight: `0 0 * * 6`
    pub fn saturdays() -> Self {
        Self::known("0 0 * * 6")
    }

    /// Every Sunday at midnight: `0 0 * * 7`
    pub fn sundays() -> Self {
        Self::known("0 0 * * 7")
    }

    /// The first day of every month at midnight: `0 0 1 * *`
    pub fn monthly() -> Self {
        Self::known("0 0 1 * *")
    }

    /// The first day of every quarter at midnight: `0 0 1 */3 *`
    pub fn quarterly() -> Self {
        Self::known("0 0 1 */3 *")
    }

    /// Every January 1st at midnight: `0 0 1 1 *`
    pub fn yearly() -> Self {
        Self::known("0 0 1 1 *")
    }

    fn known(specification: &str) -> Self {
        Self::parse(specification).expect("shorthand specification parses")
    }

    /// The canonical 5-field specification string.
    pub fn specification(&self) -> String {
        self.parts.join(" ")
    }

    /// Compute the next admissible timestamp strictly after `start`.
    ///
    /// `start` is truncated to the minute first. The search advances the
    /// time of day within the admissibility tables, then walks forward
    /// through dates, months and years; the per-month date table is rebuilt
    /// for every candidate month so wrapping date ranges resolve against the
    /// month's actual day count. Weekday admissibility is checked last, once
    /// year and month are pinned.
    pub fn next_timestamp(&self, start: DateTime<Utc>) -> Result<DateTime<Utc>, FrequencyError> {
        let start = truncate_to_minute(start);

        let mut minute = start.minute();
        let mut hour = start.hour();
        let mut date = start.day();
        let mut month = start.month();
        let mut year = start.year();

        // advance to the next admissible time of day, rolling the date over
        // when the current hour or day can no longer host an occurrence
        let hour_ok = self.hours[hour as usize].is_some();
        let month_ok = self.months[(month - 1) as usize].is_some();
        let date_ok = self.dates_for_month(year, month)[(date - 1) as usize].is_some();

        match self.next_valid_minute(minute + 1) {
            Some(m) if hour_ok && month_ok && date_ok => minute = m,
            _ => {
                match self.next_valid_hour(hour + 1) {
                    Some(h) if month_ok && date_ok => hour = h,
                    _ => {
                        date += 1;
                        hour = self.first_valid_hour();
                    }
                }
                minute = self.first_valid_minute();
            }
        }

        // walk the calendar for the next admissible date
        while year < self.max_year {
            let next_date = if self.months[(month - 1) as usize].is_some() {
                self.next_valid_date(date, year, month)
            } else {
                None
            };
            match next_date {
                Some(d) => date = d,
                None => {
                    month = match self.next_valid_month(month + 1) {
                        Some(m) => m,
                        None => {
                            year += 1;
                            self.first_valid_month()
                        }
                    };
                    match self.next_valid_date(1, year, month) {
                        Some(d) => date = d,
                        None => {
                            date = 1;
                            continue;
                        }
                    }
                }
            }

            if let Some(day) = NaiveDate::from_ymd_opt(year, month, date) {
                let weekday = day.weekday().number_from_monday();
                if self.weekdays[(weekday - 1) as usize].is_some() {
                    if let Some(next) = day.and_hms_opt(hour, minute, 0) {
                        return Ok(next.and_utc());
                    }
                }
            }

            date += 1;
        }

        Err(FrequencyError::NoValidNextDate {
            max_year: self.max_year,
        })
    }

    /// Rebuild the date admissibility table for a concrete month.
    ///
    /// The static table is clamped to the month's day count; wrapping ranges
    /// then contribute their tail days, shifted when the previous month is
    /// shorter than 31 days so the wrap keeps its phase across the month
    /// boundary. Head positions past the previous month's end spill into the
    /// current month as well.
    fn dates_for_month(&self, year: i32, month: u32) -> [Option<u8>; DATES] {
        let max_date = days_in_month(year, month) as usize;
        let mut dates = [None; DATES];
        dates[..max_date].copy_from_slice(&self.dates[..max_date]);

        if let (Some(underflow), Some(overflow)) = (&self.dates_underflow, &self.dates_overflow) {
            let (prev_year, prev_month) = if month == 1 {
                (year - 1, 12)
            } else {
                (year, month - 1)
            };
            let prev_max = days_in_month(prev_year, prev_month) as usize;
            let shift = DATES - prev_max;

            for i in 0..DATES {
                if let Some(bound) = underflow[i] {
                    if i >= prev_max {
                        let target = i - prev_max;
                        if target < bound as usize && target < max_date {
                            dates[target] = Some(target as u8 + 1);
                        }
                    }
                }
                if let Some(bound) = overflow[i] {
                    let target = i + shift;
                    if target < bound as usize && target < max_date {
                        dates[target] = Some(target as u8 + 1);
                    }
                }
            }
        }

        dates
    }

    fn first_valid_minute(&self) -> u32 {
        self.next_valid_minute(0).unwrap_or(0)
    }

    fn next_valid_minute(&self, minute: u32) -> Option<u32> {
        scan(&self.minutes, minute as usize)
    }

    fn first_valid_hour(&self) -> u32 {
        self.next_valid_hour(0).unwrap_or(0)
    }

    fn next_valid_hour(&self, hour: u32) -> Option<u32> {
        scan(&self.hours, hour as usize)
    }

    fn next_valid_date(&self, date: u32, year: i32, month: u32) -> Option<u32> {
        scan(&self.dates_for_month(year, month), (date - 1) as usize)
    }

    fn first_valid_month(&self) -> u32 {
        self.next_valid_month(1).unwrap_or(1)
    }

    fn next_valid_month(&self, month: u32) -> Option<u32> {
        scan(&self.months, (month - 1) as usize)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.specification())
    }
}

impl fmt::Debug for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frequency").field(&self.specification()).finish()
    }
}

impl PartialEq for Frequency {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
    }
}

impl Eq for Frequency {}

impl Hash for Frequency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.specification())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let spec = String::deserialize(deserializer)?;
        Frequency::parse(&spec).map_err(D::Error::custom)
    }
}

/// Accumulates per-field constraints and produces an immutable [`Frequency`].
///
/// Fields left unconstrained default to `*`. Values are validated when
/// [`build`](FrequencyBuilder::build) parses the assembled specification.
///
/// ```
/// use taskwheel::Frequency;
/// use chrono::Weekday;
///
/// let freq = Frequency::builder()
///     .at(12, 47)
///     .on_weekday(Weekday::Fri)
///     .build()
///     .unwrap();
/// assert_eq!(freq.to_string(), "47 12 * * 5");
/// ```
#[derive(Debug, Clone, Default)]
pub struct FrequencyBuilder {
    minute: Option<String>,
    hour: Option<String>,
    date: Option<String>,
    month: Option<String>,
    weekday: Option<String>,
}

impl FrequencyBuilder {
    /// Schedule at a specific time of day.
    pub fn at(self, hour: u32, minute: u32) -> Self {
        self.at_hour(hour).at_minute(minute)
    }

    /// Schedule on a specific day of a specific month.
    pub fn on_day(self, month: Month, date: u32) -> Self {
        self.in_month(month).on_date(date)
    }

    /// Schedule every minute of the hour.
    pub fn every_minute(mut self) -> Self {
        self.minute = Some("*".into());
        self
    }

    /// Schedule every n-th minute of the hour, starting at minute 0.
    pub fn every_minute_step(mut self, step: u32) -> Self {
        self.minute = Some(format!("*/{step}"));
        self
    }

    /// Schedule at a specific minute of the hour.
    pub fn at_minute(mut self, minute: u32) -> Self {
        self.minute = Some(minute.to_string());
        self
    }

    /// Schedule at specific minutes of the hour.
    pub fn at_minutes(mut self, minutes: &[u32]) -> Self {
        self.minute = Some(join(minutes.iter().copied()));
        self
    }

    /// Schedule every minute in an inclusive range.
    pub fn during_minutes(mut self, first: u32, last: u32) -> Self {
        self.minute = Some(format!("{first}-{last}"));
        self
    }

    /// Schedule every hour of the day.
    pub fn every_hour(mut self) -> Self {
        self.hour = Some("*".into());
        self
    }

    /// Schedule every n-th hour of the day, starting at hour 0.
    pub fn every_hour_step(mut self, step: u32) -> Self {
        self.hour = Some(format!("*/{step}"));
        self
    }

    /// Schedule at a specific hour of the day.
    pub fn at_hour(mut self, hour: u32) -> Self {
        self.hour = Some(hour.to_string());
        self
    }

    /// Schedule at specific hours of the day.
    pub fn at_hours(mut self, hours: &[u32]) -> Self {
        self.hour = Some(join(hours.iter().copied()));
        self
    }

    /// Schedule every hour in an inclusive range.
    pub fn during_hours(mut self, first: u32, last: u32) -> Self {
        self.hour = Some(format!("{first}-{last}"));
        self
    }

    /// Schedule every day of the month.
    pub fn every_date(mut self) -> Self {
        self.date = Some("*".into());
        self
    }

    /// Schedule every n-th day of the month, starting at day 1.
    pub fn every_date_step(mut self, step: u32) -> Self {
        self.date = Some(format!("*/{step}"));
        self
    }

    /// Schedule on a specific day of the month, 1-based.
    pub fn on_date(mut self, date: u32) -> Self {
        self.date = Some(date.to_string());
        self
    }

    /// Schedule on specific days of the month, 1-based.
    pub fn on_dates(mut self, dates: &[u32]) -> Self {
        self.date = Some(join(dates.iter().copied()));
        self
    }

    /// Schedule every day of the month in an inclusive range.
    pub fn during_dates(mut self, first: u32, last: u32) -> Self {
        self.date = Some(format!("{first}-{last}"));
        self
    }

    /// Schedule in every month of the year.
    pub fn every_month(mut self) -> Self {
        self.month = Some("*".into());
        self
    }

    /// Schedule every n-th month of the year, starting in January.
    pub fn every_month_step(mut self, step: u32) -> Self {
        self.month = Some(format!("*/{step}"));
        self
    }

    /// Schedule in a specific month of the year.
    pub fn in_month(mut self, month: Month) -> Self {
        self.month = Some(month.number_from_month().to_string());
        self
    }

    /// Schedule in specific months of the year.
    pub fn in_months(mut self, months: &[Month]) -> Self {
        self.month = Some(join(months.iter().map(|m| m.number_from_month())));
        self
    }

    /// Schedule in every month of an inclusive range.
    pub fn between_months(mut self, first: Month, last: Month) -> Self {
        self.month = Some(format!(
            "{}-{}",
            first.number_from_month(),
            last.number_from_month()
        ));
        self
    }

    /// Schedule on every day of the week.
    pub fn every_weekday(mut self) -> Self {
        self.weekday = Some("*".into());
        self
    }

    /// Schedule on every n-th day of the week, starting on Monday.
    pub fn every_weekday_step(mut self, step: u32) -> Self {
        self.weekday = Some(format!("*/{step}"));
        self
    }

    /// Schedule on a specific day of the week.
    pub fn on_weekday(mut self, weekday: Weekday) -> Self {
        self.weekday = Some(weekday.number_from_monday().to_string());
        self
    }

    /// Schedule on specific days of the week.
    pub fn on_weekdays(mut self, weekdays: &[Weekday]) -> Self {
        self.weekday = Some(join(weekdays.iter().map(|d| d.number_from_monday())));
        self
    }

    /// Schedule on every day of the week in an inclusive range.
    pub fn between_weekdays(mut self, first: Weekday, last: Weekday) -> Self {
        self.weekday = Some(format!(
            "{}-{}",
            first.number_from_monday(),
            last.number_from_monday()
        ));
        self
    }

    /// Assemble and parse the accumulated specification.
    pub fn build(self) -> Result<Frequency, FrequencyError> {
        let spec = format!(
            "{} {} {} {} {}",
            self.minute.as_deref().unwrap_or("*"),
            self.hour.as_deref().unwrap_or("*"),
            self.date.as_deref().unwrap_or("*"),
            self.month.as_deref().unwrap_or("*"),
            self.weekday.as_deref().unwrap_or("*"),
        );
        Frequency::parse(&spec)
    }
}

/// Truncate a timestamp to the whole minute.
pub(crate) fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

fn join(values: impl Iterator<Item = u32>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn scan(table: &[Option<u8>], from: usize) -> Option<u32> {
    table.get(from..)?.iter().flatten().next().map(|&v| v as u32)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Parse one comma-joined field into its admissibility table.
///
/// `begin` is the field's smallest legal value; the largest follows from the
/// table size. When `wrap_tables` is provided (day-of-month field), wrapping
/// ranges are not resolved eagerly: the head of the range is recorded in the
/// underflow table and the tail in the overflow table, each entry holding the
/// range's right bound, for later combination with a concrete month.
fn parse_field<const N: usize>(
    field: &str,
    begin: u32,
    name: &'static str,
    mut wrap_tables: Option<(&mut [Option<u8>; DATES], &mut [Option<u8>; DATES])>,
) -> Result<[Option<u8>; N], FrequencyError> {
    let end = begin + N as u32 - 1;
    let mut values = [None; N];

    let invalid = |part: &str| FrequencyError::InvalidPart {
        field: name,
        part: part.to_string(),
    };
    let out_of_range = |value: u32| FrequencyError::ValueOutOfRange {
        field: name,
        value,
        min: begin,
        max: end,
    };
    let check_bounds = |value: u32| {
        if value < begin || value > end {
            Err(out_of_range(value))
        } else {
            Ok(value)
        }
    };
    let mark = |values: &mut [Option<u8>; N], value: u32| {
        values[(value - begin) as usize] = Some(value as u8);
    };

    for part in field.split(',') {
        // a plain wildcard admits the whole field
        if part == "*" {
            for value in begin..=end {
                mark(&mut values, value);
            }
            return Ok(values);
        }

        let (token, step) = match part.find('/') {
            Some(idx) => {
                let step: u32 = part[idx + 1..].parse().map_err(|_| invalid(part))?;
                if step == 0 {
                    return Err(invalid(part));
                }
                (&part[..idx], Some(step))
            }
            None => (part, None),
        };

        if token == "*" {
            // stepped wildcard
            let step = step.ok_or_else(|| invalid(part))?;
            let mut value = begin;
            while value <= end {
                mark(&mut values, value);
                value += step;
            }
        } else if let Some(idx) = token.find('-') {
            let left: u32 = token[..idx].parse().map_err(|_| invalid(part))?;
            let right: u32 = token[idx + 1..].parse().map_err(|_| invalid(part))?;
            check_bounds(left)?;
            check_bounds(right)?;

            if left == right {
                if step.is_some() {
                    return Err(invalid(part));
                }
                mark(&mut values, left);
                continue;
            }

            let step = step.unwrap_or(1);

            if right < left {
                if let Some((underflow, overflow)) = wrap_tables.as_mut() {
                    // month-dependent wrap: record the head normally while
                    // preserving the right bound for spill handling, then
                    // record the tail positions the wrap would reach in a
                    // 31-day month
                    let mut value = left;
                    while value <= end {
                        mark(&mut values, value);
                        let slot = &mut underflow[(value - begin) as usize];
                        if slot.map_or(true, |b| (b as u32) < right) {
                            *slot = Some(right as u8);
                        }
                        value += step;
                    }
                    let mut value = begin + (value - end) - 1;
                    while value <= right {
                        let slot = &mut overflow[(value - begin) as usize];
                        if slot.map_or(true, |b| (b as u32) < right) {
                            *slot = Some(right as u8);
                        }
                        value += step;
                    }
                    continue;
                }

                // fixed-bound wrap resolves eagerly
                let mut value = left;
                while value <= end {
                    mark(&mut values, value);
                    value += step;
                }
                let mut value = begin + (value - end) - 1;
                while value <= right {
                    mark(&mut values, value);
                    value += step;
                }
            } else {
                let mut value = left;
                while value <= right {
                    mark(&mut values, value);
                    value += step;
                }
            }
        } else {
            if step.is_some() {
                return Err(invalid(part));
            }
            let value = check_bounds(token.parse().map_err(|_| invalid(part))?)?;
            mark(&mut values, value);
        }
    }

    Ok(values)
}
