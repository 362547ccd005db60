//! Standard 5-field crontab parsing and next-instant computation.
//!
//! The grammar is `minute hour day-of-month month day-of-week` with `*`,
//! lists (`,`), ranges (`-`), and steps (`/`, including `*/n`). Day-of-week
//! accepts 0-7 where both 0 and 7 mean Sunday. When both day fields are
//! restricted a date matches if EITHER matches, the vixie-cron convention.
//! All instants are UTC wall-clock times at minute resolution.
//!
//! The `cron` crate is deliberately not used here: it rejects 5-field
//! expressions and intersects the two day fields instead of uniting them.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CronError {
    #[error("expected 5 whitespace-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid {field} field {text:?}")]
    InvalidField { field: &'static str, text: String },

    #[error("{field} value {value} out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid step in {field} field {text:?}")]
    InvalidStep { field: &'static str, text: String },
}

/// A parsed crontab expression. Each field is a bit set over its value
/// range; `dom_restricted`/`dow_restricted` record whether the day fields
/// were given as anything other than `*`, which drives the either-field
/// matching rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crontab {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

/// Check an expression without keeping the parse result.
pub fn validate(expression: &str) -> Result<(), CronError> {
    expression.parse::<Crontab>().map(|_| ())
}

impl FromStr for Crontab {
    type Err = CronError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::FieldCount(fields.len()));
        }

        let (minutes, _) = parse_field(fields[0], "minute", 0, 59)?;
        let (hours, _) = parse_field(fields[1], "hour", 0, 23)?;
        let (days_of_month, dom_star) = parse_field(fields[2], "day-of-month", 1, 31)?;
        let (months, _) = parse_field(fields[3], "month", 1, 12)?;
        let (raw_dow, dow_star) = parse_field(fields[4], "day-of-week", 0, 7)?;

        // Fold 7 (Sunday again) onto 0.
        let days_of_week = if raw_dow & (1 << 7) != 0 {
            (raw_dow | 1) & !(1 << 7)
        } else {
            raw_dow
        };

        Ok(Self {
            minutes,
            hours: hours as u32,
            days_of_month: days_of_month as u32,
            months: months as u16,
            days_of_week: days_of_week as u8,
            dom_restricted: !dom_star,
            dow_restricted: !dow_star,
        })
    }
}

impl Crontab {
    /// Smallest instant strictly greater than `after` matching the
    /// schedule, at minute resolution. Returns `None` when no instant
    /// exists within roughly four years (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let limit = after + Duration::days(4 * 366);

        while t <= limit {
            if self.months & (1 << t.month()) == 0 {
                t = first_of_next_month(&t)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = start_of_next_day(&t)?;
                continue;
            }
            if self.hours & (1 << t.hour()) == 0 {
                t = start_of_next_hour(&t)?;
                continue;
            }
            if self.minutes & (1 << t.minute()) == 0 {
                t = t + Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom_hit = self.days_of_month & (1 << t.day()) != 0;
        let dow_hit = self.days_of_week & (1 << t.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_hit || dow_hit,
            (true, false) => dom_hit,
            (false, true) => dow_hit,
            (false, false) => true,
        }
    }
}

/// Parse one field into a bit set. The second return value reports whether
/// any list element was a star form (`*` or `*/n`), which marks the field
/// as unrestricted for the day-matching rule.
fn parse_field(
    text: &str,
    field: &'static str,
    min: u32,
    max: u32,
) -> Result<(u64, bool), CronError> {
    let invalid = || CronError::InvalidField {
        field,
        text: text.to_string(),
    };

    let mut mask = 0u64;
    let mut star = false;

    for part in text.split(',') {
        if part.is_empty() {
            return Err(invalid());
        }

        let (range_text, step) = match part.split_once('/') {
            Some((range_text, step_text)) => {
                let step = step_text.parse::<u32>().map_err(|_| CronError::InvalidStep {
                    field,
                    text: part.to_string(),
                })?;
                if step == 0 {
                    return Err(CronError::InvalidStep {
                        field,
                        text: part.to_string(),
                    });
                }
                (range_text, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_text == "*" {
            star = true;
            (min, max)
        } else if let Some((low, high)) = range_text.split_once('-') {
            let low = parse_value(low, field, min, max)?;
            let high = parse_value(high, field, min, max)?;
            if low > high {
                return Err(invalid());
            }
            (low, high)
        } else {
            let value = parse_value(range_text, field, min, max)?;
            // A bare value with a step runs to the end of the range.
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        let mut value = start;
        while value <= end {
            mask |= 1 << value;
            value += step;
        }
    }

    Ok((mask, star))
}

fn parse_value(text: &str, field: &'static str, min: u32, max: u32) -> Result<u32, CronError> {
    let value = text.parse::<u32>().map_err(|_| CronError::InvalidField {
        field,
        text: text.to_string(),
    })?;
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

fn truncate_to_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

fn start_of_next_hour(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(t.with_minute(0)? + Duration::hours(1))
}

fn start_of_next_day(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    (t.date_naive() + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}

fn first_of_next_month(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}
