//! Time windows selecting which messages and files qualify for one run
//!
//! A [`TimeWindow`] is what the caller asks for; [`WindowBounds`] is the
//! absolute, inclusive interval it resolves to. Resolution happens once per
//! invocation so both channels see exactly the same bounds.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeWindow {
    /// The whole calendar day
    FullDay(NaiveDate),
    /// From `from_hour:00:00` to `to_hour:59:59` on one day
    HourRange {
        date: NaiveDate,
        from_hour: u32,
        to_hour: u32,
    },
    /// The last N hours up to now
    RecentHours(u32),
}

/// Absolute window bounds, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowBounds {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl WindowBounds {
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Calendar days touched by the window, for day-granular server searches
    pub fn days(&self) -> (NaiveDate, NaiveDate) {
        (self.start.date(), self.end.date())
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeWindow::FullDay(date) => write!(f, "full day {}", date),
            TimeWindow::HourRange {
                date,
                from_hour,
                to_hour,
            } => write!(f, "{} hours {:02}-{:02}", date, from_hour, to_hour),
            TimeWindow::RecentHours(hours) => write!(f, "last {} hour(s)", hours),
        }
    }
}

impl TimeWindow {
    /// Build a window from command-line style inputs.
    ///
    /// `recent_hours` wins when given and cannot be combined with a date or
    /// hour range. Without a date, `today` is used. `hours` accepts `"9"` or
    /// `"9-11"`.
    pub fn from_parts(
        date: Option<&str>,
        hours: Option<&str>,
        recent_hours: Option<u32>,
        today: NaiveDate,
    ) -> Result<Self> {
        if let Some(hours_back) = recent_hours {
            if date.is_some() || hours.is_some() {
                return Err(IngestError::ConfigError(
                    "recent hours cannot be combined with a date or hour range".to_string(),
                ));
            }
            return Ok(TimeWindow::RecentHours(hours_back));
        }

        let date = match date {
            Some(raw) => parse_date(raw)?,
            None => today,
        };

        match hours {
            None => Ok(TimeWindow::FullDay(date)),
            Some(raw) => {
                let (from_hour, to_hour) = parse_hour_range(raw)?;
                Ok(TimeWindow::HourRange {
                    date,
                    from_hour,
                    to_hour,
                })
            }
        }
    }

    /// Resolve to absolute bounds relative to `now`
    pub fn resolve(&self, now: NaiveDateTime) -> Result<WindowBounds> {
        match *self {
            TimeWindow::FullDay(date) => Ok(WindowBounds {
                start: at(date, 0, 0, 0)?,
                end: at(date, 23, 59, 59)?,
            }),
            TimeWindow::HourRange {
                date,
                from_hour,
                to_hour,
            } => {
                if from_hour > to_hour {
                    return Err(IngestError::ConfigError(format!(
                        "hour range {}-{} is reversed",
                        from_hour, to_hour
                    )));
                }
                Ok(WindowBounds {
                    start: at(date, from_hour, 0, 0)?,
                    end: at(date, to_hour, 59, 59)?,
                })
            }
            TimeWindow::RecentHours(0) => Err(IngestError::ConfigError(
                "recent hours must be at least 1".to_string(),
            )),
            TimeWindow::RecentHours(hours) => {
                let start = now
                    .checked_sub_signed(Duration::hours(i64::from(hours)))
                    .ok_or_else(|| {
                        IngestError::ConfigError(format!(
                            "recent hours {} reaches before the earliest representable time",
                            hours
                        ))
                    })?;
                Ok(WindowBounds { start, end: now })
            }
        }
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32, second: u32) -> Result<NaiveDateTime> {
    date.and_hms_opt(hour, minute, second).ok_or_else(|| {
        IngestError::ConfigError(format!("hour {} is outside 0-23", hour))
    })
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        IngestError::ConfigError(format!("invalid date '{}': {} (expected YYYY-MM-DD)", raw, e))
    })
}

/// Parse `"H"` or `"H-H"` into an inclusive hour pair
pub fn parse_hour_range(raw: &str) -> Result<(u32, u32)> {
    let parse_hour = |part: &str| -> Result<u32> {
        let hour: u32 = part.trim().parse().map_err(|_| {
            IngestError::ConfigError(format!("invalid hour '{}' in range '{}'", part, raw))
        })?;
        if hour > 23 {
            return Err(IngestError::ConfigError(format!(
                "hour {} is outside 0-23",
                hour
            )));
        }
        Ok(hour)
    };

    let (from_hour, to_hour) = match raw.split_once('-') {
        Some((from, to)) => (parse_hour(from)?, parse_hour(to)?),
        None => {
            let hour = parse_hour(raw)?;
            (hour, hour)
        }
    };

    if from_hour > to_hour {
        return Err(IngestError::ConfigError(format!(
            "hour range '{}' is reversed",
            raw
        )));
    }
    Ok((from_hour, to_hour))
}
