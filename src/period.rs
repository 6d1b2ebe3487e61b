// 📅 Report Periods
// Maps a requested period (daily/weekly/monthly) to the date range to fetch
// and the granularity to bucket it by

use chrono::{Datelike, NaiveDate, Weekday};
use std::fmt;
use std::str::FromStr;

use crate::aggregate::{AggregateError, Granularity};

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// Date range ending `today` and the granularity used to bucket it
    ///
    /// - daily: month to date, one bucket per day
    /// - weekly: ISO week-year to date, one bucket per ISO week
    /// - monthly: year to date, one bucket per month
    pub fn resolve(self, today: NaiveDate) -> (DateRange, Granularity) {
        match self {
            Period::Daily => (
                DateRange::new(today.with_day(1).unwrap_or(today), today),
                Granularity::Day,
            ),
            Period::Weekly => {
                let start =
                    NaiveDate::from_isoywd_opt(today.iso_week().year(), 1, Weekday::Mon)
                        .unwrap_or(today);
                (DateRange::new(start, today), Granularity::Week)
            }
            Period::Monthly => (
                DateRange::new(
                    NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
                    today,
                ),
                Granularity::Month,
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

impl FromStr for Period {
    type Err = AggregateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Period::Daily),
            "weekly" => Ok(Period::Weekly),
            "monthly" => Ok(Period::Monthly),
            _ => Err(AggregateError::InvalidArgument(format!(
                "unrecognized period '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
