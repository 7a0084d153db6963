//! Calendar periods used to scope variable values and parameter lookups.

use chrono::{Datelike, NaiveDate};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("Malformed period '{0}', expected YYYY or YYYY-MM")]
    Malformed(String),
    #[error("Month {0} is out of range 1..=12")]
    MonthOutOfRange(u32),
    #[error("Year {0} is outside the supported calendar")]
    YearOutOfRange(i32),
}

/// The minimum period length at which a variable is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Month,
    Year,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Month => f.write_str("MONTH"),
            Granularity::Year => f.write_str("YEAR"),
        }
    }
}

/// A calendar month or year.
///
/// A year contains each of its twelve months. Two periods overlap when one
/// contains the other; periods on the same grid never partially overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Year(i32),
    Month { year: i32, month: u32 },
}

impl Period {
    /// # Panics
    /// If `year` is outside the range representable by `chrono::NaiveDate`.
    pub fn year(year: i32) -> Self {
        Self::try_year(year).unwrap_or_else(|e| panic!("{e}"))
    }

    /// # Panics
    /// If `month` is not in `1..=12` or `year` is unrepresentable.
    pub fn month(year: i32, month: u32) -> Self {
        Self::try_month(year, month).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_year(year: i32) -> Result<Self, PeriodError> {
        NaiveDate::from_ymd_opt(year, 1, 1)
            .and(NaiveDate::from_ymd_opt(year, 12, 31))
            .map(|_| Period::Year(year))
            .ok_or(PeriodError::YearOutOfRange(year))
    }

    pub fn try_month(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        Self::try_year(year)?;
        Ok(Period::Month { year, month })
    }

    /// Checks a period built directly from its variants against the same
    /// bounds as `try_year` / `try_month`.
    pub fn validate(self) -> Result<Self, PeriodError> {
        match self {
            Period::Year(year) => Self::try_year(year),
            Period::Month { year, month } => Self::try_month(year, month),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Year(_) => Granularity::Year,
            Period::Month { .. } => Granularity::Month,
        }
    }

    pub fn calendar_year(&self) -> i32 {
        match *self {
            Period::Year(y) | Period::Month { year: y, .. } => y,
        }
    }

    /// First day of the period. Parameter lookups resolve against this instant.
    pub fn start(&self) -> NaiveDate {
        let (year, month) = match *self {
            Period::Year(y) => (y, 1),
            Period::Month { year, month } => (year, month),
        };
        // Constructors only admit representable dates.
        NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of the period (inclusive).
    pub fn stop(&self) -> NaiveDate {
        match *self {
            Period::Year(y) => NaiveDate::from_ymd_opt(y, 12, 31).unwrap_or(NaiveDate::MAX),
            Period::Month { .. } => {
                let next = self.offset(1).start();
                next.pred_opt().unwrap_or(NaiveDate::MAX)
            }
        }
    }

    /// The year containing this period.
    pub fn this_year(&self) -> Period {
        Period::Year(self.calendar_year())
    }

    pub fn first_month(&self) -> Period {
        match *self {
            Period::Year(year) => Period::Month { year, month: 1 },
            month @ Period::Month { .. } => month,
        }
    }

    /// The months covered by this period, in calendar order.
    pub fn months(&self) -> Vec<Period> {
        match *self {
            Period::Year(year) => (1..=12).map(|month| Period::Month { year, month }).collect(),
            month @ Period::Month { .. } => vec![month],
        }
    }

    /// Shifts the period by `n` units of its own granularity.
    pub fn offset(&self, n: i32) -> Period {
        match *self {
            Period::Year(y) => Period::Year(y.saturating_add(n)),
            Period::Month { year, month } => {
                let absolute = year.saturating_mul(12).saturating_add(month as i32 - 1).saturating_add(n);
                Period::Month {
                    year: absolute.div_euclid(12),
                    month: absolute.rem_euclid(12) as u32 + 1,
                }
            }
        }
    }

    pub fn last_year(&self) -> Period {
        Period::Year(self.calendar_year().saturating_sub(1))
    }

    pub fn contains(&self, other: &Period) -> bool {
        match (*self, *other) {
            (Period::Year(a), other) => a == other.calendar_year(),
            (month @ Period::Month { .. }, other) => month == other,
        }
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.contains(other) || other.contains(self)
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        match *self {
            Period::Year(y) => date.year() == y,
            Period::Month { year, month } => date.year() == year && date.month() == month,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Year(y) => write!(f, "{y}"),
            Period::Month { year, month } => write!(f, "{year}-{month:02}"),
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodError::Malformed(s.to_string());
        let mut parts = s.trim().split('-');
        let year = parts
            .next()
            .filter(|p| p.len() == 4)
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or_else(malformed)?;
        match parts.next() {
            None => Period::try_year(year),
            Some(m) => {
                if parts.next().is_some() || m.len() != 2 {
                    return Err(malformed());
                }
                let month = m.parse::<u32>().map_err(|_| malformed())?;
                Period::try_month(year, month)
            }
        }
    }
}
