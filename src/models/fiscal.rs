//! India fiscal calendar: April of year Y through March of Y+1 is `FY{Y+1}`.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid fiscal year label '{0}', expected e.g. FY25")]
pub struct FiscalYearParseError(pub String);

/// A fiscal year identified by the calendar year in which it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiscalYear {
    end_year: i32,
}

impl FiscalYear {
    pub fn ending_in(end_year: i32) -> Self {
        Self { end_year }
    }

    pub fn containing(date: NaiveDate) -> Self {
        if date.month() >= 4 {
            Self::ending_in(date.year() + 1)
        } else {
            Self::ending_in(date.year())
        }
    }

    pub fn end_year(&self) -> i32 {
        self.end_year
    }

    /// April 1st of the starting calendar year.
    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.end_year - 1, 4, 1).unwrap_or(NaiveDate::MIN)
    }

    /// March 31st of the ending calendar year.
    pub fn end_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.end_year, 3, 31).unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        Self::containing(date) == *self
    }

    pub fn label(&self) -> String {
        format!("FY{:02}", self.end_year.rem_euclid(100))
    }
}

impl fmt::Display for FiscalYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for FiscalYear {
    type Err = FiscalYearParseError;

    /// Accepts `FY25`, `fy25` and `FY2025`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .get(..2)
            .filter(|prefix| prefix.eq_ignore_ascii_case("FY"))
            .map(|_| &trimmed[2..])
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| FiscalYearParseError(s.to_string()))?;

        let year: i32 = digits
            .parse()
            .map_err(|_| FiscalYearParseError(s.to_string()))?;

        match digits.len() {
            2 => Ok(Self::ending_in(2000 + year)),
            4 => Ok(Self::ending_in(year)),
            _ => Err(FiscalYearParseError(s.to_string())),
        }
    }
}

impl Serialize for FiscalYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// Parse a comma separated list such as `FY24,FY25,FY26`; output is sorted
/// and de-duplicated.
pub fn parse_fiscal_years(list: &str) -> Result<Vec<FiscalYear>, FiscalYearParseError> {
    let mut years = list
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<FiscalYear>, _>>()?;
    years.sort();
    years.dedup();
    Ok(years)
}

/// A calendar month positioned inside the fiscal year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiscalMonth {
    /// Calendar month, 1 = January.
    pub month: u32,
}

/// Fiscal ordering of months, Q1 starting in April.
pub const FISCAL_MONTHS: [FiscalMonth; 12] = [
    FiscalMonth { month: 4 },
    FiscalMonth { month: 5 },
    FiscalMonth { month: 6 },
    FiscalMonth { month: 7 },
    FiscalMonth { month: 8 },
    FiscalMonth { month: 9 },
    FiscalMonth { month: 10 },
    FiscalMonth { month: 11 },
    FiscalMonth { month: 12 },
    FiscalMonth { month: 1 },
    FiscalMonth { month: 2 },
    FiscalMonth { month: 3 },
];

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

impl FiscalMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self { month: date.month() }
    }

    /// Zero-based position in `FISCAL_MONTHS`.
    pub fn index(&self) -> usize {
        ((self.month + 8) % 12) as usize
    }

    /// 1..=4, Q1 = Apr-Jun.
    pub fn quarter(&self) -> u32 {
        self.index() as u32 / 3 + 1
    }

    pub fn quarter_label(&self) -> String {
        format!("FQ{}", self.quarter())
    }

    pub fn name(&self) -> &'static str {
        MONTH_NAMES[(self.month as usize + 11) % 12]
    }
}
