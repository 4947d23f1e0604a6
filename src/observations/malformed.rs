use crate::registry::RepoId;
use chrono::NaiveDate;
use core::fmt::{Display, Formatter};

/// A raw payload the normalizer refused to turn into an observation.
///
/// Rejected payloads never reach the ledger. They are logged, counted in the run
/// summary and turn the process exit status non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedObservation {
    pub repository: RepoId,
    /// Tag of the rejected payload, e.g. `traffic_views` or `counters`
    pub payload: &'static str,
    pub problem: Problem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    NegativeCount {
        field: &'static str,
        day: Option<NaiveDate>,
        value: i64,
    },
    MissingField(&'static str),
    DuplicateDay(NaiveDate),
    DayOutsideWindow { day: NaiveDate, start: NaiveDate, end: NaiveDate },
    InvertedWindow { start: NaiveDate, end: NaiveDate },
    WindowTooLong { start: NaiveDate, end: NaiveDate, days: u64, max: u64 },
    TotalBelowAssets { total: i64, asset_sum: i64 },
    UnknownTimezone(String),
    UnknownRepository,
}

impl MalformedObservation {
    #[must_use]
    pub const fn new(repository: RepoId, payload: &'static str, problem: Problem) -> Self {
        Self {
            repository,
            payload,
            problem,
        }
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NegativeCount { field, day: Some(day), value } => write!(f, "negative {field} {value} on {day}"),
            Self::NegativeCount { field, day: None, value } => write!(f, "negative {field} {value}"),
            Self::MissingField(field) => write!(f, "missing required field '{field}'"),
            Self::DuplicateDay(day) => write!(f, "day {day} is reported more than once"),
            Self::DayOutsideWindow { day, start, end } => write!(f, "day {day} lies outside the window {start}..={end}"),
            Self::InvertedWindow { start, end } => write!(f, "window start {start} is after window end {end}"),
            Self::WindowTooLong { start, end, days, max } => {
                write!(f, "window {start}..={end} spans {days} days, more than the {max} the source reports")
            }
            Self::TotalBelowAssets { total, asset_sum } => {
                write!(f, "total download count {total} is smaller than the asset sum {asset_sum}")
            }
            Self::UnknownTimezone(tz) => write!(f, "unknown reporting timezone '{tz}'"),
            Self::UnknownRepository => write!(f, "repository is not in the registry"),
        }
    }
}

impl Display for MalformedObservation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "malformed {} payload for '{}': {}", self.payload, self.repository, self.problem)
    }
}

impl core::error::Error for MalformedObservation {}
