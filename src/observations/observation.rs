use super::{Metrics, Source};
use crate::registry::RepoId;
use chrono::{DateTime, NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Counts for one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayMetrics {
    pub day: NaiveDate,
    pub metrics: Metrics,
}

/// The normalized result of one source call for one repository.
///
/// `days` is sorted by day, holds no duplicates and stays inside
/// `window_start..=window_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchObservation {
    pub repository: RepoId,
    pub source: Source,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub days: Vec<DayMetrics>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchObservation {
    /// Iterate over the day buckets in date order.
    pub fn iter_days(&self) -> impl Iterator<Item = (NaiveDate, &Metrics)> {
        self.days.iter().map(|d| (d.day, &d.metrics))
    }
}

/// The kinds of monotonically non-decreasing per-repository totals.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr, ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum CounterKind {
    Forks,
    Stars,
    ReleaseDownloads,
}

/// One observation of a cumulative counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReading {
    pub repository: RepoId,
    pub kind: CounterKind,
    pub value: u64,
    pub observed_at: DateTime<Utc>,
}

/// Everything the normalizer extracts from one raw payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    pub observation: Option<FetchObservation>,
    pub counters: Vec<CounterReading>,
}
