use crate::Result;
use crate::observations::{MetricName, Source};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;

/// How long a source keeps revising a day, and how much slack to allow on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceWindow {
    pub window_days: u32,
    pub grace_days: u32,
}

impl SourceWindow {
    #[must_use]
    pub fn horizon(self) -> TimeDelta {
        TimeDelta::days(i64::from(self.window_days) + i64::from(self.grace_days))
    }
}

/// The policy knobs the ledger merges under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FinalizationPolicy {
    /// Revision window and grace period per source
    pub windows: BTreeMap<Source, SourceWindow>,

    /// Largest change to a finalized value accepted as a late revision, for metrics without their own entry
    pub default_tolerance: u64,

    /// Per-metric overrides of `default_tolerance`
    #[serde(default)]
    pub tolerances: BTreeMap<MetricName, u64>,

    /// Sources that must all have a record before a day counts as complete
    pub required_sources: BTreeSet<Source>,
}

impl FinalizationPolicy {
    /// The revision window of a source.
    ///
    /// Sources without a configured window are treated as never revising, so their days are
    /// final as soon as they are observed.
    #[must_use]
    pub fn window(&self, source: Source) -> SourceWindow {
        self.windows.get(&source).copied().unwrap_or(SourceWindow {
            window_days: 0,
            grace_days: 0,
        })
    }

    #[must_use]
    pub fn tolerance(&self, metric: MetricName) -> u64 {
        self.tolerances.get(&metric).copied().unwrap_or(self.default_tolerance)
    }

    /// Whether `day` is older than the source's window plus grace period, as seen at `now`.
    ///
    /// Age is measured from the start of the UTC day.
    #[must_use]
    pub fn is_past_watermark(&self, source: Source, day: NaiveDate, now: DateTime<Utc>) -> bool {
        let day_start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        now.signed_duration_since(day_start) > self.window(source).horizon()
    }

    /// # Errors
    ///
    /// Returns an error if a source has no window or no source is required.
    pub fn validate(&self) -> Result<()> {
        for source in Source::iter() {
            if !self.windows.contains_key(&source) {
                bail!("no finalization window configured for source '{source}'");
            }
        }

        if self.required_sources.is_empty() {
            bail!("at least one required source must be configured");
        }

        Ok(())
    }
}
