use super::Anomaly;
use crate::observations::{Metrics, Source};
use crate::registry::RepoId;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;

/// The reconciled counts of one source for one repository and UTC day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyMetricRecord {
    pub repository: RepoId,
    pub date: NaiveDate,
    pub source: Source,
    pub metrics: Metrics,

    /// Once set, later changes are anomalies rather than routine updates
    pub finalized: bool,

    /// Number of accepted overwrites since creation
    pub revision_count: u32,

    /// Fetch time of the observation that last changed `metrics`
    pub last_updated: DateTime<Utc>,

    pub anomalies: BTreeSet<Anomaly>,
}

impl DailyMetricRecord {
    #[must_use]
    pub fn metric(&self, name: crate::observations::MetricName) -> u64 {
        self.metrics.get(&name).copied().unwrap_or(0)
    }

    /// Whether any anomaly on this record still waits for an operator.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        self.anomalies.iter().any(Anomaly::needs_review)
    }
}
