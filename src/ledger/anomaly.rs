use crate::observations::MetricName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// A surprising condition recorded as data for operator review.
///
/// Anomalies are never thrown. They accumulate on the record or counter they concern,
/// deduplicated, so re-merging the same input does not add them twice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Anomaly {
    /// A finalized value moved by no more than the metric's tolerance and was accepted
    LateRevision { metric: MetricName, old: u64, new: u64 },

    /// A finalized value moved by more than the metric's tolerance and was not stored
    UnexpectedRevision { metric: MetricName, old: u64, new: u64 },

    /// An operator replaced a finalized value
    OperatorOverride { metric: MetricName, old: u64, new: u64 },

    /// A cumulative counter was observed below its stored value
    CounterRegression {
        stored: u64,
        observed: u64,
        observed_at: DateTime<Utc>,
    },
}

impl Anomaly {
    /// The anomaly's kind, as shown in the `anomaly_flags` column.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Whether an operator still has to act on this anomaly.
    #[must_use]
    pub const fn needs_review(&self) -> bool {
        matches!(self, Self::UnexpectedRevision { .. } | Self::CounterRegression { .. })
    }
}
