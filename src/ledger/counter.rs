use super::Anomaly;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A monotonically non-decreasing per-repository total, such as forks or release downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeCounter {
    pub value: u64,
    pub observed_at: DateTime<Utc>,

    /// Regressions observed against this counter
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub anomalies: BTreeSet<Anomaly>,
}

/// What a single cumulative merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    Created,
    Advanced,
    Unchanged,
    Regressed,

    /// The reading predates the stored one and agrees with it
    Stale,
}

impl CumulativeCounter {
    #[must_use]
    pub const fn new(value: u64, observed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            observed_at,
            anomalies: BTreeSet::new(),
        }
    }

    /// Fold in a new reading. A lower value is flagged and never stored.
    ///
    /// Readings are ordered by `observed_at`: one taken before the stored reading can only
    /// confirm it (ignored) or exceed it, which means the stored value went down since and
    /// is flagged the same way.
    pub fn observe(&mut self, value: u64, observed_at: DateTime<Utc>) -> CounterOutcome {
        if observed_at < self.observed_at {
            if value <= self.value {
                return CounterOutcome::Stale;
            }

            let _ = self.anomalies.insert(Anomaly::CounterRegression {
                stored: value,
                observed: self.value,
                observed_at: self.observed_at,
            });
            return CounterOutcome::Regressed;
        }

        if value < self.value {
            let _ = self.anomalies.insert(Anomaly::CounterRegression {
                stored: self.value,
                observed: value,
                observed_at,
            });
            return CounterOutcome::Regressed;
        }

        if value == self.value {
            self.observed_at = observed_at;
            return CounterOutcome::Unchanged;
        }

        self.value = value;
        self.observed_at = observed_at;
        CounterOutcome::Advanced
    }
}
