//! Derived metrics blended across sources
//!
//! The traffic source counts unique viewers of the repository page and the analytics source
//! counts documentation-site users. The two never share a visitor identity, so the split of
//! a day's unique views into new and returning viewers is an estimate: analytics new users
//! are scaled by the ratio of sessions to unique views over recent days where both sources
//! report.
//!
//! Estimates are recomputed on every read and never stored.

use crate::ledger::{FinalizationPolicy, Ledger};
use crate::observations::{MetricName, Source};
use crate::registry::RepoId;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Confidence {
    /// No estimate was needed
    Exact,

    /// Scaled from the cross-source overlap ratio
    Approximate,

    /// The inputs needed for an estimate are missing
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedDailyMetric {
    pub repository: RepoId,
    pub date: NaiveDate,
    pub estimated_returning_views: Option<u64>,
    pub estimated_new_views: Option<u64>,
    pub confidence: Confidence,
}

impl DerivedDailyMetric {
    const fn unknown(repository: RepoId, date: NaiveDate) -> Self {
        Self {
            repository,
            date,
            estimated_returning_views: None,
            estimated_new_views: None,
            confidence: Confidence::Unknown,
        }
    }
}

/// Computes [`DerivedDailyMetric`]s from a ledger.
#[derive(Debug, Clone, Copy)]
pub struct Estimator<'a> {
    ledger: &'a Ledger,
    policy: &'a FinalizationPolicy,
    lookback_days: u32,
}

impl<'a> Estimator<'a> {
    #[must_use]
    pub const fn new(ledger: &'a Ledger, policy: &'a FinalizationPolicy, lookback_days: u32) -> Self {
        Self {
            ledger,
            policy,
            lookback_days,
        }
    }

    /// Estimate new and returning views for one repository and day.
    #[must_use]
    pub fn estimate(&self, repository: &RepoId, date: NaiveDate) -> DerivedDailyMetric {
        if !self.ledger.is_complete(repository, date, self.policy) {
            return DerivedDailyMetric::unknown(repository.clone(), date);
        }

        let (Some(traffic), Some(analytics)) = (
            self.ledger.record(repository, date, Source::TrafficViews),
            self.ledger.record(repository, date, Source::GaSessions),
        ) else {
            return DerivedDailyMetric::unknown(repository.clone(), date);
        };

        let unique_views = traffic.metric(MetricName::UniqueViews);
        if unique_views == 0 {
            return DerivedDailyMetric {
                repository: repository.clone(),
                date,
                estimated_returning_views: Some(0),
                estimated_new_views: Some(0),
                confidence: Confidence::Exact,
            };
        }

        let Some((sessions, uniques)) = self.overlap(repository, date) else {
            return DerivedDailyMetric::unknown(repository.clone(), date);
        };

        // new_users * (sessions / uniques), rounded half up
        let new_users = u128::from(analytics.metric(MetricName::NewUsers));
        let scaled = (2 * new_users * u128::from(sessions) + u128::from(uniques)) / (2 * u128::from(uniques));
        let estimated_new = u64::try_from(scaled).unwrap_or(u64::MAX).min(unique_views);

        DerivedDailyMetric {
            repository: repository.clone(),
            date,
            estimated_returning_views: Some(unique_views - estimated_new),
            estimated_new_views: Some(estimated_new),
            confidence: Confidence::Approximate,
        }
    }

    /// Sum of analytics sessions and traffic unique views over the lookback window ending at
    /// `date`, counting only days where both sources have a record. `None` when either sum is
    /// zero.
    fn overlap(&self, repository: &RepoId, date: NaiveDate) -> Option<(u64, u64)> {
        let start = date
            .checked_sub_days(Days::new(u64::from(self.lookback_days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);

        let mut sessions: u64 = 0;
        let mut uniques: u64 = 0;
        for traffic in self.ledger.records_for(repository, start..=date, Source::TrafficViews) {
            if let Some(analytics) = self.ledger.record(repository, traffic.date, Source::GaSessions) {
                sessions = sessions.saturating_add(analytics.metric(MetricName::Sessions));
                uniques = uniques.saturating_add(traffic.metric(MetricName::UniqueViews));
            }
        }

        (sessions > 0 && uniques > 0).then_some((sessions, uniques))
    }
}
