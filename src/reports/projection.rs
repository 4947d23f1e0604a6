use crate::estimator::{DerivedDailyMetric, Estimator};
use crate::ledger::{Anomaly, FinalizationPolicy, Ledger};
use crate::observations::{CounterKind, MetricName, Metrics, Source};
use crate::registry::RepoId;
use chrono::NaiveDate;
use core::ops::RangeInclusive;
use std::collections::{BTreeMap, BTreeSet};
use strum::IntoEnumIterator;

/// One repository and day with every source's metrics side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub repository: RepoId,
    pub date: NaiveDate,
    pub metrics: Metrics,
    pub sources: BTreeSet<Source>,

    /// Every source present for the day is finalized
    pub finalized: bool,

    pub anomaly_flags: BTreeSet<&'static str>,
    pub derived: DerivedDailyMetric,
}

impl ReportRow {
    #[must_use]
    pub fn metric(&self, name: MetricName) -> Option<u64> {
        self.metrics.get(&name).copied()
    }
}

/// Which rows a projection covers.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    pub repositories: Option<BTreeSet<RepoId>>,
    pub dates: Option<RangeInclusive<NaiveDate>>,
}

impl RowFilter {
    fn accepts_repository(&self, id: &RepoId) -> bool {
        self.repositories.as_ref().is_none_or(|ids| ids.contains(id))
    }

    fn accepts_date(&self, date: NaiveDate) -> bool {
        self.dates.as_ref().is_none_or(|range| range.contains(&date))
    }
}

/// Rows ordered by repository id and then date.
#[must_use]
pub fn project(ledger: &Ledger, policy: &FinalizationPolicy, lookback_days: u32, filter: &RowFilter) -> Vec<ReportRow> {
    let estimator = Estimator::new(ledger, policy, lookback_days);
    let mut rows = Vec::new();

    for repository in ledger.repositories().filter(|id| filter.accepts_repository(id)) {
        let Some(partition) = ledger.partition(repository) else {
            continue;
        };

        for date in partition.dates().into_iter().filter(|d| filter.accepts_date(*d)) {
            let records: Vec<_> = Source::iter().filter_map(|source| partition.record(date, source)).collect();

            rows.push(ReportRow {
                repository: repository.clone(),
                date,
                metrics: records.iter().flat_map(|r| r.metrics.iter().map(|(k, v)| (*k, *v))).collect(),
                sources: records.iter().map(|r| r.source).collect(),
                finalized: records.iter().all(|r| r.finalized),
                anomaly_flags: records.iter().flat_map(|r| r.anomalies.iter().map(Anomaly::kind)).collect(),
                derived: estimator.estimate(repository, date),
            });
        }
    }

    rows
}

/// Per-repository totals over a span of days, plus the latest counter values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTotals {
    pub repository: RepoId,
    pub sums: BTreeMap<MetricName, u64>,
    pub counters: BTreeMap<CounterKind, u64>,
    pub open_anomalies: Vec<OpenAnomaly>,
}

/// An anomaly that still waits for an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAnomaly {
    /// `None` for counter anomalies
    pub date: Option<NaiveDate>,
    pub source: Option<Source>,
    pub anomaly: Anomaly,
}

impl RepoTotals {
    #[must_use]
    pub fn sum(&self, name: MetricName) -> u64 {
        self.sums.get(&name).copied().unwrap_or(0)
    }
}

/// Sum every metric over `dates` for each repository in `repositories`.
///
/// Open anomalies are reported regardless of `dates`.
#[must_use]
pub fn totals<'a>(ledger: &Ledger, repositories: impl IntoIterator<Item = &'a RepoId>, dates: &RangeInclusive<NaiveDate>) -> Vec<RepoTotals> {
    let mut result = Vec::new();

    for repository in repositories {
        let mut sums = BTreeMap::new();
        let mut counters = BTreeMap::new();
        let mut open_anomalies = Vec::new();

        if let Some(partition) = ledger.partition(repository) {
            for record in partition.records() {
                if dates.contains(&record.date) {
                    for (name, value) in &record.metrics {
                        let sum: &mut u64 = sums.entry(*name).or_default();
                        *sum = sum.saturating_add(*value);
                    }
                }

                open_anomalies.extend(record.anomalies.iter().filter(|a| a.needs_review()).map(|anomaly| OpenAnomaly {
                    date: Some(record.date),
                    source: Some(record.source),
                    anomaly: anomaly.clone(),
                }));
            }

            for (kind, counter) in partition.counters() {
                let _ = counters.insert(kind, counter.value);
                open_anomalies.extend(counter.anomalies.iter().filter(|a| a.needs_review()).map(|anomaly| OpenAnomaly {
                    date: None,
                    source: None,
                    anomaly: anomaly.clone(),
                }));
            }
        }

        result.push(RepoTotals {
            repository: repository.clone(),
            sums,
            counters,
            open_anomalies,
        });
    }

    result
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::estimator::Confidence;
    use crate::ledger::SourceWindow;
    use crate::observations::{CounterReading, DayMetrics, FetchObservation};
    use chrono::{DateTime, Utc};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn id(text: &str) -> RepoId {
        RepoId::parse(text).unwrap()
    }

    fn policy() -> FinalizationPolicy {
        let window = SourceWindow {
            window_days: 14,
            grace_days: 2,
        };
        FinalizationPolicy {
            windows: Source::iter().map(|s| (s, window)).collect(),
            default_tolerance: 2,
            tolerances: BTreeMap::new(),
            required_sources: BTreeSet::from([Source::TrafficViews, Source::GaSessions]),
        }
    }

    fn observe(ledger: &mut Ledger, repo: &str, source: Source, date: NaiveDate, metrics: &[(MetricName, u64)], fetched_at: &str) {
        let _ = ledger.merge(
            &FetchObservation {
                repository: id(repo),
                source,
                window_start: date,
                window_end: date,
                days: vec![DayMetrics {
                    day: date,
                    metrics: metrics.iter().copied().collect(),
                }],
                fetched_at: at(fetched_at),
            },
            &policy(),
        );
    }

    fn sample() -> Ledger {
        let mut ledger = Ledger::new();
        observe(&mut ledger, "b/two", Source::TrafficViews, day(3), &[(MetricName::Views, 4), (MetricName::UniqueViews, 2)], "2024-01-04T00:00:00Z");
        observe(&mut ledger, "a/one", Source::TrafficViews, day(5), &[(MetricName::Views, 30), (MetricName::UniqueViews, 10)], "2024-01-30T00:00:00Z");
        observe(
            &mut ledger,
            "a/one",
            Source::GaSessions,
            day(5),
            &[(MetricName::Sessions, 5), (MetricName::Users, 5), (MetricName::NewUsers, 4)],
            "2024-01-30T00:00:00Z",
        );
        observe(&mut ledger, "a/one", Source::TrafficViews, day(6), &[(MetricName::Views, 5), (MetricName::UniqueViews, 1)], "2024-01-30T00:00:00Z");
        // finalized on creation, so this is rejected and flagged
        observe(&mut ledger, "a/one", Source::TrafficViews, day(5), &[(MetricName::Views, 90), (MetricName::UniqueViews, 10)], "2024-01-31T00:00:00Z");
        let _ = ledger.merge_cumulative(&CounterReading {
            repository: id("a/one"),
            kind: CounterKind::Stars,
            value: 100,
            observed_at: at("2024-01-30T00:00:00Z"),
        });
        ledger
    }

    #[test]
    fn test_rows_are_ordered_and_merge_sources() {
        let ledger = sample();
        let rows = project(&ledger, &policy(), 7, &RowFilter::default());

        let keys: Vec<_> = rows.iter().map(|r| (r.repository.as_str().to_string(), r.date)).collect();
        assert_eq!(keys, [("a/one".to_string(), day(5)), ("a/one".to_string(), day(6)), ("b/two".to_string(), day(3))]);

        let first = &rows[0];
        assert_eq!(first.metric(MetricName::Views), Some(30));
        assert_eq!(first.metric(MetricName::Sessions), Some(5));
        assert_eq!(first.metric(MetricName::Clones), None);
        assert_eq!(first.sources, BTreeSet::from([Source::TrafficViews, Source::GaSessions]));
        assert!(first.finalized);
        assert_eq!(first.anomaly_flags, BTreeSet::from(["unexpected_revision"]));
        // 4 new users at half a session per unique view
        assert_eq!(first.derived.confidence, Confidence::Approximate);
        assert_eq!(first.derived.estimated_new_views, Some(2));

        assert_eq!(rows[1].derived.confidence, Confidence::Unknown);
        assert!(!rows[2].finalized);
    }

    #[test]
    fn test_filter_by_repository_and_dates() {
        let ledger = sample();
        let filter = RowFilter {
            repositories: Some(BTreeSet::from([id("a/one")])),
            dates: Some(day(6)..=day(31)),
        };

        let rows = project(&ledger, &policy(), 7, &filter);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day(6));
    }

    #[test]
    fn test_totals_sum_the_span_and_report_open_anomalies() {
        let ledger = sample();
        let repos = [id("a/one"), id("c/three")];
        let totals = totals(&ledger, &repos, &(day(5)..=day(6)));

        assert_eq!(totals.len(), 2);
        let one = &totals[0];
        assert_eq!(one.sum(MetricName::Views), 35);
        assert_eq!(one.sum(MetricName::UniqueViews), 11);
        assert_eq!(one.sum(MetricName::Sessions), 5);
        assert_eq!(one.counters.get(&CounterKind::Stars), Some(&100));
        assert_eq!(one.open_anomalies.len(), 1);
        assert_eq!(one.open_anomalies[0].date, Some(day(5)));

        let three = &totals[1];
        assert!(three.sums.is_empty());
        assert!(three.open_anomalies.is_empty());
    }
}
