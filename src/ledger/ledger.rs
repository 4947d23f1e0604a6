use super::{Anomaly, CounterOutcome, CumulativeCounter, DailyMetricRecord, FinalizationPolicy};
use crate::Result;
use crate::observations::{CounterKind, CounterReading, FetchObservation, MetricName, Metrics, Source};
use crate::registry::RepoId;
use chrono::{DateTime, NaiveDate, Utc};
use core::ops::{AddAssign, RangeInclusive};
use ohno::{app_err, bail};
use std::collections::{BTreeMap, BTreeSet};

const LOG_TARGET: &str = "    ledger";

/// Number of merge-cycle marks kept for the stability check.
const CYCLES_KEPT: usize = 2;

/// Tally of what merges did, aggregated into the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub created: usize,
    pub revised: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub late_revisions: usize,

    /// Counted per metric, matching the entries a record lists for review
    pub unexpected_revisions: usize,
}

impl AddAssign for MergeOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.created += rhs.created;
        self.revised += rhs.revised;
        self.unchanged += rhs.unchanged;
        self.stale += rhs.stale;
        self.late_revisions += rhs.late_revisions;
        self.unexpected_revisions += rhs.unexpected_revisions;
    }
}

/// All records and counters of a single repository.
///
/// Partitions are independent of each other, so a run can merge them in parallel and
/// reassemble the ledger before committing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoLedger {
    records: BTreeMap<(Source, NaiveDate), DailyMetricRecord>,
    counters: BTreeMap<CounterKind, CumulativeCounter>,
}

impl RepoLedger {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.counters.is_empty()
    }

    /// Merge every day bucket of an observation.
    pub fn merge(&mut self, observation: &FetchObservation, policy: &FinalizationPolicy) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let source = observation.source;
        let fetched_at = observation.fetched_at;

        for (day, incoming) in observation.iter_days() {
            let Some(record) = self.records.get_mut(&(source, day)) else {
                let finalized = policy.is_past_watermark(source, day, fetched_at);
                let _ = self.records.insert(
                    (source, day),
                    DailyMetricRecord {
                        repository: observation.repository.clone(),
                        date: day,
                        source,
                        metrics: incoming.clone(),
                        finalized,
                        revision_count: 0,
                        last_updated: fetched_at,
                        anomalies: BTreeSet::new(),
                    },
                );
                outcome.created += 1;
                continue;
            };

            if record.metrics == *incoming {
                outcome.unchanged += 1;
                continue;
            }

            if fetched_at < record.last_updated {
                log::debug!(
                    target: LOG_TARGET,
                    "Ignoring stale {source} observation for '{}' on {day}: fetched {fetched_at}, record updated {}",
                    record.repository,
                    record.last_updated
                );
                outcome.stale += 1;
                continue;
            }

            if !record.finalized {
                record.metrics.clone_from(incoming);
                record.revision_count = record.revision_count.saturating_add(1);
                record.last_updated = fetched_at;
                outcome.revised += 1;
                continue;
            }

            reconcile_finalized(record, incoming, fetched_at, policy, &mut outcome);
        }

        outcome
    }

    /// Fold a counter reading in; regressions are flagged and never stored.
    pub fn merge_cumulative(&mut self, kind: CounterKind, value: u64, observed_at: DateTime<Utc>) -> CounterOutcome {
        match self.counters.get_mut(&kind) {
            None => {
                let _ = self.counters.insert(kind, CumulativeCounter::new(value, observed_at));
                CounterOutcome::Created
            }
            Some(counter) => counter.observe(value, observed_at),
        }
    }

    fn promote(&mut self, policy: &FinalizationPolicy, now: DateTime<Utc>, previous: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        for record in self.records.values_mut().filter(|r| !r.finalized) {
            if record.last_updated <= previous && policy.is_past_watermark(record.source, record.date, now) {
                record.finalized = true;
                promoted += 1;
            }
        }

        promoted
    }

    /// Every record, ordered by source and then date.
    pub fn records(&self) -> impl Iterator<Item = &DailyMetricRecord> {
        self.records.values()
    }

    #[must_use]
    pub fn record(&self, date: NaiveDate, source: Source) -> Option<&DailyMetricRecord> {
        self.records.get(&(source, date))
    }

    pub fn records_for(&self, dates: RangeInclusive<NaiveDate>, source: Source) -> impl Iterator<Item = &DailyMetricRecord> {
        let (start, end) = dates.into_inner();
        let range = if start <= end { Some((source, start)..=(source, end)) } else { None };
        range.into_iter().flat_map(|range| self.records.range(range).map(|(_, record)| record))
    }

    pub fn counters(&self) -> impl Iterator<Item = (CounterKind, &CumulativeCounter)> {
        self.counters.iter().map(|(kind, counter)| (*kind, counter))
    }

    #[must_use]
    pub fn counter(&self, kind: CounterKind) -> Option<&CumulativeCounter> {
        self.counters.get(&kind)
    }

    /// The distinct days that have at least one record.
    #[must_use]
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.records.keys().map(|(_, date)| *date).collect()
    }

    pub(super) fn insert_record(&mut self, record: DailyMetricRecord) {
        let _ = self.records.insert((record.source, record.date), record);
    }

    pub(super) fn insert_counter(&mut self, kind: CounterKind, counter: CumulativeCounter) {
        let _ = self.counters.insert(kind, counter);
    }
}

fn reconcile_finalized(
    record: &mut DailyMetricRecord,
    incoming: &Metrics,
    fetched_at: DateTime<Utc>,
    policy: &FinalizationPolicy,
    outcome: &mut MergeOutcome,
) {
    let names: BTreeSet<MetricName> = record.metrics.keys().chain(incoming.keys()).copied().collect();

    let mut within = Vec::new();
    let mut beyond = Vec::new();
    for metric in names {
        let old = record.metrics.get(&metric).copied().unwrap_or(0);
        let new = incoming.get(&metric).copied().unwrap_or(0);
        if old == new {
            continue;
        }

        if old.abs_diff(new) > policy.tolerance(metric) {
            beyond.push(Anomaly::UnexpectedRevision { metric, old, new });
        } else {
            within.push(Anomaly::LateRevision { metric, old, new });
        }
    }

    if !beyond.is_empty() {
        let mut raised = 0;
        for anomaly in beyond {
            if record.anomalies.insert(anomaly.clone()) {
                log::warn!(
                    target: LOG_TARGET,
                    "Unexpected revision of finalized {} record for '{}' on {}: {anomaly:?}",
                    record.source,
                    record.repository,
                    record.date
                );
                raised += 1;
            }
        }

        if raised > 0 {
            outcome.unexpected_revisions += raised;
        } else {
            outcome.unchanged += 1;
        }
        return;
    }

    record.anomalies.extend(within);
    record.metrics.clone_from(incoming);
    record.revision_count = record.revision_count.saturating_add(1);
    record.last_updated = fetched_at;
    outcome.late_revisions += 1;
}

/// The authoritative per-repository, per-day store.
///
/// The ledger lives in memory for the duration of a run and is committed once at the end
/// by [`super::LedgerStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    repos: BTreeMap<RepoId, RepoLedger>,
    cycles: Vec<DateTime<Utc>>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, observation: &FetchObservation, policy: &FinalizationPolicy) -> MergeOutcome {
        self.repos.entry(observation.repository.clone()).or_default().merge(observation, policy)
    }

    pub fn merge_cumulative(&mut self, reading: &CounterReading) -> CounterOutcome {
        let outcome = self
            .repos
            .entry(reading.repository.clone())
            .or_default()
            .merge_cumulative(reading.kind, reading.value, reading.observed_at);

        if outcome == CounterOutcome::Regressed {
            log::warn!(
                target: LOG_TARGET,
                "Counter regression for '{}' {}: observed {} at {}",
                reading.repository,
                reading.kind,
                reading.value,
                reading.observed_at
            );
        }

        outcome
    }

    /// Record the end of a merge cycle, identified by the latest fetch time it carried.
    ///
    /// Marks that are not newer than the latest recorded one are ignored, so replaying old
    /// input does not advance the stability check.
    pub fn close_cycle(&mut self, mark: DateTime<Utc>) -> bool {
        if self.cycles.last().is_some_and(|latest| mark <= *latest) {
            return false;
        }

        self.cycles.push(mark);
        if self.cycles.len() > CYCLES_KEPT {
            let _ = self.cycles.remove(0);
        }

        true
    }

    /// Promote unfinalized records whose day is past the watermark and that were not
    /// changed during the latest merge cycle.
    ///
    /// Nothing is promoted until two cycles have been recorded.
    pub fn promote_watermarks(&mut self, policy: &FinalizationPolicy) -> usize {
        let &[previous, latest] = self.cycles.as_slice() else {
            return 0;
        };

        let promoted: usize = self.repos.values_mut().map(|repo| repo.promote(policy, latest, previous)).sum();
        if promoted > 0 {
            log::info!(target: LOG_TARGET, "Finalized {promoted} record(s) past the watermark");
        }

        promoted
    }

    /// Replace values of a record under review with operator-supplied ones.
    ///
    /// Only the metrics present in `metrics` are touched. Pending unexpected revisions of
    /// those metrics are replaced by override entries. Finalization is left as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or a metric does not belong to the source.
    pub fn apply_override(
        &mut self,
        repository: &RepoId,
        date: NaiveDate,
        source: Source,
        metrics: &Metrics,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        if let Some(metric) = metrics.keys().find(|m| !source.metric_names().contains(m)) {
            bail!("metric '{metric}' is not reported by source '{source}'");
        }

        let record = self
            .repos
            .get_mut(repository)
            .and_then(|repo| repo.records.get_mut(&(source, date)))
            .ok_or_else(|| app_err!("no {source} record for '{repository}' on {date}"))?;

        let mut applied = 0;
        for (&metric, &new) in metrics {
            let old = record.metrics.get(&metric).copied().unwrap_or(0);
            let pending = record.anomalies.len();
            record
                .anomalies
                .retain(|a| !matches!(a, Anomaly::UnexpectedRevision { metric: m, .. } if *m == metric));

            if old == new && pending == record.anomalies.len() {
                continue;
            }

            let _ = record.anomalies.insert(Anomaly::OperatorOverride { metric, old, new });
            let _ = record.metrics.insert(metric, new);
            applied += 1;
        }

        if applied > 0 {
            record.revision_count = record.revision_count.saturating_add(1);
            record.last_updated = record.last_updated.max(at);
            log::info!(target: LOG_TARGET, "Applied {applied} override(s) to {source} record for '{repository}' on {date}");
        }

        Ok(applied)
    }

    /// Records of one source for a repository over a date range, in date order.
    pub fn records_for(&self, repository: &RepoId, dates: RangeInclusive<NaiveDate>, source: Source) -> impl Iterator<Item = &DailyMetricRecord> {
        self.repos.get(repository).into_iter().flat_map(move |repo| repo.records_for(dates.clone(), source))
    }

    /// Whether every required source has a record for the day.
    #[must_use]
    pub fn is_complete(&self, repository: &RepoId, date: NaiveDate, policy: &FinalizationPolicy) -> bool {
        self.repos
            .get(repository)
            .is_some_and(|repo| policy.required_sources.iter().all(|source| repo.record(date, *source).is_some()))
    }

    #[must_use]
    pub fn counter(&self, repository: &RepoId, kind: CounterKind) -> Option<&CumulativeCounter> {
        self.repos.get(repository).and_then(|repo| repo.counter(kind))
    }

    #[must_use]
    pub fn record(&self, repository: &RepoId, date: NaiveDate, source: Source) -> Option<&DailyMetricRecord> {
        self.repos.get(repository).and_then(|repo| repo.record(date, source))
    }

    /// Repository ids with history, in id order.
    pub fn repositories(&self) -> impl Iterator<Item = &RepoId> {
        self.repos.keys()
    }

    #[must_use]
    pub fn partition(&self, repository: &RepoId) -> Option<&RepoLedger> {
        self.repos.get(repository)
    }

    /// Detach a repository's partition so it can be merged on its own.
    pub fn take_partition(&mut self, repository: &RepoId) -> RepoLedger {
        self.repos.remove(repository).unwrap_or_default()
    }

    /// Reattach a partition taken with [`Self::take_partition`].
    pub fn put_partition(&mut self, repository: RepoId, partition: RepoLedger) {
        if !partition.is_empty() {
            let _ = self.repos.insert(repository, partition);
        }
    }

    #[must_use]
    pub fn cycles(&self) -> &[DateTime<Utc>] {
        &self.cycles
    }

    pub(super) fn set_cycles(&mut self, mut cycles: Vec<DateTime<Utc>>) {
        cycles.sort_unstable();
        cycles.dedup();
        let excess = cycles.len().saturating_sub(CYCLES_KEPT);
        let _ = cycles.drain(..excess);
        self.cycles = cycles;
    }

    pub(super) fn partition_mut(&mut self, repository: &RepoId) -> &mut RepoLedger {
        self.repos.entry(repository.clone()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SourceWindow;
    use crate::observations::DayMetrics;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn repo() -> RepoId {
        RepoId::parse("o/r").unwrap()
    }

    fn policy() -> FinalizationPolicy {
        let window = SourceWindow {
            window_days: 14,
            grace_days: 2,
        };

        FinalizationPolicy {
            windows: BTreeMap::from([
                (Source::TrafficViews, window),
                (Source::TrafficClones, window),
                (
                    Source::Releases,
                    SourceWindow {
                        window_days: 1,
                        grace_days: 0,
                    },
                ),
                (
                    Source::GaSessions,
                    SourceWindow {
                        window_days: 3,
                        grace_days: 2,
                    },
                ),
            ]),
            default_tolerance: 2,
            tolerances: BTreeMap::new(),
            required_sources: BTreeSet::from([Source::TrafficViews, Source::GaSessions]),
        }
    }

    fn views(day: NaiveDate, views: u64, unique: u64) -> DayMetrics {
        DayMetrics {
            day,
            metrics: Metrics::from([(MetricName::Views, views), (MetricName::UniqueViews, unique)]),
        }
    }

    fn traffic(start: NaiveDate, end: NaiveDate, days: Vec<DayMetrics>, fetched_at: &str) -> FetchObservation {
        FetchObservation {
            repository: repo(),
            source: Source::TrafficViews,
            window_start: start,
            window_end: end,
            days,
            fetched_at: at(fetched_at),
        }
    }

    fn finalize_day_five(ledger: &mut Ledger, policy: &FinalizationPolicy) {
        // two later cycles that do not touch 01-05 move it past the watermark
        let _ = ledger.close_cycle(at("2024-01-25T06:00:00Z"));
        let _ = ledger.close_cycle(at("2024-01-26T06:00:00Z"));
        assert_eq!(ledger.promote_watermarks(policy), 1);
    }

    #[test]
    fn test_rolling_window_revision_replaces_unfinalized_value() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let first = traffic(date(1, 1), date(1, 14), vec![views(date(1, 5), 30, 10)], "2024-01-14T06:00:00Z");
        let second = traffic(date(1, 2), date(1, 15), vec![views(date(1, 5), 31, 12)], "2024-01-15T06:00:00Z");

        let outcome = ledger.merge(&first, &policy);
        assert_eq!(outcome.created, 1);

        let outcome = ledger.merge(&second, &policy);
        assert_eq!(outcome.revised, 1);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert_eq!(record.revision_count, 1);
        assert!(!record.finalized);
        assert_eq!(record.last_updated, at("2024-01-15T06:00:00Z"));
    }

    #[test]
    fn test_revision_beyond_tolerance_after_finalization_is_flagged() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 1), date(1, 14), vec![views(date(1, 5), 30, 10)], "2024-01-14T06:00:00Z"), &policy);
        let _ = ledger.merge(&traffic(date(1, 2), date(1, 15), vec![views(date(1, 5), 31, 12)], "2024-01-15T06:00:00Z"), &policy);
        finalize_day_five(&mut ledger, &policy);

        let late = traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 31, 50)], "2024-01-27T06:00:00Z");
        let outcome = ledger.merge(&late, &policy);
        assert_eq!(outcome.unexpected_revisions, 1);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert!(record.finalized);
        assert_eq!(record.revision_count, 1);
        assert!(record.anomalies.contains(&Anomaly::UnexpectedRevision {
            metric: MetricName::UniqueViews,
            old: 12,
            new: 50,
        }));

        // same late observation again adds nothing
        let outcome = ledger.merge(&late, &policy);
        assert_eq!(outcome.unexpected_revisions, 0);
        assert_eq!(ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap().anomalies.len(), 1);
    }

    #[test]
    fn test_each_metric_beyond_tolerance_is_its_own_anomaly() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 1), date(1, 14), vec![views(date(1, 5), 36, 12)], "2024-01-14T06:00:00Z"), &policy);
        finalize_day_five(&mut ledger, &policy);

        let late = traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 150, 50)], "2024-01-27T06:00:00Z");
        let outcome = ledger.merge(&late, &policy);
        assert_eq!(outcome.unexpected_revisions, 2);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.anomalies.iter().filter(|a| a.needs_review()).count(), 2);
        assert_eq!(record.metric(MetricName::Views), 36);
    }

    #[test]
    fn test_revision_within_tolerance_after_finalization_is_accepted() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 30, 12)], "2024-01-14T06:00:00Z"), &policy);
        finalize_day_five(&mut ledger, &policy);

        let outcome = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 31, 13)], "2024-01-27T06:00:00Z"), &policy);
        assert_eq!(outcome.late_revisions, 1);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 13);
        assert!(record.finalized);
        assert_eq!(record.anomalies.len(), 2);
        assert!(record.anomalies.iter().all(|a| a.kind() == "late_revision"));
    }

    #[test]
    fn test_any_metric_beyond_tolerance_rejects_whole_update() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 30, 12)], "2024-01-14T06:00:00Z"), &policy);
        finalize_day_five(&mut ledger, &policy);

        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 90, 13)], "2024-01-27T06:00:00Z"), &policy);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::Views), 30);
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert_eq!(record.anomalies.len(), 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let policy = policy();
        let mut ledger = Ledger::new();
        let observation = traffic(
            date(1, 1),
            date(1, 14),
            date(1, 1).iter_days().take(14).map(|d| views(d, 3, 2)).collect(),
            "2024-01-14T06:00:00Z",
        );

        let _ = ledger.merge(&observation, &policy);
        let snapshot = ledger.clone();

        let outcome = ledger.merge(&observation, &policy);
        assert_eq!(outcome.unchanged, 14);
        assert_eq!(ledger, snapshot);
    }

    #[test]
    fn test_stale_observation_does_not_roll_back() {
        let policy = policy();
        let mut ledger = Ledger::new();
        let older = traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 30, 10)], "2024-01-14T06:00:00Z");
        let newer = traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 31, 12)], "2024-01-15T06:00:00Z");

        let _ = ledger.merge(&older, &policy);
        let _ = ledger.merge(&newer, &policy);
        let outcome = ledger.merge(&older, &policy);

        assert_eq!(outcome.stale, 1);
        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert_eq!(record.revision_count, 1);
    }

    #[test]
    fn test_day_beyond_watermark_is_final_on_creation() {
        let policy = policy();
        let mut ledger = Ledger::new();
        let _ = ledger.merge(&traffic(date(1, 1), date(1, 1), vec![views(date(1, 1), 1, 1)], "2024-02-01T00:00:00Z"), &policy);
        assert!(ledger.record(&repo(), date(1, 1), Source::TrafficViews).unwrap().finalized);
    }

    #[test]
    fn test_promotion_requires_stability_across_cycles() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 3, 2)], "2024-01-14T06:00:00Z"), &policy);
        assert!(ledger.close_cycle(at("2024-01-14T06:00:00Z")));
        assert_eq!(ledger.promote_watermarks(&policy), 0, "one cycle is not enough");

        // the value changes in the latest cycle, so it is not yet stable
        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 4, 2)], "2024-01-22T06:00:00Z"), &policy);
        assert!(ledger.close_cycle(at("2024-01-22T06:00:00Z")));
        assert_eq!(ledger.promote_watermarks(&policy), 0);

        // an unchanged re-fetch in the next cycle makes it stable
        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 4, 2)], "2024-01-23T06:00:00Z"), &policy);
        assert!(ledger.close_cycle(at("2024-01-23T06:00:00Z")));
        assert_eq!(ledger.promote_watermarks(&policy), 1);
        assert!(ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap().finalized);
    }

    #[test]
    fn test_close_cycle_ignores_old_marks() {
        let mut ledger = Ledger::new();
        assert!(ledger.close_cycle(at("2024-01-14T06:00:00Z")));
        assert!(!ledger.close_cycle(at("2024-01-14T06:00:00Z")));
        assert!(!ledger.close_cycle(at("2024-01-10T06:00:00Z")));
        assert!(ledger.close_cycle(at("2024-01-15T06:00:00Z")));
        assert!(ledger.close_cycle(at("2024-01-16T06:00:00Z")));
        assert_eq!(ledger.cycles(), &[at("2024-01-15T06:00:00Z"), at("2024-01-16T06:00:00Z")]);
    }

    #[test]
    fn test_counter_regression_keeps_prior_value() {
        let mut ledger = Ledger::new();
        let reading = |value, when: &str| CounterReading {
            repository: repo(),
            kind: CounterKind::ReleaseDownloads,
            value,
            observed_at: at(when),
        };

        assert_eq!(ledger.merge_cumulative(&reading(1000, "2024-01-14T06:00:00Z")), CounterOutcome::Created);
        assert_eq!(ledger.merge_cumulative(&reading(950, "2024-01-15T06:00:00Z")), CounterOutcome::Regressed);

        let counter = ledger.counter(&repo(), CounterKind::ReleaseDownloads).unwrap();
        assert_eq!(counter.value, 1000);
        assert_eq!(counter.observed_at, at("2024-01-14T06:00:00Z"));
        assert!(counter.anomalies.contains(&Anomaly::CounterRegression {
            stored: 1000,
            observed: 950,
            observed_at: at("2024-01-15T06:00:00Z"),
        }));

        assert_eq!(ledger.merge_cumulative(&reading(1010, "2024-01-16T06:00:00Z")), CounterOutcome::Advanced);
        assert_eq!(ledger.counter(&repo(), CounterKind::ReleaseDownloads).unwrap().value, 1010);
    }

    #[test]
    fn test_override_clears_pending_review() {
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 31, 12)], "2024-01-14T06:00:00Z"), &policy);
        finalize_day_five(&mut ledger, &policy);
        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 31, 50)], "2024-01-27T06:00:00Z"), &policy);

        let applied = ledger
            .apply_override(
                &repo(),
                date(1, 5),
                Source::TrafficViews,
                &Metrics::from([(MetricName::UniqueViews, 50)]),
                at("2024-01-28T00:00:00Z"),
            )
            .unwrap();
        assert_eq!(applied, 1);

        let record = ledger.record(&repo(), date(1, 5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 50);
        assert!(record.finalized);
        assert!(!record.needs_review());
        assert!(record.anomalies.contains(&Anomaly::OperatorOverride {
            metric: MetricName::UniqueViews,
            old: 12,
            new: 50,
        }));
    }

    #[test]
    fn test_override_rejects_foreign_metric_and_missing_record() {
        let mut ledger = Ledger::new();
        let when = at("2024-01-28T00:00:00Z");

        let _ = ledger
            .apply_override(&repo(), date(1, 5), Source::TrafficViews, &Metrics::from([(MetricName::Sessions, 1)]), when)
            .unwrap_err();
        let _ = ledger
            .apply_override(&repo(), date(1, 5), Source::TrafficViews, &Metrics::from([(MetricName::Views, 1)]), when)
            .unwrap_err();
    }

    #[test]
    fn test_records_for_and_completeness() {
        let policy = policy();
        let mut ledger = Ledger::new();
        let _ = ledger.merge(
            &traffic(date(1, 1), date(1, 3), (1..=3).map(|d| views(date(1, d), d.into(), 1)).collect(), "2024-01-14T06:00:00Z"),
            &policy,
        );

        let days: Vec<_> = ledger.records_for(&repo(), date(1, 2)..=date(1, 3), Source::TrafficViews).map(|r| r.date).collect();
        assert_eq!(days, vec![date(1, 2), date(1, 3)]);
        assert_eq!(ledger.records_for(&repo(), date(1, 3)..=date(1, 1), Source::TrafficViews).count(), 0);

        assert!(!ledger.is_complete(&repo(), date(1, 2), &policy));
        let _ = ledger.merge(
            &FetchObservation {
                repository: repo(),
                source: Source::GaSessions,
                window_start: date(1, 2),
                window_end: date(1, 2),
                days: vec![DayMetrics {
                    day: date(1, 2),
                    metrics: Metrics::from([(MetricName::Sessions, 4)]),
                }],
                fetched_at: at("2024-01-14T06:00:00Z"),
            },
            &policy,
        );
        assert!(ledger.is_complete(&repo(), date(1, 2), &policy));
        assert!(!ledger.is_complete(&RepoId::parse("x/y").unwrap(), date(1, 2), &policy));
    }

    #[test]
    fn test_partitions_round_trip() {
        let policy = policy();
        let mut ledger = Ledger::new();
        let _ = ledger.merge(&traffic(date(1, 5), date(1, 5), vec![views(date(1, 5), 3, 2)], "2024-01-14T06:00:00Z"), &policy);

        let mut partition = ledger.take_partition(&repo());
        assert_eq!(ledger.repositories().count(), 0);

        let _ = partition.merge(&traffic(date(1, 6), date(1, 6), vec![views(date(1, 6), 3, 2)], "2024-01-14T06:00:00Z"), &policy);
        ledger.put_partition(repo(), partition);
        assert_eq!(ledger.partition(&repo()).unwrap().dates().len(), 2);

        ledger.put_partition(RepoId::parse("x/y").unwrap(), RepoLedger::default());
        assert_eq!(ledger.repositories().count(), 1);
    }
}
