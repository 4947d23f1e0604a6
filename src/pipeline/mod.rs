//! A single batch run, from fetched payloads to the committed ledger
//!
//! A [`Batch`] holds the run lock and the in-memory ledger from load until commit. Payloads
//! are normalized and merged one repository partition at a time, the merge cycle is closed
//! with the latest fetch time seen, and watermark promotion runs once before the single
//! commit. Dropping a batch without committing leaves the previous ledger file untouched.

use crate::Result;
use crate::ledger::{CounterOutcome, FinalizationPolicy, Ledger, LedgerLockGuard, LedgerStore, MergeOutcome};
use crate::observations::{MalformedObservation, PayloadEnvelope, Problem, normalize};
use crate::registry::{RepoId, Registry};
use crate::sources::SourceUnavailable;
use std::collections::BTreeMap;

const LOG_TARGET: &str = "  pipeline";

/// What a run did.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Repositories with at least one payload in the run
    pub repositories: usize,
    pub merge: MergeOutcome,
    pub counter_regressions: usize,
    pub promoted: usize,
    pub skipped: Vec<SourceUnavailable>,
    pub rejected: Vec<MalformedObservation>,
}

impl RunSummary {
    /// Anomalies raised by this run that need a human to look at them.
    #[must_use]
    pub const fn anomalies_raised(&self) -> usize {
        self.merge.unexpected_revisions + self.counter_regressions
    }
}

/// The ledger of one run, held under the run lock.
#[derive(Debug)]
pub struct Batch {
    store: LedgerStore,
    ledger: Ledger,
    _lock: LedgerLockGuard,
}

impl Batch {
    /// Lock and load the ledger behind `store`.
    pub async fn open(store: LedgerStore) -> Result<Self> {
        let lock = store.lock().await?;
        let ledger = store.load()?;
        Ok(Self { store, ledger, _lock: lock })
    }

    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Direct access for operator edits that bypass normalization.
    pub const fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    /// Normalize and merge a run's payloads, then close the cycle and promote.
    pub fn apply(&mut self, registry: &Registry, policy: &FinalizationPolicy, envelopes: &[PayloadEnvelope]) -> RunSummary {
        apply(&mut self.ledger, registry, policy, envelopes)
    }

    /// Write the ledger and release the lock.
    pub fn commit(self) -> Result<()> {
        self.store.commit(&self.ledger)
    }
}

/// Merge a run's payloads into `ledger`.
///
/// Payloads are grouped by repository and applied in fetch order. A payload for a
/// repository the registry has never seen, or one that fails validation, is rejected
/// without touching the ledger.
pub fn apply(ledger: &mut Ledger, registry: &Registry, policy: &FinalizationPolicy, envelopes: &[PayloadEnvelope]) -> RunSummary {
    let mut summary = RunSummary::default();

    let mut by_repo: BTreeMap<&RepoId, Vec<&PayloadEnvelope>> = BTreeMap::new();
    for envelope in envelopes {
        by_repo.entry(&envelope.repository).or_default().push(envelope);
    }

    for (id, mut batch) in by_repo {
        let Some(repository) = registry.get(id) else {
            for envelope in batch {
                reject(&mut summary, MalformedObservation::new(id.clone(), envelope.payload.kind(), Problem::UnknownRepository));
            }
            continue;
        };

        batch.sort_by(|a, b| (a.fetched_at, a.payload.kind()).cmp(&(b.fetched_at, b.payload.kind())));
        summary.repositories += 1;

        let mut partition = ledger.take_partition(id);
        for envelope in batch {
            let normalized = match normalize(repository, &envelope.payload, envelope.fetched_at) {
                Ok(normalized) => normalized,
                Err(e) => {
                    reject(&mut summary, e);
                    continue;
                }
            };

            if let Some(observation) = &normalized.observation {
                summary.merge += partition.merge(observation, policy);
            }

            for reading in &normalized.counters {
                if partition.merge_cumulative(reading.kind, reading.value, reading.observed_at) == CounterOutcome::Regressed {
                    log::warn!(
                        target: LOG_TARGET,
                        "Counter regression for '{id}' {}: observed {} at {}",
                        reading.kind,
                        reading.value,
                        reading.observed_at
                    );
                    summary.counter_regressions += 1;
                }
            }
        }
        ledger.put_partition(id.clone(), partition);
    }

    if let Some(mark) = envelopes.iter().map(|e| e.fetched_at).max()
        && ledger.close_cycle(mark)
    {
        log::debug!(target: LOG_TARGET, "Closed merge cycle at {mark}");
    }

    summary.promoted = ledger.promote_watermarks(policy);
    summary.rejected.sort_by(|a, b| (&a.repository, a.payload).cmp(&(&b.repository, b.payload)));

    log::info!(
        target: LOG_TARGET,
        "Merged {} repositories: {} created, {} revised, {} unchanged, {} stale, {} promoted, {} rejected",
        summary.repositories,
        summary.merge.created,
        summary.merge.revised,
        summary.merge.unchanged,
        summary.merge.stale,
        summary.promoted,
        summary.rejected.len()
    );

    summary
}

fn reject(summary: &mut RunSummary, malformed: MalformedObservation) {
    log::error!(target: LOG_TARGET, "Rejected {malformed}");
    summary.rejected.push(malformed);
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::ledger::{Anomaly, SourceWindow};
    use crate::observations::{CounterKind, CountersPayload, MetricName, RawPayload, Source, TrafficDay, TrafficPayload};
    use crate::registry::Repository;
    use chrono::{DateTime, NaiveDate, Utc};
    use std::collections::BTreeSet;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn id() -> RepoId {
        RepoId::parse("o/r").unwrap()
    }

    fn registry() -> Registry {
        let mut registry = Registry::default();
        registry.add(Repository::new(id(), "UTC", day(1))).unwrap();
        registry
    }

    fn policy() -> FinalizationPolicy {
        FinalizationPolicy {
            windows: BTreeMap::from([(
                Source::TrafficViews,
                SourceWindow {
                    window_days: 14,
                    grace_days: 2,
                },
            )]),
            default_tolerance: 2,
            tolerances: BTreeMap::new(),
            required_sources: BTreeSet::from([Source::TrafficViews]),
        }
    }

    fn views(fetched_at: &str, unique: i64) -> PayloadEnvelope {
        PayloadEnvelope {
            repository: id(),
            fetched_at: at(fetched_at),
            payload: RawPayload::TrafficViews(TrafficPayload {
                window: Some([day(5), day(5)]),
                days: Some(vec![TrafficDay {
                    day: Some(day(5)),
                    count: Some(unique * 3),
                    unique_count: Some(unique),
                }]),
            }),
        }
    }

    fn stars(fetched_at: &str, stars: i64) -> PayloadEnvelope {
        PayloadEnvelope {
            repository: id(),
            fetched_at: at(fetched_at),
            payload: RawPayload::Counters(CountersPayload {
                forks: None,
                stars: Some(stars),
                observed_at: None,
            }),
        }
    }

    #[test]
    fn test_revision_then_finalization_then_unexpected_revision() {
        let registry = registry();
        let policy = policy();
        let mut ledger = Ledger::new();

        let summary = apply(&mut ledger, &registry, &policy, &[views("2024-01-06T00:00:00Z", 10)]);
        assert_eq!(summary.merge.created, 1);

        let summary = apply(&mut ledger, &registry, &policy, &[views("2024-01-07T00:00:00Z", 12)]);
        assert_eq!(summary.merge.revised, 1);
        let record = ledger.record(&id(), day(5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert_eq!(record.revision_count, 1);
        assert!(!record.finalized);

        // a quiet cycle past the horizon promotes the record
        let summary = apply(&mut ledger, &registry, &policy, &[views("2024-01-25T00:00:00Z", 12)]);
        assert_eq!(summary.promoted, 1);
        assert!(ledger.record(&id(), day(5), Source::TrafficViews).unwrap().finalized);

        let summary = apply(&mut ledger, &registry, &policy, &[views("2024-01-27T00:00:00Z", 50)]);
        assert_eq!(summary.merge.unexpected_revisions, 1);
        assert_eq!(summary.anomalies_raised(), 1);

        let record = ledger.record(&id(), day(5), Source::TrafficViews).unwrap();
        assert_eq!(record.metric(MetricName::UniqueViews), 12);
        assert!(record.anomalies.contains(&Anomaly::UnexpectedRevision {
            metric: MetricName::UniqueViews,
            old: 12,
            new: 50,
        }));
    }

    #[test]
    fn test_replaying_a_run_changes_nothing() {
        let registry = registry();
        let policy = policy();
        let mut ledger = Ledger::new();
        let run = [views("2024-01-06T00:00:00Z", 10), stars("2024-01-06T00:00:00Z", 40)];

        let _ = apply(&mut ledger, &registry, &policy, &run);
        let before = ledger.clone();

        let summary = apply(&mut ledger, &registry, &policy, &run);
        assert_eq!(ledger, before);
        assert_eq!(summary.merge.created, 0);
        assert_eq!(summary.merge.unchanged, 1);
    }

    #[test]
    fn test_counter_regression_is_counted() {
        let registry = registry();
        let policy = policy();
        let mut ledger = Ledger::new();

        let _ = apply(&mut ledger, &registry, &policy, &[stars("2024-01-06T00:00:00Z", 1000)]);
        let summary = apply(&mut ledger, &registry, &policy, &[stars("2024-01-07T00:00:00Z", 950)]);

        assert_eq!(summary.counter_regressions, 1);
        assert_eq!(ledger.counter(&id(), CounterKind::Stars).unwrap().value, 1000);
    }

    #[test]
    fn test_malformed_and_unknown_payloads_are_rejected_without_blocking_others() {
        let registry = registry();
        let policy = policy();
        let mut ledger = Ledger::new();

        let mut negative = views("2024-01-06T00:00:00Z", 1);
        if let RawPayload::TrafficViews(traffic) = &mut negative.payload {
            traffic.days.as_mut().unwrap()[0].unique_count = Some(-1);
        }

        let mut stranger = stars("2024-01-06T00:00:00Z", 5);
        stranger.repository = RepoId::parse("x/y").unwrap();

        let summary = apply(&mut ledger, &registry, &policy, &[negative, stranger, stars("2024-01-06T00:00:00Z", 7)]);

        assert_eq!(summary.rejected.len(), 2);
        assert_eq!(summary.rejected[0].repository.as_str(), "o/r");
        assert_eq!(summary.rejected[1].problem, Problem::UnknownRepository);
        assert!(ledger.record(&id(), day(5), Source::TrafficViews).is_none());
        assert_eq!(ledger.counter(&id(), CounterKind::Stars).unwrap().value, 7);
        assert_eq!(ledger.repositories().count(), 1);
    }

    #[test]
    fn test_empty_run_leaves_cycles_alone() {
        let registry = registry();
        let policy = policy();
        let mut ledger = Ledger::new();

        let summary = apply(&mut ledger, &registry, &policy, &[]);
        assert_eq!(summary.repositories, 0);
        assert!(ledger.cycles().is_empty());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_batch_commits_once_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("ledger.json")).unwrap();

        let mut batch = Batch::open(LedgerStore::new(path.clone())).await.unwrap();
        let _ = batch.apply(&registry(), &policy(), &[views("2024-01-06T00:00:00Z", 10)]);
        let expected = batch.ledger().clone();
        batch.commit().unwrap();

        let reloaded = LedgerStore::new(path).load().unwrap();
        assert_eq!(reloaded, expected);
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    async fn test_dropped_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("ledger.json")).unwrap();

        let mut batch = Batch::open(LedgerStore::new(path.clone())).await.unwrap();
        let _ = batch.apply(&registry(), &policy(), &[views("2024-01-06T00:00:00Z", 10)]);
        drop(batch);

        assert!(!path.exists());
    }
}
