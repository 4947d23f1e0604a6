//! The committed ledger file.
//!
//! The file holds one row per repository and UTC day, sorted by repository id and then
//! date, with every source's metrics merged into a single `metrics` column. Per-source
//! finalization, revision and anomaly detail sits next to it under `sources`. Cumulative
//! counters and the latest merge-cycle marks follow the rows.
//!
//! All maps are ordered, so serializing the same ledger always yields the same bytes.

use super::{Anomaly, CumulativeCounter, DailyMetricRecord, Ledger};
use crate::Result;
use crate::observations::{CounterKind, Metrics, Source};
use crate::registry::RepoId;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDate, Utc};
use fs4::fs_std::FileExt;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};

const LOG_TARGET: &str = "     store";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LedgerFile {
    format_version: u32,
    rows: Vec<LedgerRow>,
    #[serde(default)]
    counters: Vec<CounterRow>,
    #[serde(default)]
    cycles: Vec<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LedgerRow {
    repository: RepoId,
    date: NaiveDate,
    metrics: Metrics,

    /// True when every source present for the day is finalized
    finalized: bool,

    /// Sorted, distinct anomaly kinds across the row's sources
    anomaly_flags: Vec<String>,

    sources: BTreeMap<Source, SourceDetail>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceDetail {
    finalized: bool,
    revision_count: u32,
    last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    anomalies: BTreeSet<Anomaly>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterRow {
    repository: RepoId,
    kind: CounterKind,
    #[serde(flatten)]
    counter: CumulativeCounter,
}

/// Location of the ledger file and its lock.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: Utf8PathBuf,
}

impl LedgerStore {
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read the committed ledger. A missing file is an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Ledger> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(target: LOG_TARGET, "No ledger at '{}', starting empty", self.path);
                return Ok(Ledger::new());
            }
            Err(e) => return Err(e).into_app_err_with(|| format!("opening ledger file '{}'", self.path)),
        };

        let data: LedgerFile =
            serde_json::from_reader(BufReader::new(file)).into_app_err_with(|| format!("parsing ledger file '{}'", self.path))?;

        if data.format_version != FORMAT_VERSION {
            bail!(
                "ledger file '{}' has format version {}, expected {FORMAT_VERSION}",
                self.path,
                data.format_version
            );
        }

        let ledger = from_file(data);
        log::debug!(target: LOG_TARGET, "Loaded ledger with {} repositories from '{}'", ledger.repositories().count(), self.path);
        Ok(ledger)
    }

    /// Atomically replace the committed ledger.
    ///
    /// The new content goes to a sibling temporary file that is synced and then renamed over
    /// the old one, so a failure leaves the previous ledger in place.
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the write fails; the committed file is then unchanged.
    pub fn commit(&self, ledger: &Ledger) -> Result<()> {
        let bytes = render(ledger)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating directory '{parent}'"))?;
        }

        let temp_path = self.temp_path();
        let result = write_synced(&temp_path, &bytes)
            .and_then(|()| fs::rename(&temp_path, &self.path).into_app_err_with(|| format!("replacing ledger file '{}'", self.path)));

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp_path)
                && cleanup.kind() != io::ErrorKind::NotFound
            {
                log::warn!(target: LOG_TARGET, "Could not remove temporary ledger file '{temp_path}': {cleanup:#}");
            }
            return Err(e);
        }

        log::info!(target: LOG_TARGET, "Committed ledger to '{}' ({} bytes)", self.path, bytes.len());
        Ok(())
    }

    /// Take the exclusive run lock that sits next to the ledger file.
    ///
    /// Blocks until any other run holding the lock finishes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be created or locked.
    pub async fn lock(&self) -> Result<LedgerLockGuard> {
        let lock_path = Utf8PathBuf::from(format!("{}.lock", self.path));

        if let Some(parent) = lock_path.parent()
            && !parent.as_str().is_empty()
        {
            fs::create_dir_all(parent).into_app_err_with(|| format!("creating directory '{parent}'"))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .into_app_err_with(|| format!("opening ledger lock file '{lock_path}'"))?;

        let file = tokio::task::spawn_blocking(move || {
            file.lock_exclusive()
                .into_app_err_with(|| format!("acquiring exclusive lock '{lock_path}'"))?;
            log::debug!(target: LOG_TARGET, "Acquired ledger lock '{lock_path}'");
            Ok::<_, ohno::AppError>(file)
        })
        .await
        .into_app_err("lock task panicked")??;

        Ok(LedgerLockGuard(file))
    }

    fn temp_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.tmp", self.path))
    }
}

/// Holds the run lock; released on drop.
#[derive(Debug)]
pub struct LedgerLockGuard(File);

impl Drop for LedgerLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.unlock() {
            log::warn!(target: LOG_TARGET, "Could not release ledger lock: {e:#}");
        }
    }
}

/// Serialize a ledger exactly as it is committed.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render(ledger: &Ledger) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(&to_file(ledger)).into_app_err("serializing ledger")?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_synced(path: &Utf8Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path).into_app_err_with(|| format!("creating temporary ledger file '{path}'"))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes).into_app_err_with(|| format!("writing temporary ledger file '{path}'"))?;

    let file = writer.into_inner().into_app_err_with(|| format!("flushing temporary ledger file '{path}'"))?;
    file.sync_all().into_app_err_with(|| format!("syncing temporary ledger file '{path}'"))
}

fn to_file(ledger: &Ledger) -> LedgerFile {
    let mut rows = Vec::new();
    let mut counters = Vec::new();

    for repository in ledger.repositories() {
        let Some(partition) = ledger.partition(repository) else {
            continue;
        };

        let mut by_date: BTreeMap<NaiveDate, Vec<&DailyMetricRecord>> = BTreeMap::new();
        for record in partition.records() {
            by_date.entry(record.date).or_default().push(record);
        }

        for (date, records) in by_date {
            let mut metrics = Metrics::new();
            let mut flags = BTreeSet::new();
            let mut sources = BTreeMap::new();

            for record in &records {
                metrics.extend(record.metrics.iter().map(|(name, value)| (*name, *value)));
                flags.extend(record.anomalies.iter().map(Anomaly::kind));
                let _ = sources.insert(
                    record.source,
                    SourceDetail {
                        finalized: record.finalized,
                        revision_count: record.revision_count,
                        last_updated: record.last_updated,
                        anomalies: record.anomalies.clone(),
                    },
                );
            }

            rows.push(LedgerRow {
                repository: repository.clone(),
                date,
                metrics,
                finalized: records.iter().all(|r| r.finalized),
                anomaly_flags: flags.into_iter().map(str::to_string).collect(),
                sources,
            });
        }

        for (kind, counter) in partition.counters() {
            counters.push(CounterRow {
                repository: repository.clone(),
                kind,
                counter: counter.clone(),
            });
        }
    }

    LedgerFile {
        format_version: FORMAT_VERSION,
        rows,
        counters,
        cycles: ledger.cycles().to_vec(),
    }
}

fn from_file(data: LedgerFile) -> Ledger {
    let mut ledger = Ledger::new();

    for row in data.rows {
        let partition = ledger.partition_mut(&row.repository);
        for (source, detail) in row.sources {
            let metrics = row
                .metrics
                .iter()
                .filter(|(name, _)| source.metric_names().contains(name))
                .map(|(name, value)| (*name, *value))
                .collect();

            partition.insert_record(DailyMetricRecord {
                repository: row.repository.clone(),
                date: row.date,
                source,
                metrics,
                finalized: detail.finalized,
                revision_count: detail.revision_count,
                last_updated: detail.last_updated,
                anomalies: detail.anomalies,
            });
        }
    }

    for row in data.counters {
        ledger.partition_mut(&row.repository).insert_counter(row.kind, row.counter);
    }

    ledger.set_cycles(data.cycles);
    ledger
}
