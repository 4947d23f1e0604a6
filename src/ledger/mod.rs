//! The reconciliation ledger and its on-disk form
//!
//! The ledger merges [`FetchObservation`](crate::observations::FetchObservation)s into one
//! [`DailyMetricRecord`] per repository, UTC day and source, and keeps one
//! [`CumulativeCounter`] per repository and counter kind.
//!
//! # Merge Rules
//!
//! - A new day creates a record, already finalized if the day is past the source's watermark.
//! - An unfinalized record takes the newer value and counts a revision.
//! - A finalized record accepts changes within the metric's tolerance as a late revision and
//!   otherwise keeps its value and records an unexpected revision for review.
//! - Counters never decrease; lower readings are recorded as regressions.
//!
//! Merging never fails on normalized input. Surprising conditions become [`Anomaly`] entries.
//!
//! [`LedgerStore`] loads the committed file at the start of a run and replaces it atomically
//! at the end.

mod anomaly;
mod counter;
#[expect(clippy::module_inception, reason = "the ledger type lives in the ledger module")]
mod ledger;
mod policy;
mod record;
mod store;

pub use anomaly::Anomaly;
pub use counter::{CounterOutcome, CumulativeCounter};
pub use ledger::{Ledger, MergeOutcome, RepoLedger};
pub use policy::{FinalizationPolicy, SourceWindow};
pub use record::DailyMetricRecord;
pub use store::{LedgerLockGuard, LedgerStore, render};
