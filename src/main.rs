//! Keep a committed daily ledger of repository traffic and documentation analytics.
//!
//! # Overview
//!
//! GitHub only reports repository views and clones for a trailing 14-day window, and
//! keeps revising the most recent days as late data arrives. Documentation analytics revise
//! recent days too, and bucket them in the analytics property's own timezone. `ghtally`
//! fetches these sources on a schedule, reconciles every overlapping window into one
//! record per repository, day and source, and finalizes days once their revision window
//! has passed. The result is a single JSON ledger file that is safe to commit and diff.
//!
//! # Quick Start
//!
//! ```bash
//! ghtally init --registry repos.yaml --owner my-org
//! ghtally repos add my-org/widget --docs-property 123456789 --timezone America/Los_Angeles
//! GITHUB_TOKEN=... ghtally collect
//! ghtally show --days 7
//! ```
//!
//! # Commands
//!
//! **collect** fetches traffic views, traffic clones, stars and forks, release downloads
//! and (with `--google-credentials`) documentation sessions for every active repository,
//! then merges them into the ledger. A source that keeps failing after its retries is
//! skipped for the run; the others still land. Pass `--save-payloads PATH` to keep the raw
//! payloads for later replay, or `--dry-run` to see the run summary without writing the ledger.
//!
//! **ingest** merges saved payload files. Each file holds one envelope or an array of them:
//!
//! ```json
//! {
//!   "repository": "my-org/widget",
//!   "fetched_at": "2024-01-14T06:00:00Z",
//!   "payload": {
//!     "source": "traffic_views",
//!     "window": ["2024-01-01", "2024-01-14"],
//!     "days": [{ "day": "2024-01-05", "count": 31, "uniqueCount": 10 }]
//!   }
//! }
//! ```
//!
//! Feeding the same files twice leaves the ledger byte-for-byte unchanged.
//!
//! **show** prints per-repository totals over the last `--days` days, the latest star,
//! fork and download counts, and any anomalies waiting for review.
//!
//! **report** exports one row per repository and day with every source's metrics, whether
//! the day is final, its anomaly flags and the estimated split between new and returning
//! visitors. Use `--csv PATH` and/or `--json PATH`; with neither, CSV goes to standard output.
//!
//! **repos** lists, adds, renames and removes registry entries. Renamed and removed entries
//! stay in the registry so their history remains attributable.
//!
//! **resolve** replaces values of a record that was flagged for review:
//!
//! ```bash
//! ghtally resolve my-org/widget 2024-01-05 --source traffic_views unique_views=12
//! ```
//!
//! # Finalization and anomalies
//!
//! Each source has a revision window plus a grace period. Within it, new values simply
//! replace old ones. Once a day is past its window and its value held steady across two
//! runs, it is final. A later change to a final value within the metric's tolerance is
//! applied and flagged `late_revision`; a larger one is kept out and flagged
//! `unexpected_revision` until resolved. A star, fork or download count that goes down is
//! flagged `counter_regression` and the stored value is kept.
//!
//! # Exit status
//!
//! A run that rejected malformed payloads still commits everything else, then exits with
//! status 1. A failed commit leaves the previous ledger in place.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use ghtally::{Host, run};
use std::io::Write;
use std::io::{stderr, stdout};

/// Default host that runs real OS commands.
#[derive(Debug, Clone, Default)]
pub struct RealHost;

#[cfg_attr(coverage_nightly, coverage(off))]
impl Host for RealHost {
    fn output(&mut self) -> impl Write {
        stdout()
    }

    fn error(&mut self) -> impl Write {
        stderr()
    }

    fn exit(&mut self, code: i32) {
        std::process::exit(code);
    }
}

#[tokio::main]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn main() -> Result<(), ohno::AppError> {
    run(&mut RealHost, std::env::args()).await
}
