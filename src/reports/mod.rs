//! Read-only projections of the ledger
//!
//! Reports never modify the ledger. Two shapes are produced:
//!
//! - [`ReportRow`]s: one per repository and day with every source's metrics, the day's
//!   finalization and anomaly flags, and the derived new/returning estimate. These feed the
//!   CSV and JSON generators.
//! - [`RepoTotals`]: per-repository sums over a span of days with the latest counter values
//!   and the anomalies that still need review. These feed the console generator.

mod console;
mod csv;
mod json;
mod projection;

pub use console::generate as generate_console;
pub use csv::generate as generate_csv;
pub use json::generate as generate_json;
pub use projection::{OpenAnomaly, RepoTotals, ReportRow, RowFilter, project, totals};
