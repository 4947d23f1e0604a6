//! Command-line interface and orchestration for ghtally
//!
//! This module implements the CLI commands and wires the registry, the source
//! clients, the run pipeline and the reports together. It handles argument
//! parsing, configuration management and the high-level workflows.
//!
//! # Commands
//!
//! - **collect**: fetch every source of the active repositories and merge the
//!   results into the ledger in one locked batch
//! - **ingest**: the same merge, fed from saved payload envelopes instead of the network
//! - **show**: per-repository totals over recent days plus open anomalies
//! - **report**: one row per repository and day, as CSV or JSON
//! - **repos**: list, add, rename and remove registry entries
//! - **resolve**: replace values of a record flagged for review
//! - **init** / **validate**: generate and check the configuration
//!
//! Configuration is a TOML file (`ghtally.toml` by default) holding the
//! finalization policy, fetch limits and the ledger and registry paths.

mod collect;
mod common;
mod config;
mod host;
mod ingest;
mod init;
mod report;
mod repos;
mod resolve;
mod run;
mod show;
mod validate;

pub use collect::{CollectArgs, process_collect};
pub use config::{Config, FetchConfig};
pub use host::Host;
pub use ingest::{IngestArgs, process_ingest, read_envelopes, save_envelopes};
pub use init::{InitArgs, init_config};
pub use report::{ReportArgs, process_report};
pub use repos::{ReposArgs, ReposCommand, process_repos};
pub use resolve::{ResolveArgs, process_resolve};
pub use run::run;
pub use show::{ShowArgs, process_show};
pub use validate::validate_config;
