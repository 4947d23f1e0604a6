//! ghtally crate
//!
//! This crate is an implementation detail of the `ghtally` tool. This crate's API is fluid and may change without warning
//! and in a semver-incompatible way.
//!
//! # Module Organization
//!
//! - [`registry`]: The ordered set of tracked repositories
//! - [`observations`]: Raw payloads and their normalization into day-bucketed observations
//! - [`ledger`]: The reconciliation ledger and its on-disk form
//! - [`estimator`]: Derived metrics blended across sources
//! - [`sources`]: HTTP clients and the concurrent collector
//! - [`pipeline`]: A single batch run from fetch to commit
//! - [`reports`]: Read-only projections of the ledger
//! - [`commands`]: Command-line interface

/// Result type alias using `ohno::AppError` as the default error type.
pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

#[doc(hidden)]
pub mod commands;

#[doc(hidden)]
pub mod estimator;

#[doc(hidden)]
pub mod ledger;

#[doc(hidden)]
pub mod observations;

#[doc(hidden)]
pub mod pipeline;

#[doc(hidden)]
pub mod registry;

#[doc(hidden)]
pub mod reports;

#[doc(hidden)]
pub mod sources;

pub use crate::commands::{Host, run};
