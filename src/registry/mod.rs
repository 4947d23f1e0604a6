//! The ordered set of tracked repositories
//!
//! The registry is a small YAML file edited by hand or through the `repos` command. It
//! supplies the [`RepoId`] keys under which everything downstream is stored.

#[expect(clippy::module_inception, reason = "the registry type lives in the registry module")]
mod registry;
mod repository;

pub use registry::{Registry, RegistryDefaults};
pub use repository::{RepoId, RepoStatus, Repository};
