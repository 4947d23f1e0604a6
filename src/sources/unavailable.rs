use crate::registry::RepoId;
use core::fmt::{Display, Formatter};
use std::sync::Arc;

/// A source that could not be fetched for one repository in this run.
///
/// The source is skipped and the rest of the run proceeds. The ledger keeps whatever it
/// already had for the affected days.
#[derive(Debug, Clone)]
pub struct SourceUnavailable {
    pub repository: RepoId,
    pub source: &'static str,
    pub error: Arc<ohno::AppError>,
}

impl SourceUnavailable {
    #[must_use]
    pub fn new(repository: RepoId, source: &'static str, error: ohno::AppError) -> Self {
        Self {
            repository,
            source,
            error: Arc::new(error),
        }
    }
}

impl Display for SourceUnavailable {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} unavailable for '{}': {:#}", self.source, self.repository, self.error)
    }
}
