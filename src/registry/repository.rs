use crate::Result;
use chrono::NaiveDate;
use core::fmt::{Display, Formatter};
use core::str::FromStr;
use ohno::bail;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identity key of a tracked repository, in `owner/name` form.
///
/// The id is the key under which ledger history is stored, so it never changes for a
/// given entry; a rename produces a new id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId {
    full: Arc<str>,
}

impl RepoId {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let Some((owner, name)) = text.split_once('/') else {
            bail!("invalid repository id '{text}': expected 'owner/name'");
        };

        if owner.is_empty() || name.is_empty() {
            bail!("invalid repository id '{text}': empty owner or name");
        }

        if name.contains('/') {
            bail!("invalid repository id '{text}': too many path segments");
        }

        let name = name.trim_end_matches(".git");
        Ok(Self {
            full: Arc::from(format!("{owner}/{name}")),
        })
    }

    /// Build an id from separate owner and name parts.
    pub fn from_parts(owner: &str, name: &str) -> Result<Self> {
        Self::parse(&format!("{owner}/{name}"))
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        self.full.split_once('/').map_or("", |(owner, _)| owner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.full.split_once('/').map_or("", |(_, name)| name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl Display for RepoId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for RepoId {
    type Err = ohno::AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepoId {
    type Error = ohno::AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.full.to_string()
    }
}

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RepoStatus {
    /// Fetched on every run
    #[default]
    Active,

    /// Superseded by another id; history stays under this id
    Renamed,

    /// No longer fetched; history stays
    Removed,
}

/// A tracked repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_analytics_property_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_url: Option<String>,
    pub reporting_timezone: String,
    #[serde(default)]
    pub status: RepoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_to: Option<RepoId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<NaiveDate>,
}

impl Repository {
    #[must_use]
    pub fn new(id: RepoId, reporting_timezone: impl Into<String>, added_at: NaiveDate) -> Self {
        Self {
            slug: id.name().to_string(),
            id,
            docs_analytics_property_id: None,
            docs_url: None,
            reporting_timezone: reporting_timezone.into(),
            status: RepoStatus::Active,
            renamed_to: None,
            added_at: Some(added_at),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == RepoStatus::Active
    }
}
