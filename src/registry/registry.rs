use super::{RepoId, RepoStatus, Repository};
use crate::Result;
use crate::observations::tz_bucket::resolve_timezone;
use camino::Utf8Path;
use chrono::NaiveDate;
use ohno::{EnrichableExt, IntoAppError, app_err, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

const LOG_TARGET: &str = "  registry";

const DEFAULT_TIMEZONE: &str = "UTC";

/// Values applied to entries that leave them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default = "default_timezone")]
    pub reporting_timezone: String,
}

impl Default for RegistryDefaults {
    fn default() -> Self {
        Self {
            owner: None,
            reporting_timezone: default_timezone(),
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

/// One entry as written by hand: either `id: owner/name` or `name` plus an optional `owner`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryEntry {
    id: Option<RepoId>,
    owner: Option<String>,
    name: Option<String>,
    slug: Option<String>,
    #[serde(alias = "ga_property_id")]
    docs_analytics_property_id: Option<String>,
    docs_url: Option<String>,
    reporting_timezone: Option<String>,
    #[serde(default)]
    status: RepoStatus,
    renamed_to: Option<RepoId>,
    added_at: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    defaults: RegistryDefaults,
    #[serde(default)]
    repos: Vec<RegistryEntry>,
}

#[derive(Debug, Serialize)]
struct RegistryFileOut<'a> {
    defaults: &'a RegistryDefaults,
    repos: &'a [Repository],
}

/// The ordered set of tracked repositories.
///
/// Entries are never physically removed: renamed and removed repositories stay so that
/// their ledger history keeps a registry entry, but they are excluded from fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    defaults: RegistryDefaults,
    repos: Vec<Repository>,
}

impl Registry {
    #[must_use]
    pub const fn new(defaults: RegistryDefaults) -> Self {
        Self {
            defaults,
            repos: Vec::new(),
        }
    }

    /// Load and validate a registry file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, cannot be parsed or fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).into_app_err_with(|| format!("reading registry file '{path}'"))?;
        let registry = Self::parse(&text).map_err(|e| e.enrich_with(|| format!("loading registry file '{path}'")))?;

        log::debug!(target: LOG_TARGET, "Loaded {} repositories from '{path}'", registry.repos.len());
        Ok(registry)
    }

    /// Parse and validate registry YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid registry.
    pub fn parse(text: &str) -> Result<Self> {
        let file: RegistryFile = serde_yaml::from_str(text).into_app_err("parsing registry YAML")?;

        let mut repos = Vec::with_capacity(file.repos.len());
        for (index, entry) in file.repos.into_iter().enumerate() {
            repos.push(resolve_entry(&file.defaults, entry).map_err(|e| e.enrich_with(|| format!("registry entry #{}", index + 1)))?);
        }

        let registry = Self {
            defaults: file.defaults,
            repos,
        };

        registry.validate()?;
        Ok(registry)
    }

    /// Write the registry back out, with every entry in its fully resolved form.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Utf8Path) -> Result<()> {
        let text = self.to_yaml()?;
        fs::write(path, text).into_app_err_with(|| format!("writing registry file '{path}'"))?;

        log::debug!(target: LOG_TARGET, "Saved {} repositories to '{path}'", self.repos.len());
        Ok(())
    }

    /// Render the registry as YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&RegistryFileOut {
            defaults: &self.defaults,
            repos: &self.repos,
        })
        .into_app_err("serializing registry")
    }

    #[must_use]
    pub const fn defaults(&self) -> &RegistryDefaults {
        &self.defaults
    }

    /// Every entry, in registry order.
    #[must_use]
    pub fn all(&self) -> &[Repository] {
        &self.repos
    }

    /// Entries that are fetched on each run, in registry order.
    pub fn active(&self) -> impl Iterator<Item = &Repository> {
        self.repos.iter().filter(|r| r.is_active())
    }

    #[must_use]
    pub fn get(&self, id: &RepoId) -> Option<&Repository> {
        self.repos.iter().find(|r| &r.id == id)
    }

    /// Follow rename links from `id` to the entry that currently represents it.
    #[must_use]
    pub fn current(&self, id: &RepoId) -> Option<&Repository> {
        let mut repo = self.get(id)?;
        for _ in 0..self.repos.len() {
            match (&repo.status, &repo.renamed_to) {
                (RepoStatus::Renamed, Some(next)) => repo = self.get(next)?,
                _ => return Some(repo),
            }
        }

        Some(repo)
    }

    /// Start tracking a repository.
    ///
    /// Adding a previously removed repository reactivates its entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository is already tracked or was renamed away.
    pub fn add(&mut self, mut repo: Repository) -> Result<()> {
        let _ = resolve_timezone(&repo.reporting_timezone)?;

        if let Some(existing) = self.repos.iter_mut().find(|r| r.id == repo.id) {
            match existing.status {
                RepoStatus::Active => bail!("repository '{}' is already tracked", repo.id),
                RepoStatus::Renamed => bail!(
                    "repository '{}' was renamed to '{}'",
                    repo.id,
                    existing.renamed_to.as_ref().map_or("?", RepoId::as_str)
                ),
                RepoStatus::Removed => {
                    log::info!(target: LOG_TARGET, "Reactivating removed repository '{}'", repo.id);
                    existing.status = RepoStatus::Active;
                    existing.docs_analytics_property_id = repo.docs_analytics_property_id.or_else(|| existing.docs_analytics_property_id.take());
                    existing.docs_url = repo.docs_url.or_else(|| existing.docs_url.take());
                    existing.reporting_timezone = repo.reporting_timezone;
                    return Ok(());
                }
            }
        }

        repo.status = RepoStatus::Active;
        repo.renamed_to = None;
        log::info!(target: LOG_TARGET, "Tracking repository '{}'", repo.id);
        self.repos.push(repo);
        Ok(())
    }

    /// Record that `old` is now known as `new`.
    ///
    /// The old entry is kept with status `renamed` so that history recorded under its id
    /// stays attributable; the new entry inherits its analytics settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `old` is not an active entry or `new` is already present.
    pub fn rename(&mut self, old: &RepoId, new: RepoId, today: NaiveDate) -> Result<()> {
        if self.get(&new).is_some() {
            bail!("cannot rename '{old}' to '{new}': '{new}' is already in the registry");
        }

        let entry = self
            .repos
            .iter_mut()
            .find(|r| &r.id == old)
            .ok_or_else(|| app_err!("repository '{old}' is not in the registry"))?;

        if !entry.is_active() {
            bail!("repository '{old}' is {} and cannot be renamed", entry.status);
        }

        entry.status = RepoStatus::Renamed;
        entry.renamed_to = Some(new.clone());

        let mut successor = Repository::new(new, entry.reporting_timezone.clone(), today);
        successor.docs_analytics_property_id.clone_from(&entry.docs_analytics_property_id);
        successor.docs_url.clone_from(&entry.docs_url);

        log::info!(target: LOG_TARGET, "Renamed repository '{old}' to '{}'", successor.id);
        self.repos.push(successor);
        Ok(())
    }

    /// Stop fetching a repository while keeping its history.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository is not an active entry.
    pub fn remove(&mut self, id: &RepoId) -> Result<()> {
        let entry = self
            .repos
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| app_err!("repository '{id}' is not in the registry"))?;

        if !entry.is_active() {
            bail!("repository '{id}' is already {}", entry.status);
        }

        entry.status = RepoStatus::Removed;
        log::info!(target: LOG_TARGET, "Removed repository '{id}' from future fetches");
        Ok(())
    }

    /// Check the registry's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let _ = resolve_timezone(&self.defaults.reporting_timezone).map_err(|e| e.enrich("in registry defaults"))?;

        let mut seen = HashSet::new();
        for repo in &self.repos {
            if !seen.insert(&repo.id) {
                bail!("repository '{}' appears more than once in the registry", repo.id);
            }

            let _ = resolve_timezone(&repo.reporting_timezone).map_err(|e| e.enrich_with(|| format!("in registry entry '{}'", repo.id)))?;
        }

        for repo in &self.repos {
            match (repo.status, &repo.renamed_to) {
                (RepoStatus::Renamed, None) => bail!("repository '{}' is marked renamed but has no 'renamed_to'", repo.id),
                (RepoStatus::Renamed, Some(target)) if self.get(target).is_none() => {
                    bail!("repository '{}' is renamed to '{target}', which is not in the registry", repo.id)
                }
                (RepoStatus::Active | RepoStatus::Removed, Some(target)) => {
                    bail!("repository '{}' has 'renamed_to: {target}' but status {}", repo.id, repo.status)
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn resolve_entry(defaults: &RegistryDefaults, entry: RegistryEntry) -> Result<Repository> {
    let id = match (entry.id, entry.name) {
        (Some(id), None) => id,
        (None, Some(name)) => {
            let owner = entry
                .owner
                .as_deref()
                .or(defaults.owner.as_deref())
                .ok_or_else(|| app_err!("entry '{name}' has no owner and the registry defines no default owner"))?;
            RepoId::from_parts(owner, &name)?
        }
        (Some(id), Some(_)) => bail!("entry '{id}' sets both 'id' and 'name'"),
        (None, None) => bail!("entry has neither 'id' nor 'name'"),
    };

    Ok(Repository {
        slug: entry.slug.unwrap_or_else(|| id.name().to_string()),
        id,
        docs_analytics_property_id: entry.docs_analytics_property_id,
        docs_url: entry.docs_url,
        reporting_timezone: entry.reporting_timezone.unwrap_or_else(|| defaults.reporting_timezone.clone()),
        status: entry.status,
        renamed_to: entry.renamed_to,
        added_at: entry.added_at,
    })
}
