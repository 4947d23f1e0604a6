use super::Host;
use super::common::{CommonArgs, load_config, parse_repo_id};
use crate::Result;
use crate::registry::{RepoId, RepoStatus, Registry, Repository};
use camino::Utf8Path;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ReposArgs {
    #[command(subcommand)]
    pub command: ReposCommand,
}

#[derive(Subcommand, Debug)]
pub enum ReposCommand {
    /// List every registry entry, including renamed and removed ones
    List,
    /// Start tracking a repository
    Add(AddArgs),
    /// Record that a repository moved to a new owner or name
    Rename(RenameArgs),
    /// Stop fetching a repository, keeping its history
    Remove(RemoveArgs),
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    #[arg(value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub id: RepoId,

    /// Short display name (defaults to the repository name)
    #[arg(long)]
    pub slug: Option<String>,

    /// Analytics property id of the repository's documentation site
    #[arg(long, value_name = "ID")]
    pub docs_property: Option<String>,

    /// URL of the repository's documentation site
    #[arg(long, value_name = "URL")]
    pub docs_url: Option<String>,

    /// IANA timezone analytics days are bucketed in (defaults to the registry default)
    #[arg(long, value_name = "TZ")]
    pub timezone: Option<String>,
}

#[derive(Parser, Debug)]
pub struct RenameArgs {
    #[arg(value_name = "OLD", value_parser = parse_repo_id)]
    pub old: RepoId,

    #[arg(value_name = "NEW", value_parser = parse_repo_id)]
    pub new: RepoId,
}

#[derive(Parser, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub id: RepoId,
}

/// Inspect or edit the registry. Ledger history is never touched.
pub fn process_repos<H: Host>(host: &mut H, common: &CommonArgs, args: &ReposArgs) -> Result<()> {
    let config = load_config(common)?;
    let path = config.registry_path.as_path();

    if matches!(args.command, ReposCommand::List) {
        let registry = Registry::load(path)?;
        list(host, &registry);
        return Ok(());
    }

    let mut registry = load_or_empty(path)?;
    let today = Utc::now().date_naive();

    let message = match &args.command {
        ReposCommand::List => unreachable!("handled above"),
        ReposCommand::Add(add) => {
            let timezone = add.timezone.clone().unwrap_or_else(|| registry.defaults().reporting_timezone.clone());
            let mut repo = Repository::new(add.id.clone(), timezone, today);
            if let Some(slug) = &add.slug {
                repo.slug.clone_from(slug);
            }
            repo.docs_analytics_property_id.clone_from(&add.docs_property);
            repo.docs_url.clone_from(&add.docs_url);

            registry.add(repo)?;
            format!("Tracking '{}'", add.id)
        }
        ReposCommand::Rename(rename) => {
            registry.rename(&rename.old, rename.new.clone(), today)?;
            format!("Renamed '{}' to '{}'", rename.old, rename.new)
        }
        ReposCommand::Remove(remove) => {
            registry.remove(&remove.id)?;
            format!("Removed '{}' from future fetches; its history is kept", remove.id)
        }
    };

    registry.save(path)?;
    let _ = writeln!(host.output(), "{message}");
    Ok(())
}

fn load_or_empty(path: &Utf8Path) -> Result<Registry> {
    if path.exists() { Registry::load(path) } else { Ok(Registry::default()) }
}

fn list<H: Host>(host: &mut H, registry: &Registry) {
    let mut out = host.output();
    for repo in registry.all() {
        let status = match (&repo.status, &repo.renamed_to) {
            (RepoStatus::Renamed, Some(target)) => format!("renamed -> {target}"),
            (status, _) => status.to_string(),
        };

        let _ = writeln!(
            out,
            "{:<40} {:<20} {:<20} {}",
            repo.id.as_str(),
            repo.reporting_timezone,
            repo.docs_analytics_property_id.as_deref().unwrap_or("-"),
            status
        );
    }
}
