use super::Host;
use super::common::{CommonArgs, Workspace, finish_run, parse_repo_id};
use super::ingest::save_envelopes;
use crate::Result;
use crate::pipeline::Batch;
use crate::registry::RepoId;
use crate::sources::{ANALYTICS_API_BASE, AnalyticsClient, Collector, GITHUB_API_BASE, GitHubClient, ServiceAccountKey};
use camino::Utf8PathBuf;
use chrono::Utc;
use clap::Parser;
use std::io::Write;

const LOG_TARGET: &str = "   collect";

#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// GitHub personal access token with push access to the tracked repositories
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Service-account key file for the docs analytics API
    #[arg(long, value_name = "PATH", env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub google_credentials: Option<Utf8PathBuf>,

    /// Only fetch these repositories (defaults to every active registry entry)
    #[arg(long = "repo", value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub repos: Vec<RepoId>,

    /// Also write the fetched payloads to a file that `ingest` accepts
    #[arg(long, value_name = "PATH")]
    pub save_payloads: Option<Utf8PathBuf>,

    /// Fetch and reconcile as usual, report what would change, but leave the ledger untouched
    #[arg(long)]
    pub dry_run: bool,
}

/// Fetch every source of the selected repositories and merge the results into the ledger
pub async fn process_collect<H: Host>(host: &mut H, common: &CommonArgs, args: &CollectArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let config = &workspace.config;
    let selected = workspace.select(&args.repos)?;

    let retry = config.fetch.retry_policy();
    let github = GitHubClient::new(
        args.github_token.as_deref(),
        config.github_api_base.as_deref().unwrap_or(GITHUB_API_BASE),
        retry,
    )?;

    let analytics = match &args.google_credentials {
        Some(path) => Some(AnalyticsClient::new(
            ServiceAccountKey::load(path)?,
            config.analytics_api_base.as_deref().unwrap_or(ANALYTICS_API_BASE),
            retry,
            config.fetch.analytics_window_days,
        )?),
        None => None,
    };

    let collector = Collector::new(github, analytics, config.fetch.concurrency);

    // hold the run lock across the fetch so two runs never interleave
    let mut batch = Batch::open(workspace.store()).await?;

    let repos = selected.iter().filter_map(|id| workspace.registry.get(id));
    let collection = collector.collect(repos, Utc::now()).await;

    if let Some(path) = &args.save_payloads {
        save_envelopes(path, &collection.envelopes)?;
    }

    let mut summary = batch.apply(&workspace.registry, &config.finalization, &collection.envelopes);
    summary.skipped = collection.skipped;

    if args.dry_run {
        log::info!(target: LOG_TARGET, "Dry run, not committing {}", config.ledger_path);
        drop(batch);
        let _ = writeln!(host.output(), "Dry run: the ledger was not modified");
    } else {
        batch.commit()?;
    }

    finish_run(host, &summary)
}
