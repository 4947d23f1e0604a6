use super::Host;
use super::common::{CommonArgs, load_config, parse_repo_id};
use crate::Result;
use crate::ledger::LedgerStore;
use crate::observations::{MetricName, Metrics, Source};
use crate::pipeline::Batch;
use crate::registry::RepoId;
use chrono::{NaiveDate, Utc};
use clap::Parser;
use core::str::FromStr;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Repository the record belongs to
    #[arg(value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub repository: RepoId,

    /// Day of the record
    #[arg(value_name = "DATE")]
    pub date: NaiveDate,

    /// Source of the record
    #[arg(long, value_name = "SOURCE")]
    pub source: Source,

    /// Values to store, as NAME=VALUE
    #[arg(value_name = "NAME=VALUE", required = true, value_parser = parse_assignment)]
    pub values: Vec<(MetricName, u64)>,
}

fn parse_assignment(text: &str) -> core::result::Result<(MetricName, u64), String> {
    let (name, value) = text.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{text}'"))?;
    let name = MetricName::from_str(name.trim()).map_err(|e| format!("unknown metric '{}': {e}", name.trim()))?;
    let value = value.trim().parse::<u64>().map_err(|e| format!("invalid value '{}': {e}", value.trim()))?;
    Ok((name, value))
}

/// Resolve an anomaly by replacing a record's values with operator-supplied ones
pub async fn process_resolve<H: Host>(host: &mut H, common: &CommonArgs, args: &ResolveArgs) -> Result<()> {
    let config = load_config(common)?;
    let metrics: Metrics = args.values.iter().copied().collect();

    let mut batch = Batch::open(LedgerStore::new(&config.ledger_path)).await?;
    let applied = batch
        .ledger_mut()
        .apply_override(&args.repository, args.date, args.source, &metrics, Utc::now())?;

    if applied == 0 {
        let _ = writeln!(host.output(), "Nothing to change for {} on {} ({})", args.repository, args.date, args.source);
        return Ok(());
    }

    batch.commit()?;
    let _ = writeln!(
        host.output(),
        "Applied {applied} override(s) to {} on {} ({})",
        args.repository,
        args.date,
        args.source
    );
    Ok(())
}
