use super::Host;
use super::common::{CommonArgs, load_config, parse_repo_id};
use crate::Result;
use crate::ledger::LedgerStore;
use crate::registry::RepoId;
use crate::reports::{RowFilter, generate_csv, generate_json, project};
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use clap::Parser;
use ohno::bail;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Write the daily rows to a CSV file
    #[arg(long, value_name = "PATH", help_heading = "Report Output")]
    pub csv: Option<Utf8PathBuf>,

    /// Write the daily rows to a JSON file
    #[arg(long, value_name = "PATH", help_heading = "Report Output")]
    pub json: Option<Utf8PathBuf>,

    /// Only report these repositories
    #[arg(long = "repo", value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub repos: Vec<RepoId>,

    /// First day to report
    #[arg(long, value_name = "DATE")]
    pub since: Option<NaiveDate>,

    /// Last day to report
    #[arg(long, value_name = "DATE")]
    pub until: Option<NaiveDate>,
}

/// Export one row per repository and day. With no output file, CSV goes to standard output.
pub fn process_report<H: Host>(host: &mut H, common: &CommonArgs, args: &ReportArgs) -> Result<()> {
    let config = load_config(common)?;

    let since = args.since.unwrap_or(NaiveDate::MIN);
    let until = args.until.unwrap_or(NaiveDate::MAX);
    if since > until {
        bail!("--since {since} is after --until {until}");
    }

    let filter = RowFilter {
        repositories: (!args.repos.is_empty()).then(|| args.repos.iter().cloned().collect::<BTreeSet<_>>()),
        dates: Some(since..=until),
    };

    let ledger = LedgerStore::new(&config.ledger_path).load()?;
    let rows = project(&ledger, &config.finalization, config.estimator_lookback_days, &filter);

    if let Some(filename) = &args.csv {
        let mut csv_output = String::new();
        generate_csv(&rows, &mut csv_output)?;
        fs::write(filename, csv_output)?;
    }

    if let Some(filename) = &args.json {
        let mut json_output = String::new();
        generate_json(&rows, &mut json_output)?;
        fs::write(filename, json_output)?;
    }

    if args.csv.is_none() && args.json.is_none() {
        let mut csv_output = String::new();
        generate_csv(&rows, &mut csv_output)?;
        let _ = write!(host.output(), "{csv_output}");
    }

    Ok(())
}
