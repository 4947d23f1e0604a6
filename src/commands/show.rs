use super::Host;
use super::common::{ColorMode, CommonArgs, Workspace, parse_repo_id};
use crate::Result;
use crate::registry::RepoId;
use crate::reports::{generate_console, totals};
use chrono::{Days, NaiveDate, Utc};
use clap::Parser;
use ohno::{app_err, bail};
use std::io::Write;

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Number of trailing days to total
    #[arg(long, value_name = "DAYS", default_value_t = 14)]
    pub days: u32,

    /// Last day of the span (defaults to today, UTC)
    #[arg(long, value_name = "DATE")]
    pub until: Option<NaiveDate>,

    /// Only show these repositories (defaults to every active registry entry)
    #[arg(long = "repo", value_name = "OWNER/NAME", value_parser = parse_repo_id)]
    pub repos: Vec<RepoId>,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto")]
    pub color: ColorMode,
}

/// Print per-repository totals and open anomalies
pub fn process_show<H: Host>(host: &mut H, common: &CommonArgs, args: &ShowArgs) -> Result<()> {
    if args.days == 0 {
        bail!("--days must be at least 1");
    }

    let workspace = Workspace::load(common)?;
    let repos = workspace.select(&args.repos)?;
    let ledger = workspace.store().load()?;

    let until = args.until.unwrap_or_else(|| Utc::now().date_naive());
    let since = until
        .checked_sub_days(Days::new(u64::from(args.days - 1)))
        .ok_or_else(|| app_err!("--days {} reaches before the earliest representable date", args.days))?;
    let dates = since..=until;

    let mut out = String::new();
    generate_console(&totals(&ledger, &repos, &dates), &dates, args.color.use_colors(), &mut out)?;
    let _ = write!(host.output(), "{out}");
    Ok(())
}
