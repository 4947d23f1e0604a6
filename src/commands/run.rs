//! Command dispatch logic for ghtally

use super::common::{CommonArgs, init_logging};
use super::{
    CollectArgs, IngestArgs, InitArgs, ReportArgs, ReposArgs, ResolveArgs, ShowArgs, init_config, process_collect, process_ingest,
    process_report, process_repos, process_resolve, process_show, validate_config,
};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "ghtally", version, about, author)]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every source for the tracked repositories and merge the results into the ledger
    Collect(Box<CollectArgs>),
    /// Merge saved payload files into the ledger
    Ingest(IngestArgs),
    /// Show recent totals and open anomalies per repository
    Show(ShowArgs),
    /// Export daily rows as CSV or JSON
    Report(ReportArgs),
    /// Manage the repository registry
    Repos(ReposArgs),
    /// Replace values of a record under review
    Resolve(ResolveArgs),
    /// Generate a default configuration file
    Init(InitArgs),
    /// Validate the configuration and registry files
    Validate,
}

/// Dispatch command-line arguments to the appropriate handler
///
/// This function parses the command-line arguments and executes the corresponding
/// subcommand. It's designed to be called from main.rs with the program arguments.
///
/// # Arguments
///
/// * `args` - An iterator of command-line arguments (typically from `std::env::args()`)
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.common.log_level);

    let common = &cli.common;
    match &cli.command {
        Command::Collect(collect_args) => process_collect(host, common, collect_args).await,
        Command::Ingest(ingest_args) => process_ingest(host, common, ingest_args).await,
        Command::Show(show_args) => process_show(host, common, show_args),
        Command::Report(report_args) => process_report(host, common, report_args),
        Command::Repos(repos_args) => process_repos(host, common, repos_args),
        Command::Resolve(resolve_args) => process_resolve(host, common, resolve_args).await,
        Command::Init(init_args) => init_config(host, init_args),
        Command::Validate => validate_config(host, common),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["ghtally", "show", "--days", "7", "-c", "x.toml", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.common.config.as_deref().map(camino::Utf8Path::as_str), Some("x.toml"));
        assert_eq!(cli.common.log_level, super::super::common::LogLevel::Debug);
        assert!(matches!(cli.command, Command::Show(ShowArgs { days: 7, .. })));
    }

    #[test]
    fn test_resolve_arguments() {
        let cli = Cli::try_parse_from([
            "ghtally",
            "resolve",
            "octo/widget",
            "2024-01-05",
            "--source",
            "traffic_views",
            "unique_views=12",
        ])
        .unwrap();

        let Command::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.repository.as_str(), "octo/widget");
        assert_eq!(args.source, crate::observations::Source::TrafficViews);
        assert_eq!(args.values, [(crate::observations::MetricName::UniqueViews, 12)]);
    }
}
