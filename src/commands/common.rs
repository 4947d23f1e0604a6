//! Processing shared between the subcommands.

use super::Host;
use super::config::Config;
use crate::Result;
use crate::ledger::LedgerStore;
use crate::pipeline::RunSummary;
use crate::registry::{RepoId, Registry};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, ValueEnum};
use ohno::bail;
use std::io::Write;

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if the output is a terminal, otherwise don't use colors
    Auto,
}

impl ColorMode {
    #[must_use]
    pub fn use_colors(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => {
                use std::io::{IsTerminal, stdout};
                stdout().is_terminal()
            }
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Arguments accepted by every subcommand
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to configuration file (default is `ghtally.toml`)
    #[arg(long, short = 'c', value_name = "PATH", global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,
}

/// Initialize logger based on log level
pub fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    // a second run in the same process keeps the first logger
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .try_init();
}

/// clap parser for `owner/name` arguments
pub fn parse_repo_id(text: &str) -> core::result::Result<RepoId, String> {
    RepoId::parse(text).map_err(|e| e.to_string())
}

/// Configuration and registry resolved for a command
#[derive(Debug)]
pub struct Workspace {
    pub config: Config,
    pub registry: Registry,
}

impl Workspace {
    /// Load the configuration, then the registry it points at.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be loaded or is invalid.
    pub fn load(args: &CommonArgs) -> Result<Self> {
        let config = load_config(args)?;
        let registry = Registry::load(&config.registry_path)?;
        registry.validate()?;
        Ok(Self { config, registry })
    }

    #[must_use]
    pub fn store(&self) -> LedgerStore {
        LedgerStore::new(&self.config.ledger_path)
    }

    /// The registry entries named on the command line, or every active one when none are.
    ///
    /// # Errors
    ///
    /// Returns an error if a named repository is not an active registry entry.
    pub fn select(&self, ids: &[RepoId]) -> Result<Vec<RepoId>> {
        if ids.is_empty() {
            return Ok(self.registry.active().map(|r| r.id.clone()).collect());
        }

        for id in ids {
            match self.registry.get(id) {
                Some(repo) if repo.is_active() => {}
                Some(repo) => bail!("repository '{id}' is {} and is no longer tracked", repo.status),
                None => bail!("repository '{id}' is not in the registry"),
            }
        }

        Ok(ids.to_vec())
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be loaded.
pub fn load_config(args: &CommonArgs) -> Result<Config> {
    Config::load(Utf8Path::new("."), args.config.as_ref())
}

/// Print what a run did, and escalate rejected observations to a failing exit status.
///
/// Called after the ledger has been committed.
///
/// # Errors
///
/// Returns an error if any observation was rejected.
pub fn finish_run<H: Host>(host: &mut H, summary: &RunSummary) -> Result<()> {
    let merge = &summary.merge;
    {
        let mut out = host.output();
        let _ = writeln!(out, "Repositories processed: {}", summary.repositories);
        let _ = writeln!(out, "Records created:        {}", merge.created);
        let _ = writeln!(out, "Records revised:        {}", merge.revised);
        let _ = writeln!(out, "Late revisions:         {}", merge.late_revisions);
        let _ = writeln!(out, "Records finalized:      {}", summary.promoted);
        let _ = writeln!(out, "Anomalies raised:       {}", summary.anomalies_raised());
        let _ = writeln!(out, "Sources skipped:        {}", summary.skipped.len());
        let _ = writeln!(out, "Observations rejected:  {}", summary.rejected.len());
    }

    if !summary.skipped.is_empty() {
        let mut err = host.error();
        let _ = writeln!(err, "\nSkipped {} source(s)", summary.skipped.len());
        for skipped in &summary.skipped {
            let _ = writeln!(err, "  {skipped}");
        }
    }

    if summary.rejected.is_empty() {
        return Ok(());
    }

    {
        let mut err = host.error();
        let _ = writeln!(err, "\nRejected {} malformed observation(s)", summary.rejected.len());
        for rejected in &summary.rejected {
            let _ = writeln!(err, "  ❌ {rejected}");
        }
    }

    host.exit(1);
    bail!("{} observation(s) were rejected", summary.rejected.len())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::commands::host::TestHost;
    use crate::observations::{MalformedObservation, Problem};

    #[test]
    fn test_parse_repo_id_reports_the_problem() {
        assert_eq!(parse_repo_id("octo/widget").unwrap().as_str(), "octo/widget");
        let err = parse_repo_id("widget").unwrap_err();
        assert!(err.contains("owner/name"), "{err}");
    }

    #[test]
    fn test_clean_run_exits_normally() {
        let mut host = TestHost::new();
        finish_run(&mut host, &RunSummary::default()).unwrap();

        assert!(host.output_str().contains("Observations rejected:  0"));
        assert!(host.error_buf.is_empty());
        assert_eq!(host.exit_code, None);
    }

    #[test]
    fn test_rejections_fail_the_run() {
        let mut host = TestHost::new();
        let summary = RunSummary {
            rejected: vec![MalformedObservation::new(
                RepoId::parse("octo/widget").unwrap(),
                "counters",
                Problem::MissingField("stars"),
            )],
            ..RunSummary::default()
        };

        assert!(finish_run(&mut host, &summary).is_err());
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().contains("octo/widget"), "{}", host.error_str());
    }
}
