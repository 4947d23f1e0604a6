use crate::Result;
use crate::ledger::{FinalizationPolicy, SourceWindow};
use crate::observations::Source;
use crate::sources::RetryPolicy;
use camino::{Utf8Path, Utf8PathBuf};
use core::time::Duration;
use ohno::{IntoAppError, app_err};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

/// The default configuration TOML content, embedded from `default_config.toml`
pub const DEFAULT_CONFIG_TOML: &str = include_str!("../../default_config.toml");

/// Name of the configuration file looked up when none is given
pub const DEFAULT_CONFIG_FILE: &str = "ghtally.toml";

/// Longest analytics window the collector will request.
const MAX_ANALYTICS_WINDOW_DAYS: u32 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The committed ledger file
    #[serde(default = "default_ledger_path")]
    pub ledger_path: Utf8PathBuf,

    /// The repository registry file
    #[serde(default = "default_registry_path")]
    pub registry_path: Utf8PathBuf,

    /// Days of history the new/returning estimate computes its overlap ratio over
    #[serde(default = "default_estimator_lookback_days")]
    pub estimator_lookback_days: u32,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default = "default_finalization")]
    pub finalization: FinalizationPolicy,

    /// Override of the GitHub API root, for GitHub Enterprise or test servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_api_base: Option<String>,

    /// Override of the analytics API root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_api_base: Option<String>,
}

/// Bounds on the network side of a collect run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_secs: u64,
    pub concurrency: usize,
    pub analytics_window_days: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_retry_delay_secs: 60,
            concurrency: 4,
            analytics_window_days: 3,
        }
    }
}

impl FetchConfig {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_secs(self.max_retry_delay_secs),
        }
    }
}

fn default_ledger_path() -> Utf8PathBuf {
    Utf8PathBuf::from("ledger.json")
}

fn default_registry_path() -> Utf8PathBuf {
    Utf8PathBuf::from("repos.yaml")
}

const fn default_estimator_lookback_days() -> u32 {
    28
}

fn default_finalization() -> FinalizationPolicy {
    let window = |window_days, grace_days| SourceWindow { window_days, grace_days };

    FinalizationPolicy {
        windows: BTreeMap::from([
            (Source::TrafficViews, window(14, 2)),
            (Source::TrafficClones, window(14, 2)),
            (Source::Releases, window(1, 1)),
            (Source::GaSessions, window(3, 2)),
        ]),
        default_tolerance: 2,
        tolerances: BTreeMap::new(),
        required_sources: BTreeSet::from([Source::TrafficViews, Source::TrafficClones]),
    }
}

impl Config {
    /// Load configuration from a file or use defaults
    ///
    /// With no explicit path, `ghtally.toml` in `base_dir` is used when it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load(base_dir: &Utf8Path, config_path: Option<&Utf8PathBuf>) -> Result<Self> {
        let (final_path, text) = if let Some(path) = config_path {
            let text = fs::read_to_string(path).into_app_err_with(|| format!("reading ghtally configuration file '{path}'"))?;
            (path.clone(), text)
        } else {
            let path = base_dir.join(DEFAULT_CONFIG_FILE);
            match fs::read_to_string(&path) {
                Ok(text) => (path, text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Ok(Self::default());
                }
                Err(e) => return Err(e).into_app_err_with(|| format!("reading ghtally configuration file '{path}'")),
            }
        };

        let config: Self = toml::from_str(&text).into_app_err_with(|| format!("parsing configuration file '{final_path}'"))?;
        config.validate()?;

        Ok(config)
    }

    /// Save the default configuration to a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written
    pub fn save_default(output_path: &Utf8Path) -> Result<()> {
        fs::write(output_path, DEFAULT_CONFIG_TOML).into_app_err_with(|| format!("writing default configuration to {output_path}"))?;
        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range or the finalization policy is incomplete
    fn validate(&self) -> Result<()> {
        self.finalization.validate()?;

        if self.estimator_lookback_days == 0 {
            return Err(app_err!("estimator_lookback_days must be at least 1"));
        }

        if self.fetch.timeout_secs == 0 {
            return Err(app_err!("fetch.timeout_secs must be at least 1"));
        }

        if self.fetch.concurrency == 0 {
            return Err(app_err!("fetch.concurrency must be at least 1"));
        }

        if !(1..=MAX_ANALYTICS_WINDOW_DAYS).contains(&self.fetch.analytics_window_days) {
            return Err(app_err!(
                "fetch.analytics_window_days must be between 1 and {MAX_ANALYTICS_WINDOW_DAYS}, got {}",
                self.fetch.analytics_window_days
            ));
        }

        if self.ledger_path == self.registry_path {
            return Err(app_err!("ledger_path and registry_path must be different files, both are '{}'", self.ledger_path));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML).expect("default_config.toml should be valid TOML that deserializes to Config")
    }
}
