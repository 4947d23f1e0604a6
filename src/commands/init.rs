use super::Host;
use super::config::{Config, DEFAULT_CONFIG_FILE};
use crate::Result;
use crate::registry::{Registry, RegistryDefaults};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ohno::bail;
use std::io::Write;

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output configuration file path
    #[arg(value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub output: Utf8PathBuf,

    /// Also create an empty registry file at this path
    #[arg(long, value_name = "PATH")]
    pub registry: Option<Utf8PathBuf>,

    /// Default owner recorded in the new registry
    #[arg(long, value_name = "OWNER", requires = "registry")]
    pub owner: Option<String>,

    /// Overwrite files that already exist
    #[arg(long)]
    pub force: bool,
}

pub fn init_config<H: Host>(host: &mut H, args: &InitArgs) -> Result<()> {
    refuse_overwrite(&args.output, args.force)?;
    if let Some(path) = &args.registry {
        refuse_overwrite(path, args.force)?;
    }

    Config::save_default(&args.output)?;
    let _ = writeln!(host.output(), "Generated default configuration file: {}", args.output);

    if let Some(path) = &args.registry {
        let registry = Registry::new(RegistryDefaults {
            owner: args.owner.clone(),
            ..RegistryDefaults::default()
        });
        registry.save(path)?;
        let _ = writeln!(host.output(), "Generated empty registry file: {path}");
    }

    Ok(())
}

fn refuse_overwrite(path: &Utf8Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("'{path}' already exists, pass --force to overwrite it");
    }

    Ok(())
}
