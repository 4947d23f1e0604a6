use super::Host;
use super::common::{CommonArgs, load_config};
use crate::Result;
use crate::registry::Registry;
use std::io::Write;

/// Validates the configuration file and the registry it points at
///
/// # Errors
///
/// Returns an error if either file cannot be loaded, parsed or fails validation
fn validate_inner(common: &CommonArgs) -> Result<Registry> {
    let config = load_config(common)?;
    let registry = Registry::load(&config.registry_path)?;
    registry.validate()?;
    Ok(registry)
}

pub fn validate_config<H: Host>(host: &mut H, common: &CommonArgs) -> Result<()> {
    match validate_inner(common) {
        Ok(registry) => {
            let _ = writeln!(host.output(), "Configuration file is valid");
            if let Some(path) = &common.config {
                let _ = writeln!(host.output(), "Config file: {path}");
            } else {
                let _ = writeln!(host.output(), "Using default configuration (no config file given)");
            }

            let active = registry.active().count();
            let _ = writeln!(
                host.output(),
                "Registry is valid: {} entries, {active} active",
                registry.all().len()
            );
            Ok(())
        }
        Err(e) => {
            let _ = writeln!(host.error(), "❌ Configuration validation failed: {e}");
            host.exit(1);
            Err(e)
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::commands::common::LogLevel;
    use crate::commands::host::TestHost;
    use crate::commands::init::{InitArgs, init_config};
    use camino::Utf8PathBuf;
    use std::fs;

    fn common(config: Utf8PathBuf) -> CommonArgs {
        CommonArgs {
            config: Some(config),
            log_level: LogLevel::None,
        }
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        (tmp, dir)
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_initialized_files_are_valid() {
        let (_tmp, dir) = scratch();
        let config_path = dir.join("ghtally.toml");
        let registry_path = dir.join("repos.yaml");

        let mut init_host = TestHost::new();
        init_config(
            &mut init_host,
            &InitArgs {
                output: config_path.clone(),
                registry: Some(registry_path.clone()),
                owner: Some("octo".to_string()),
                force: false,
            },
        )
        .unwrap();

        // point the generated config at the generated registry
        let text = fs::read_to_string(&config_path).unwrap();
        fs::write(&config_path, text.replace("registry_path = \"repos.yaml\"", &format!("registry_path = \"{registry_path}\""))).unwrap();

        let mut host = TestHost::new();
        validate_config(&mut host, &common(config_path)).unwrap();
        assert!(host.output_str().contains("Configuration file is valid"));
        assert!(host.output_str().contains("0 entries, 0 active"));
        assert_eq!(host.exit_code, None);
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_init_refuses_to_overwrite() {
        let (_tmp, dir) = scratch();
        let config_path = dir.join("ghtally.toml");
        fs::write(&config_path, "# mine\n").unwrap();

        let mut host = TestHost::new();
        let args = InitArgs {
            output: config_path.clone(),
            registry: None,
            owner: None,
            force: false,
        };
        assert!(init_config(&mut host, &args).is_err());
        assert_eq!(fs::read_to_string(&config_path).unwrap(), "# mine\n");

        init_config(&mut host, &InitArgs { force: true, ..args }).unwrap();
        assert!(fs::read_to_string(&config_path).unwrap().contains("[finalization]"));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_invalid_toml_syntax() {
        let (_tmp, dir) = scratch();
        let config_path = dir.join("invalid_syntax.toml");
        fs::write(&config_path, "[fetch\nconcurrency = 2\n").unwrap();

        let mut host = TestHost::new();
        let result = validate_config(&mut host, &common(config_path));

        assert!(result.is_err(), "Invalid TOML syntax should fail validation");
        assert_eq!(host.exit_code, Some(1));
        assert!(host.error_str().starts_with("❌ Configuration validation failed"));
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_unknown_field() {
        let (_tmp, dir) = scratch();
        let config_path = dir.join("unknown_field.toml");
        fs::write(&config_path, "unknown_field = \"value\"\n").unwrap();

        let mut host = TestHost::new();
        assert!(validate_config(&mut host, &common(config_path)).is_err());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_missing_registry() {
        let (_tmp, dir) = scratch();
        let config_path = dir.join("ghtally.toml");
        fs::write(&config_path, format!("registry_path = \"{}\"\n", dir.join("absent.yaml"))).unwrap();

        let mut host = TestHost::new();
        assert!(validate_config(&mut host, &common(config_path)).is_err());
        assert!(host.error_str().contains("absent.yaml"), "{}", host.error_str());
    }

    #[test]
    #[cfg_attr(miri, ignore = "Miri cannot call GetTempPathW")]
    fn test_registry_with_bad_timezone() {
        let (_tmp, dir) = scratch();
        let registry_path = dir.join("repos.yaml");
        fs::write(&registry_path, "repos:\n  - id: octo/widget\n    reporting_timezone: Mars/Olympus\n").unwrap();
        let config_path = dir.join("ghtally.toml");
        fs::write(&config_path, format!("registry_path = \"{registry_path}\"\n")).unwrap();

        let mut host = TestHost::new();
        assert!(validate_config(&mut host, &common(config_path)).is_err());
    }
}
