//! `examguard config`: inspect configuration files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use examguard_core::ProctorConfig;

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate a configuration file
    Check {
        /// File to check (defaults to the global --config)
        path: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Defaults,
}

/// Runs a config subcommand.
pub fn run(command: &ConfigCommand, global: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Check { path } => {
            let Some(path) = path.as_deref().or(global) else {
                anyhow::bail!("no configuration file given (pass a path or --config)");
            };
            let config = check(path)?;
            println!(
                "{}: ok (max_warnings = {}, snapshot every {}s, api {})",
                path.display(),
                config.monitor.max_warnings,
                config.monitor.snapshot_interval_secs,
                config.api.base_url
            );
            Ok(())
        },
        ConfigCommand::Defaults => {
            print!("{}", defaults()?);
            Ok(())
        },
    }
}

fn check(path: &Path) -> Result<ProctorConfig> {
    ProctorConfig::from_file(path).with_context(|| format!("{} is not valid", path.display()))
}

fn defaults() -> Result<String> {
    ProctorConfig::default()
        .to_toml()
        .context("failed to render default configuration")
}

/// Loads `path`, or the defaults when no file was given.
pub fn load(path: Option<&Path>) -> Result<ProctorConfig> {
    match path {
        Some(path) => ProctorConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(ProctorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use examguard_core::config::ConfigError;

    use super::*;

    #[test]
    fn test_defaults_parse_back() {
        let rendered = defaults().unwrap();
        let parsed = ProctorConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed, ProctorConfig::default());
    }

    #[test]
    fn test_check_reports_bad_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\nmax_warnings = 0").unwrap();

        let err = check(file.path()).unwrap_err();

        assert!(format!("{err:#}").contains("max_warnings"));
    }

    #[test]
    fn test_check_surfaces_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[monitor]\nmax_warnings = 0").unwrap();

        let err = check(file.path()).unwrap_err();

        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::Validation(message)) => assert!(message.contains("max_warnings")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        assert_eq!(load(None).unwrap(), ProctorConfig::default());
    }

    #[test]
    fn test_check_requires_a_path() {
        let err = run(&ConfigCommand::Check { path: None }, None).unwrap_err();
        assert!(err.to_string().contains("no configuration file"));
    }
}
