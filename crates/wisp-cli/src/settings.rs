//! Layered client settings.
//!
//! Precedence, lowest first: built-in defaults, the optional config file,
//! `WISP_*` environment variables, command-line flags. Nested keys use a
//! double underscore in the environment, e.g. `WISP_STORAGE__MODE=disk`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::path::Path;
use wisp_git::ClientConfig;

/// Loads the client configuration from an optional file and the environment.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    load_with_env(path, Environment::with_prefix("WISP"))
}

fn load_with_env(path: Option<&Path>, env: Environment) -> Result<ClientConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        env.prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build().context("failed to read configuration")?;
    let config: ClientConfig = settings
        .try_deserialize()
        .context("invalid configuration")?;

    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use wisp_storage::StorageMode;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Environment::with_prefix("WISP").source(Some(source))
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = load_with_env(None, env(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "batch_size = 20\nmax_retries = 5\n\n[storage]\nmode = \"memory\"\nthreshold = 50"
        )
        .unwrap();

        let config = load_with_env(
            Some(file.path()),
            env(&[("WISP_MAX_RETRIES", "7"), ("WISP_STORAGE__MODE", "disk")]),
        )
        .unwrap();

        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.max_batches, 1000);
        assert_eq!(config.storage.mode, StorageMode::Disk);
        assert_eq!(config.storage.threshold, 50);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_with_env(Some(&missing), env(&[])).is_err());
    }
}
