//! Server Configuration
//!
//! This module locates and loads the configuration file.

use mqe::config::Config;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File read when neither `--config` nor `MQE_CONFIG` is given
const DEFAULT_CONFIG_FILE: &str = "mqe.toml";

/// Resolve which configuration file to read, if any
///
/// Priority:
/// 1. `--config` on the command line
/// 2. `MQE_CONFIG` environment variable
/// 3. `./mqe.toml` if it exists
fn config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var("MQE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    default.exists().then_some(default)
}

/// Load configuration from file or environment, then validate it
///
/// An explicitly named file that cannot be read is an error; without one
/// the defaults are used. Environment overrides apply in both cases.
pub fn load_config(cli_path: Option<&Path>) -> Result<Config, String> {
    let config = match config_path(cli_path) {
        Some(path) => {
            let path = path.to_string_lossy();
            debug!(path = %path, "Loading configuration file");
            Config::from_file_with_env(&path)?
        },
        None => {
            debug!("No configuration file found, using defaults");
            Config::from_env()
        },
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[query]\nfetch_limit = 7\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.query.fetch_limit, 7);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/mqe.toml"))).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[query]\nslot_limit = 1\n").unwrap();

        assert!(load_config(Some(&path)).is_err());
    }
}
