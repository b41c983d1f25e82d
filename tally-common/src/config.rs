//! Configuration loading and resolution
//!
//! Every setting resolves through the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable carrying the ledger API credential.
pub const API_KEY_ENV: &str = "TALLY_API_KEY";

/// Environment variable overriding the database file location.
pub const DATABASE_ENV: &str = "TALLY_DATABASE";

/// Environment variable overriding the mirror output directory.
pub const EXPORT_DIR_ENV: &str = "TALLY_EXPORT_DIR";

/// Default remote ledger API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.alegra.com/api/v1";

/// Optional TOML config file (`~/.config/tally/config.toml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub database: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
}

impl TomlConfig {
    /// Load the config file if present. An absent file is not an error;
    /// an unreadable or malformed one degrades to defaults with a warning.
    pub fn load() -> Self {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Resolve the API credential: environment first, then TOML.
///
/// A missing credential is a hard configuration error; the engine cannot
/// make a single request without it.
pub fn resolve_api_key(toml: &TomlConfig) -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }

    if let Some(key) = &toml.api_key {
        if !key.trim().is_empty() {
            return Ok(key.clone());
        }
    }

    Err(Error::Config(format!(
        "Ledger API key not configured. Set {} or add api_key to {}",
        API_KEY_ENV,
        config_file_path()
            .unwrap_or_else(|| PathBuf::from("~/.config/tally/config.toml"))
            .display()
    )))
}

/// Resolve the database file path: CLI, env, TOML, then the OS data dir.
pub fn resolve_database_path(cli: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(DATABASE_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = &toml.database {
        return path.clone();
    }
    default_data_dir().join("tally.db")
}

/// Resolve the directory the CSV mirrors are written into.
pub fn resolve_export_dir(cli: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(EXPORT_DIR_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = &toml.export_dir {
        return path.clone();
    }
    default_data_dir()
}

fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tally").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tally"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_from_toml() {
        let toml = TomlConfig {
            api_key: Some("c2VjcmV0".to_string()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&toml).unwrap(), "c2VjcmV0");
    }

    #[test]
    fn blank_api_key_is_rejected() {
        let toml = TomlConfig {
            api_key: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(resolve_api_key(&toml).is_err());
    }

    #[test]
    fn cli_path_wins_over_toml() {
        let toml = TomlConfig {
            database: Some(PathBuf::from("/from/toml/tally.db")),
            ..Default::default()
        };
        let cli = PathBuf::from("/from/cli/tally.db");
        assert_eq!(resolve_database_path(Some(&cli), &toml), cli);
    }

    #[test]
    fn toml_parse_failure_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_key = [not toml").unwrap();
        let config = TomlConfig::load_from(&path);
        assert!(config.api_key.is_none());
    }
}
