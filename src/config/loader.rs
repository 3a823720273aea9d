// Configuration loader
// Loads ~/.saturn/config.toml (or an explicit path) and applies environment overrides

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

/// Default location of the configuration file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".saturn").join("config.toml"))
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, `~/.saturn/config.toml` is used
/// when present and built-in defaults otherwise. `SATURN_BIND` and
/// `SATURN_SERVICE_TYPE` override the file.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => read_config_file(&path)?,
            _ => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(bind) = lookup("SATURN_BIND").filter(|v| !v.is_empty()) {
        config.server.bind_address = bind;
    }
    if let Some(service_type) = lookup("SATURN_SERVICE_TYPE").filter(|v| !v.is_empty()) {
        config.discovery.service_type = service_type;
    }
}
