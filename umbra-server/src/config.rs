//! Server configuration loading.
//!
//! Order: built-in defaults, then the optional TOML file, then `UMBRA_BIND`.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use umbra_collab::ServerConfig;

/// Overrides `bind_addr` when set.
pub const BIND_ENV: &str = "UMBRA_BIND";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load the configuration. Without a path the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let config = parse_config(&raw, path)?;
            log::info!("Loaded config {}", path.display());
            config
        }
        None => {
            log::debug!("No config file given; using defaults");
            ServerConfig::default()
        }
    };
    Ok(with_bind_override(config, std::env::var(BIND_ENV).ok()))
}

fn parse_config(raw: &str, path: &Path) -> Result<ServerConfig, ConfigError> {
    toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn with_bind_override(mut config: ServerConfig, bind: Option<String>) -> ServerConfig {
    if let Some(bind) = bind.filter(|b| !b.trim().is_empty()) {
        log::info!("{BIND_ENV} overrides bind address with {bind}");
        config.bind_addr = bind;
    }
    config
}
