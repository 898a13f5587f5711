//! Server configuration.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use subcal_core::CalendarMeta;

const DEFAULT_PORT: u16 = 4096;
const DEFAULT_LOG_FILTER: &str = "info,subcal_core=info,tower_http=info";

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_product_name() -> String {
    CalendarMeta::default().product_name
}

fn default_calendar_name() -> String {
    CalendarMeta::default().calendar_name
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

/// Configuration at ~/.config/subcal/config.toml (or `$SUBCAL_CONFIG`),
/// overridable with `SUBCAL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database; defaults to the platform data directory
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_product_name")]
    pub product_name: String,

    #[serde(default = "default_calendar_name")]
    pub calendar_name: String,

    /// `EnvFilter` directives, used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path, Environment::with_prefix("SUBCAL").try_parsing(true))
    }

    fn load_from(path: &Path, env: Environment) -> Result<Self> {
        let config: ServerConfig = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(env)
            .build()
            .with_context(|| format!("Could not load config from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os("SUBCAL_CONFIG") {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("subcal");

        Ok(config_dir.join("config.toml"))
    }

    /// Database location with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(path) => {
                PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
            }
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("subcal")
                .join("subcal.db"),
        }
    }

    pub fn calendar_meta(&self) -> CalendarMeta {
        CalendarMeta {
            product_name: self.product_name.clone(),
            calendar_name: self.calendar_name.clone(),
        }
    }
}
