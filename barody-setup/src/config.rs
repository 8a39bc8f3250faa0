// Runtime configuration
//
// Layering: built-in defaults, then an optional TOML file, then `BARODY_*` environment variables.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "barody.toml";
pub const ENV_PREFIX: &str = "BARODY";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bind_address: String,
    pub public_url: String,
    pub database_url: String,
    pub installation_record_path: PathBuf,
    pub setup_config_path: PathBuf,
    pub debug: bool,
    pub skip_installation_check: bool,
    pub token_expiry_hours: i64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub session_cookie: String,
}

impl Settings {
    /// Load settings. `path` is required to exist only when given explicitly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let settings: Settings = Self::builder()?
            .add_source(File::from(file.as_path()).format(FileFormat::Toml).required(required))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to load configuration from {:?}", file))?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Defaults only; used by tests and as the base layer of `load`.
    pub fn defaults() -> Result<Self> {
        let settings: Settings = Self::builder()?
            .build()
            .context("Failed to build default configuration")?
            .try_deserialize()
            .context("Invalid default configuration")?;
        Ok(settings)
    }

    /// Defaults with both state files placed under `dir`.
    pub fn rooted_at(dir: &Path) -> Result<Self> {
        let mut settings = Self::defaults()?;
        settings.installation_record_path = dir.join(".installation");
        settings.setup_config_path = dir.join(".setup_config.json");
        Ok(settings)
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            .set_default("bind_address", "127.0.0.1:8000")?
            .set_default("public_url", "http://localhost:8000")?
            .set_default("database_url", "sqlite://barody.db?mode=rwc")?
            .set_default("installation_record_path", ".installation")?
            .set_default("setup_config_path", ".setup_config.json")?
            .set_default("debug", false)?
            .set_default("skip_installation_check", false)?
            .set_default("token_expiry_hours", 24_i64)?
            .set_default("session_cookie", "barody_session")?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_expiry_hours <= 0 {
            anyhow::bail!(
                "token_expiry_hours must be positive (got {})",
                self.token_expiry_hours
            );
        }
        self.socket_addr()?;
        url::Url::parse(&self.public_url)
            .with_context(|| format!("public_url is not a valid URL: {}", self.public_url))?;
        crate::database::connection::ensure_sqlite_url(&self.database_url)
            .context("database_url is invalid")?;
        if self.session_cookie.trim().is_empty() {
            anyhow::bail!("session_cookie must not be empty");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address
            .parse()
            .with_context(|| format!("bind_address is not a socket address: {}", self.bind_address))
    }
}
