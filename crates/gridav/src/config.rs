//! Configuration file support for the `gridav` binary.
//!
//! Configuration is stored at `~/.config/gridav/config.toml` (XDG standard)
//! or `~/Library/Application Support/org.gridav.gridav/config.toml` on macOS.
//! The bridge settings of [`GridavConfig`] sit at the top level next to the
//! binary's own `[server]` and `[memory]` tables.
//!
//! # Example configuration
//!
//! ```toml
//! [grid]
//! zone = "tempZone"
//!
//! [dav]
//! exposed_root = "User"
//! mount_prefix = "/dav"
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 8080
//!
//! [memory.users]
//! alice = "secret"
//! ```

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridav_core::{GridavConfig, GridavError};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bridge settings shared with the library crates
    #[serde(flatten)]
    pub bridge: GridavConfig,

    /// Listener settings
    pub server: ServerSettings,

    /// Seed data for the bundled in-memory grid
    pub memory: MemorySettings,
}

/// Where the HTTP listener binds and how it challenges clients
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: IpAddr,
    pub port: u16,
    /// Basic authentication realm
    pub realm: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            realm: gridav_webdav::DEFAULT_REALM.to_string(),
        }
    }
}

/// Users of the in-memory grid, name to password
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MemorySettings {
    pub users: BTreeMap<String, String>,
}

impl AppConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::load_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "No config file, using defaults");
                    AppConfig::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(GridavError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )))
            .context("Failed to load configuration");
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check the bridge settings and the binary's own tables.
    pub fn validate(&self) -> Result<()> {
        self.bridge
            .validate()
            .context("Invalid bridge configuration")?;
        if self.server.realm.is_empty() || self.server.realm.contains('"') {
            return Err(GridavError::Configuration(format!(
                "invalid realm '{}'",
                self.server.realm
            )))
            .context("Invalid server configuration");
        }
        if let Some(name) = self
            .memory
            .users
            .keys()
            .find(|name| name.is_empty() || name.contains('/'))
        {
            return Err(GridavError::Configuration(format!(
                "invalid user name '{name}'"
            )))
            .context("Invalid memory configuration");
        }
        Ok(())
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// Get the path to the configuration file.
///
/// Uses XDG config directory on Linux, Application Support on macOS.
pub fn config_path() -> Result<PathBuf> {
    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

    #[cfg(target_os = "macos")]
    {
        let config_dir = base_dirs
            .home_dir()
            .join("Library/Application Support/org.gridav.gridav");
        Ok(config_dir.join("config.toml"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        let config_dir = base_dirs.config_dir().join("gridav");
        Ok(config_dir.join("config.toml"))
    }
}
