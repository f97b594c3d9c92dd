//! Bridge configuration.
//!
//! Settings are plain serde structs so the binary can read them from a TOML
//! file. Every field has the default the bridge has always shipped with.
//!
//! # Example configuration
//!
//! ```toml
//! [grid]
//! host = "grid.example.org"
//! zone = "tempZone"
//! auth_scheme = "pam"
//!
//! [dav]
//! exposed_root = "Home"
//! tmpfile_rollback = true
//!
//! [dav.anonymous]
//! enabled = true
//! username = "anonymous"
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{GridavError, Result};
use crate::lock::LockProviderKind;
use crate::path::ExposedRoot;
use crate::range::RangeLimits;

/// Default transfer buffer size (4 MiB) for both directions.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// How sessions authenticate against the grid store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Direct password login.
    #[default]
    Native,
    /// Proxied login: the password is exchanged for a temporary credential
    /// over a secure channel.
    Pam,
}

/// Complete configuration of the bridge core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridavConfig {
    pub grid: GridSettings,
    pub dav: DavSettings,
}

/// Where and how to reach the grid store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub host: String,
    pub port: u16,
    pub zone: String,
    /// Storage resource for new objects; empty means the server default.
    pub default_resource: String,
    pub auth_scheme: AuthScheme,
    /// Lifetime of proxied temporary credentials, in hours.
    pub pam_ttl_hours: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1247,
            zone: "tempZone".to_string(),
            default_resource: String::new(),
            auth_scheme: AuthScheme::Native,
            pam_ttl_hours: 1,
        }
    }
}

impl GridSettings {
    /// The configured default resource, if any.
    pub fn resource(&self) -> Option<&str> {
        if self.default_resource.is_empty() {
            None
        } else {
            Some(&self.default_resource)
        }
    }
}

/// Credentials used when a request carries none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymousSettings {
    pub enabled: bool,
    pub username: String,
    pub password: String,
}

impl Default for AnonymousSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            username: "anonymous".to_string(),
            password: String::new(),
        }
    }
}

/// Protocol-side behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DavSettings {
    pub exposed_root: ExposedRoot,
    /// Upload aggregation buffer size.
    pub tx_buffer_size: usize,
    /// Download chunk size.
    pub rx_buffer_size: usize,
    /// Upload through a temporary sibling and rename on commit.
    pub tmpfile_rollback: bool,
    /// Ask browsers to save objects instead of displaying them.
    pub force_download: bool,
    pub lock_provider: LockProviderKind,
    /// Request path prefix under which the bridge is mounted.
    pub mount_prefix: String,
    pub anonymous: AnonymousSettings,
    pub ranges: RangeLimits,
}

impl Default for DavSettings {
    fn default() -> Self {
        Self {
            exposed_root: ExposedRoot::default(),
            tx_buffer_size: DEFAULT_BUFFER_SIZE,
            rx_buffer_size: DEFAULT_BUFFER_SIZE,
            tmpfile_rollback: false,
            force_download: false,
            lock_provider: LockProviderKind::default(),
            mount_prefix: String::new(),
            anonymous: AnonymousSettings::default(),
            ranges: RangeLimits::default(),
        }
    }
}

impl GridavConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GridavConfig = toml::from_str(content)
            .map_err(|e| GridavError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot constrain.
    pub fn validate(&self) -> Result<()> {
        if self.grid.zone.is_empty() || self.grid.zone.contains('/') {
            return Err(GridavError::Configuration(format!(
                "invalid zone name '{}'",
                self.grid.zone
            )));
        }
        if self.grid.pam_ttl_hours < 1 {
            return Err(GridavError::Configuration(
                "pam_ttl_hours must be at least 1".to_string(),
            ));
        }
        if self.dav.tx_buffer_size == 0 || self.dav.rx_buffer_size == 0 {
            return Err(GridavError::Configuration(
                "transfer buffer sizes must be non-zero".to_string(),
            ));
        }
        if !self.dav.mount_prefix.is_empty() && !self.dav.mount_prefix.starts_with('/') {
            return Err(GridavError::Configuration(format!(
                "mount_prefix must start with '/', got '{}'",
                self.dav.mount_prefix
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.grid.zone = zone.into();
        self
    }

    #[must_use]
    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.grid.auth_scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_exposed_root(mut self, root: ExposedRoot) -> Self {
        self.dav.exposed_root = root;
        self
    }

    #[must_use]
    pub fn with_tmpfile_rollback(mut self, enabled: bool) -> Self {
        self.dav.tmpfile_rollback = enabled;
        self
    }

    #[must_use]
    pub fn with_buffer_sizes(mut self, tx: usize, rx: usize) -> Self {
        self.dav.tx_buffer_size = tx;
        self.dav.rx_buffer_size = rx;
        self
    }

    #[must_use]
    pub fn with_anonymous(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.dav.anonymous = AnonymousSettings {
            enabled: true,
            username: username.into(),
            password: password.into(),
        };
        self
    }

    #[must_use]
    pub fn with_lock_provider(mut self, kind: LockProviderKind) -> Self {
        self.dav.lock_provider = kind;
        self
    }
}
