//! Mapping between protocol paths and absolute grid paths.
//!
//! A protocol path is the request path below the mount point, always
//! starting with `/`. The grid path is the exposed root followed by that
//! path. Helpers here work on `/`-separated strings only; the store
//! guarantees canonical paths, so string equality is resource identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{GridavError, Result};
use crate::rpc::MAX_PATH_LEN;

/// Which grid collection appears as `/` to clients.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExposedRoot {
    /// `/<zone>`
    Zone,
    /// `/<zone>/home`
    Home,
    /// `/<zone>/home/<username>`
    #[default]
    User,
    /// A literal absolute collection path.
    Custom(String),
}

impl ExposedRoot {
    /// Absolute grid path of the root for this zone and user.
    pub fn grid_root(&self, zone: &str, username: &str) -> String {
        match self {
            ExposedRoot::Zone => format!("/{zone}"),
            ExposedRoot::Home => format!("/{zone}/home"),
            ExposedRoot::User => format!("/{zone}/home/{username}"),
            ExposedRoot::Custom(path) => path.clone(),
        }
    }
}

impl FromStr for ExposedRoot {
    type Err = GridavError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("zone") {
            Ok(ExposedRoot::Zone)
        } else if s.eq_ignore_ascii_case("home") {
            Ok(ExposedRoot::Home)
        } else if s.eq_ignore_ascii_case("user") {
            Ok(ExposedRoot::User)
        } else if s.starts_with('/') {
            let trimmed = s.trim_end_matches('/');
            Ok(ExposedRoot::Custom(if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }))
        } else {
            Err(GridavError::Configuration(format!(
                "exposed root must be 'Zone', 'Home', 'User' or an absolute path, got '{s}'"
            )))
        }
    }
}

impl TryFrom<String> for ExposedRoot {
    type Error = GridavError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExposedRoot> for String {
    fn from(root: ExposedRoot) -> Self {
        root.to_string()
    }
}

impl fmt::Display for ExposedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExposedRoot::Zone => f.write_str("Zone"),
            ExposedRoot::Home => f.write_str("Home"),
            ExposedRoot::User => f.write_str("User"),
            ExposedRoot::Custom(path) => f.write_str(path),
        }
    }
}

/// Translates protocol paths under one fixed grid root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTranslator {
    root: String,
}

impl PathTranslator {
    /// Build a translator for the session's user.
    pub fn new(policy: &ExposedRoot, zone: &str, username: &str) -> Self {
        Self::with_root(policy.grid_root(zone, username))
    }

    pub fn with_root(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Map a protocol path to its grid path.
    ///
    /// Fails with `LengthLimit` before any RPC when the result would not
    /// fit the store's path buffers.
    pub fn translate(&self, protocol_path: &str) -> Result<String> {
        let relative = protocol_path.trim_end_matches('/');
        let grid = if relative.is_empty() {
            self.root.clone()
        } else if self.root == "/" {
            if relative.starts_with('/') {
                relative.to_string()
            } else {
                format!("/{relative}")
            }
        } else if relative.starts_with('/') {
            format!("{}{relative}", self.root)
        } else {
            format!("{}/{relative}", self.root)
        };
        check_length(&grid)?;
        Ok(grid)
    }
}

/// Reject paths that do not fit in the store's fixed buffers.
pub fn check_length(path: &str) -> Result<()> {
    if path.len() >= MAX_PATH_LEN {
        return Err(GridavError::path_too_long(path));
    }
    Ok(())
}

/// Parent of an absolute path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Last segment of a path.
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Append a segment to a collection path.
pub fn join(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Whether `child` lies strictly below `ancestor`.
pub fn is_ancestor(ancestor: &str, child: &str) -> bool {
    if ancestor == "/" {
        return child.len() > 1 && child.starts_with('/');
    }
    child.len() > ancestor.len() + 1
        && child.starts_with(ancestor)
        && child.as_bytes()[ancestor.len()] == b'/'
}
