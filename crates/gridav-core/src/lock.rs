//! Advisory lock providers.
//!
//! Listings ask a provider which locked paths exist below a collection so
//! that they can include lock-null resources: names that carry a lock but
//! have no object yet. A provider that also serves LOCK and UNLOCK hands out
//! exclusive write locks keyed by grid path. Locks are advisory: nothing in
//! the bridge refuses a write because of one.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use xml::writer::XmlEvent;

use crate::error::{GridavError, Result};
use crate::path;
use crate::propfind::{
    dav_empty_element, dav_text_element, dav_writer, start_dav_document, xml_error,
};

/// Provider selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockProviderKind {
    #[default]
    None,
    Local,
}

/// View of an advisory lock database.
pub trait LockProvider: Send + Sync {
    /// Whether this provider can enumerate lock-null resources.
    fn supports_lock_null(&self) -> bool;

    /// Grid paths of locked entries directly inside `collection`.
    fn locked_entries(&self, collection: &str) -> Vec<String>;

    /// Whether LOCK and UNLOCK are served through this provider.
    fn supports_locking(&self) -> bool {
        false
    }

    /// Token of the lock held on `grid_path`, if any.
    fn token(&self, _grid_path: &str) -> Option<String> {
        None
    }

    /// Take an exclusive write lock on `grid_path` and return its token.
    fn acquire(&self, _grid_path: &str) -> Result<String> {
        Err(GridavError::Unimplemented("LOCK"))
    }

    /// Drop the lock on `grid_path` identified by `token`.
    fn release(&self, _grid_path: &str, _token: &str) -> Result<()> {
        Err(GridavError::Unimplemented("UNLOCK"))
    }
}

/// Provider for deployments without locking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocks;

impl LockProvider for NoLocks {
    fn supports_lock_null(&self) -> bool {
        false
    }

    fn locked_entries(&self, _collection: &str) -> Vec<String> {
        Vec::new()
    }
}

/// In-process lock table, grid path to lock token.
#[derive(Debug, Default)]
pub struct LocalLocks {
    locked: RwLock<BTreeMap<String, String>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lock on `grid_path`. Returns the new token, or `None` if the
    /// path was already locked.
    pub fn lock(&self, grid_path: impl Into<String>) -> Option<String> {
        let mut locked = self.locked.write();
        let grid_path = grid_path.into();
        if locked.contains_key(&grid_path) {
            return None;
        }
        let token = new_token();
        locked.insert(grid_path, token.clone());
        Some(token)
    }

    /// Remove the lock on `grid_path` regardless of its token.
    pub fn unlock(&self, grid_path: &str) -> bool {
        self.locked.write().remove(grid_path).is_some()
    }

    pub fn is_locked(&self, grid_path: &str) -> bool {
        self.locked.read().contains_key(grid_path)
    }
}

impl LockProvider for LocalLocks {
    fn supports_lock_null(&self) -> bool {
        true
    }

    fn locked_entries(&self, collection: &str) -> Vec<String> {
        self.locked
            .read()
            .keys()
            .filter(|p| path::parent(p) == Some(collection))
            .cloned()
            .collect()
    }

    fn supports_locking(&self) -> bool {
        true
    }

    fn token(&self, grid_path: &str) -> Option<String> {
        self.locked.read().get(grid_path).cloned()
    }

    fn acquire(&self, grid_path: &str) -> Result<String> {
        let token = self
            .lock(grid_path)
            .ok_or_else(|| GridavError::Locked(grid_path.to_string()))?;
        debug!(path = grid_path, token = %token, "Lock acquired");
        Ok(token)
    }

    fn release(&self, grid_path: &str, token: &str) -> Result<()> {
        let mut locked = self.locked.write();
        match locked.get(grid_path) {
            Some(held) if held == token => {
                locked.remove(grid_path);
                debug!(path = grid_path, "Lock released");
                Ok(())
            }
            _ => Err(GridavError::Conflict(format!(
                "{token} is not a lock on {grid_path}"
            ))),
        }
    }
}

/// Fresh `opaquelocktoken` URI in UUID layout.
fn new_token() -> String {
    let hex = format!("{:032x}", rand::random::<u128>());
    format!(
        "opaquelocktoken:{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}

/// Build the provider named by the configuration.
pub fn provider_for(kind: LockProviderKind) -> Arc<dyn LockProvider> {
    match kind {
        LockProviderKind::None => Arc::new(NoLocks),
        LockProviderKind::Local => Arc::new(LocalLocks::new()),
    }
}

/// `DAV:prop` document answering a successful LOCK.
pub fn discovery_body(token: &str, lock_root: &str) -> Result<Vec<u8>> {
    let mut xml = dav_writer();
    start_dav_document(&mut xml, "prop")?;
    xml.write(XmlEvent::start_element("D:lockdiscovery")).map_err(xml_error)?;
    xml.write(XmlEvent::start_element("D:activelock")).map_err(xml_error)?;

    xml.write(XmlEvent::start_element("D:locktype")).map_err(xml_error)?;
    dav_empty_element(&mut xml, "write")?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)?;
    xml.write(XmlEvent::start_element("D:lockscope")).map_err(xml_error)?;
    dav_empty_element(&mut xml, "exclusive")?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)?;

    dav_text_element(&mut xml, "depth", "0")?;
    dav_text_element(&mut xml, "timeout", "Infinite")?;
    xml.write(XmlEvent::start_element("D:locktoken")).map_err(xml_error)?;
    dav_text_element(&mut xml, "href", token)?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)?;
    xml.write(XmlEvent::start_element("D:lockroot")).map_err(xml_error)?;
    dav_text_element(&mut xml, "href", lock_root)?;
    xml.write(XmlEvent::end_element()).map_err(xml_error)?;

    // activelock, lockdiscovery, prop
    for _ in 0..3 {
        xml.write(XmlEvent::end_element()).map_err(xml_error)?;
    }
    Ok(xml.into_inner())
}
