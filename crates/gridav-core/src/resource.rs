//! Resource resolution.
//!
//! A [`ResourceNode`] is a per-request snapshot of one path: whether it
//! exists, what kind it is, its size and its timestamps. Nodes are built from
//! a stat call (or from a listing row during walks) and never cached.

use chrono::DateTime;
use tracing::{debug, warn};

use crate::error::{GridavError, Result};
use crate::path;
use crate::rpc::{CollectionEntry, GridConnection, ObjectKind, ObjectStat, RpcError};

/// Kind of a resolved resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Collection,
    DataObject,
    /// Nothing exists at the path.
    None,
}

/// Snapshot of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    /// Path below the mount point, starting with `/`.
    pub protocol_path: String,
    /// Absolute grid path.
    pub grid_path: String,
    pub exists: bool,
    pub kind: ResourceKind,
    pub size: u64,
    /// Creation time, decimal epoch seconds as reported by the store.
    pub create_time: String,
    /// Modification time, decimal epoch seconds as reported by the store.
    pub modify_time: String,
}

impl ResourceNode {
    /// A node for a path where nothing exists (yet).
    pub fn absent(protocol_path: impl Into<String>, grid_path: impl Into<String>) -> Self {
        Self {
            protocol_path: protocol_path.into(),
            grid_path: grid_path.into(),
            exists: false,
            kind: ResourceKind::None,
            size: 0,
            create_time: String::new(),
            modify_time: String::new(),
        }
    }

    pub fn is_collection(&self) -> bool {
        self.exists && self.kind == ResourceKind::Collection
    }

    pub fn is_data_object(&self) -> bool {
        self.exists && self.kind == ResourceKind::DataObject
    }

    /// Fill existence, kind, size and times from a stat result.
    ///
    /// Unknown kinds leave the node absent.
    pub fn apply_stat(&mut self, stat: &ObjectStat) {
        self.apply(stat.kind, stat.size, &stat.create_time, &stat.modify_time);
    }

    /// Fill the node from a listing row without an extra stat call.
    pub fn apply_entry(&mut self, entry: &CollectionEntry) {
        self.apply(entry.kind, entry.size, &entry.create_time, &entry.modify_time);
    }

    fn apply(&mut self, kind: ObjectKind, size: u64, create_time: &str, modify_time: &str) {
        self.kind = match kind {
            ObjectKind::Collection => ResourceKind::Collection,
            ObjectKind::DataObject => ResourceKind::DataObject,
            ObjectKind::Other(code) => {
                warn!(
                    path = %self.grid_path,
                    kind = code,
                    "Unknown object kind, treating as absent"
                );
                self.mark_absent();
                return;
            }
        };
        self.exists = true;
        self.size = if self.kind == ResourceKind::Collection { 0 } else { size };
        self.create_time = create_time.to_string();
        self.modify_time = modify_time.to_string();
    }

    pub(crate) fn mark_absent(&mut self) {
        self.exists = false;
        self.kind = ResourceKind::None;
        self.size = 0;
        self.create_time.clear();
        self.modify_time.clear();
    }

    /// Entity tag: quoted modify time for collections, quoted
    /// `<hex size>-<modify time>` for objects, empty when absent.
    pub fn etag(&self) -> String {
        if !self.exists {
            return String::new();
        }
        match self.kind {
            ResourceKind::Collection => format!("\"{}\"", self.modify_time),
            ResourceKind::DataObject => format!("\"{:x}-{}\"", self.size, self.modify_time),
            ResourceKind::None => String::new(),
        }
    }

    pub fn modify_epoch(&self) -> i64 {
        parse_epoch(&self.modify_time)
    }

    pub fn create_epoch(&self) -> i64 {
        parse_epoch(&self.create_time)
    }

    /// Modification time as an HTTP date.
    pub fn last_modified(&self) -> String {
        http_date(self.modify_epoch())
    }

    /// Same grid path means same resource; the store keeps paths canonical.
    pub fn is_same(&self, other: &ResourceNode) -> bool {
        self.grid_path == other.grid_path
    }

    /// Whether `other` lies strictly inside this resource.
    pub fn is_ancestor_of(&self, other: &ResourceNode) -> bool {
        path::is_ancestor(&self.grid_path, &other.grid_path)
    }
}

/// Parse a store timestamp, treating garbage as the epoch.
pub fn parse_epoch(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

/// RFC 1123 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map_or_else(
            || "Thu, 01 Jan 1970 00:00:00 GMT".to_string(),
            |t| t.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        )
}

/// ISO 8601 date used by `creationdate`, e.g. `1994-11-06T08:49:37Z`.
pub fn iso_date(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map_or_else(
            || "1970-01-01T00:00:00Z".to_string(),
            |t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        )
}

/// Stat `grid_path` into a node. "Not found" yields an absent node.
pub fn stat(
    conn: &mut dyn GridConnection,
    protocol_path: &str,
    grid_path: &str,
) -> Result<ResourceNode> {
    path::check_length(grid_path)?;
    let mut node = ResourceNode::absent(protocol_path, grid_path);
    match conn.stat(grid_path) {
        Ok(stat) => node.apply_stat(&stat),
        Err(RpcError::NotFound) => {
            debug!(path = %grid_path, "Resource does not exist");
        }
        Err(e) => return Err(GridavError::rpc(format!("stat {grid_path}"), e)),
    }
    Ok(node)
}

/// Re-stat the parent of `node`. The mount root has no parent.
pub fn parent(conn: &mut dyn GridConnection, node: &ResourceNode) -> Result<Option<ResourceNode>> {
    let Some(protocol_parent) = path::parent(&node.protocol_path) else {
        return Ok(None);
    };
    let Some(grid_parent) = path::parent(&node.grid_path) else {
        return Ok(None);
    };
    stat(conn, protocol_parent, grid_parent).map(Some)
}
