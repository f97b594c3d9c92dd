//! Depth-bounded collection traversal.
//!
//! The walker visits a root node and, for collections, every listing entry
//! below it. Entry nodes are filled straight from listing rows, so a walk
//! costs one listing per collection rather than one stat per member. The
//! current position is kept on an explicit push/pop path stack.

use std::collections::HashSet;

use tracing::{debug, instrument, trace, warn};

use crate::error::{GridavError, Result};
use crate::lock::LockProvider;
use crate::path;
use crate::resource::{ResourceKind, ResourceNode};
use crate::rpc::{GridConnection, ListingHandle};

/// Depth value meaning "no limit".
pub const INFINITE_DEPTH: u32 = u32::MAX;

/// What a walk enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkKind {
    /// Existing resources only.
    Normal,
    /// Existing resources plus lock-null entries from the lock provider.
    LockNull,
}

/// Why the visitor is being called for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Collection,
    Member,
    LockNull,
}

impl CallType {
    fn for_node(node: &ResourceNode) -> Self {
        if node.is_collection() {
            Self::Collection
        } else {
            Self::Member
        }
    }
}

/// Callback invoked once per visited node. An error aborts the walk.
pub trait Visitor {
    fn visit(
        &mut self,
        conn: &mut dyn GridConnection,
        node: &ResourceNode,
        call: CallType,
    ) -> Result<()>;
}

impl<F> Visitor for F
where
    F: FnMut(&mut dyn GridConnection, &ResourceNode, CallType) -> Result<()>,
{
    fn visit(
        &mut self,
        conn: &mut dyn GridConnection,
        node: &ResourceNode,
        call: CallType,
    ) -> Result<()> {
        self(conn, node, call)
    }
}

/// Position of the walk: a node whose paths grow and shrink as the walker
/// descends and returns.
struct PathStack {
    node: ResourceNode,
    /// Lengths of both paths before each push.
    marks: Vec<(usize, usize)>,
}

impl PathStack {
    fn new(root: &ResourceNode) -> Self {
        Self {
            node: root.clone(),
            marks: Vec::new(),
        }
    }

    fn push(&mut self, name: &str) -> Result<()> {
        let grid = path::join(&self.node.grid_path, name);
        path::check_length(&grid)?;
        let protocol = path::join(&self.node.protocol_path, name);
        self.marks
            .push((self.node.protocol_path.len(), self.node.grid_path.len()));
        self.node.protocol_path = protocol;
        self.node.grid_path = grid;
        Ok(())
    }

    fn pop(&mut self, parent: &ResourceNode) {
        if let Some((protocol_len, grid_len)) = self.marks.pop() {
            self.node.protocol_path.truncate(protocol_len);
            self.node.grid_path.truncate(grid_len);
        }
        self.node.exists = parent.exists;
        self.node.kind = parent.kind;
        self.node.size = parent.size;
        self.node.create_time.clone_from(&parent.create_time);
        self.node.modify_time.clone_from(&parent.modify_time);
    }
}

struct Walk<'a> {
    conn: &'a mut dyn GridConnection,
    kind: WalkKind,
    locks: Option<&'a dyn LockProvider>,
    visitor: &'a mut dyn Visitor,
    seen: HashSet<String>,
    stack: PathStack,
}

/// Walk `root` down to `depth` levels below it.
///
/// `depth == 0` visits only the root. Lock-null entries are reported when
/// `kind` asks for them and `locks` can enumerate them.
#[instrument(level = "debug", skip(conn, root, locks, visitor), fields(path = %root.grid_path))]
pub fn walk(
    conn: &mut dyn GridConnection,
    root: &ResourceNode,
    depth: u32,
    kind: WalkKind,
    locks: Option<&dyn LockProvider>,
    visitor: &mut dyn Visitor,
) -> Result<()> {
    let mut walk = Walk {
        conn,
        kind,
        locks,
        visitor,
        seen: HashSet::new(),
        stack: PathStack::new(root),
    };
    walk.run(depth)
}

impl Walk<'_> {
    fn run(&mut self, depth: u32) -> Result<()> {
        let call = CallType::for_node(&self.stack.node);
        self.visitor.visit(self.conn, &self.stack.node, call)?;

        if depth == 0 || !self.stack.node.is_collection() {
            return Ok(());
        }

        let collection = self.stack.node.clone();
        let listing = self.conn.open_listing(&collection.grid_path).map_err(|e| {
            GridavError::rpc(format!("open listing {}", collection.grid_path), e)
        })?;
        let result = self.members(listing, &collection, depth);
        if let Err(e) = self.conn.close_listing(listing) {
            warn!(path = %collection.grid_path, error = %e, "Closing listing failed");
        }
        result?;

        if self.kind == WalkKind::LockNull {
            self.lock_nulls(&collection)?;
        }
        Ok(())
    }

    fn members(
        &mut self,
        listing: ListingHandle,
        collection: &ResourceNode,
        depth: u32,
    ) -> Result<()> {
        while let Some(entry) = self
            .conn
            .read_listing(listing)
            .map_err(|e| GridavError::rpc(format!("read listing {}", collection.grid_path), e))?
        {
            self.stack.push(entry.leaf_name())?;
            self.stack.node.apply_entry(&entry);
            trace!(path = %self.stack.node.grid_path, "Walk entry");
            self.seen.insert(self.stack.node.grid_path.clone());

            let next = if depth == INFINITE_DEPTH { depth } else { depth - 1 };
            let descended = self.run(next);
            self.stack.pop(collection);
            descended?;
        }
        Ok(())
    }

    fn lock_nulls(&mut self, collection: &ResourceNode) -> Result<()> {
        let Some(locks) = self.locks.filter(|l| l.supports_lock_null()) else {
            return Ok(());
        };
        for locked in locks.locked_entries(&collection.grid_path) {
            if self.seen.contains(&locked) {
                continue;
            }
            debug!(path = %locked, "Reporting lock-null resource");
            self.stack.push(path::basename(&locked))?;
            self.stack.node.exists = false;
            self.stack.node.kind = ResourceKind::None;
            self.stack.node.size = 0;
            self.stack.node.create_time.clear();
            self.stack.node.modify_time.clear();
            let visited = self
                .visitor
                .visit(self.conn, &self.stack.node, CallType::LockNull);
            self.stack.pop(collection);
            visited?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GridSettings;
    use crate::lock::{LocalLocks, NoLocks};
    use crate::memory::{MemoryGrid, Operation};
    use crate::resource;
    use crate::rpc::{GridConnector, RpcError};

    const HOME: &str = "/tempZone/home/alice";

    fn setup() -> (MemoryGrid, Box<dyn GridConnection>) {
        let grid = MemoryGrid::new("tempZone");
        grid.add_user("alice", "secret");
        grid.put_object(&format!("{HOME}/a.txt"), b"hello");
        grid.put_object(&format!("{HOME}/docs/b.txt"), b"world!");
        grid.put_object(&format!("{HOME}/docs/deep/c.txt"), b"c");
        let mut conn = grid.connect(&GridSettings::default(), "alice").unwrap();
        conn.login_password("secret").unwrap();
        (grid, conn)
    }

    fn collect(
        conn: &mut dyn GridConnection,
        root: &ResourceNode,
        depth: u32,
        kind: WalkKind,
        locks: Option<&dyn LockProvider>,
    ) -> Vec<(String, CallType)> {
        let mut visited = Vec::new();
        let mut visitor =
            |_: &mut dyn GridConnection, node: &ResourceNode, call: CallType| -> Result<()> {
                visited.push((node.protocol_path.clone(), call));
                Ok(())
            };
        walk(conn, root, depth, kind, locks, &mut visitor).unwrap();
        visited
    }

    #[test]
    fn test_depth_zero_visits_root_only() {
        let (_grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        let visited = collect(conn.as_mut(), &root, 0, WalkKind::Normal, None);
        assert_eq!(visited, vec![("/".to_string(), CallType::Collection)]);
    }

    #[test]
    fn test_depth_one_visits_direct_children() {
        let (grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        grid.reset_stats();
        let visited = collect(conn.as_mut(), &root, 1, WalkKind::Normal, None);
        assert_eq!(
            visited,
            vec![
                ("/".to_string(), CallType::Collection),
                ("/a.txt".to_string(), CallType::Member),
                ("/docs".to_string(), CallType::Collection),
            ]
        );
        // Members come from the listing, not from extra stat calls.
        assert_eq!(grid.stats().stats, 0);
    }

    #[test]
    fn test_infinite_depth_recurses() {
        let (_grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        let paths: Vec<String> =
            collect(conn.as_mut(), &root, INFINITE_DEPTH, WalkKind::Normal, None)
                .into_iter()
                .map(|(p, _)| p)
                .collect();
        assert_eq!(
            paths,
            vec!["/", "/a.txt", "/docs", "/docs/b.txt", "/docs/deep", "/docs/deep/c.txt"]
        );
    }

    #[test]
    fn test_depth_two_stops_early() {
        let (_grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        let paths: Vec<String> = collect(conn.as_mut(), &root, 2, WalkKind::Normal, None)
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(paths, vec!["/", "/a.txt", "/docs", "/docs/b.txt", "/docs/deep"]);
    }

    #[test]
    fn test_member_nodes_carry_listing_data() {
        let (_grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/docs", &format!("{HOME}/docs")).unwrap();
        let mut sizes = Vec::new();
        let mut visitor =
            |_: &mut dyn GridConnection, node: &ResourceNode, _: CallType| -> Result<()> {
                sizes.push((node.grid_path.clone(), node.size, node.exists));
                Ok(())
            };
        walk(conn.as_mut(), &root, 1, WalkKind::Normal, None, &mut visitor).unwrap();
        assert!(sizes.contains(&(format!("{HOME}/docs/b.txt"), 6, true)));
        assert!(sizes.contains(&(format!("{HOME}/docs/deep"), 0, true)));
    }

    #[test]
    fn test_object_root_is_not_listed() {
        let (grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/a.txt", &format!("{HOME}/a.txt")).unwrap();
        grid.reset_stats();
        let visited = collect(conn.as_mut(), &root, INFINITE_DEPTH, WalkKind::Normal, None);
        assert_eq!(visited, vec![("/a.txt".to_string(), CallType::Member)]);
    }

    #[test]
    fn test_lock_null_entries() {
        let (_grid, mut conn) = setup();
        let locks = LocalLocks::new();
        locks.lock(format!("{HOME}/pending.txt"));
        locks.lock(format!("{HOME}/a.txt"));
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();

        let visited = collect(conn.as_mut(), &root, 1, WalkKind::LockNull, Some(&locks));
        assert!(visited.contains(&("/pending.txt".to_string(), CallType::LockNull)));
        // Locked but existing resources are reported once, as members.
        assert_eq!(visited.iter().filter(|(p, _)| p == "/a.txt").count(), 1);

        let normal = collect(conn.as_mut(), &root, 1, WalkKind::Normal, Some(&locks));
        assert!(!normal.iter().any(|(_, c)| *c == CallType::LockNull));

        let none = collect(conn.as_mut(), &root, 1, WalkKind::LockNull, Some(&NoLocks));
        assert!(!none.iter().any(|(_, c)| *c == CallType::LockNull));
    }

    #[test]
    fn test_visitor_error_aborts() {
        let (_grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        let mut calls = 0;
        let mut visitor =
            |_: &mut dyn GridConnection, node: &ResourceNode, _: CallType| -> Result<()> {
                calls += 1;
                if node.protocol_path == "/a.txt" {
                    return Err(GridavError::Forbidden("stop".into()));
                }
                Ok(())
            };
        let err = walk(conn.as_mut(), &root, INFINITE_DEPTH, WalkKind::Normal, None, &mut visitor)
            .unwrap_err();
        assert!(matches!(err, GridavError::Forbidden(_)));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_listing_failure_is_infrastructure() {
        let (grid, mut conn) = setup();
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        grid.inject_fault(Operation::OpenListing, RpcError::Disconnected);
        let mut visitor =
            |_: &mut dyn GridConnection, _: &ResourceNode, _: CallType| -> Result<()> { Ok(()) };
        let err = walk(conn.as_mut(), &root, 1, WalkKind::Normal, None, &mut visitor).unwrap_err();
        assert!(err.is_server_side());
    }

    #[test]
    fn test_long_member_path_is_length_limit() {
        let (grid, mut conn) = setup();
        let deep = format!("{HOME}/{}", "d".repeat(1000));
        grid.make_collection_all(&deep);
        grid.put_object(&format!("{deep}/{}", "f".repeat(100)), b"x");
        let root = resource::stat(conn.as_mut(), "/", HOME).unwrap();
        let mut visitor =
            |_: &mut dyn GridConnection, _: &ResourceNode, _: CallType| -> Result<()> { Ok(()) };
        let err = walk(conn.as_mut(), &root, INFINITE_DEPTH, WalkKind::Normal, None, &mut visitor)
            .unwrap_err();
        assert!(matches!(err, GridavError::LengthLimit { .. }));
    }
}
