//! Structural operations: MKCOL, COPY, MOVE and DELETE.

use tracing::{debug, error, instrument};

use crate::error::{GridavError, Result};
use crate::path;
use crate::resource::{self, ResourceNode};
use crate::rpc::{GridConnection, RenameKind, RpcError};
use crate::walk::{self, CallType, WalkKind};

/// Create the collection at `node` and refresh the node.
#[instrument(level = "debug", skip(conn, node), fields(path = %node.grid_path))]
pub fn create_collection(conn: &mut dyn GridConnection, node: &mut ResourceNode) -> Result<()> {
    require_parent(conn, node)?;
    conn.create_collection(&node.grid_path)
        .map_err(|e| GridavError::rpc(format!("create collection {}", node.grid_path), e))?;
    *node = resource::stat(conn, &node.protocol_path, &node.grid_path)?;
    Ok(())
}

/// Copy `src` to `dst`, `depth` levels deep.
///
/// Collections are recreated one by one at the destination and data
/// objects are copied server side with overwrite forced. `dst` is refreshed
/// afterwards.
#[instrument(
    level = "debug",
    skip(conn, src, dst, target_resource),
    fields(from = %src.grid_path, to = %dst.grid_path)
)]
pub fn copy(
    conn: &mut dyn GridConnection,
    src: &ResourceNode,
    dst: &mut ResourceNode,
    depth: u32,
    target_resource: Option<&str>,
) -> Result<()> {
    if !src.exists {
        return Err(GridavError::NotFound(src.protocol_path.clone()));
    }
    require_parent(conn, dst)?;

    let source_root = src.grid_path.as_str();
    let destination_root = dst.grid_path.clone();
    let mut visitor =
        |conn: &mut dyn GridConnection, node: &ResourceNode, call: CallType| -> Result<()> {
            let target = rebase(&node.grid_path, source_root, &destination_root)?;
            match call {
                CallType::Collection => {
                    debug!(from = %node.grid_path, to = %target, "Creating collection copy");
                    conn.create_collection(&target)
                        .map_err(|e| GridavError::rpc(format!("create collection {target}"), e))
                }
                CallType::Member => {
                    debug!(from = %node.grid_path, to = %target, "Copying data object");
                    conn.copy_object(&node.grid_path, &target, target_resource, true)
                        .map_err(|e| {
                            GridavError::rpc(format!("copy {} to {target}", node.grid_path), e)
                        })
                }
                CallType::LockNull => Ok(()),
            }
        };
    walk::walk(conn, src, depth, WalkKind::Normal, None, &mut visitor)?;

    *dst = resource::stat(conn, &dst.protocol_path, &dst.grid_path)?;
    Ok(())
}

/// Rename `src` to `dst` in one RPC.
///
/// On success `src` is marked absent and `dst` takes over its kind and
/// attributes.
#[instrument(
    level = "debug",
    skip(conn, src, dst),
    fields(from = %src.grid_path, to = %dst.grid_path)
)]
pub fn move_resource(
    conn: &mut dyn GridConnection,
    src: &mut ResourceNode,
    dst: &mut ResourceNode,
) -> Result<()> {
    if !src.exists {
        return Err(GridavError::NotFound(src.protocol_path.clone()));
    }
    require_parent(conn, dst)?;

    let kind = if src.is_collection() {
        RenameKind::Collection
    } else {
        RenameKind::DataObject
    };
    match conn.rename(&src.grid_path, &dst.grid_path, kind) {
        Ok(()) => {}
        Err(RpcError::FileRenameFailed) => {
            error!(
                from = %src.grid_path,
                to = %dst.grid_path,
                "Move blocked by a stale directory from a removed collection"
            );
            return Err(GridavError::StaleCollectionRemnant {
                path: dst.grid_path.clone(),
            });
        }
        Err(e) => {
            return Err(GridavError::rpc(
                format!("rename {} to {}", src.grid_path, dst.grid_path),
                e,
            ));
        }
    }

    dst.exists = true;
    dst.kind = src.kind;
    dst.size = src.size;
    dst.create_time.clone_from(&src.create_time);
    dst.modify_time.clone_from(&src.modify_time);
    src.mark_absent();
    Ok(())
}

/// Delete `node`: recursively for collections, a single unlink for objects.
#[instrument(level = "debug", skip(conn, node), fields(path = %node.grid_path))]
pub fn remove(conn: &mut dyn GridConnection, node: &mut ResourceNode) -> Result<()> {
    if !node.exists {
        return Err(GridavError::NotFound(node.protocol_path.clone()));
    }
    let outcome = if node.is_collection() {
        conn.remove_collection(&node.grid_path, true, true)
    } else {
        conn.unlink(&node.grid_path, true)
    };
    outcome.map_err(|e| GridavError::rpc(format!("remove {}", node.grid_path), e))?;
    node.mark_absent();
    Ok(())
}

/// Fail with `Conflict` unless the parent collection of `node` exists.
fn require_parent(conn: &mut dyn GridConnection, node: &ResourceNode) -> Result<()> {
    match resource::parent(conn, node)? {
        Some(parent) if parent.is_collection() => Ok(()),
        Some(_) => Err(GridavError::Conflict(format!(
            "parent of {} is not an existing collection",
            node.protocol_path
        ))),
        None => Err(GridavError::Conflict(format!(
            "{} has no parent collection",
            node.protocol_path
        ))),
    }
}

/// Move `grid_path` from below `from_root` to below `to_root`.
fn rebase(grid_path: &str, from_root: &str, to_root: &str) -> Result<String> {
    let suffix = grid_path.strip_prefix(from_root).ok_or_else(|| {
        GridavError::Infrastructure(format!("{grid_path} is outside of {from_root}"))
    })?;
    let rebased = format!("{to_root}{suffix}");
    path::check_length(&rebased)?;
    Ok(rebased)
}
