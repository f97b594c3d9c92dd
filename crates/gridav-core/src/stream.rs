//! Buffered upload and download of data objects.
//!
//! Uploads aggregate client chunks into one transfer buffer so the store
//! sees few large writes. With temp-file rollback enabled, a truncating
//! upload goes to a hidden sibling that is renamed over the destination on
//! commit, so an aborted upload never damages the original.
//!
//! Downloads read in fixed-size chunks and push each one to a [`BodySink`].

use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tracing::{debug, error, instrument, trace, warn};

use crate::error::{GridavError, Result};
use crate::path;
use crate::resource::{ResourceKind, ResourceNode};
use crate::rpc::{GridConnection, ObjectHandle, OpenMode, RenameKind, RpcError};

/// Prefix of temporary upload names.
pub const TEMP_PREFIX: &str = ".gridav-tx-";

/// Where upload bytes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Partial writes into the existing object. Never uses a temp file.
    Seekable,
    /// Replace the whole object.
    Truncate,
}

/// How an upload ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Commit,
    Rollback,
}

/// Upload lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    Opening,
    Writing,
    Closing(CloseOutcome),
    Closed,
}

/// Upload parameters taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub mode: UploadMode,
    pub tmpfile_rollback: bool,
    pub buffer_size: usize,
    pub default_resource: Option<String>,
}

/// Destination for downloaded bytes.
pub trait BodySink {
    fn send(&mut self, chunk: Bytes) -> io::Result<()>;
}

impl BodySink for Vec<u8> {
    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Hidden sibling of `final_path` used as an upload target.
///
/// The name mixes the process id, the clock and a checksum of the protocol
/// path so concurrent uploads into one collection do not collide.
pub fn temp_sibling(final_path: &str, protocol_path: &str) -> String {
    let parent = path::parent(final_path).unwrap_or("/");
    let cheapsum = protocol_path
        .bytes()
        .fold(0u32, |sum, b| sum.wrapping_add(1u32.wrapping_shl(u32::from(b))));
    #[allow(clippy::cast_possible_truncation)]
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32);
    path::join(
        parent,
        &format!("{TEMP_PREFIX}{:04x}-{:08x}", std::process::id(), now ^ cheapsum),
    )
}

/// A PUT in progress.
///
/// Dropping a stream that was not closed rolls it back.
pub struct UploadStream<'c> {
    conn: &'c mut dyn GridConnection,
    node: ResourceNode,
    target: String,
    resource: Option<String>,
    buffer: Vec<u8>,
    capacity: usize,
    handle: Option<ObjectHandle>,
    state: UploadState,
    written: u64,
}

impl std::fmt::Debug for UploadStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("destination", &self.node.grid_path)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl<'c> UploadStream<'c> {
    /// Open an upload to `node`, choosing the write target.
    #[instrument(level = "debug", skip(conn, node, options), fields(path = %node.grid_path))]
    pub fn open(
        conn: &'c mut dyn GridConnection,
        node: ResourceNode,
        options: &UploadOptions,
    ) -> Result<Self> {
        let mut stream = Self {
            conn,
            target: node.grid_path.clone(),
            node,
            resource: options.default_resource.clone(),
            buffer: Vec::new(),
            capacity: options.buffer_size.max(1),
            handle: None,
            state: UploadState::Created,
            written: 0,
        };

        stream.state = UploadState::Opening;
        if options.mode == UploadMode::Truncate && options.tmpfile_rollback {
            stream.target = temp_sibling(&stream.node.grid_path, &stream.node.protocol_path);
        }
        path::check_length(&stream.target)?;

        let resource = stream.resource.as_deref();
        let opened = if stream.target == stream.node.grid_path && stream.node.exists {
            debug!(target = %stream.target, "Opening existing object for overwrite");
            stream.conn.open(
                &stream.target,
                OpenMode::Write {
                    truncate: options.mode == UploadMode::Truncate,
                },
                resource,
            )
        } else {
            debug!(target = %stream.target, "Creating upload target");
            stream.conn.create(&stream.target, resource)
        };
        let handle = opened.map_err(|e| {
            error!(target = %stream.target, error = %e, "Could not open upload target");
            GridavError::rpc(format!("open {} for writing", stream.target), e)
        })?;

        stream.handle = Some(handle);
        stream.state = UploadState::Writing;
        Ok(stream)
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Path bytes are actually written to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn uses_temp_file(&self) -> bool {
        self.target != self.node.grid_path
    }

    /// Bytes accepted so far, buffered or sent.
    pub fn bytes_written(&self) -> u64 {
        self.written + self.buffer.len() as u64
    }

    /// Append client bytes.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.state != UploadState::Writing {
            return Err(GridavError::Infrastructure(format!(
                "write on upload in state {:?}",
                self.state
            )));
        }
        if data.len() >= self.capacity {
            self.flush()?;
            self.send(data)?;
        } else {
            if self.buffer.len() + data.len() > self.capacity {
                self.flush()?;
            }
            if self.buffer.capacity() == 0 {
                self.buffer.reserve_exact(self.capacity);
            }
            self.buffer.extend_from_slice(data);
        }
        Ok(())
    }

    /// Seeking within an upload is not supported.
    pub fn seek(&mut self, _offset: u64) -> Result<()> {
        Err(GridavError::Unimplemented("seeking within an upload"))
    }

    /// Finish the upload, returning the destination's new snapshot.
    ///
    /// A failed commit rolls back before reporting the error.
    #[instrument(level = "debug", skip(self), fields(path = %self.node.grid_path))]
    pub fn close(mut self, outcome: CloseOutcome) -> Result<ResourceNode> {
        self.state = UploadState::Closing(outcome);
        let result = match outcome {
            CloseOutcome::Commit => self.commit(),
            CloseOutcome::Rollback => {
                self.rollback();
                Ok(())
            }
        };
        self.state = UploadState::Closed;
        result?;

        let mut node = self.node.clone();
        if outcome == CloseOutcome::Commit {
            node.exists = true;
            node.kind = ResourceKind::DataObject;
            node.size = self.written;
        }
        Ok(node)
    }

    fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.flush() {
            self.rollback();
            return Err(e);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.conn.close(handle) {
                error!(target = %self.target, error = %e, "Closing upload target failed");
                self.rollback();
                return Err(GridavError::rpc(format!("close {}", self.target), e));
            }
        }
        if !self.uses_temp_file() {
            return Ok(());
        }

        let destination = self.node.grid_path.clone();
        if self.node.exists {
            // Rename never overwrites, so the original goes first.
            debug!(path = %destination, "Removing original before rename");
            if let Err(e) = self.conn.unlink(&destination, true) {
                self.rollback();
                return Err(GridavError::rpc(format!("unlink {destination}"), e));
            }
        }
        match self.conn.rename(&self.target, &destination, RenameKind::DataObject) {
            Ok(()) => {
                debug!(from = %self.target, to = %destination, "Upload committed");
                Ok(())
            }
            Err(RpcError::FileRenameFailed) => {
                error!(
                    from = %self.target,
                    to = %destination,
                    "Rename blocked by a stale directory from a removed collection; upload kept at temporary path"
                );
                Err(GridavError::StaleCollectionRemnant { path: destination })
            }
            Err(e) => {
                error!(
                    from = %self.target,
                    to = %destination,
                    error = %e,
                    "Rename failed; upload kept at temporary path"
                );
                Err(GridavError::rpc(
                    format!("rename {} to {destination}", self.target),
                    e,
                ))
            }
        }
    }

    /// Best-effort cleanup. Failures are logged, never returned.
    fn rollback(&mut self) {
        self.buffer.clear();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.conn.close(handle) {
                warn!(target = %self.target, error = %e, "Closing aborted upload failed");
            }
        }
        if self.uses_temp_file() {
            if let Err(e) = self.conn.unlink(&self.target, true) {
                warn!(target = %self.target, error = %e, "Could not remove temporary upload");
            }
        } else if self.node.exists {
            warn!(
                path = %self.node.grid_path,
                "Cannot roll back an in-place overwrite; enable tmpfile_rollback for safe aborts"
            );
        } else if let Err(e) = self.conn.unlink(&self.target, true) {
            warn!(target = %self.target, error = %e, "Could not remove partially uploaded object");
        }
    }

    /// Send and reset the aggregation buffer.
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buffer);
        self.send(&data)?;
        self.buffer = data;
        self.buffer.clear();
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let handle = self
            .handle
            .ok_or_else(|| GridavError::Infrastructure("upload has no open handle".into()))?;
        trace!(target = %self.target, len = data.len(), "Writing to grid store");
        let sent = self
            .conn
            .write(handle, data)
            .map_err(|e| GridavError::rpc(format!("write {}", self.target), e))?;
        if sent != data.len() {
            return Err(GridavError::Infrastructure(format!(
                "short write to {}: {sent} of {} bytes",
                self.target,
                data.len()
            )));
        }
        self.written += sent as u64;
        Ok(())
    }
}

impl Drop for UploadStream<'_> {
    fn drop(&mut self) {
        if self.state == UploadState::Writing {
            warn!(path = %self.node.grid_path, "Upload dropped without close, rolling back");
            self.rollback();
            self.state = UploadState::Closed;
        }
    }
}

/// An open read handle on a data object.
pub struct DownloadStream<'c> {
    conn: &'c mut dyn GridConnection,
    path: String,
    handle: Option<ObjectHandle>,
    chunk_size: usize,
}

impl<'c> DownloadStream<'c> {
    #[instrument(level = "debug", skip(conn, node), fields(path = %node.grid_path))]
    pub fn open(
        conn: &'c mut dyn GridConnection,
        node: &ResourceNode,
        chunk_size: usize,
    ) -> Result<Self> {
        let handle = conn
            .open(&node.grid_path, OpenMode::ReadOnly, None)
            .map_err(|e| GridavError::rpc(format!("open {} for reading", node.grid_path), e))?;
        Ok(Self {
            conn,
            path: node.grid_path.clone(),
            handle: Some(handle),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Send the whole object.
    pub fn deliver_all(&mut self, sink: &mut dyn BodySink) -> Result<u64> {
        self.deliver(0, None, sink)
    }

    /// Send `len` bytes starting at `start`.
    pub fn deliver_range(&mut self, start: u64, len: u64, sink: &mut dyn BodySink) -> Result<u64> {
        self.deliver(start, Some(len), sink)
    }

    fn deliver(&mut self, start: u64, limit: Option<u64>, sink: &mut dyn BodySink) -> Result<u64> {
        let handle = self
            .handle
            .ok_or_else(|| GridavError::Infrastructure("download is closed".into()))?;
        self.conn
            .seek(handle, start)
            .map_err(|e| GridavError::rpc(format!("seek {} to {start}", self.path), e))?;

        let mut sent = 0u64;
        while limit.is_none_or(|l| sent < l) {
            let want = match limit {
                #[allow(clippy::cast_possible_truncation)]
                Some(l) => (l - sent).min(self.chunk_size as u64) as usize,
                None => self.chunk_size,
            };
            let chunk = self
                .conn
                .read(handle, want)
                .map_err(|e| GridavError::rpc(format!("read {}", self.path), e))?;
            if chunk.is_empty() {
                break;
            }
            sent += chunk.len() as u64;
            sink.send(Bytes::from(chunk))?;
        }
        Ok(sent)
    }

    /// Close the read handle. Errors are only logged.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.conn.close(handle) {
                warn!(path = %self.path, error = %e, "Closing read handle failed");
            }
        }
    }
}

impl Drop for DownloadStream<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
