//! Grid store RPC interface.
//!
//! A grid store is reached through a stateful connection that answers one
//! request at a time. [`GridConnection`] describes the calls the bridge
//! issues over such a connection and [`GridConnector`] opens new ones. The
//! network client of a concrete store plugs in behind these traits; the
//! bundled [`MemoryGrid`](crate::memory::MemoryGrid) implements them in
//! process.

use thiserror::Error;

use crate::config::GridSettings;

/// Hard ceiling on absolute grid paths, in bytes.
///
/// The store keeps paths in fixed NUL-terminated buffers of this size, so a
/// path must be strictly shorter than the ceiling.
pub const MAX_PATH_LEN: usize = 1024 + 64;

/// Object kind reported by a stat or listing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    DataObject,
    Collection,
    /// Any kind code the bridge does not understand.
    Other(i32),
}

/// Result of a stat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub kind: ObjectKind,
    pub size: u64,
    /// Creation time as the store reports it: decimal epoch seconds.
    pub create_time: String,
    /// Modification time as the store reports it: decimal epoch seconds.
    pub modify_time: String,
}

/// One row of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub kind: ObjectKind,
    /// Data object name for objects, full collection path for sub-collections.
    pub name: String,
    pub size: u64,
    pub create_time: String,
    pub modify_time: String,
}

impl CollectionEntry {
    /// The single path segment this entry adds below its parent.
    pub fn leaf_name(&self) -> &str {
        match self.kind {
            ObjectKind::Collection => crate::path::basename(&self.name),
            _ => &self.name,
        }
    }
}

/// Descriptor of an open data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub i32);

/// Descriptor of an open collection listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListingHandle(pub i32);

/// How a data object is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// Write-only with the create flag, optionally truncating.
    Write { truncate: bool },
}

/// Which rename RPC variant to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameKind {
    Collection,
    DataObject,
}

/// Outcome of the transport negotiation performed while connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// Server and client agreed on a secure channel.
    Secure,
    Plain,
}

/// Classified failure of a single RPC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("no such data object or collection")]
    NotFound,

    #[error("target already exists")]
    AlreadyExists,

    #[error("authentication denied")]
    AuthDenied,

    #[error("collection is not empty")]
    CollectionNotEmpty,

    /// The storage resource refused a rename at the physical level.
    #[error("file rename failed on the storage resource")]
    FileRenameFailed,

    #[error("cannot connect to {0}")]
    CannotConnect(String),

    #[error("connection is closed")]
    Disconnected,

    #[error("status {code}: {message}")]
    Status { code: i32, message: String },
}

/// A single stateful connection to the grid store.
///
/// Calls are strictly sequential. Paths are absolute grid paths that the
/// caller has already checked against [`MAX_PATH_LEN`].
pub trait GridConnection: Send {
    /// Result of the negotiation performed at connect time.
    fn negotiation(&self) -> Negotiation;

    /// Whether the channel is currently secured.
    fn is_secure(&self) -> bool;

    fn start_secure(&mut self) -> Result<(), RpcError>;

    fn end_secure(&mut self) -> Result<(), RpcError>;

    /// Authenticate the connection's user with a password.
    fn login_password(&mut self, password: &str) -> Result<(), RpcError>;

    /// Trade a password for a temporary one valid for `ttl_hours`.
    fn request_temporary_password(
        &mut self,
        password: &str,
        ttl_hours: u32,
    ) -> Result<String, RpcError>;

    fn stat(&mut self, path: &str) -> Result<ObjectStat, RpcError>;

    /// Open an existing data object.
    fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        resource: Option<&str>,
    ) -> Result<ObjectHandle, RpcError>;

    /// Create a data object and open it for writing.
    fn create(&mut self, path: &str, resource: Option<&str>) -> Result<ObjectHandle, RpcError>;

    /// Read up to `len` bytes. An empty result means end of object.
    fn read(&mut self, handle: ObjectHandle, len: usize) -> Result<Vec<u8>, RpcError>;

    /// Write a buffer, returning the number of bytes accepted.
    fn write(&mut self, handle: ObjectHandle, data: &[u8]) -> Result<usize, RpcError>;

    /// Seek to an absolute offset.
    fn seek(&mut self, handle: ObjectHandle, offset: u64) -> Result<u64, RpcError>;

    fn close(&mut self, handle: ObjectHandle) -> Result<(), RpcError>;

    /// Remove a data object. `force` bypasses the trash.
    fn unlink(&mut self, path: &str, force: bool) -> Result<(), RpcError>;

    /// Rename within the store. Never overwrites an existing target.
    fn rename(&mut self, from: &str, to: &str, kind: RenameKind) -> Result<(), RpcError>;

    /// Server-side copy of a data object. `force` overwrites the target.
    fn copy_object(
        &mut self,
        from: &str,
        to: &str,
        resource: Option<&str>,
        force: bool,
    ) -> Result<(), RpcError>;

    fn create_collection(&mut self, path: &str) -> Result<(), RpcError>;

    fn remove_collection(&mut self, path: &str, recursive: bool, force: bool)
    -> Result<(), RpcError>;

    fn open_listing(&mut self, path: &str) -> Result<ListingHandle, RpcError>;

    /// Next listing row, or `None` once the listing is exhausted.
    fn read_listing(&mut self, handle: ListingHandle) -> Result<Option<CollectionEntry>, RpcError>;

    fn close_listing(&mut self, handle: ListingHandle) -> Result<(), RpcError>;

    /// Close the connection. Further calls fail with [`RpcError::Disconnected`].
    fn disconnect(&mut self);
}

/// Opens connections to a grid store.
pub trait GridConnector: Send + Sync {
    /// Connect as `username`. The connection is not yet authenticated.
    fn connect(
        &self,
        settings: &GridSettings,
        username: &str,
    ) -> Result<Box<dyn GridConnection>, RpcError>;
}
