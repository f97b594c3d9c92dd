//! In-memory grid store.
//!
//! [`MemoryGrid`] keeps a collection tree in process and hands out
//! [`MemoryConnection`]s that follow the same rules as a networked store:
//! calls need an authenticated connection, renames never overwrite, and
//! creating below a missing collection fails. It also counts calls and can
//! inject one-shot faults, which makes it the backend for tests and for the
//! demo server.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::config::GridSettings;
use crate::path;
use crate::rpc::{
    CollectionEntry, GridConnection, GridConnector, ListingHandle, Negotiation, ObjectHandle,
    ObjectKind, ObjectStat, OpenMode, RenameKind, RpcError,
};

/// Status code reported for calls on an unauthenticated connection.
const NOT_AUTHENTICATED: i32 = -827000;
/// Status code reported for a bad object or listing descriptor.
const BAD_DESCRIPTOR: i32 = -345000;
/// Status code reported when an operation does not fit the object kind.
const WRONG_KIND: i32 = -310000;
/// Status code reported when a temporary password is requested in the clear.
const SECURE_CHANNEL_REQUIRED: i32 = -2103000;

/// RPCs that can be made to fail with [`MemoryGrid::inject_fault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Login,
    TemporaryPassword,
    StartSecure,
    EndSecure,
    Stat,
    Open,
    Create,
    Read,
    Write,
    Seek,
    Close,
    Unlink,
    Rename,
    Copy,
    CreateCollection,
    RemoveCollection,
    OpenListing,
    ReadListing,
}

/// Call counters, useful to assert on RPC traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridStats {
    pub connects: u64,
    pub logins: u64,
    pub disconnects: u64,
    pub secure_starts: u64,
    pub secure_ends: u64,
    pub temporary_passwords: u64,
    pub stats: u64,
    pub opens: u64,
    pub creates: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_written: u64,
    pub unlinks: u64,
    pub renames: u64,
    pub copies: u64,
}

#[derive(Debug, Clone)]
enum Entry {
    Collection,
    Object {
        data: Vec<u8>,
        resource: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Node {
    entry: Entry,
    create_time: i64,
    modify_time: i64,
}

impl Node {
    fn kind(&self) -> ObjectKind {
        match self.entry {
            Entry::Collection => ObjectKind::Collection,
            Entry::Object { .. } => ObjectKind::DataObject,
        }
    }

    fn size(&self) -> u64 {
        match &self.entry {
            Entry::Collection => 0,
            Entry::Object { data, .. } => data.len() as u64,
        }
    }
}

#[derive(Debug)]
struct GridState {
    zone: String,
    nodes: BTreeMap<String, Node>,
    users: HashMap<String, String>,
    /// Temporary password -> username.
    temporary: HashMap<String, String>,
    last_ttl: Option<u32>,
    faults: HashMap<Operation, RpcError>,
    stale_directories: HashSet<String>,
    negotiation: Negotiation,
    reachable: bool,
    clock: Option<i64>,
    next_descriptor: i32,
    stats: GridStats,
}

impl GridState {
    fn now(&self) -> i64 {
        self.clock
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn descriptor(&mut self) -> i32 {
        self.next_descriptor += 1;
        self.next_descriptor
    }

    fn insert_collection(&mut self, path: &str) {
        let now = self.now();
        self.nodes.entry(path.to_string()).or_insert(Node {
            entry: Entry::Collection,
            create_time: now,
            modify_time: now,
        });
    }

    fn require_parent_collection(&self, path: &str) -> Result<(), RpcError> {
        let parent = path::parent(path).ok_or(RpcError::AlreadyExists)?;
        match self.nodes.get(parent) {
            Some(node) if node.kind() == ObjectKind::Collection => Ok(()),
            Some(_) => Err(RpcError::Status {
                code: WRONG_KIND,
                message: format!("{parent} is not a collection"),
            }),
            None => Err(RpcError::NotFound),
        }
    }

    fn touch(&mut self, path: &str) {
        let now = self.now();
        if let Some(node) = self.nodes.get_mut(path) {
            node.modify_time = now;
        }
    }

    fn subtree_keys(&self, root: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| k.as_str() == root || path::is_ancestor(root, k))
            .cloned()
            .collect()
    }
}

/// An in-process grid store shared by all its connections.
#[derive(Clone)]
pub struct MemoryGrid {
    state: Arc<Mutex<GridState>>,
}

impl MemoryGrid {
    /// Create a store with `/`, `/<zone>` and `/<zone>/home`.
    pub fn new(zone: &str) -> Self {
        let mut state = GridState {
            zone: zone.to_string(),
            nodes: BTreeMap::new(),
            users: HashMap::new(),
            temporary: HashMap::new(),
            last_ttl: None,
            faults: HashMap::new(),
            stale_directories: HashSet::new(),
            negotiation: Negotiation::Plain,
            reachable: true,
            clock: None,
            next_descriptor: 2,
            stats: GridStats::default(),
        };
        state.insert_collection("/");
        state.insert_collection(&format!("/{zone}"));
        state.insert_collection(&format!("/{zone}/home"));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register a user and create their home collection.
    pub fn add_user(&self, username: &str, password: &str) {
        let mut state = self.state.lock();
        state.users.insert(username.to_string(), password.to_string());
        let home = format!("/{}/home/{username}", state.zone);
        state.insert_collection(&home);
    }

    /// Transport negotiation result handed to new connections.
    pub fn set_negotiation(&self, negotiation: Negotiation) {
        self.state.lock().negotiation = negotiation;
    }

    /// Make new connection attempts fail as if the host were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Pin the clock used for timestamps.
    pub fn set_clock(&self, epoch_seconds: i64) {
        self.state.lock().clock = Some(epoch_seconds);
    }

    /// Make the next call of `op` fail with `error`.
    pub fn inject_fault(&self, op: Operation, error: RpcError) {
        self.state.lock().faults.insert(op, error);
    }

    /// Simulate a physical directory left behind at `path` by a removed
    /// collection: renames onto it fail at the storage level.
    pub fn leave_stale_directory(&self, path: &str) {
        self.state.lock().stale_directories.insert(path.to_string());
    }

    pub fn stats(&self) -> GridStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = GridStats::default();
    }

    /// TTL of the most recent temporary password request.
    pub fn last_temporary_ttl(&self) -> Option<u32> {
        self.state.lock().last_ttl
    }

    /// Create a collection and any missing ancestors.
    pub fn make_collection_all(&self, path: &str) {
        let mut state = self.state.lock();
        let mut current = String::new();
        state.insert_collection("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            state.insert_collection(&current);
        }
    }

    /// Store an object, creating missing ancestors.
    pub fn put_object(&self, path: &str, data: &[u8]) {
        if let Some(parent) = path::parent(path) {
            self.make_collection_all(parent);
        }
        let mut state = self.state.lock();
        let now = state.now();
        state.nodes.insert(
            path.to_string(),
            Node {
                entry: Entry::Object {
                    data: data.to_vec(),
                    resource: None,
                },
                create_time: now,
                modify_time: now,
            },
        );
    }

    pub fn object_data(&self, path: &str) -> Option<Vec<u8>> {
        match &self.state.lock().nodes.get(path)?.entry {
            Entry::Object { data, .. } => Some(data.clone()),
            Entry::Collection => None,
        }
    }

    /// Resource an object was created on, if one was requested.
    pub fn object_resource(&self, path: &str) -> Option<String> {
        match &self.state.lock().nodes.get(path)?.entry {
            Entry::Object { resource, .. } => resource.clone(),
            Entry::Collection => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    pub fn is_collection(&self, path: &str) -> bool {
        self.state
            .lock()
            .nodes
            .get(path)
            .is_some_and(|n| n.kind() == ObjectKind::Collection)
    }

    /// Every path currently below `root`, in order.
    pub fn paths_under(&self, root: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .nodes
            .keys()
            .filter(|k| path::is_ancestor(root, k))
            .cloned()
            .collect()
    }
}

impl GridConnector for MemoryGrid {
    fn connect(
        &self,
        settings: &GridSettings,
        username: &str,
    ) -> Result<Box<dyn GridConnection>, RpcError> {
        let mut state = self.state.lock();
        if let Some(err) = state.faults.remove(&Operation::Connect) {
            return Err(err);
        }
        if !state.reachable {
            return Err(RpcError::CannotConnect(format!(
                "{}:{}",
                settings.host, settings.port
            )));
        }
        state.stats.connects += 1;
        let negotiation = state.negotiation;
        debug!(user = %username, ?negotiation, "Memory grid connection opened");
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            username: username.to_string(),
            authenticated: false,
            negotiation,
            secure: negotiation == Negotiation::Secure,
            connected: true,
            objects: HashMap::new(),
            listings: HashMap::new(),
        }))
    }
}

#[derive(Debug)]
struct OpenObject {
    path: String,
    offset: usize,
    writable: bool,
}

/// A connection to a [`MemoryGrid`].
pub struct MemoryConnection {
    state: Arc<Mutex<GridState>>,
    username: String,
    authenticated: bool,
    negotiation: Negotiation,
    secure: bool,
    connected: bool,
    objects: HashMap<i32, OpenObject>,
    listings: HashMap<i32, VecDeque<CollectionEntry>>,
}

/// Lock the shared state for one call, applying any injected fault.
fn enter(
    state: &Mutex<GridState>,
    connected: bool,
    op: Operation,
) -> Result<MutexGuard<'_, GridState>, RpcError> {
    if !connected {
        return Err(RpcError::Disconnected);
    }
    let mut guard = state.lock();
    if let Some(err) = guard.faults.remove(&op) {
        trace!(?op, error = %err, "Injected fault");
        return Err(err);
    }
    Ok(guard)
}

impl MemoryConnection {
    fn require_auth(&self) -> Result<(), RpcError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(RpcError::Status {
                code: NOT_AUTHENTICATED,
                message: "connection is not authenticated".to_string(),
            })
        }
    }

    fn bad_descriptor(fd: i32) -> RpcError {
        RpcError::Status {
            code: BAD_DESCRIPTOR,
            message: format!("bad descriptor {fd}"),
        }
    }
}

impl GridConnection for MemoryConnection {
    fn negotiation(&self) -> Negotiation {
        self.negotiation
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn start_secure(&mut self) -> Result<(), RpcError> {
        let mut state = enter(&self.state, self.connected, Operation::StartSecure)?;
        state.stats.secure_starts += 1;
        self.secure = true;
        Ok(())
    }

    fn end_secure(&mut self) -> Result<(), RpcError> {
        let mut state = enter(&self.state, self.connected, Operation::EndSecure)?;
        state.stats.secure_ends += 1;
        self.secure = false;
        Ok(())
    }

    fn login_password(&mut self, password: &str) -> Result<(), RpcError> {
        let mut state = enter(&self.state, self.connected, Operation::Login)?;
        state.stats.logins += 1;
        let direct = state
            .users
            .get(&self.username)
            .is_some_and(|p| p == password);
        let temporary = state
            .temporary
            .get(password)
            .is_some_and(|u| u == &self.username);
        if direct || temporary {
            self.authenticated = true;
            Ok(())
        } else {
            Err(RpcError::AuthDenied)
        }
    }

    fn request_temporary_password(
        &mut self,
        password: &str,
        ttl_hours: u32,
    ) -> Result<String, RpcError> {
        let mut state = enter(&self.state, self.connected, Operation::TemporaryPassword)?;
        if !self.secure {
            return Err(RpcError::Status {
                code: SECURE_CHANNEL_REQUIRED,
                message: "temporary passwords require a secure channel".to_string(),
            });
        }
        if state.users.get(&self.username).is_none_or(|p| p != password) {
            return Err(RpcError::AuthDenied);
        }
        state.stats.temporary_passwords += 1;
        state.last_ttl = Some(ttl_hours);
        let token = format!("tmp-{}-{}", self.username, state.descriptor());
        state.temporary.insert(token.clone(), self.username.clone());
        Ok(token)
    }

    fn stat(&mut self, path: &str) -> Result<ObjectStat, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Stat)?;
        state.stats.stats += 1;
        let node = state.nodes.get(path).ok_or(RpcError::NotFound)?;
        Ok(ObjectStat {
            kind: node.kind(),
            size: node.size(),
            create_time: format!("{:011}", node.create_time),
            modify_time: format!("{:011}", node.modify_time),
        })
    }

    fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        _resource: Option<&str>,
    ) -> Result<ObjectHandle, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Open)?;
        state.stats.opens += 1;
        let node = state.nodes.get_mut(path).ok_or(RpcError::NotFound)?;
        let Entry::Object { data, .. } = &mut node.entry else {
            return Err(RpcError::Status {
                code: WRONG_KIND,
                message: format!("{path} is a collection"),
            });
        };
        let writable = match mode {
            OpenMode::ReadOnly => false,
            OpenMode::Write { truncate } => {
                if truncate {
                    data.clear();
                }
                true
            }
        };
        let fd = state.descriptor();
        self.objects.insert(
            fd,
            OpenObject {
                path: path.to_string(),
                offset: 0,
                writable,
            },
        );
        Ok(ObjectHandle(fd))
    }

    fn create(&mut self, path: &str, resource: Option<&str>) -> Result<ObjectHandle, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Create)?;
        state.stats.creates += 1;
        state.require_parent_collection(path)?;
        if state.nodes.contains_key(path) {
            return Err(RpcError::AlreadyExists);
        }
        let now = state.now();
        state.nodes.insert(
            path.to_string(),
            Node {
                entry: Entry::Object {
                    data: Vec::new(),
                    resource: resource.map(str::to_string),
                },
                create_time: now,
                modify_time: now,
            },
        );
        let fd = state.descriptor();
        self.objects.insert(
            fd,
            OpenObject {
                path: path.to_string(),
                offset: 0,
                writable: true,
            },
        );
        Ok(ObjectHandle(fd))
    }

    fn read(&mut self, handle: ObjectHandle, len: usize) -> Result<Vec<u8>, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Read)?;
        state.stats.reads += 1;
        let open = self
            .objects
            .get_mut(&handle.0)
            .ok_or_else(|| Self::bad_descriptor(handle.0))?;
        let Some(Node {
            entry: Entry::Object { data, .. },
            ..
        }) = state.nodes.get(&open.path)
        else {
            return Err(RpcError::NotFound);
        };
        let start = open.offset.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        open.offset = end;
        Ok(data[start..end].to_vec())
    }

    fn write(&mut self, handle: ObjectHandle, buf: &[u8]) -> Result<usize, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Write)?;
        state.stats.writes += 1;
        state.stats.bytes_written += buf.len() as u64;
        let now = state.now();
        let open = self
            .objects
            .get_mut(&handle.0)
            .ok_or_else(|| Self::bad_descriptor(handle.0))?;
        if !open.writable {
            return Err(Self::bad_descriptor(handle.0));
        }
        let Some(node) = state.nodes.get_mut(&open.path) else {
            return Err(RpcError::NotFound);
        };
        let Entry::Object { data, .. } = &mut node.entry else {
            return Err(RpcError::NotFound);
        };
        let end = open.offset + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[open.offset..end].copy_from_slice(buf);
        open.offset = end;
        node.modify_time = now;
        Ok(buf.len())
    }

    fn seek(&mut self, handle: ObjectHandle, offset: u64) -> Result<u64, RpcError> {
        self.require_auth()?;
        let _state = enter(&self.state, self.connected, Operation::Seek)?;
        let open = self
            .objects
            .get_mut(&handle.0)
            .ok_or_else(|| Self::bad_descriptor(handle.0))?;
        open.offset = usize::try_from(offset).map_err(|_| RpcError::Status {
            code: BAD_DESCRIPTOR,
            message: format!("offset {offset} out of range"),
        })?;
        Ok(offset)
    }

    fn close(&mut self, handle: ObjectHandle) -> Result<(), RpcError> {
        let _state = enter(&self.state, self.connected, Operation::Close)?;
        self.objects
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| Self::bad_descriptor(handle.0))
    }

    fn unlink(&mut self, path: &str, _force: bool) -> Result<(), RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Unlink)?;
        state.stats.unlinks += 1;
        match state.nodes.get(path).map(Node::kind) {
            Some(ObjectKind::DataObject) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(_) => Err(RpcError::Status {
                code: WRONG_KIND,
                message: format!("{path} is a collection"),
            }),
            None => Err(RpcError::NotFound),
        }
    }

    fn rename(&mut self, from: &str, to: &str, kind: RenameKind) -> Result<(), RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Rename)?;
        state.stats.renames += 1;
        let expected = match kind {
            RenameKind::Collection => ObjectKind::Collection,
            RenameKind::DataObject => ObjectKind::DataObject,
        };
        match state.nodes.get(from).map(Node::kind) {
            Some(actual) if actual == expected => {}
            Some(_) => {
                return Err(RpcError::Status {
                    code: WRONG_KIND,
                    message: format!("{from} does not match the rename variant"),
                });
            }
            None => return Err(RpcError::NotFound),
        }
        if state.nodes.contains_key(to) {
            return Err(RpcError::AlreadyExists);
        }
        if path::is_ancestor(from, to) {
            return Err(RpcError::Status {
                code: WRONG_KIND,
                message: format!("cannot move {from} below itself"),
            });
        }
        state.require_parent_collection(to)?;
        if state.stale_directories.contains(to) {
            return Err(RpcError::FileRenameFailed);
        }
        for key in state.subtree_keys(from) {
            if let Some(node) = state.nodes.remove(&key) {
                let moved = format!("{to}{}", &key[from.len()..]);
                state.nodes.insert(moved, node);
            }
        }
        state.touch(to);
        Ok(())
    }

    fn copy_object(
        &mut self,
        from: &str,
        to: &str,
        resource: Option<&str>,
        force: bool,
    ) -> Result<(), RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::Copy)?;
        state.stats.copies += 1;
        let data = match state.nodes.get(from).map(|n| &n.entry) {
            Some(Entry::Object { data, .. }) => data.clone(),
            Some(Entry::Collection) => {
                return Err(RpcError::Status {
                    code: WRONG_KIND,
                    message: format!("{from} is a collection"),
                });
            }
            None => return Err(RpcError::NotFound),
        };
        state.require_parent_collection(to)?;
        match state.nodes.get(to).map(Node::kind) {
            Some(ObjectKind::DataObject) if force => {}
            Some(_) => return Err(RpcError::AlreadyExists),
            None => {}
        }
        let now = state.now();
        state.nodes.insert(
            to.to_string(),
            Node {
                entry: Entry::Object {
                    data,
                    resource: resource.map(str::to_string),
                },
                create_time: now,
                modify_time: now,
            },
        );
        Ok(())
    }

    fn create_collection(&mut self, path: &str) -> Result<(), RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::CreateCollection)?;
        state.require_parent_collection(path)?;
        if state.nodes.contains_key(path) {
            return Err(RpcError::AlreadyExists);
        }
        state.insert_collection(path);
        Ok(())
    }

    fn remove_collection(
        &mut self,
        path: &str,
        recursive: bool,
        _force: bool,
    ) -> Result<(), RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::RemoveCollection)?;
        match state.nodes.get(path).map(Node::kind) {
            Some(ObjectKind::Collection) => {}
            Some(_) => {
                return Err(RpcError::Status {
                    code: WRONG_KIND,
                    message: format!("{path} is not a collection"),
                });
            }
            None => return Err(RpcError::NotFound),
        }
        let keys = state.subtree_keys(path);
        if !recursive && keys.len() > 1 {
            return Err(RpcError::CollectionNotEmpty);
        }
        for key in keys {
            state.nodes.remove(&key);
        }
        Ok(())
    }

    fn open_listing(&mut self, path: &str) -> Result<ListingHandle, RpcError> {
        self.require_auth()?;
        let mut state = enter(&self.state, self.connected, Operation::OpenListing)?;
        match state.nodes.get(path).map(Node::kind) {
            Some(ObjectKind::Collection) => {}
            Some(_) => {
                return Err(RpcError::Status {
                    code: WRONG_KIND,
                    message: format!("{path} is not a collection"),
                });
            }
            None => return Err(RpcError::NotFound),
        }
        let rows: VecDeque<CollectionEntry> = state
            .nodes
            .iter()
            .filter(|(key, _)| key.as_str() != "/" && path::parent(key) == Some(path))
            .map(|(key, node)| CollectionEntry {
                kind: node.kind(),
                name: match node.kind() {
                    ObjectKind::Collection => key.clone(),
                    _ => path::basename(key).to_string(),
                },
                size: node.size(),
                create_time: format!("{:011}", node.create_time),
                modify_time: format!("{:011}", node.modify_time),
            })
            .collect();
        let fd = state.descriptor();
        self.listings.insert(fd, rows);
        Ok(ListingHandle(fd))
    }

    fn read_listing(&mut self, handle: ListingHandle) -> Result<Option<CollectionEntry>, RpcError> {
        let _state = enter(&self.state, self.connected, Operation::ReadListing)?;
        let rows = self
            .listings
            .get_mut(&handle.0)
            .ok_or_else(|| Self::bad_descriptor(handle.0))?;
        Ok(rows.pop_front())
    }

    fn close_listing(&mut self, handle: ListingHandle) -> Result<(), RpcError> {
        if !self.connected {
            return Err(RpcError::Disconnected);
        }
        self.listings
            .remove(&handle.0)
            .map(|_| ())
            .ok_or_else(|| Self::bad_descriptor(handle.0))
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.authenticated = false;
            self.objects.clear();
            self.listings.clear();
            self.state.lock().stats.disconnects += 1;
            debug!(user = %self.username, "Memory grid connection closed");
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}
