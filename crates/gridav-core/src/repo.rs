//! Repository facade.
//!
//! [`Repository`] is the set of calls a protocol front end needs for one
//! request. [`GridRepository`] implements it on top of an authenticated
//! [`Session`], translating protocol paths with the configured exposed root.

use tracing::instrument;

use crate::config::GridavConfig;
use crate::error::Result;
use crate::lock::LockProvider;
use crate::ops;
use crate::path::PathTranslator;
use crate::resource::{self, ResourceNode};
use crate::rpc::GridConnection;
use crate::session::Session;
use crate::stream::{DownloadStream, UploadMode, UploadOptions, UploadStream};
use crate::walk::{self, Visitor, WalkKind};

/// Resource operations for one request.
pub trait Repository {
    /// Resolve a protocol path to a fresh snapshot.
    fn resolve(&mut self, protocol_path: &str) -> Result<ResourceNode>;

    /// Snapshot of the parent collection; `None` at the mount root.
    fn parent(&mut self, node: &ResourceNode) -> Result<Option<ResourceNode>>;

    fn open_upload(&mut self, node: ResourceNode, mode: UploadMode) -> Result<UploadStream<'_>>;

    fn open_download(&mut self, node: &ResourceNode) -> Result<DownloadStream<'_>>;

    fn create_collection(&mut self, node: &mut ResourceNode) -> Result<()>;

    fn copy(&mut self, src: &ResourceNode, dst: &mut ResourceNode, depth: u32) -> Result<()>;

    fn move_to(&mut self, src: &mut ResourceNode, dst: &mut ResourceNode) -> Result<()>;

    fn remove(&mut self, node: &mut ResourceNode) -> Result<()>;

    /// Walk below `root`, including lock-null entries when `kind` asks.
    fn walk(
        &mut self,
        root: &ResourceNode,
        depth: u32,
        kind: WalkKind,
        visitor: &mut dyn Visitor,
    ) -> Result<()>;
}

/// [`Repository`] backed by a grid session.
pub struct GridRepository<'s> {
    conn: &'s mut dyn GridConnection,
    translator: PathTranslator,
    config: &'s GridavConfig,
    locks: &'s dyn LockProvider,
}

impl std::fmt::Debug for GridRepository<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridRepository")
            .field("root", &self.translator.root())
            .finish_non_exhaustive()
    }
}

impl<'s> GridRepository<'s> {
    pub fn new(
        session: &'s mut Session,
        config: &'s GridavConfig,
        locks: &'s dyn LockProvider,
    ) -> Self {
        let translator = PathTranslator::new(
            &config.dav.exposed_root,
            &config.grid.zone,
            session.username(),
        );
        Self {
            conn: session.connection(),
            translator,
            config,
            locks,
        }
    }

    /// Grid path the mount root maps to.
    pub fn root(&self) -> &str {
        self.translator.root()
    }

    fn upload_options(&self, mode: UploadMode) -> UploadOptions {
        UploadOptions {
            mode,
            tmpfile_rollback: self.config.dav.tmpfile_rollback,
            buffer_size: self.config.dav.tx_buffer_size,
            default_resource: self.config.grid.resource().map(str::to_string),
        }
    }
}

impl Repository for GridRepository<'_> {
    #[instrument(level = "debug", skip(self))]
    fn resolve(&mut self, protocol_path: &str) -> Result<ResourceNode> {
        let grid_path = self.translator.translate(protocol_path)?;
        let protocol = if protocol_path.is_empty() { "/" } else { protocol_path };
        resource::stat(self.conn, protocol, &grid_path)
    }

    fn parent(&mut self, node: &ResourceNode) -> Result<Option<ResourceNode>> {
        if node.grid_path == self.translator.root() {
            return Ok(None);
        }
        resource::parent(self.conn, node)
    }

    fn open_upload(&mut self, node: ResourceNode, mode: UploadMode) -> Result<UploadStream<'_>> {
        let options = self.upload_options(mode);
        UploadStream::open(self.conn, node, &options)
    }

    fn open_download(&mut self, node: &ResourceNode) -> Result<DownloadStream<'_>> {
        DownloadStream::open(self.conn, node, self.config.dav.rx_buffer_size)
    }

    fn create_collection(&mut self, node: &mut ResourceNode) -> Result<()> {
        ops::create_collection(self.conn, node)
    }

    fn copy(&mut self, src: &ResourceNode, dst: &mut ResourceNode, depth: u32) -> Result<()> {
        ops::copy(self.conn, src, dst, depth, self.config.grid.resource())
    }

    fn move_to(&mut self, src: &mut ResourceNode, dst: &mut ResourceNode) -> Result<()> {
        ops::move_resource(self.conn, src, dst)
    }

    fn remove(&mut self, node: &mut ResourceNode) -> Result<()> {
        ops::remove(self.conn, node)
    }

    fn walk(
        &mut self,
        root: &ResourceNode,
        depth: u32,
        kind: WalkKind,
        visitor: &mut dyn Visitor,
    ) -> Result<()> {
        walk::walk(self.conn, root, depth, kind, Some(self.locks), visitor)
    }
}
