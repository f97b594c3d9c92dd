//! Core of a WebDAV bridge to grid storage.
//!
//! A grid store keeps collections and data objects under absolute paths and
//! is reached through a stateful connection that answers one RPC at a time.
//! This crate maps protocol requests onto such a store:
//!
//! - [`session`] logs users in and keeps one grid connection per transport
//!   connection
//! - [`path`] and [`resource`] turn protocol paths into grid snapshots
//! - [`stream`] moves object bytes in large batches, with temp-file commit
//! - [`range`] plans HTTP Range responses
//! - [`walk`] traverses collection trees for PROPFIND and COPY
//! - [`ops`] implements MKCOL, COPY, MOVE and DELETE
//!
//! Everything here is synchronous. The [`memory`] module provides an
//! in-process grid store used by tests and by the demo server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gridav_core::{GridavConfig, MemoryGrid, NoLocks, Repository, SessionManager};
//! use gridav_core::session::Credentials;
//! use gridav_core::repo::GridRepository;
//!
//! let grid = MemoryGrid::new("tempZone");
//! grid.add_user("alice", "secret");
//! let config = GridavConfig::default();
//! let manager = SessionManager::new(Arc::new(grid), &config);
//!
//! let mut slot = None;
//! let session = manager.authenticate(&mut slot, Some(&Credentials::new("alice", "secret")))?;
//! let mut repo = GridRepository::new(session, &config, &NoLocks);
//! let home = repo.resolve("/")?;
//! assert!(home.is_collection());
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod memory;
pub mod ops;
pub mod path;
pub mod propfind;
pub mod props;
pub mod range;
pub mod repo;
pub mod resource;
pub mod rpc;
pub mod session;
pub mod stream;
pub mod walk;

pub use config::{AuthScheme, GridavConfig};
pub use error::{GridavError, Result};
pub use lock::{LocalLocks, LockProvider, NoLocks};
pub use memory::MemoryGrid;
pub use repo::{GridRepository, Repository};
pub use resource::{ResourceKind, ResourceNode};
pub use rpc::{GridConnection, GridConnector, RpcError};
pub use session::{Credentials, SessionManager, SessionStore};
