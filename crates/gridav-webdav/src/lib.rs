//! WebDAV front end for grid storage.
//!
//! Serves a grid store over HTTP with hyper. Clients authenticate with HTTP
//! Basic; each TCP connection keeps one logged-in grid session for as long
//! as it stays open.
//!
//! # How It Works
//!
//! 1. [`WebDavServer`] accepts connections and numbers them
//! 2. [`DavHandler`] authenticates each request against the connection's
//!    session and dispatches on the method
//! 3. Grid work runs on tokio's blocking pool through `gridav-core`;
//!    response bodies stream back through bounded channels
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gridav_core::{GridavConfig, MemoryGrid};
//! use gridav_webdav::{DavHandler, ServerConfig, WebDavServer};
//!
//! let grid = MemoryGrid::new("tempZone");
//! grid.add_user("alice", "secret");
//! let handler = DavHandler::new(Arc::new(grid), GridavConfig::default());
//! let server = WebDavServer::start(handler, ServerConfig::default()).await?;
//! println!("Serving at {}", server.url());
//! ```

pub mod auth;
pub mod body;
pub mod error;
mod handler;
mod server;
pub mod uri;

pub use body::DavBody;
pub use error::{ServerError, ServerResult};
pub use handler::{DEFAULT_REALM, DavHandler};
pub use server::{ServerConfig, WebDavServer};
