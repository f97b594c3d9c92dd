//! Error taxonomy for the bridge core.
//!
//! Every operation in this crate reports a [`GridavError`]. The variants are
//! coarse on purpose: the HTTP layer turns each into one status code, and
//! detail beyond that is only written to the log.

use std::io;

use thiserror::Error;

use crate::rpc::RpcError;

/// Errors produced by the bridge core.
#[derive(Debug, Error)]
pub enum GridavError {
    /// Missing or rejected credentials.
    #[error("authentication failed")]
    AuthFailure,

    /// Resource does not exist where one is required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Structural precondition violated (missing parent, wrong resource type).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Client precondition not met (e.g. `Overwrite: F` on an existing target).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Malformed request, e.g. an unparsable PROPFIND body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The resource carries a lock held by someone else.
    #[error("locked: {0}")]
    Locked(String),

    /// Request is well formed but refused.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A computed path or credential does not fit the store's fixed buffers.
    #[error("{what} exceeds the {limit}-byte limit")]
    LengthLimit { what: String, limit: usize },

    /// RPC failure unrelated to request validity.
    #[error("{context}: {source}")]
    Rpc {
        context: String,
        #[source]
        source: RpcError,
    },

    /// Inconsistent connection or store state with no RPC status attached.
    #[error("{0}")]
    Infrastructure(String),

    /// A rename was refused because a directory left over from a removed
    /// collection still occupies the physical target location.
    #[error(
        "cannot rename onto {path}: a stale directory from a removed collection blocks the storage resource"
    )]
    StaleCollectionRemnant { path: String },

    /// Operation the bridge deliberately does not provide.
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),

    /// Method not allowed on this resource.
    #[error("{0}")]
    NotAllowed(String),

    /// Invalid or unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Writing to the client failed (usually a disconnect).
    #[error("client transport error: {0}")]
    Transport(#[from] io::Error),
}

impl GridavError {
    /// Wrap an RPC failure with a short description of the call.
    pub fn rpc(context: impl Into<String>, source: RpcError) -> Self {
        GridavError::Rpc {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn path_too_long(path: &str) -> Self {
        GridavError::LengthLimit {
            what: format!("path {path}"),
            limit: crate::rpc::MAX_PATH_LEN,
        }
    }

    /// Whether the error is a server-side failure rather than a problem with
    /// the request.
    pub fn is_server_side(&self) -> bool {
        matches!(
            self,
            GridavError::LengthLimit { .. }
                | GridavError::Rpc { .. }
                | GridavError::Infrastructure(_)
                | GridavError::StaleCollectionRemnant { .. }
                | GridavError::Configuration(_)
        )
    }
}

/// Result type for core operations.
pub type Result<T, E = GridavError> = std::result::Result<T, E>;
