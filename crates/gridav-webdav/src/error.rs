//! Mapping of core errors to HTTP responses.
//!
//! Client errors carry a short explanation. Server-side failures are logged
//! in full and answered with a generic message so that no backend detail
//! reaches the client.

use std::io;
use std::net::SocketAddr;

use gridav_core::GridavError;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use thiserror::Error;
use tracing::{debug, error};

use crate::body::{self, DavBody};

/// Failures while running the HTTP server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// HTTP status for a core error.
pub fn status_for(err: &GridavError) -> StatusCode {
    match err {
        GridavError::AuthFailure => StatusCode::UNAUTHORIZED,
        GridavError::NotFound(_) => StatusCode::NOT_FOUND,
        GridavError::Conflict(_) => StatusCode::CONFLICT,
        GridavError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
        GridavError::BadRequest(_) => StatusCode::BAD_REQUEST,
        GridavError::Forbidden(_) => StatusCode::FORBIDDEN,
        GridavError::Locked(_) => StatusCode::LOCKED,
        GridavError::NotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        GridavError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
        GridavError::LengthLimit { .. }
        | GridavError::Rpc { .. }
        | GridavError::Infrastructure(_)
        | GridavError::StaleCollectionRemnant { .. }
        | GridavError::Configuration(_)
        | GridavError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the response for `err`. Unauthorized responses carry a Basic
/// challenge for `realm`.
pub fn error_response(err: &GridavError, realm: &str) -> Response<DavBody> {
    let status = status_for(err);
    let message = match err {
        GridavError::AuthFailure => "Authentication required".to_string(),
        GridavError::NotAllowed(message) => message.clone(),
        GridavError::Unimplemented(what) => format!("Not implemented: {what}"),
        e if status.is_server_error() => {
            error!(error = %e, "Request failed");
            "Internal server error".to_string()
        }
        e => {
            debug!(error = %e, status = %status, "Request rejected");
            e.to_string()
        }
    };

    let mut resp = body::text(status, &message);
    if status == StatusCode::UNAUTHORIZED {
        if let Ok(value) = HeaderValue::try_from(format!("Basic realm=\"{realm}\"")) {
            resp.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    resp
}
