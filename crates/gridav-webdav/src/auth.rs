//! HTTP Basic authentication.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use gridav_core::{Credentials, GridavError, Result};
use hyper::HeaderMap;
use hyper::header::AUTHORIZATION;

/// Credentials from the `Authorization` header, if any.
///
/// A header using another scheme or that does not decode is treated as a
/// failed login.
pub fn basic_credentials(headers: &HeaderMap) -> Result<Option<Credentials>> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| GridavError::AuthFailure)?;
    let (scheme, encoded) = value.split_once(' ').ok_or(GridavError::AuthFailure)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(GridavError::AuthFailure);
    }
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| GridavError::AuthFailure)?;
    let decoded = String::from_utf8(decoded).map_err(|_| GridavError::AuthFailure)?;
    let (username, password) = decoded.split_once(':').ok_or(GridavError::AuthFailure)?;
    Ok(Some(Credentials::new(username, password)))
}
