//! Request URIs to protocol paths.

use gridav_core::{GridavError, Result};
use percent_encoding::percent_decode_str;

/// Decode a request path and strip the mount prefix.
///
/// The result always starts with `/`. Empty and `.` segments are dropped;
/// `..` is refused. Paths outside the mount prefix are not found.
pub fn protocol_path(raw: &str, mount_prefix: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| GridavError::BadRequest("request path is not valid UTF-8".to_string()))?;

    let prefix = mount_prefix.trim_end_matches('/');
    let rest = if prefix.is_empty() {
        &decoded[..]
    } else {
        match decoded.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Err(GridavError::NotFound(decoded.into_owned())),
        }
    };

    let mut path = String::with_capacity(rest.len() + 1);
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(GridavError::Forbidden(
                    "path escapes the mount point".to_string(),
                ));
            }
            s => {
                path.push('/');
                path.push_str(s);
            }
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    Ok(path)
}

/// Protocol path named by a `Destination` header.
///
/// Accepts an absolute URL or an absolute path. The scheme and authority are
/// not checked against the request; only the path matters.
pub fn destination_path(value: &str, mount_prefix: &str) -> Result<String> {
    let value = value.trim();
    let path = match value.find("://") {
        Some(idx) => {
            let after_scheme = &value[idx + 3..];
            after_scheme.find('/').map_or("/", |p| &after_scheme[p..])
        }
        None if value.starts_with('/') => value,
        None => {
            return Err(GridavError::BadRequest(format!(
                "invalid Destination header: {value}"
            )));
        }
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    protocol_path(path, mount_prefix).map_err(|e| match e {
        GridavError::NotFound(_) => {
            GridavError::Forbidden("destination is outside the mount point".to_string())
        }
        other => other,
    })
}
