//! Custom assertions for WebDAV integration tests.

use reqwest::StatusCode;

use crate::common::TestServer;

/// Assert that a file exists and has the expected content.
pub async fn assert_file_content(server: &TestServer, path: &str, expected: &[u8]) {
    match server.get_bytes(path).await {
        Ok(actual) => {
            assert_eq!(
                actual.as_ref(),
                expected,
                "File content mismatch at {}: expected {} bytes, got {} bytes",
                path,
                expected.len(),
                actual.len()
            );
        }
        Err((status, body)) => {
            panic!("Failed to read file {path}: status={status}, body={body}");
        }
    }
}

/// Assert that the grid store holds `expected` at the object behind `path`.
pub fn assert_grid_content(server: &TestServer, path: &str, expected: &[u8]) {
    let grid_path = TestServer::grid_path(path);
    let actual = server
        .grid
        .object_data(&grid_path)
        .unwrap_or_else(|| panic!("No data object at {grid_path}"));
    assert_eq!(actual, expected, "Grid content mismatch at {grid_path}");
}

/// Assert that a path returns 404 Not Found.
pub async fn assert_not_found(server: &TestServer, path: &str) {
    let resp = server.get(path).await;
    assert_eq!(
        resp.status(),
        StatusCode::NOT_FOUND,
        "Expected 404 for {}, got {}",
        path,
        resp.status()
    );
}

/// Assert that a response has a specific status code.
pub fn assert_status(actual: StatusCode, expected: StatusCode, context: &str) {
    assert_eq!(
        actual, expected,
        "{context}: expected status {expected}, got {actual}"
    );
}

/// Hrefs of every `<D:response>` in a multistatus body, in order.
pub fn multistatus_hrefs(body: &str) -> Vec<String> {
    body.split("<D:href>")
        .skip(1)
        .filter_map(|rest| rest.split_once("</D:href>").map(|(href, _)| href.to_string()))
        .collect()
}

/// The `<D:response>` element for `href`.
pub fn response_for<'b>(body: &'b str, href: &str) -> &'b str {
    let marker = format!("<D:href>{href}</D:href>");
    let start = body
        .find(&marker)
        .unwrap_or_else(|| panic!("No response for {href} in:\n{body}"));
    let end = body[start..]
        .find("</D:response>")
        .map_or(body.len(), |e| start + e);
    &body[start..end]
}
