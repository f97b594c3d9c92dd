//! Test server harness for WebDAV integration tests.
//!
//! `TestServer` runs the real HTTP server over an in-memory grid with one
//! registered user and offers HTTP convenience methods that authenticate as
//! that user.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gridav_core::lock::LockProviderKind;
use gridav_core::{GridavConfig, LockProvider, MemoryGrid};
use gridav_webdav::{DavHandler, ServerConfig, WebDavServer};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

pub const TEST_ZONE: &str = "tempZone";
pub const TEST_USER: &str = "alice";
pub const TEST_PASSWORD: &str = "secret";

/// Grid path of the test user's home collection, the default mount root.
pub const HOME: &str = "/tempZone/home/alice";

/// Minimal `lockinfo` body, as sent by most clients.
const LOCK_INFO: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:alice@example.org</D:href></D:owner>
</D:lockinfo>"#;

/// URL-encode a path for use in request lines and Destination headers.
fn url_encode_path(path: &str) -> String {
    let mut result = String::with_capacity(path.len() * 3);
    for c in path.chars() {
        let unreserved = matches!(
            c,
            '-' | '_' | '.' | '~' | '/' | ':' | '@' | '!' | '$' | '\'' | '(' | ')' | '*' | '+'
                | ',' | ';' | '='
        );
        if c.is_ascii_alphanumeric() || unreserved {
            result.push(c);
        } else {
            for byte in c.to_string().as_bytes() {
                result.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    result
}

/// Running server plus the grid behind it.
pub struct TestServer {
    server: WebDavServer,
    client: Client,
    /// The in-memory grid store, for seeding and inspecting state.
    pub grid: MemoryGrid,
    /// Base URL including the mount prefix.
    pub base_url: String,
}

impl TestServer {
    /// Server with default configuration.
    pub async fn new() -> Self {
        Self::with_config(GridavConfig::default()).await
    }

    pub async fn with_config(config: GridavConfig) -> Self {
        Self::start(config, None).await
    }

    /// Server that reports lock-null resources from `locks`.
    pub async fn with_locks(locks: Arc<dyn LockProvider>) -> Self {
        Self::start(GridavConfig::default(), Some(locks)).await
    }

    /// Server configured with the in-process lock provider, which serves
    /// LOCK and UNLOCK.
    pub async fn with_local_locks() -> Self {
        let mut config = GridavConfig::default();
        config.dav.lock_provider = LockProviderKind::Local;
        Self::with_config(config).await
    }

    async fn start(config: GridavConfig, locks: Option<Arc<dyn LockProvider>>) -> Self {
        let grid = MemoryGrid::new(TEST_ZONE);
        grid.add_user(TEST_USER, TEST_PASSWORD);

        let prefix = config.dav.mount_prefix.trim_end_matches('/').to_string();
        let mut handler = DavHandler::new(Arc::new(grid.clone()), config);
        if let Some(locks) = locks {
            handler = handler.with_lock_provider(locks);
        }

        let server = WebDavServer::start(handler, ServerConfig::default())
            .await
            .expect("Failed to start WebDAV server");
        let base_url = format!("{}{prefix}", server.url());

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        let test_server = Self {
            server,
            client,
            grid,
            base_url,
        };
        test_server.wait_ready().await;
        test_server
    }

    async fn wait_ready(&self) {
        for _ in 0..50 {
            if let Ok(resp) = self.request(Method::OPTIONS, "/").send().await {
                if resp.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("Server did not become ready in time");
    }

    /// Build a full URL from a protocol path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, url_encode_path(path))
    }

    /// Grid path of a protocol path under the default mount root.
    pub fn grid_path(path: &str) -> String {
        format!("{HOME}{path}")
    }

    /// Request authenticated as the test user.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(TEST_USER, Some(TEST_PASSWORD))
    }

    /// Request without an `Authorization` header.
    pub fn request_anonymous(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    /// Fresh client, and so a fresh TCP connection and grid session.
    pub fn new_client(&self) -> Client {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client")
    }

    pub fn sessions(&self) -> usize {
        self.server.handler().sessions().len()
    }

    // ========== HTTP Convenience Methods ==========

    pub async fn get(&self, path: &str) -> Response {
        self.request(Method::GET, path)
            .send()
            .await
            .expect("GET request failed")
    }

    /// GET a file's contents as bytes.
    pub async fn get_bytes(&self, path: &str) -> Result<Bytes, (StatusCode, String)> {
        let resp = self.get(path).await;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.bytes().await.expect("Failed to read response bytes"))
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err((status, body))
        }
    }

    pub async fn get_range(&self, path: &str, range: &str) -> Response {
        self.request(Method::GET, path)
            .header("Range", range)
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn head(&self, path: &str) -> Response {
        self.request(Method::HEAD, path)
            .send()
            .await
            .expect("HEAD request failed")
    }

    pub async fn put(&self, path: &str, body: impl Into<reqwest::Body>) -> Response {
        self.request(Method::PUT, path)
            .body(body)
            .send()
            .await
            .expect("PUT request failed")
    }

    /// PUT file contents and assert success.
    pub async fn put_ok(&self, path: &str, body: impl Into<reqwest::Body>) {
        let resp = self.put(path, body).await;
        let status = resp.status();
        assert!(
            status == StatusCode::CREATED || status == StatusCode::NO_CONTENT,
            "PUT {} failed with status {}: {}",
            path,
            status,
            resp.text().await.unwrap_or_default()
        );
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.request(Method::DELETE, path)
            .send()
            .await
            .expect("DELETE request failed")
    }

    pub async fn mkcol(&self, path: &str) -> Response {
        self.request(Method::from_bytes(b"MKCOL").unwrap(), path)
            .send()
            .await
            .expect("MKCOL request failed")
    }

    /// MKCOL and assert success.
    pub async fn mkcol_ok(&self, path: &str) {
        let resp = self.mkcol(path).await;
        let status = resp.status();
        assert_eq!(
            status,
            StatusCode::CREATED,
            "MKCOL {} failed: {}",
            path,
            resp.text().await.unwrap_or_default()
        );
    }

    pub async fn propfind(&self, path: &str, depth: &str) -> Response {
        self.request(Method::from_bytes(b"PROPFIND").unwrap(), path)
            .header("Depth", depth)
            .send()
            .await
            .expect("PROPFIND request failed")
    }

    /// PROPFIND and return body as string.
    pub async fn propfind_body(&self, path: &str, depth: &str) -> (StatusCode, String) {
        let resp = self.propfind(path, depth).await;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        (status, body)
    }

    /// PROPFIND with an XML request body.
    pub async fn propfind_xml(&self, path: &str, depth: &str, xml: &str) -> (StatusCode, String) {
        let resp = self
            .request(Method::from_bytes(b"PROPFIND").unwrap(), path)
            .header("Depth", depth)
            .header("Content-Type", "application/xml")
            .body(xml.to_string())
            .send()
            .await
            .expect("PROPFIND request failed");
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        (status, body)
    }

    pub async fn copy(&self, from: &str, to: &str, overwrite: bool) -> Response {
        self.request(Method::from_bytes(b"COPY").unwrap(), from)
            .header("Destination", self.url(to))
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await
            .expect("COPY request failed")
    }

    pub async fn move_(&self, from: &str, to: &str, overwrite: bool) -> Response {
        self.request(Method::from_bytes(b"MOVE").unwrap(), from)
            .header("Destination", self.url(to))
            .header("Overwrite", if overwrite { "T" } else { "F" })
            .send()
            .await
            .expect("MOVE request failed")
    }

    pub async fn lock(&self, path: &str) -> Response {
        self.request(Method::from_bytes(b"LOCK").unwrap(), path)
            .header("Content-Type", "application/xml")
            .header("Timeout", "Second-3600")
            .body(LOCK_INFO)
            .send()
            .await
            .expect("LOCK request failed")
    }

    /// LOCK and return the token from the `Lock-Token` header.
    pub async fn lock_ok(&self, path: &str) -> String {
        let resp = self.lock(path).await;
        assert_eq!(resp.status(), StatusCode::OK, "LOCK {path} failed");
        resp.headers()["lock-token"]
            .to_str()
            .expect("Lock-Token is not ASCII")
            .trim_matches(|c| c == '<' || c == '>')
            .to_string()
    }

    pub async fn unlock(&self, path: &str, token: &str) -> Response {
        self.request(Method::from_bytes(b"UNLOCK").unwrap(), path)
            .header("Lock-Token", format!("<{token}>"))
            .send()
            .await
            .expect("UNLOCK request failed")
    }

    /// Stop the server explicitly (otherwise happens on drop).
    pub async fn stop(self) {
        self.server.stop().await;
    }
}
