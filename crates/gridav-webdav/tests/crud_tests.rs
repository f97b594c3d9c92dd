//! Basic CRUD tests for the WebDAV front end.
//!
//! Covers PUT, GET, HEAD, MKCOL and DELETE against the in-memory grid,
//! including the status codes WebDAV clients rely on.

mod common;

use common::{
    HOME, TestServer, all_byte_values, assert_file_content, assert_grid_content,
    assert_not_found, assert_status, deep_path, random_bytes, special_filename,
    unicode_filename,
};
use gridav_core::GridavConfig;
use gridav_core::memory::Operation;
use gridav_core::RpcError;
use reqwest::{Method, StatusCode};

// ============================================================================
// PUT / GET
// ============================================================================

#[tokio::test]
async fn test_put_get_roundtrip() {
    let server = TestServer::new().await;
    let content = random_bytes(100_000);

    let resp = server.put("/data.bin", content.clone()).await;
    assert_status(resp.status(), StatusCode::CREATED, "PUT new object");

    assert_file_content(&server, "/data.bin", &content).await;
    assert_grid_content(&server, "/data.bin", &content);
}

#[tokio::test]
async fn test_put_overwrite_returns_no_content() {
    let server = TestServer::new().await;
    server.put_ok("/file.txt", "first version").await;

    let resp = server.put("/file.txt", "second").await;
    assert_status(resp.status(), StatusCode::NO_CONTENT, "PUT overwrite");

    assert_file_content(&server, "/file.txt", b"second").await;
}

#[tokio::test]
async fn test_put_empty_file() {
    let server = TestServer::new().await;
    server.put_ok("/empty", Vec::new()).await;

    let resp = server.get("/empty").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-length"], "0");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_put_binary_content() {
    let server = TestServer::new().await;
    let content = all_byte_values();
    server.put_ok("/bytes.bin", content.clone()).await;
    assert_file_content(&server, "/bytes.bin", &content).await;
}

#[tokio::test]
async fn test_put_missing_parent_conflicts() {
    let server = TestServer::new().await;
    let resp = server.put("/no/such/parent.txt", "x").await;
    assert_status(resp.status(), StatusCode::CONFLICT, "PUT without parent");
    assert!(!server.grid.exists(&TestServer::grid_path("/no")));
}

#[tokio::test]
async fn test_put_onto_collection_not_allowed() {
    let server = TestServer::new().await;
    server.mkcol_ok("/dir").await;
    let resp = server.put("/dir", "x").await;
    assert_status(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "PUT onto collection");
}

#[tokio::test]
async fn test_put_with_content_range_not_implemented() {
    let server = TestServer::new().await;
    let resp = server
        .request(Method::PUT, "/partial.bin")
        .header("Content-Range", "bytes 0-3/10")
        .body("abcd")
        .send()
        .await
        .unwrap();
    assert_status(resp.status(), StatusCode::NOT_IMPLEMENTED, "partial PUT");
    assert!(!server.grid.exists(&TestServer::grid_path("/partial.bin")));
}

#[tokio::test]
async fn test_put_aggregates_writes() {
    let config = GridavConfig::default().with_buffer_sizes(64 * 1024, 64 * 1024);
    let server = TestServer::with_config(config).await;
    server.grid.reset_stats();

    server.put_ok("/small.bin", random_bytes(10_000)).await;
    assert_eq!(server.grid.stats().writes, 1);
}

#[tokio::test]
async fn test_put_with_tmpfile_rollback() {
    let config = GridavConfig::default().with_tmpfile_rollback(true);
    let server = TestServer::with_config(config).await;
    server.put_ok("/report.txt", "v1").await;
    server.put_ok("/report.txt", "v2").await;

    assert_grid_content(&server, "/report.txt", b"v2");
    let leftovers: Vec<_> = server
        .grid
        .paths_under(HOME)
        .into_iter()
        .filter(|p| p.contains(".gridav-tx-"))
        .collect();
    assert!(leftovers.is_empty(), "temporary files left: {leftovers:?}");
}

#[tokio::test]
async fn test_put_failure_keeps_original_with_tmpfile_rollback() {
    let config = GridavConfig::default().with_tmpfile_rollback(true);
    let server = TestServer::with_config(config).await;
    server.put_ok("/keep.txt", "original").await;

    server.grid.inject_fault(
        Operation::Write,
        RpcError::Status {
            code: -27000,
            message: "disk full".into(),
        },
    );
    let resp = server.put("/keep.txt", "replacement").await;
    assert_status(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "failed PUT");
    assert_eq!(resp.text().await.unwrap(), "Internal server error");

    assert_grid_content(&server, "/keep.txt", b"original");
}

#[tokio::test]
async fn test_special_and_unicode_names() {
    let server = TestServer::new().await;
    for name in [special_filename(), unicode_filename()] {
        let path = format!("/{name}");
        server.put_ok(&path, name.clone()).await;
        assert_file_content(&server, &path, name.as_bytes()).await;
        assert!(server.grid.exists(&TestServer::grid_path(&path)));
    }
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let server = TestServer::new().await;
    assert_not_found(&server, "/missing.txt").await;
}

// ============================================================================
// HEAD / headers
// ============================================================================

#[tokio::test]
async fn test_head_reports_object_headers() {
    let server = TestServer::new().await;
    server.grid.set_clock(1_700_000_000);
    server.put_ok("/doc.txt", "hello world").await;

    let resp = server.head("/doc.txt").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers["content-length"], "11");
    assert_eq!(headers["content-type"], "application/octet-stream");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["last-modified"], "Tue, 14 Nov 2023 22:13:20 GMT");
    assert_eq!(headers["etag"], "\"b-01700000000\"");
    assert!(headers.get("content-disposition").is_none());
}

#[tokio::test]
async fn test_force_download_sets_disposition() {
    let mut config = GridavConfig::default();
    config.dav.force_download = true;
    let server = TestServer::with_config(config).await;
    server.put_ok("/page.html", "<html></html>").await;

    let resp = server.get("/page.html").await;
    assert_eq!(resp.headers()["content-disposition"], "attachment");
}

#[tokio::test]
async fn test_get_collection_lists_children() {
    let server = TestServer::new().await;
    server.mkcol_ok("/photos").await;
    server.put_ok("/photos/cat.jpg", "meow").await;
    server.mkcol_ok("/photos/2024").await;

    let resp = server.get("/photos").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    assert_eq!(resp.headers()["cache-control"], "no-cache");
    assert_eq!(resp.headers()["accept-ranges"], "none");

    let page = resp.text().await.unwrap();
    assert!(page.contains("href=\"/photos/cat.jpg\""), "{page}");
    assert!(page.contains("href=\"/photos/2024/\""), "{page}");
    assert!(page.contains(">2024/</a>"), "{page}");
}

// ============================================================================
// MKCOL
// ============================================================================

#[tokio::test]
async fn test_mkcol_creates_collection() {
    let server = TestServer::new().await;
    server.mkcol_ok("/newdir").await;
    assert!(server.grid.is_collection(&TestServer::grid_path("/newdir")));
}

#[tokio::test]
async fn test_mkcol_existing_not_allowed() {
    let server = TestServer::new().await;
    server.mkcol_ok("/dir").await;
    let resp = server.mkcol("/dir").await;
    assert_status(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "MKCOL twice");

    server.put_ok("/file", "x").await;
    let resp = server.mkcol("/file").await;
    assert_status(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "MKCOL on object");
}

#[tokio::test]
async fn test_mkcol_missing_parent_conflicts() {
    let server = TestServer::new().await;
    let resp = server.mkcol("/a/b").await;
    assert_status(resp.status(), StatusCode::CONFLICT, "MKCOL without parent");
}

#[tokio::test]
async fn test_mkcol_with_body_unsupported() {
    let server = TestServer::new().await;
    let resp = server
        .request(Method::from_bytes(b"MKCOL").unwrap(), "/dir")
        .body("<mkcol/>")
        .send()
        .await
        .unwrap();
    assert_status(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE, "MKCOL with body");
    assert!(!server.grid.exists(&TestServer::grid_path("/dir")));
}

#[tokio::test]
async fn test_deep_tree() {
    let server = TestServer::new().await;
    let path = deep_path(6);
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current = format!("{current}/{segment}");
        server.mkcol_ok(&current).await;
    }
    let file = format!("{path}/leaf.txt");
    server.put_ok(&file, "deep").await;
    assert_file_content(&server, &file, b"deep").await;
}

// ============================================================================
// DELETE
// ============================================================================

#[tokio::test]
async fn test_delete_object() {
    let server = TestServer::new().await;
    server.put_ok("/gone.txt", "bye").await;

    let resp = server.delete("/gone.txt").await;
    assert_status(resp.status(), StatusCode::NO_CONTENT, "DELETE object");
    assert_not_found(&server, "/gone.txt").await;
}

#[tokio::test]
async fn test_delete_collection_is_recursive() {
    let server = TestServer::new().await;
    server.mkcol_ok("/tree").await;
    server.mkcol_ok("/tree/sub").await;
    server.put_ok("/tree/sub/f.txt", "x").await;

    let resp = server.delete("/tree").await;
    assert_status(resp.status(), StatusCode::NO_CONTENT, "DELETE collection");
    assert!(!server.grid.exists(&TestServer::grid_path("/tree")));
    assert!(!server.grid.exists(&TestServer::grid_path("/tree/sub/f.txt")));
}

#[tokio::test]
async fn test_delete_missing_is_not_found() {
    let server = TestServer::new().await;
    let resp = server.delete("/nothing").await;
    assert_status(resp.status(), StatusCode::NOT_FOUND, "DELETE missing");
}

// ============================================================================
// Mount prefix
// ============================================================================

#[tokio::test]
async fn test_mount_prefix_is_stripped() {
    let mut config = GridavConfig::default();
    config.dav.mount_prefix = "/dav".to_string();
    let server = TestServer::with_config(config).await;
    assert!(server.base_url.ends_with("/dav"));

    server.put_ok("/inside.txt", "prefixed").await;
    assert_grid_content(&server, "/inside.txt", b"prefixed");

    let outside = server.base_url.trim_end_matches("/dav").to_string() + "/inside.txt";
    let resp = server
        .new_client()
        .get(outside)
        .basic_auth(common::TEST_USER, Some(common::TEST_PASSWORD))
        .send()
        .await
        .unwrap();
    assert_status(resp.status(), StatusCode::NOT_FOUND, "request outside the mount");
}
