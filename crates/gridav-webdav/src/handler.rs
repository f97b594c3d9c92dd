//! WebDAV method dispatch.
//!
//! Every request authenticates against the session of its transport
//! connection and then runs on the blocking pool, where the grid connection
//! lives. Responses come back through a [`Responder`], so GET and PROPFIND
//! can stream their bodies while the grid work is still in progress.

use std::sync::Arc;

use bytes::Bytes;
use gridav_core::lock::{self, provider_for};
use gridav_core::propfind::{self, MultistatusWriter, PropfindRequest, xml_escape};
use gridav_core::props::{LiveProperties, PropertyStore};
use gridav_core::range::{self, RangePlan, RangeRequest};
use gridav_core::session::ConnectionId;
use gridav_core::stream::{BodySink, CloseOutcome, UploadMode};
use gridav_core::walk::{CallType, INFINITE_DEPTH, WalkKind};
use gridav_core::{
    Credentials, GridConnection, GridConnector, GridRepository, GridavConfig, GridavError,
    LockProvider, Repository, ResourceNode, Result, SessionManager, SessionStore,
};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{
    self, ACCEPT_RANGES, ALLOW, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, ETAG, HeaderName, HeaderValue, IF_RANGE, LAST_MODIFIED, RANGE, USER_AGENT,
};
use hyper::{HeaderMap, Request, Response, StatusCode};
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::body::{self, DavBody, RequestBody, Responder};
use crate::error::error_response;
use crate::uri;

/// Realm announced in Basic challenges unless configured otherwise.
pub const DEFAULT_REALM: &str = "gridav";

/// Largest XML request body accepted (PROPFIND, MKCOL).
const MAX_XML_BODY: usize = 1024 * 1024;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE, PROPFIND, PROPPATCH";

/// Methods allowed when the lock provider serves LOCK and UNLOCK.
const ALLOWED_METHODS_LOCKING: &str =
    "OPTIONS, GET, HEAD, PUT, DELETE, MKCOL, COPY, MOVE, PROPFIND, PROPPATCH, LOCK, UNLOCK";

const DAV: HeaderName = HeaderName::from_static("dav");
const DEPTH: HeaderName = HeaderName::from_static("depth");
const DESTINATION: HeaderName = HeaderName::from_static("destination");
const IF: HeaderName = HeaderName::from_static("if");
const LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
const MS_AUTHOR_VIA: HeaderName = HeaderName::from_static("ms-author-via");
const OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
const REQUEST_RANGE: HeaderName = HeaderName::from_static("request-range");

/// Serves WebDAV requests against a grid store.
pub struct DavHandler {
    config: GridavConfig,
    sessions: SessionManager,
    store: SessionStore,
    locks: Arc<dyn LockProvider>,
    props: Arc<dyn PropertyStore>,
    realm: String,
}

impl DavHandler {
    pub fn new(connector: Arc<dyn GridConnector>, config: GridavConfig) -> Self {
        Self {
            sessions: SessionManager::new(connector, &config),
            store: SessionStore::new(),
            locks: provider_for(config.dav.lock_provider),
            props: Arc::new(LiveProperties),
            realm: DEFAULT_REALM.to_string(),
            config,
        }
    }

    /// Use a specific lock provider instead of the configured kind.
    pub fn with_lock_provider(mut self, locks: Arc<dyn LockProvider>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn config(&self) -> &GridavConfig {
        &self.config
    }

    /// Compliance classes for the `DAV` header. Class 2 requires LOCK.
    pub fn dav_classes(&self) -> &'static str {
        if self.locks.supports_locking() {
            "1,2"
        } else {
            "1"
        }
    }

    pub fn allowed_methods(&self) -> &'static str {
        if self.locks.supports_locking() {
            ALLOWED_METHODS_LOCKING
        } else {
            ALLOWED_METHODS
        }
    }

    /// Live sessions, one per transport connection that has authenticated.
    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// Release the session of a closed transport connection. Blocks while
    /// the grid connection disconnects.
    pub fn connection_closed(&self, conn: ConnectionId) {
        self.store.destroy(conn);
    }

    /// Answer one request arriving on transport connection `conn`.
    pub async fn handle(
        self: Arc<Self>,
        req: Request<Incoming>,
        conn: ConnectionId,
    ) -> Response<DavBody> {
        let (parts, body) = req.into_parts();
        debug!(method = %parts.method, uri = %parts.uri, connection = conn, "Request");

        let credentials = match auth::basic_credentials(&parts.headers) {
            Ok(credentials) => credentials,
            Err(e) => return self.fail(&e),
        };
        let path = match uri::protocol_path(parts.uri.path(), &self.config.dav.mount_prefix) {
            Ok(path) => path,
            Err(e) => return self.fail(&e),
        };
        let call = Call {
            conn,
            credentials,
            path,
            headers: parts.headers,
        };

        match parts.method.as_str() {
            "OPTIONS" => Self::options(self, call).await,
            "GET" => Self::get(self, call, true).await,
            "HEAD" => Self::get(self, call, false).await,
            "PUT" => Self::put(self, call, body).await,
            "MKCOL" => Self::mkcol(self, call, body).await,
            "DELETE" => Self::delete(self, call).await,
            "COPY" => Self::copy_or_move(self, call, false).await,
            "MOVE" => Self::copy_or_move(self, call, true).await,
            "PROPFIND" => Self::propfind(self, call, body).await,
            "PROPPATCH" => Self::proppatch(self, call).await,
            "LOCK" if self.locks.supports_locking() => Self::lock(self, call, body).await,
            "UNLOCK" if self.locks.supports_locking() => Self::unlock(self, call).await,
            other => {
                debug!(method = other, "Unsupported method");
                let mut resp = body::text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static(self.allowed_methods()));
                resp
            }
        }
    }

    fn fail(&self, err: &GridavError) -> Response<DavBody> {
        error_response(err, &self.realm)
    }

    /// Authenticate and run `job` on the blocking pool with a repository
    /// bound to the connection's session.
    ///
    /// The session slot stays locked for the whole job, so requests that
    /// share a transport connection never interleave RPCs.
    async fn run<F>(
        this: Arc<Self>,
        conn: ConnectionId,
        credentials: Option<Credentials>,
        job: F,
    ) -> Response<DavBody>
    where
        F: FnOnce(&DavHandler, &mut dyn Repository, &mut Responder) -> Result<()> + Send + 'static,
    {
        let (mut responder, reply) = Responder::new();
        let worker = Arc::clone(&this);
        let task = tokio::task::spawn_blocking(move || {
            let slot = worker.store.slot(conn);
            let mut guard = slot.lock();
            let outcome = match worker.sessions.authenticate(&mut *guard, credentials.as_ref()) {
                Ok(session) => {
                    let mut repo =
                        GridRepository::new(session, &worker.config, worker.locks.as_ref());
                    let repo: &mut dyn Repository = &mut repo;
                    job(&*worker, repo, &mut responder)
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => {
                    if !responder.is_sent() {
                        responder.send(empty_response(StatusCode::NO_CONTENT));
                    }
                }
                Err(e) if responder.is_sent() => {
                    // Status is gone; cut the body short.
                    warn!(error = %e, "Request failed after the response started");
                    responder.abort(&e.to_string());
                }
                Err(e) => responder.send(worker.fail(&e)),
            }
        });

        match reply.await {
            Ok(resp) => {
                // The worker may still be feeding the body.
                tokio::spawn(async move {
                    if let Err(e) = task.await {
                        error!(error = %e, "Request worker failed while streaming");
                    }
                });
                resp
            }
            Err(_) => {
                match task.await {
                    Err(e) => error!(error = %e, "Request worker failed"),
                    Ok(()) => error!("Request worker ended without a response"),
                }
                body::text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }

    async fn options(this: Arc<Self>, call: Call) -> Response<DavBody> {
        Self::run(this, call.conn, call.credentials, |handler, _, responder| {
            let mut headers = HeaderMap::new();
            headers.insert(DAV, HeaderValue::from_static(handler.dav_classes()));
            headers.insert(ALLOW, HeaderValue::from_static(handler.allowed_methods()));
            headers.insert(MS_AUTHOR_VIA, HeaderValue::from_static("DAV"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
            responder.send(body::response(StatusCode::OK, headers, body::empty()));
            Ok(())
        })
        .await
    }

    async fn get(this: Arc<Self>, call: Call, with_body: bool) -> Response<DavBody> {
        let Call { conn, credentials, path, headers } = call;
        Self::run(this, conn, credentials, move |handler, repo, responder| {
            let node = repo.resolve(&path)?;
            if !node.exists {
                return Err(GridavError::NotFound(path));
            }
            if node.is_collection() {
                handler.send_index(repo, &node, responder, with_body)
            } else {
                handler.send_object(repo, &node, &headers, responder, with_body)
            }
        })
        .await
    }

    fn send_index(
        &self,
        repo: &mut dyn Repository,
        node: &ResourceNode,
        responder: &mut Responder,
        with_body: bool,
    ) -> Result<()> {
        let mut children = Vec::new();
        let mut collect =
            |_: &mut dyn GridConnection, child: &ResourceNode, call: CallType| -> Result<()> {
                if call != CallType::LockNull && child.grid_path != node.grid_path {
                    children.push(child.clone());
                }
                Ok(())
            };
        repo.walk(node, 1, WalkKind::Normal, &mut collect)?;

        let page = render_index(&self.config.dav.mount_prefix, node, &children);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(page.len()));
        let body = if with_body { body::full(page) } else { body::empty() };
        responder.send(body::response(StatusCode::OK, headers, body));
        Ok(())
    }

    fn send_object(
        &self,
        repo: &mut dyn Repository,
        node: &ResourceNode,
        request: &HeaderMap,
        responder: &mut Responder,
        with_body: bool,
    ) -> Result<()> {
        let etag = node.etag();
        let last_modified = node.last_modified();

        let mut headers = HeaderMap::new();
        set_header(&mut headers, LAST_MODIFIED, last_modified.clone());
        if !etag.is_empty() {
            set_header(&mut headers, ETAG, etag.clone());
        }
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        if self.config.dav.force_download {
            headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static("attachment"));
        }

        if !with_body {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(node.size));
            responder.send(body::response(StatusCode::OK, headers, body::empty()));
            return Ok(());
        }

        let range_header = header_str(request, &RANGE);
        let legacy_header = header_str(request, &REQUEST_RANGE);
        let plan = range::plan_request(
            &RangeRequest {
                header: range_header.or(legacy_header),
                if_range_ok: header_str(request, &IF_RANGE)
                    .is_none_or(|v| range::if_range_matches(v, &etag, &last_modified)),
                already_restricted: false,
            },
            node.size,
            &self.config.dav.ranges,
        );

        if plan == RangePlan::Unsatisfiable {
            set_header(&mut headers, CONTENT_RANGE, format!("bytes */{}", node.size));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(0u64));
            responder.send(body::response(
                StatusCode::RANGE_NOT_SATISFIABLE,
                headers,
                body::empty(),
            ));
            return Ok(());
        }

        let mut download = repo.open_download(node)?;
        match plan {
            RangePlan::Full | RangePlan::Unsatisfiable => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(node.size));
                let mut sink = responder.stream(StatusCode::OK, headers)?;
                download.deliver_all(&mut sink)?;
            }
            RangePlan::Ranges(set) if set.ranges.len() == 1 => {
                let part = set.ranges[0];
                set_header(&mut headers, CONTENT_RANGE, part.content_range(node.size));
                headers.insert(CONTENT_LENGTH, HeaderValue::from(part.len()));
                let mut sink = responder.stream(StatusCode::PARTIAL_CONTENT, headers)?;
                download.deliver_range(part.start, part.len(), &mut sink)?;
            }
            RangePlan::Ranges(set) => {
                let boundary = range::multipart_boundary();
                let legacy = range::use_legacy_subtype(
                    legacy_header.is_some(),
                    header_str(request, &USER_AGENT),
                );
                set_header(
                    &mut headers,
                    CONTENT_TYPE,
                    range::multipart_content_type(&boundary, legacy),
                );
                headers.insert(
                    CONTENT_LENGTH,
                    HeaderValue::from(range::multipart_len(&boundary, &set, node.size)),
                );
                let mut sink = responder.stream(StatusCode::PARTIAL_CONTENT, headers)?;
                for part in &set.ranges {
                    sink.send(Bytes::from(range::part_header(&boundary, part, node.size)))?;
                    download.deliver_range(part.start, part.len(), &mut sink)?;
                }
                sink.send(Bytes::from(range::closing_boundary(&boundary)))?;
            }
        }
        download.close();
        Ok(())
    }

    async fn put(this: Arc<Self>, call: Call, body: Incoming) -> Response<DavBody> {
        if call.headers.contains_key(CONTENT_RANGE) {
            return this.fail(&GridavError::Unimplemented("PUT with Content-Range"));
        }
        let Call { conn, credentials, path, .. } = call;
        let mut body = RequestBody::forward(body);
        Self::run(this, conn, credentials, move |_, repo, responder| {
            let node = repo.resolve(&path)?;
            if node.is_collection() {
                return Err(GridavError::NotAllowed(
                    "cannot PUT to a collection".to_string(),
                ));
            }
            match repo.parent(&node)? {
                Some(parent) if parent.is_collection() => {}
                _ => {
                    return Err(GridavError::Conflict(format!(
                        "parent collection of {path} does not exist"
                    )));
                }
            }

            let created = !node.exists;
            let mut upload = repo.open_upload(node, UploadMode::Truncate)?;
            while let Some(chunk) = body.next_chunk() {
                let written = chunk
                    .map_err(GridavError::from)
                    .and_then(|data| upload.write(&data));
                if let Err(e) = written {
                    warn!(path = %path, error = %e, "Upload aborted");
                    if let Err(rollback) = upload.close(CloseOutcome::Rollback) {
                        warn!(path = %path, error = %rollback, "Upload rollback failed");
                    }
                    return Err(e);
                }
            }
            let node = upload.close(CloseOutcome::Commit)?;
            info!(path = %node.protocol_path, size = node.size, "Stored object");

            let status = if created { StatusCode::CREATED } else { StatusCode::NO_CONTENT };
            responder.send(empty_response(status));
            Ok(())
        })
        .await
    }

    async fn mkcol(this: Arc<Self>, call: Call, body: Incoming) -> Response<DavBody> {
        let has_body = match Limited::new(body, MAX_XML_BODY).collect().await {
            Ok(collected) => !collected.to_bytes().is_empty(),
            Err(_) => true,
        };
        if has_body {
            return body::text(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "MKCOL request bodies are not supported",
            );
        }
        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |_, repo, responder| {
            let mut node = repo.resolve(&path)?;
            if node.exists {
                return Err(GridavError::NotAllowed(format!("{path} already exists")));
            }
            repo.create_collection(&mut node)?;
            responder.send(empty_response(StatusCode::CREATED));
            Ok(())
        })
        .await
    }

    async fn delete(this: Arc<Self>, call: Call) -> Response<DavBody> {
        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |_, repo, responder| {
            let mut node = repo.resolve(&path)?;
            repo.remove(&mut node)?;
            responder.send(empty_response(StatusCode::NO_CONTENT));
            Ok(())
        })
        .await
    }

    async fn copy_or_move(this: Arc<Self>, call: Call, is_move: bool) -> Response<DavBody> {
        let prepared = (|| {
            let destination = header_str(&call.headers, &DESTINATION)
                .ok_or_else(|| GridavError::BadRequest("missing Destination header".to_string()))?;
            let destination = uri::destination_path(destination, &this.config.dav.mount_prefix)?;
            let overwrite = match header_str(&call.headers, &OVERWRITE).map(str::trim) {
                None | Some("T" | "t") => true,
                Some("F" | "f") => false,
                Some(other) => {
                    return Err(GridavError::BadRequest(format!(
                        "invalid Overwrite header: {other}"
                    )));
                }
            };
            let depth = depth(&call.headers)?;
            if depth == 1 || (is_move && depth == 0) {
                return Err(GridavError::BadRequest(format!(
                    "Depth {depth} is not valid for {}",
                    if is_move { "MOVE" } else { "COPY" }
                )));
            }
            Ok((destination, overwrite, depth))
        })();
        let (destination, overwrite, depth) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return this.fail(&e),
        };

        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |_, repo, responder| {
            let mut src = repo.resolve(&path)?;
            if !src.exists {
                return Err(GridavError::NotFound(path));
            }
            let mut dst = repo.resolve(&destination)?;
            if src.is_same(&dst) || src.is_ancestor_of(&dst) || dst.is_ancestor_of(&src) {
                return Err(GridavError::Forbidden(
                    "source and destination overlap".to_string(),
                ));
            }

            let overwritten = dst.exists;
            if overwritten {
                if !overwrite {
                    return Err(GridavError::PreconditionFailed(format!(
                        "{destination} exists and Overwrite is F"
                    )));
                }
                repo.remove(&mut dst)?;
            }

            if is_move {
                repo.move_to(&mut src, &mut dst)?;
            } else {
                repo.copy(&src, &mut dst, depth)?;
            }
            let status = if overwritten { StatusCode::NO_CONTENT } else { StatusCode::CREATED };
            responder.send(empty_response(status));
            Ok(())
        })
        .await
    }

    async fn propfind(this: Arc<Self>, call: Call, body: Incoming) -> Response<DavBody> {
        let depth = match depth(&call.headers) {
            Ok(depth) => depth,
            Err(e) => return this.fail(&e),
        };
        let request = match Limited::new(body, MAX_XML_BODY).collect().await {
            Ok(collected) => PropfindRequest::parse(&collected.to_bytes()),
            Err(e) => Err(GridavError::BadRequest(format!("unreadable PROPFIND body: {e}"))),
        };
        let request = match request {
            Ok(request) => request,
            Err(e) => return this.fail(&e),
        };

        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |handler, repo, responder| {
            let node = repo.resolve(&path)?;
            if !node.exists {
                return Err(GridavError::NotFound(path));
            }
            let kind = if handler.locks.supports_lock_null() {
                WalkKind::LockNull
            } else {
                WalkKind::Normal
            };

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
            let mut sink = responder.stream(StatusCode::MULTI_STATUS, headers)?;
            let mut writer = MultistatusWriter::new(
                &request,
                handler.props.as_ref(),
                &handler.config.dav.mount_prefix,
                &mut sink,
            );
            repo.walk(&node, depth, kind, &mut writer)?;
            writer.finish()
        })
        .await
    }

    async fn proppatch(this: Arc<Self>, call: Call) -> Response<DavBody> {
        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |handler, repo, _| {
            let node = repo.resolve(&path)?;
            if !node.exists {
                return Err(GridavError::NotFound(path));
            }
            handler.props.patch(&node)
        })
        .await
    }

    /// Exclusive write lock on one path. The `lockinfo` body carries only
    /// scope, type and owner, and every lock granted here is exclusive, so
    /// it is read and discarded. A LOCK naming the held token in `If`
    /// refreshes that lock.
    async fn lock(this: Arc<Self>, call: Call, body: Incoming) -> Response<DavBody> {
        if let Err(e) = Limited::new(body, MAX_XML_BODY).collect().await {
            return this.fail(&GridavError::BadRequest(format!("unreadable LOCK body: {e}")));
        }
        let Call { conn, credentials, path, headers } = call;
        Self::run(this, conn, credentials, move |handler, repo, responder| {
            let node = repo.resolve(&path)?;
            if !node.exists {
                match repo.parent(&node)? {
                    Some(parent) if parent.is_collection() => {}
                    _ => {
                        return Err(GridavError::Conflict(format!(
                            "parent collection of {path} does not exist"
                        )));
                    }
                }
            }

            let if_header = header_str(&headers, &IF).unwrap_or_default();
            let token = match handler.locks.token(&node.grid_path) {
                Some(held) if if_header.contains(held.as_str()) => held,
                _ => handler.locks.acquire(&node.grid_path)?,
            };
            info!(path = %node.protocol_path, lock_null = !node.exists, "Locked");

            let root = propfind::href(&handler.config.dav.mount_prefix, &node);
            let xml = lock::discovery_body(&token, &root)?;
            let mut headers = HeaderMap::new();
            set_header(&mut headers, LOCK_TOKEN, format!("<{token}>"));
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_CONTENT_TYPE));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(xml.len()));
            responder.send(body::response(StatusCode::OK, headers, body::full(xml)));
            Ok(())
        })
        .await
    }

    async fn unlock(this: Arc<Self>, call: Call) -> Response<DavBody> {
        let token = header_str(&call.headers, &LOCK_TOKEN)
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
            .filter(|t| !t.is_empty());
        let Some(token) = token else {
            return this.fail(&GridavError::BadRequest("missing Lock-Token header".to_string()));
        };
        let Call { conn, credentials, path, .. } = call;
        Self::run(this, conn, credentials, move |handler, repo, responder| {
            let node = repo.resolve(&path)?;
            handler.locks.release(&node.grid_path, &token)?;
            info!(path = %node.protocol_path, "Unlocked");
            responder.send(empty_response(StatusCode::NO_CONTENT));
            Ok(())
        })
        .await
    }
}

/// Request fields shared by every method.
struct Call {
    conn: ConnectionId,
    credentials: Option<Credentials>,
    path: String,
    headers: HeaderMap,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: String) {
    match HeaderValue::try_from(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => warn!(header = %name, error = %e, "Dropping invalid header value"),
    }
}

fn empty_response(status: StatusCode) -> Response<DavBody> {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
    body::response(status, headers, body::empty())
}

/// Depth header; absent means infinity.
fn depth(headers: &HeaderMap) -> Result<u32> {
    match header_str(headers, &DEPTH).map(str::trim) {
        None => Ok(INFINITE_DEPTH),
        Some("0") => Ok(0),
        Some("1") => Ok(1),
        Some(v) if v.eq_ignore_ascii_case("infinity") => Ok(INFINITE_DEPTH),
        Some(v) => Err(GridavError::BadRequest(format!("invalid Depth header: {v}"))),
    }
}

fn render_index(mount_prefix: &str, node: &ResourceNode, children: &[ResourceNode]) -> String {
    let title = xml_escape(&node.protocol_path);
    let mut page = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Index of {title}</title></head>\n\
         <body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );
    if node.protocol_path != "/" {
        page.push_str("<li><a href=\"..\">Parent collection</a></li>\n");
    }
    for child in children {
        let name = child.protocol_path.rsplit('/').next().unwrap_or_default();
        let suffix = if child.is_collection() { "/" } else { "" };
        page.push_str(&format!(
            "<li><a href=\"{}\">{}{suffix}</a></li>\n",
            xml_escape(&propfind::href(mount_prefix, child)),
            xml_escape(name),
        ));
    }
    page.push_str("</ul>\n</body>\n</html>\n");
    page
}
