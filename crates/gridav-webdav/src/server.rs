//! HTTP server lifecycle.
//!
//! Each accepted TCP connection gets its own [`ConnectionId`]. Requests on
//! that connection share one grid session, which is released when the
//! connection closes.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gridav_core::session::ConnectionId;
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::handler::DavHandler;

/// Where the server listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 = auto-assign).
    pub port: u16,
    pub bind_address: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// A running WebDAV server.
pub struct WebDavServer {
    /// The actual bound address.
    pub addr: SocketAddr,
    handler: Arc<DavHandler>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl WebDavServer {
    /// Bind and start serving in the background.
    pub async fn start(handler: DavHandler, config: ServerConfig) -> ServerResult<Self> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let actual_addr = listener.local_addr()?;

        info!(addr = %actual_addr, "Starting WebDAV server");

        let handler = Arc::new(handler);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let loop_handler = Arc::clone(&handler);
        let server_handle = tokio::spawn(async move {
            tokio::select! {
                () = run_server(listener, loop_handler) => {
                    debug!("Server loop ended");
                }
                _ = shutdown_rx => {
                    info!("Received shutdown signal");
                }
            }
        });

        Ok(Self {
            addr: actual_addr,
            handler,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn handler(&self) -> &DavHandler {
        &self.handler
    }

    /// Stop accepting connections and wait for the accept loop to end.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        info!("WebDAV server stopped");
    }

    fn stop_sync(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for WebDavServer {
    fn drop(&mut self) {
        self.stop_sync();
    }
}

async fn run_server(listener: TcpListener, handler: Arc<DavHandler>) {
    let next_id = AtomicU64::new(1);
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let conn: ConnectionId = next_id.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %peer_addr, connection = conn, "Accepted connection");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service_handler = Arc::clone(&handler);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let handler = Arc::clone(&service_handler);
                        async move { Ok::<_, Infallible>(handler.handle(req, conn).await) }
                    });

                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        warn!(peer = %peer_addr, error = %e, "HTTP connection error");
                    }

                    // Disconnecting the grid session may block on the network.
                    let closed =
                        tokio::task::spawn_blocking(move || handler.connection_closed(conn));
                    if let Err(e) = closed.await {
                        error!(connection = conn, error = %e, "Session cleanup failed");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
