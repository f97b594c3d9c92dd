//! Response bodies and the bridge between async hyper and the blocking core.
//!
//! Grid work runs on the blocking pool. A [`Responder`] lets that work hand
//! a response head back to the async side, optionally followed by body
//! chunks pushed through a bounded channel. Request bodies travel the other
//! way through [`RequestBody`].

use std::io;

use bytes::Bytes;
use futures::stream;
use gridav_core::stream::BodySink;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{self, HeaderValue};
use hyper::{HeaderMap, Response, StatusCode};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Body type of every response.
pub type DavBody = UnsyncBoxBody<Bytes, io::Error>;

/// Number of chunks buffered between the blocking worker and hyper.
const CHANNEL_DEPTH: usize = 4;

pub fn empty() -> DavBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn full(data: impl Into<Bytes>) -> DavBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Response with a status, headers and body.
pub fn response(status: StatusCode, headers: HeaderMap, body: DavBody) -> Response<DavBody> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    resp
}

/// Plain-text response.
pub fn text(status: StatusCode, message: &str) -> Response<DavBody> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
    response(status, headers, full(message.to_string()))
}

type FrameResult = io::Result<Frame<Bytes>>;

/// One-shot handle for answering a request from the blocking pool.
pub struct Responder {
    reply: Option<oneshot::Sender<Response<DavBody>>>,
    chunks: mpsc::Sender<FrameResult>,
    stream: Option<mpsc::Receiver<FrameResult>>,
}

impl Responder {
    pub fn new() -> (Self, oneshot::Receiver<Response<DavBody>>) {
        let (reply, reply_rx) = oneshot::channel();
        let (chunks, stream) = mpsc::channel(CHANNEL_DEPTH);
        (
            Self {
                reply: Some(reply),
                chunks,
                stream: Some(stream),
            },
            reply_rx,
        )
    }

    /// Whether a response head has already gone out.
    pub fn is_sent(&self) -> bool {
        self.reply.is_none()
    }

    /// Send a complete response.
    pub fn send(&mut self, response: Response<DavBody>) {
        if let Some(reply) = self.reply.take() {
            if reply.send(response).is_err() {
                debug!("Client went away before the response was ready");
            }
        }
    }

    /// Send a response head whose body is fed through the returned sink.
    pub fn stream(&mut self, status: StatusCode, headers: HeaderMap) -> io::Result<ChannelSink> {
        let rx = self
            .stream
            .take()
            .ok_or_else(|| io::Error::other("response body already streaming"))?;
        let body = StreamBody::new(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        }));
        self.send(response(status, headers, BodyExt::boxed_unsync(body)));
        Ok(ChannelSink {
            tx: self.chunks.clone(),
        })
    }

    /// End a streamed body with an error frame, so hyper cuts the response
    /// short instead of finishing it. Does nothing unless [`stream`] was
    /// called. Blocks; must only be used from a blocking thread.
    ///
    /// [`stream`]: Responder::stream
    pub fn abort(&self, reason: &str) {
        if self.stream.is_some() {
            return;
        }
        if self
            .chunks
            .blocking_send(Err(io::Error::other(reason.to_string())))
            .is_err()
        {
            debug!("Client went away before the body was aborted");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.abort("request worker panicked");
        }
    }
}

/// [`BodySink`] that blocks until hyper has room for the next chunk.
///
/// Must only be used from a blocking thread.
pub struct ChannelSink {
    tx: mpsc::Sender<FrameResult>,
}

impl BodySink for ChannelSink {
    fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        trace!(len = chunk.len(), "Sending body chunk");
        self.tx
            .blocking_send(Ok(Frame::data(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

/// Request body delivered to a blocking worker chunk by chunk.
pub struct RequestBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl RequestBody {
    /// Start forwarding `body` on the current runtime.
    pub fn forward(mut body: Incoming) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        tokio::spawn(async move {
            while let Some(frame) = body.frame().await {
                let item = match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => Ok(data),
                        Err(_) => continue,
                    },
                    Err(e) => Err(io::Error::other(e)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    return;
                }
            }
        });
        Self { rx }
    }

    /// Next chunk, or `None` at the end of the body. Blocks.
    pub fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.rx.blocking_recv()
    }
}

impl Iterator for RequestBody {
    type Item = io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_response() {
        let resp = text(StatusCode::CONFLICT, "parent missing");
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(resp.headers()[header::CONTENT_LENGTH], "14");
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"parent missing"));
    }

    #[tokio::test]
    async fn test_streamed_body_from_blocking_thread() {
        let (mut responder, reply) = Responder::new();
        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = responder.stream(StatusCode::OK, HeaderMap::new()).unwrap();
            assert!(responder.is_sent());
            sink.send(Bytes::from_static(b"hello ")).unwrap();
            sink.send(Bytes::from_static(b"world")).unwrap();
        });

        let resp = reply.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        worker.await.unwrap();
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_abort_fails_the_body() {
        let (mut responder, reply) = Responder::new();
        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = responder.stream(StatusCode::OK, HeaderMap::new()).unwrap();
            sink.send(Bytes::from_static(b"partial")).unwrap();
            drop(sink);
            responder.abort("read failed");
        });

        let resp = reply.await.unwrap();
        let err = resp.into_body().collect().await.unwrap_err();
        worker.await.unwrap();
        assert_eq!(err.to_string(), "read failed");
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_the_body() {
        let (mut responder, reply) = Responder::new();
        let worker = tokio::task::spawn_blocking(move || {
            let mut sink = responder.stream(StatusCode::OK, HeaderMap::new()).unwrap();
            if sink.send(Bytes::from_static(b"partial")).is_ok() {
                panic!("worker bug");
            }
        });

        let resp = reply.await.unwrap();
        assert!(resp.into_body().collect().await.is_err());
        assert!(worker.await.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn test_abort_without_stream_is_noop() {
        let (mut responder, reply) = Responder::new();
        tokio::task::spawn_blocking(move || {
            responder.send(text(StatusCode::OK, "done"));
            responder.abort("too late");
        })
        .await
        .unwrap();

        let body = reply.await.unwrap().into_body().collect().await.unwrap();
        assert_eq!(body.to_bytes(), Bytes::from_static(b"done"));
    }

    #[tokio::test]
    async fn test_sink_fails_when_client_is_gone() {
        let (mut responder, reply) = Responder::new();
        drop(reply);
        let result = tokio::task::spawn_blocking(move || {
            let mut sink = responder.stream(StatusCode::OK, HeaderMap::new()).unwrap();
            drop(responder);
            sink.send(Bytes::from_static(b"lost"))
        })
        .await
        .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
