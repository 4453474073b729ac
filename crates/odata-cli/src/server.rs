//! HTTP/1 front end for an [`ODataService`].
//!
//! Requests are answered on the blocking pool: the service and its
//! processor are synchronous. Buffered bodies go out in one piece. Streamed
//! bodies are rendered on the blocking task and handed to the connection
//! through a bounded channel, one fragment at a time; when the client goes
//! away the next send fails, streaming stops and the result source is
//! released.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use odata_service::{
    ChunkSink, Headers, Method, ODataRequest, ODataResponse, ODataService, QueryProcessor, RenderChunk,
    ResponseBody,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

pub type HttpBody = BoxBody<Bytes, io::Error>;

/// Fragments buffered between the renderer and the connection.
const STREAM_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Written once the listener is bound: `{"addr": ..., "pid": ...}`.
    pub ready_file: Option<PathBuf>,
}

pub fn run_serve<P>(config: ServerConfig, service: ODataService<P>) -> Result<()>
where
    P: QueryProcessor + 'static,
{
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to initialize tokio runtime: {e}"))?;

    rt.block_on(async move { serve_async(config, Arc::new(service)).await })
}

async fn serve_async<P>(config: ServerConfig, service: Arc<ODataService<P>>) -> Result<()>
where
    P: QueryProcessor + 'static,
{
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| anyhow!("serve: failed to bind {}: {e}", config.listen))?;
    let bound = listener
        .local_addr()
        .map_err(|e| anyhow!("serve: failed to read bound addr: {e}"))?;

    tracing::info!(
        addr = %bound,
        service_root = service.config().root(),
        "listening on http://{bound}{}",
        service.config().root_path()
    );
    if let Some(path) = config.ready_file.as_ref() {
        let payload = serde_json::json!({
            "addr": bound.to_string(),
            "pid": std::process::id(),
        });
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("serve: failed to create {}: {e}", parent.display()))?;
        }
        std::fs::write(path, payload.to_string())
            .map_err(|e| anyhow!("serve: failed to write {}: {e}", path.display()))?;
    }

    serve_listener(listener, service).await
}

/// Accept connections on `listener` until accepting fails.
pub async fn serve_listener<P>(listener: TcpListener, service: Arc<ODataService<P>>) -> Result<()>
where
    P: QueryProcessor + 'static,
{
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| anyhow!("serve: accept failed: {e}"))?;
        let io = TokioIo::new(stream);
        let service = service.clone();

        tokio::spawn(async move {
            let handler = service_fn(move |req| handle_request(req, service.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                tracing::warn!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_request<P>(
    req: Request<Incoming>,
    service: Arc<ODataService<P>>,
) -> Result<Response<HttpBody>, hyper::Error>
where
    P: QueryProcessor + 'static,
{
    let method = req.method().clone();
    let target = req.uri().to_string();

    if method == hyper::Method::GET && req.uri().path() == "/healthz" {
        return Ok(text_response(StatusCode::OK, "ok\n"));
    }
    let Some(odata_method) = Method::parse(method.as_str()) else {
        tracing::info!(method = %method, uri = %target, status = 405, "request");
        return Ok(json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            &format!("{method} is not supported"),
        ));
    };

    let headers: Headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = req.into_body().collect().await?.to_bytes().to_vec();
    let request = ODataRequest {
        method: odata_method,
        target: target.clone(),
        headers,
        body,
    };

    let response = dispatch(service, request).await;
    tracing::info!(
        method = %method,
        uri = %target,
        status = response.status().as_u16(),
        "request"
    );
    Ok(response)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Status line and headers, plus the body when it is not streamed.
struct Head {
    status: u16,
    headers: Headers,
    body: Option<Vec<u8>>,
}

impl Head {
    fn buffered(response: ODataResponse) -> Self {
        let body = match response.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Empty | ResponseBody::Stream(_) => Vec::new(),
        };
        Self {
            status: response.status,
            headers: response.headers,
            body: Some(body),
        }
    }
}

async fn dispatch<P>(service: Arc<ODataService<P>>, request: ODataRequest) -> Response<HttpBody>
where
    P: QueryProcessor + 'static,
{
    let (head_tx, head_rx) = oneshot::channel::<Head>();
    let (chunk_tx, chunk_rx) = mpsc::channel::<io::Result<Bytes>>(STREAM_DEPTH);

    let worker = tokio::task::spawn_blocking(move || {
        let response = service.handle(&request);
        let ODataResponse {
            status,
            headers,
            body,
        } = response;
        let pending = match body {
            ResponseBody::Stream(pending) => pending,
            body => {
                let _ = head_tx.send(Head::buffered(ODataResponse {
                    status,
                    headers,
                    body,
                }));
                return;
            }
        };

        let mut sink = ChannelSink {
            status,
            headers,
            head: Some(head_tx),
            chunks: chunk_tx,
        };
        if let Err(e) = pending.write_to(&mut sink) {
            match sink.head.take() {
                // Nothing went out yet, so the client still gets a status.
                Some(head_tx) => {
                    let _ = head_tx.send(Head::buffered(ODataResponse::error(&e)));
                }
                None => {
                    tracing::warn!(error = %e, "aborting a response stream after its first chunk");
                    let _ = sink.chunks.blocking_send(Err(io::Error::other(e.to_string())));
                }
            }
        }
    });

    match head_rx.await {
        Ok(Head {
            status,
            headers,
            body: Some(bytes),
        }) => build_response(status, &headers, full_body(bytes)),
        Ok(Head {
            status,
            headers,
            body: None,
        }) => build_response(status, &headers, ChunkBody { chunks: chunk_rx }.boxed()),
        Err(_) => {
            let detail = match worker.await {
                Err(e) => format!("request worker failed: {e}"),
                Ok(()) => "request worker produced no response".to_string(),
            };
            tracing::error!(error = %detail, "dispatch failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &detail)
        }
    }
}

/// Hands rendered fragments to the connection task. The first chunk also
/// releases the status line and headers.
struct ChannelSink {
    status: u16,
    headers: Headers,
    head: Option<oneshot::Sender<Head>>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client went away")
}

impl ChunkSink for ChannelSink {
    fn write_chunk(&mut self, chunk: RenderChunk) -> io::Result<()> {
        if let Some(head) = self.head.take() {
            let mut headers = std::mem::take(&mut self.headers);
            headers.extend(chunk.headers.unwrap_or_default());
            head.send(Head {
                status: self.status,
                headers,
                body: None,
            })
            .map_err(|_| client_gone())?;
        }
        self.chunks
            .blocking_send(Ok(Bytes::from(chunk.body)))
            .map_err(|_| client_gone())
    }

    fn flush(&mut self) -> io::Result<()> {
        // A sent fragment is already on its way to the connection.
        Ok(())
    }
}

/// Response body fed by a [`ChannelSink`].
struct ChunkBody {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
}

impl Body for ChunkBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        self.chunks
            .poll_recv(cx)
            .map(|item| item.map(|chunk| chunk.map(Frame::data)))
    }
}

// ============================================================================
// Responses
// ============================================================================

fn full_body(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn fallback_response() -> Response<HttpBody> {
    let mut response = Response::new(full_body(Bytes::from_static(b"internal error")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn build_response(status: u16, headers: &Headers, body: HttpBody) -> Response<HttpBody> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(body).unwrap_or_else(|_| fallback_response())
}

fn text_response(status: StatusCode, body: &str) -> Response<HttpBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body.to_string()))
        .unwrap_or_else(|_| fallback_response())
}

fn json_error(status: StatusCode, msg: &str) -> Response<HttpBody> {
    let payload = serde_json::json!({ "error": { "code": "Transport", "message": msg } });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(payload.to_string()))
        .unwrap_or_else(|_| fallback_response())
}
