//! HTTP surface of the controller.
//!
//! The server owns one thread running a current-thread tokio runtime. Every
//! connection is a task on that runtime; blocking work is pushed to the
//! runtime's blocking pool by [`StreamController`].
//!
//! Routes:
//! - `GET  /health`
//! - `POST /api/v1/stream/frame` -> `image/jpeg`
//! - `POST /api/v1/stream/frame/encoded` -> JSON with a base64 frame
//! - `POST /api/v1/stream/capabilities` -> discovery summary JSON

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::error::StreamError;
use crate::service::{CapabilitiesRequest, FrameRequest, StreamController};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Blocking threads kept beyond the capture and probe slots for directory lookups.
const LOOKUP_BLOCKING_THREADS: usize = 4;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Capture slots.
    pub capture_workers: usize,
    /// Onboarding probe slots.
    pub onboarding_workers: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            capture_workers: 4,
            onboarding_workers: 2,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for ApiHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown_and_join() {
            log::error!("stream api shutdown failed: {}", err);
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    controller: Arc<StreamController>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, controller: Arc<StreamController>) -> Self {
        Self { cfg, controller }
    }

    /// Captures and probes are capped by their own slots, so lookups always
    /// have threads left even when every slot is held by an abandoned call.
    fn blocking_threads(&self) -> usize {
        self.cfg.capture_workers.max(1) + self.cfg.onboarding_workers.max(1) + LOOKUP_BLOCKING_THREADS
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = std::net::TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(self.blocking_threads())
            .thread_name("stream-worker")
            .build()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let controller = self.controller;
        let join = std::thread::Builder::new()
            .name("stream-api".to_string())
            .spawn(move || {
                let served = runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener)?;
                    run_api(listener, controller, shutdown_rx).await;
                    Ok::<_, std::io::Error>(())
                });
                if let Err(err) = served {
                    log::error!("stream api stopped: {}", err);
                }
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            })?;

        Ok(ApiHandle {
            addr,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }
}

async fn run_api(
    listener: TcpListener,
    controller: Arc<StreamController>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let controller = controller.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, &controller).await {
                            log::warn!("stream api request from {} rejected: {}", peer, err);
                        }
                    });
                }
                Err(err) => {
                    log::warn!("stream api accept failed: {}", err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

async fn handle_connection(mut stream: TcpStream, controller: &StreamController) -> Result<()> {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(RequestError::TooLarge)) => {
            write_detail(&mut stream, 413, "request too large").await?;
            return Ok(());
        }
        Ok(Err(RequestError::Malformed(reason))) => {
            write_detail(&mut stream, 400, &reason).await?;
            return Err(anyhow!(reason));
        }
        Ok(Err(RequestError::Io(err))) => return Err(err.into()),
        Err(_) => return Err(anyhow!("timed out reading request")),
    };

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json(&mut stream, 200, &serde_json::json!({"status": "ok"})).await,
        ("POST", "/api/v1/stream/frame") => {
            let Some(body) = parse_body::<FrameRequest>(&mut stream, &request).await? else {
                return Ok(());
            };
            match controller.frame(&body).await {
                Ok(frame) => write_response(&mut stream, 200, "image/jpeg", &frame.jpeg).await,
                Err(err) => write_error(&mut stream, &err).await,
            }
        }
        ("POST", "/api/v1/stream/frame/encoded") => {
            let Some(body) = parse_body::<FrameRequest>(&mut stream, &request).await? else {
                return Ok(());
            };
            match controller.frame(&body).await {
                Ok(frame) => write_json(&mut stream, 200, &frame.encoded()).await,
                Err(err) => write_error(&mut stream, &err).await,
            }
        }
        ("POST", "/api/v1/stream/capabilities") => {
            let Some(body) = parse_body::<CapabilitiesRequest>(&mut stream, &request).await?
            else {
                return Ok(());
            };
            match controller.capabilities(&body).await {
                Ok(summary) => write_json(&mut stream, 200, &summary).await,
                Err(err) => write_error(&mut stream, &err).await,
            }
        }
        (_, "/health")
        | (_, "/api/v1/stream/frame")
        | (_, "/api/v1/stream/frame/encoded")
        | (_, "/api/v1/stream/capabilities") => {
            write_detail(&mut stream, 405, "method not allowed").await
        }
        _ => write_detail(&mut stream, 404, "not found").await,
    }
}

/// Deserialize the JSON body, answering 400 on failure.
async fn parse_body<T: DeserializeOwned>(
    stream: &mut TcpStream,
    request: &HttpRequest,
) -> Result<Option<T>> {
    match serde_json::from_slice(&request.body) {
        Ok(body) => Ok(Some(body)),
        Err(err) => {
            write_detail(stream, 400, &format!("invalid request body: {}", err)).await?;
            Ok(None)
        }
    }
}

#[derive(Debug)]
enum RequestError {
    TooLarge,
    Malformed(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        RequestError::Io(err)
    }
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

async fn read_request(stream: &mut TcpStream) -> std::result::Result<HttpRequest, RequestError> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::TooLarge);
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(RequestError::Malformed("incomplete request".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".to_string()))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(RequestError::TooLarge);
    }

    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(RequestError::Malformed("truncated body".to_string()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

async fn write_error(stream: &mut TcpStream, err: &StreamError) -> Result<()> {
    write_detail(stream, err.status_code(), &err.to_string()).await
}

async fn write_detail(stream: &mut TcpStream, status: u16, detail: &str) -> Result<()> {
    write_json(stream, status, &serde_json::json!({ "detail": detail })).await
}

async fn write_json<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload).await
}

async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        502 => "HTTP/1.1 502 Bad Gateway",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.shutdown().await?;
    Ok(())
}
