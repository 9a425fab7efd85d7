//! Signing endpoint: TCP listener, request parsing, and lifecycle.
//!
//! Each connection carries one HTTP/1.1 request. `POST /` with a
//! `Content-Length` body no larger than `max_body_bytes` is handed to the
//! bound [`Signer`]; the signature is returned with status 200. Anything
//! else is rejected before the signer runs. Signer failures become a bare
//! 500 and are logged here, never sent to the client.

use crate::audit;
use crate::auth;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use pkpassmake::Signer;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Maximum total size of the request line and headers (64 KiB).
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// How long to drain unread request data after an error response.
const LINGER_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on bytes drained after an error response.
const LINGER_MAX_BYTES: usize = 256 * 1024;

/// Handle returned when the endpoint starts.
///
/// Drop the handle or call [`ServerHandle::shutdown`] to stop accepting.
pub struct ServerHandle {
    /// The actual port the endpoint is listening on
    pub port: u16,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Shared state for the endpoint.
struct ServerState {
    signer: Arc<dyn Signer>,
    config: ServerConfig,
    active_connections: AtomicUsize,
}

/// Start the endpoint.
///
/// Binds to `config.bind_addr:config.port` (port 0 = OS-assigned) and
/// accepts connections on the current runtime until shutdown.
///
/// # Errors
///
/// Returns `ServerError::Bind` if the listener cannot be bound.
pub async fn start(config: ServerConfig, signer: Arc<dyn Signer>) -> Result<ServerHandle> {
    let bind_addr = SocketAddr::new(config.bind_addr, config.port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;
    info!("Signing endpoint listening on {}", local_addr);
    if config.authorization.is_none() {
        warn!("No authorization token configured; any client may request signatures");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ServerState {
        signer,
        config,
        active_connections: AtomicUsize::new(0),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx));

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx,
    })
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let max = state.config.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max, peer);
                                drop(stream);
                                continue;
                            }
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);

                        debug!("Accepted connection from {}", peer);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, &state).await {
                                debug!("Connection handler error: {}", e);
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Signing endpoint shutting down");
                    return;
                }
            }
        }
    }
}

/// Status line for a request that never reaches the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rejection {
    status: u16,
    reason: &'static str,
}

impl Rejection {
    const BAD_REQUEST: Self = Self::new(400, "Bad Request");
    const UNAUTHORIZED: Self = Self::new(401, "Unauthorized");
    const NOT_FOUND: Self = Self::new(404, "Not Found");
    const METHOD_NOT_ALLOWED: Self = Self::new(405, "Method Not Allowed");
    const REQUEST_TIMEOUT: Self = Self::new(408, "Request Timeout");
    const LENGTH_REQUIRED: Self = Self::new(411, "Length Required");
    const PAYLOAD_TOO_LARGE: Self = Self::new(413, "Payload Too Large");
    const HEADERS_TOO_LARGE: Self = Self::new(431, "Request Header Fields Too Large");
    const INTERNAL_ERROR: Self = Self::new(500, "Internal Server Error");

    const fn new(status: u16, reason: &'static str) -> Self {
        Self { status, reason }
    }
}

enum Request {
    /// Body to sign
    Sign(Vec<u8>),
    Reject(Rejection),
    /// Peer closed before sending anything
    Closed,
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: &ServerState,
) -> Result<()> {
    let request = match tokio::time::timeout(
        state.config.read_timeout(),
        read_request(&mut stream, &state.config),
    )
    .await
    {
        Ok(request) => request?,
        Err(_) => Request::Reject(Rejection::REQUEST_TIMEOUT),
    };

    match request {
        Request::Closed => Ok(()),
        Request::Reject(rejection) => {
            audit::log_rejected(peer, rejection.status, rejection.reason);
            send_error(&mut stream, rejection).await
        }
        Request::Sign(body) => {
            info!("Payload: {}B from {}", body.len(), peer);
            match state.signer.sign(&body).await {
                Ok(signature) => {
                    info!("Signature: {}B", signature.len());
                    audit::log_signed(peer, body.len(), signature.len());
                    send_signature(&mut stream, &signature).await
                }
                Err(e) => {
                    error!("Signing failed for {}: {}", peer, e);
                    audit::log_failed(peer, body.len());
                    send_error(&mut stream, Rejection::INTERNAL_ERROR).await
                }
            }
        }
    }
}

/// Read and validate one request, returning its body or a rejection.
async fn read_request(stream: &mut TcpStream, config: &ServerConfig) -> Result<Request> {
    // Keep the BufReader until the header is consumed; it may read ahead
    // into the body, and those bytes are carried over below.
    let mut reader = BufReader::new(&mut *stream).take(MAX_HEADER_SIZE as u64 + 1);

    let mut request_line = Vec::new();
    let mut consumed = reader.read_until(b'\n', &mut request_line).await?;
    if consumed == 0 {
        return Ok(Request::Closed);
    }

    let mut header_bytes = Vec::new();
    loop {
        if consumed > MAX_HEADER_SIZE {
            return Ok(Request::Reject(Rejection::HEADERS_TOO_LARGE));
        }
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).await?;
        consumed += n;
        if n == 0 || line.trim_ascii().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(&line);
    }
    if consumed > MAX_HEADER_SIZE {
        return Ok(Request::Reject(Rejection::HEADERS_TOO_LARGE));
    }

    let buffered = reader.get_ref().buffer().to_vec();
    drop(reader);

    // Header fields are parsed as text; opaque bytes are a malformed request.
    let (Ok(request_line), Ok(headers)) = (
        std::str::from_utf8(&request_line),
        std::str::from_utf8(&header_bytes),
    ) else {
        return Ok(Request::Reject(Rejection::BAD_REQUEST));
    };
    let Some((method, target)) = parse_request_line(request_line.trim_end()) else {
        return Ok(Request::Reject(Rejection::BAD_REQUEST));
    };
    let path = target.split('?').next().unwrap_or(target);
    if path != "/" {
        return Ok(Request::Reject(Rejection::NOT_FOUND));
    }
    if method != "POST" {
        return Ok(Request::Reject(Rejection::METHOD_NOT_ALLOWED));
    }

    if let Some(expected) = &config.authorization {
        if auth::check_authorization(headers, expected).is_err() {
            return Ok(Request::Reject(Rejection::UNAUTHORIZED));
        }
    }

    let content_length = match content_length(headers) {
        Ok(Some(length)) => length,
        Ok(None) => return Ok(Request::Reject(Rejection::LENGTH_REQUIRED)),
        Err(rejection) => return Ok(Request::Reject(rejection)),
    };
    if content_length > config.max_body_bytes {
        debug!(
            "Body of {}B exceeds limit of {}B",
            content_length, config.max_body_bytes
        );
        return Ok(Request::Reject(Rejection::PAYLOAD_TOO_LARGE));
    }

    let mut body = buffered;
    body.truncate(content_length);
    if body.len() < content_length {
        let start = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[start..]).await?;
    }
    Ok(Request::Sign(body))
}

/// Split "METHOD TARGET HTTP/x.y" into method and target.
fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return None;
    }
    Some((method, target))
}

/// Body length from the header block.
///
/// `Ok(None)` when absent. Chunked bodies are not accepted.
fn content_length(headers: &str) -> std::result::Result<Option<usize>, Rejection> {
    let mut length = None;
    for line in headers.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(Rejection::LENGTH_REQUIRED);
        }
        if name.eq_ignore_ascii_case("content-length") {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| Rejection::BAD_REQUEST)?;
            if length.is_some_and(|previous| previous != parsed) {
                return Err(Rejection::BAD_REQUEST);
            }
            length = Some(parsed);
        }
    }
    Ok(length)
}

async fn send_signature(stream: &mut TcpStream, signature: &[u8]) -> Result<()> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        signature.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(signature).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

async fn send_error(stream: &mut TcpStream, rejection: Rejection) -> Result<()> {
    let allow = if rejection == Rejection::METHOD_NOT_ALLOWED {
        "Allow: POST\r\n"
    } else {
        ""
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
        rejection.status, rejection.reason, allow
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    linger_close(stream).await;
    Ok(())
}

/// Half-close and discard whatever the client is still sending, so the
/// error response is not lost to a connection reset.
async fn linger_close(stream: &mut TcpStream) {
    if stream.shutdown().await.is_err() {
        return;
    }
    let drain = async {
        let mut chunk = [0u8; 8192];
        let mut total = 0usize;
        while total < LINGER_MAX_BYTES {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => total += n,
            }
        }
    };
    let _ = tokio::time::timeout(LINGER_TIMEOUT, drain).await;
}
