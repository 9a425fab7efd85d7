//! HTTP client for signing requests and certificate downloads.
//!
//! Requests go through a shared `ureq` agent with a global timeout and run
//! on the blocking pool. Non-2xx statuses come back as normal responses so
//! callers decide how to map them.

use crate::error::{PassError, Result};
use std::time::Duration;
use tracing::debug;
use url::Url;
use zeroize::Zeroizing;

/// Timeout for the TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a whole request/response exchange.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum buffered response size (8 MiB).
pub const MAX_RESPONSE_BODY: u64 = 8 * 1024 * 1024;

const USER_AGENT: &str = concat!("pkpassmake/", env!("CARGO_PKG_VERSION"));

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client over a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    /// Issue a `GET`.
    ///
    /// # Errors
    ///
    /// Returns `PassError::Http` on connection, protocol or timeout failure.
    /// Non-2xx statuses are returned as a normal response.
    pub async fn get(&self, url: &Url) -> Result<HttpResponse> {
        ensure_http(url)?;
        debug!("GET {}", url);
        let agent = self.agent.clone();
        let target = url.to_string();
        run_blocking(url, move || {
            let response = agent
                .get(&target)
                .header("User-Agent", USER_AGENT)
                .call()?;
            read_response(response)
        })
        .await
    }

    /// Issue a `POST` with a raw body and optional `Authorization` header.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    pub async fn post(
        &self,
        url: &Url,
        body: &[u8],
        authorization: Option<&str>,
    ) -> Result<HttpResponse> {
        ensure_http(url)?;
        debug!("POST {} [{}B]", url, body.len());
        let agent = self.agent.clone();
        let target = url.to_string();
        let body = body.to_vec();
        let authorization = authorization.map(|value| Zeroizing::new(value.to_string()));
        run_blocking(url, move || {
            let mut request = agent
                .post(&target)
                .header("User-Agent", USER_AGENT)
                .header("Content-Type", "application/octet-stream");
            if let Some(value) = &authorization {
                request = request.header("Authorization", value.as_str());
            }
            let response = request.send(&body[..])?;
            read_response(response)
        })
        .await
    }
}

fn ensure_http(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(http_error(url, format!("unsupported URL scheme: {}", other))),
    }
}

fn read_response(
    response: ureq::http::Response<ureq::Body>,
) -> std::result::Result<HttpResponse, ureq::Error> {
    let status = response.status().as_u16();
    let mut body = response.into_body();
    let body = body
        .with_config()
        .limit(MAX_RESPONSE_BODY)
        .read_to_vec()?;
    Ok(HttpResponse { status, body })
}

/// Run a blocking `ureq` exchange off the async runtime.
async fn run_blocking<F>(url: &Url, exchange: F) -> Result<HttpResponse>
where
    F: FnOnce() -> std::result::Result<HttpResponse, ureq::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(exchange)
        .await
        .map_err(|e| http_error(url, format!("request task failed: {}", e)))?
        .map_err(|e| http_error(url, e.to_string()))
}

fn http_error(url: &Url, reason: impl Into<String>) -> PassError {
    PassError::Http {
        url: url.to_string(),
        reason: reason.into(),
    }
}
