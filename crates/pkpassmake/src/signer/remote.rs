//! Remote signing over HTTP.

use super::Signer;
use crate::error::{PassError, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use tracing::{error, info};
use url::Url;
use zeroize::Zeroizing;

/// Delegates signing to an endpoint that holds the key material.
///
/// The manifest is POSTed verbatim; a 2xx response body is the signature.
/// Failures are returned to the caller without retrying.
#[derive(Clone)]
pub struct RemoteSigner {
    url: Url,
    authorization: Option<Zeroizing<String>>,
    client: HttpClient,
}

impl std::fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("url", &self.url.as_str())
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl RemoteSigner {
    /// Create a signer for `url`, sending `authorization` verbatim as the
    /// `Authorization` header when present.
    ///
    /// # Errors
    ///
    /// Returns `PassError::Config` if `url` does not parse or its scheme is
    /// not `http` or `https`. Nothing touches the network here.
    pub fn new(url: &str, authorization: Option<String>) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| PassError::Config(format!("invalid signing URL {}: {}", url, e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(PassError::Config(format!(
                    "unsupported signing URL scheme: {}",
                    other
                )))
            }
        }

        Ok(Self {
            url,
            authorization: authorization.map(Zeroizing::new),
            client: HttpClient::new(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        info!("POST {} [{}B]", self.url, input.len());
        let response = self
            .client
            .post(
                &self.url,
                input,
                self.authorization.as_ref().map(|value| value.as_str()),
            )
            .await
            .inspect_err(|e| error!("{}", e))?;
        info!("Status {} [{}B]", response.status, response.body.len());

        if !response.is_success() {
            error!("Signing service rejected the request: {}", response.status);
            return Err(PassError::SigningStatus {
                url: self.url.to_string(),
                status: response.status,
            });
        }
        Ok(response.body)
    }
}
