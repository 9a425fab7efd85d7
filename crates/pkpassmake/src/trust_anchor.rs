//! Trust anchor acquisition and caching
//!
//! Local signing needs the intermediate authority certificate that issued
//! the signer's certificate. When the signing home does not carry one, it is
//! downloaded from a priority-ordered list of candidate URLs, converted from
//! DER to PEM by `openssl`, and cached in a per-user data directory. Once
//! cached it is never fetched again.
//!
//! The cache file is published with a no-clobber rename from a temporary
//! file in the same directory, so concurrent resolvers never expose a
//! partially written anchor and the first writer wins.

use crate::error::{PassError, Result};
use crate::http::HttpClient;
use crate::openssl::OpenSsl;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};
use url::Url;

/// File name of the cached trust anchor.
pub const TRUST_ANCHOR_FILE: &str = "cacert.pem";

/// Candidate anchor sources, newest authority generation first.
pub const CANDIDATE_URLS: [&str; 6] = [
    "https://www.apple.com/certificateauthority/AppleWWDRCAG6.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG5.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG4.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG3.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRCAG2.cer",
    "https://www.apple.com/certificateauthority/AppleWWDRMPCA1G1.cer",
];

/// Application directory name under the platform data directory.
const CACHE_DIR_NAME: &str = "pkpassmake";

/// Downloads certificate bytes from a URL.
#[async_trait]
pub trait CertificateFetcher: Send + Sync {
    /// Fetch the raw (DER) certificate at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl CertificateFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = Url::parse(url)
            .map_err(|e| PassError::Config(format!("invalid certificate URL {}: {}", url, e)))?;
        let response = self.get(&parsed).await?;
        if !response.is_success() {
            return Err(PassError::Http {
                url: url.to_string(),
                reason: format!("unexpected status code {}", response.status),
            });
        }
        Ok(response.body)
    }
}

/// Default cache directory: `<data dir>/pkpassmake`.
///
/// # Errors
///
/// Returns `PassError::Config` if the platform has no data directory.
pub fn default_cache_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(CACHE_DIR_NAME))
        .ok_or_else(|| PassError::Config("cannot determine the user data directory".to_string()))
}

/// Locates or fetches the trust anchor used by local signing.
pub struct TrustAnchorResolver {
    cache_dir: PathBuf,
    candidates: Vec<String>,
    fetcher: Arc<dyn CertificateFetcher>,
    openssl: OpenSsl,
}

impl std::fmt::Debug for TrustAnchorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchorResolver")
            .field("cache_dir", &self.cache_dir)
            .field("candidates", &self.candidates)
            .field("openssl", &self.openssl)
            .finish_non_exhaustive()
    }
}

impl TrustAnchorResolver {
    /// Create a resolver over the standard candidate list.
    #[must_use]
    pub fn new(cache_dir: PathBuf, fetcher: Arc<dyn CertificateFetcher>, openssl: OpenSsl) -> Self {
        Self {
            cache_dir,
            candidates: CANDIDATE_URLS.iter().map(|url| (*url).to_string()).collect(),
            fetcher,
            openssl,
        }
    }

    /// Resolver using the default cache directory, HTTPS client and `openssl`.
    ///
    /// # Errors
    ///
    /// Returns `PassError::Config` if the cache directory cannot be
    /// determined.
    pub fn with_defaults(openssl: OpenSsl) -> Result<Self> {
        Ok(Self::new(
            default_cache_dir()?,
            Arc::new(HttpClient::new()),
            openssl,
        ))
    }

    /// Replace the candidate list. Order is priority order.
    #[must_use]
    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Location of the cached anchor, whether or not it exists yet.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(TRUST_ANCHOR_FILE)
    }

    /// Return the cached anchor, fetching it first if absent.
    ///
    /// # Errors
    ///
    /// Returns `PassError::AnchorCache` if the cache directory cannot be created and
    /// `PassError::TrustAnchorUnavailable` if every candidate fails.
    pub async fn resolve(&self) -> Result<PathBuf> {
        let cache_path = self.cache_path();
        if is_file(&cache_path).await {
            debug!("Trust anchor: {}", cache_path.display());
            return Ok(cache_path);
        }

        info!("Trust anchor not found at {}", cache_path.display());
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| PassError::anchor_cache(&self.cache_dir, e))?;

        for url in &self.candidates {
            info!("Downloading trust anchor from {}", url);
            match self.install_from(url, &cache_path).await {
                Ok(()) => {
                    info!("Trust anchor: {}", cache_path.display());
                    return Ok(cache_path);
                }
                Err(e) => warn!("Trust anchor candidate {} failed: {}", url, e),
            }
        }

        error!("Failed to obtain a trust anchor from any candidate");
        Err(PassError::TrustAnchorUnavailable {
            attempted: self.candidates.len(),
        })
    }

    async fn install_from(&self, url: &str, cache_path: &Path) -> Result<()> {
        let der = self.fetcher.fetch(url).await?;

        let staged = tempfile::Builder::new()
            .prefix(".cacert-")
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)
            .map_err(|e| PassError::anchor_cache(&self.cache_dir, e))?;
        self.openssl.der_to_pem(&der, staged.path()).await?;

        let target = cache_path.to_path_buf();
        tokio::task::spawn_blocking(move || publish(staged, &target))
            .await
            .map_err(|e| PassError::anchor_cache(cache_path, std::io::Error::other(e)))?
    }
}

/// Move a staged anchor into place without replacing an existing one.
fn publish(staged: NamedTempFile, target: &Path) -> Result<()> {
    match staged.persist_noclobber(target) {
        Ok(_) => Ok(()),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            // Another resolver finished first; its anchor is equivalent.
            debug!("Trust anchor already published at {}", target.display());
            Ok(())
        }
        Err(e) => Err(PassError::anchor_cache(target, e.error)),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
