//! Local certificate-based signing through `openssl smime`.

use super::Signer;
use crate::error::{PassError, Result};
use crate::manifest::SIGNATURE_FILE;
use crate::openssl::OpenSsl;
use crate::trust_anchor::{TrustAnchorResolver, TRUST_ANCHOR_FILE};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Environment variable naming the signing home directory.
pub const HOME_ENV: &str = "PKPASSMAKE_HOME";

/// Environment variable carrying the private key passphrase.
pub const PASSWORD_ENV: &str = "PKPASSMAKE_PASSWORD";

/// Leaf certificate inside the signing home.
pub const CERT_FILE: &str = "cert.pem";

/// Private key inside the signing home.
pub const KEY_FILE: &str = "key.pem";

/// Conventional signing home locations, in lookup order.
#[must_use]
pub fn conventional_homes() -> Vec<PathBuf> {
    let mut homes = Vec::with_capacity(3);
    if let Some(home) = dirs::home_dir() {
        homes.push(home.join(".pkpassmake"));
    }
    homes.push(PathBuf::from("/opt/pkpassmake"));
    homes.push(PathBuf::from("/etc/pkpassmake"));
    homes
}

/// Pick the signing home: explicit path, then the environment value, then
/// the first existing candidate directory.
///
/// Blank environment values are ignored.
///
/// # Errors
///
/// Returns `PassError::Config` if nothing resolves.
pub fn resolve_home(
    explicit: Option<&Path>,
    env_value: Option<&str>,
    candidates: &[PathBuf],
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    if let Some(found) = candidates.iter().find(|candidate| candidate.is_dir()) {
        return Ok(found.clone());
    }

    let searched = candidates
        .iter()
        .map(|c| c.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    error!("Failed to find a signing home directory. Searched: {}", searched);
    Err(PassError::Config(format!(
        "no signing home directory found (set {} or create one of: {})",
        HOME_ENV, searched
    )))
}

/// Inputs for [`LocalSigner::new`].
///
/// Unset fields fall back to the environment, then to defaults.
#[derive(Clone, Default)]
pub struct LocalSignerConfig {
    /// Explicit signing home
    pub home: Option<PathBuf>,
    /// Private key passphrase
    pub passphrase: Option<Zeroizing<String>>,
    /// Signing tool
    pub openssl: OpenSsl,
}

impl std::fmt::Debug for LocalSignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSignerConfig")
            .field("home", &self.home)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("openssl", &self.openssl)
            .finish()
    }
}

impl LocalSignerConfig {
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    #[must_use]
    pub fn with_openssl(mut self, openssl: OpenSsl) -> Self {
        self.openssl = openssl;
        self
    }
}

/// Everything one `openssl smime` invocation needs. Fixed at construction.
#[derive(Clone)]
pub struct SigningContext {
    openssl: OpenSsl,
    cert: PathBuf,
    key: PathBuf,
    passphrase: Option<Zeroizing<String>>,
    trust_anchor: PathBuf,
}

impl std::fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningContext")
            .field("openssl", &self.openssl)
            .field("cert", &self.cert)
            .field("key", &self.key)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("trust_anchor", &self.trust_anchor)
            .finish()
    }
}

impl SigningContext {
    #[must_use]
    pub fn cert(&self) -> &Path {
        &self.cert
    }

    #[must_use]
    pub fn key(&self) -> &Path {
        &self.key
    }

    #[must_use]
    pub fn trust_anchor(&self) -> &Path {
        &self.trust_anchor
    }

    /// Arguments for a detached DER signature written to `out`.
    fn sign_args(&self, out: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "smime".into(),
            "-binary".into(),
            "-sign".into(),
            "-certfile".into(),
            self.trust_anchor.as_os_str().to_owned(),
            "-signer".into(),
            self.cert.as_os_str().to_owned(),
            "-inkey".into(),
            self.key.as_os_str().to_owned(),
            "-outform".into(),
            "DER".into(),
        ];
        if let Some(passphrase) = &self.passphrase {
            args.push("-passin".into());
            args.push(format!("pass:{}", passphrase.as_str()).into());
        }
        args.push("-out".into());
        args.push(out.as_os_str().to_owned());
        args
    }
}

/// Signs with a certificate and key from a signing home directory.
#[derive(Debug, Clone)]
pub struct LocalSigner {
    home: PathBuf,
    context: SigningContext,
}

impl LocalSigner {
    /// Resolve the signing home, check its key material and make sure a
    /// trust anchor is available.
    ///
    /// A `cacert.pem` inside the home takes precedence; otherwise `resolver`
    /// supplies the cached (or freshly fetched) anchor.
    ///
    /// # Errors
    ///
    /// `PassError::Config` if no usable home is found, `PassError::MissingFile`
    /// if the certificate or key is absent, and any error from
    /// [`TrustAnchorResolver::resolve`].
    pub async fn new(config: LocalSignerConfig, resolver: &TrustAnchorResolver) -> Result<Self> {
        let env_home = std::env::var(HOME_ENV).ok();
        let home = resolve_home(
            config.home.as_deref(),
            env_home.as_deref(),
            &conventional_homes(),
        )?;
        info!("Signing home: {}", home.display());

        if !is_dir(&home).await {
            error!("Not a directory: {}", home.display());
            return Err(PassError::Config(format!(
                "signing home is not a directory: {}",
                home.display()
            )));
        }

        let cert = require_file(home.join(CERT_FILE)).await?;
        let key = require_file(home.join(KEY_FILE)).await?;

        let local_anchor = home.join(TRUST_ANCHOR_FILE);
        let trust_anchor = if is_file(&local_anchor).await {
            local_anchor
        } else {
            resolver.resolve().await?
        };
        debug!("Trust anchor for signing: {}", trust_anchor.display());

        let passphrase = config.passphrase.or_else(|| {
            std::env::var(PASSWORD_ENV)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(Zeroizing::new)
        });

        Ok(Self {
            home,
            context: SigningContext {
                openssl: config.openssl,
                cert,
                key,
                passphrase,
                trust_anchor,
            },
        })
    }

    /// Build from the environment with the default trust-anchor resolver.
    ///
    /// # Errors
    ///
    /// Same as [`LocalSigner::new`].
    pub async fn from_env() -> Result<Self> {
        let config = LocalSignerConfig::default();
        let resolver = TrustAnchorResolver::with_defaults(config.openssl.clone())?;
        Self::new(config, &resolver).await
    }

    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[must_use]
    pub fn context(&self) -> &SigningContext {
        &self.context
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        // Private scratch directory; removed on drop if this future is cancelled.
        let workdir = tempfile::Builder::new()
            .prefix("pkpassmake-sign-")
            .tempdir()
            .map_err(|e| PassError::signing_io(std::env::temp_dir(), e))?;
        let out = workdir.path().join(SIGNATURE_FILE);

        let signature = match self.context.openssl.run(&self.context.sign_args(&out), input).await {
            Ok(_) => tokio::fs::read(&out)
                .await
                .map_err(|e| PassError::signing_io(&out, e)),
            Err(e) => {
                error!("Local signing failed: {}", e);
                Err(e)
            }
        };

        let workdir_path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            warn!("Failed to delete {}: {}", workdir_path.display(), e);
        }

        let signature = signature?;
        debug!("Signature: [{}B]", signature.len());
        Ok(signature)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn require_file(path: PathBuf) -> Result<PathBuf> {
    if is_file(&path).await {
        Ok(path)
    } else {
        error!("Not a file: {}", path.display());
        Err(PassError::MissingFile { path })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::trust_anchor::tests::StubFetcher;
    use std::sync::Arc;

    fn home_with_keys(root: &Path) -> PathBuf {
        let home = root.join("home");
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(home.join(CERT_FILE), b"CERT").unwrap();
        std::fs::write(home.join(KEY_FILE), b"KEY").unwrap();
        home
    }

    fn resolver(cache: &Path, fetcher: Arc<StubFetcher>, openssl: OpenSsl) -> TrustAnchorResolver {
        TrustAnchorResolver::new(cache.to_path_buf(), fetcher, openssl)
            .with_candidates(["https://ca.test/g1.cer"])
    }

    #[test]
    fn test_resolve_home_prefers_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let home = resolve_home(
            Some(Path::new("/explicit")),
            Some("/from-env"),
            &[dir.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(home, PathBuf::from("/explicit"));
    }

    #[test]
    fn test_resolve_home_uses_env_then_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let candidates = vec![missing, dir.path().to_path_buf()];

        assert_eq!(
            resolve_home(None, Some(" /from-env \n"), &candidates).unwrap(),
            PathBuf::from("/from-env")
        );
        // Blank env values are treated as unset
        assert_eq!(
            resolve_home(None, Some("   "), &candidates).unwrap(),
            dir.path().to_path_buf()
        );
    }

    #[test]
    fn test_resolve_home_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_home(None, None, &[dir.path().join("nope")]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.to_string().contains(HOME_ENV));
    }

    #[tokio::test]
    async fn test_missing_key_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::remove_file(home.join(KEY_FILE)).unwrap();
        let fetcher = Arc::new(StubFetcher::default());

        let err = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap_err();

        match err {
            PassError::MissingFile { path } => assert_eq!(path, home.join(KEY_FILE)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_home_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();
        let fetcher = Arc::new(StubFetcher::default());

        let err = LocalSigner::new(
            LocalSignerConfig::default().with_home(&file),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PassError::Config(_)));
    }

    #[tokio::test]
    async fn test_local_anchor_skips_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::write(home.join(TRUST_ANCHOR_FILE), b"PEM").unwrap();
        let fetcher = Arc::new(StubFetcher::default());

        let signer = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home),
            &resolver(&dir.path().join("cache"), fetcher.clone(), OpenSsl::new()),
        )
        .await
        .unwrap();

        assert_eq!(signer.context().trust_anchor(), home.join(TRUST_ANCHOR_FILE));
        assert!(fetcher.attempts().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_anchor_is_fetched_into_cache() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        let cache = dir.path().join("cache");
        let tool = crate::openssl::tests::fake_openssl(dir.path(), crate::openssl::tests::COPY_TO_OUT);
        let fetcher = Arc::new(StubFetcher::serving("https://ca.test/g1.cer", b"DER"));

        let signer = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home),
            &resolver(&cache, fetcher.clone(), tool),
        )
        .await
        .unwrap();

        assert_eq!(signer.context().trust_anchor(), cache.join(TRUST_ANCHOR_FILE));
        assert_eq!(fetcher.attempts().len(), 1);
    }

    #[test]
    fn test_sign_args_shape() {
        let context = SigningContext {
            openssl: OpenSsl::new(),
            cert: PathBuf::from("/h/cert.pem"),
            key: PathBuf::from("/h/key.pem"),
            passphrase: Some(Zeroizing::new("s3cret".to_string())),
            trust_anchor: PathBuf::from("/c/cacert.pem"),
        };
        let args: Vec<String> = context
            .sign_args(Path::new("/tmp/out"))
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            vec![
                "smime", "-binary", "-sign", "-certfile", "/c/cacert.pem", "-signer",
                "/h/cert.pem", "-inkey", "/h/key.pem", "-outform", "DER", "-passin",
                "pass:s3cret", "-out", "/tmp/out",
            ]
        );
        assert!(!format!("{:?}", context).contains("s3cret"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_returns_tool_output() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::write(home.join(TRUST_ANCHOR_FILE), b"PEM").unwrap();
        // Fake tool writes a marker followed by the signed input
        let tool = crate::openssl::tests::fake_openssl(
            dir.path(),
            "out=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-out\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\nprintf 'SIG:' > \"$out\"\ncat >> \"$out\"",
        );
        let fetcher = Arc::new(StubFetcher::default());
        let signer = LocalSigner::new(
            LocalSignerConfig::default()
                .with_home(&home)
                .with_passphrase("pw")
                .with_openssl(tool),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap();

        let signature = signer.sign(b"{\"a\":\"b\"}").await.unwrap();
        assert_eq!(signature, b"SIG:{\"a\":\"b\"}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_failure_is_signing_error() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::write(home.join(TRUST_ANCHOR_FILE), b"PEM").unwrap();
        let tool = crate::openssl::tests::fake_openssl(
            dir.path(),
            "cat > /dev/null\necho 'bad decrypt' >&2\nexit 1",
        );
        let fetcher = Arc::new(StubFetcher::default());
        let signer = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home).with_openssl(tool),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap();

        let err = signer.sign(b"{}").await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Signing);
        assert!(err.to_string().contains("bad decrypt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sign_without_output_is_signing_error() {
        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::write(home.join(TRUST_ANCHOR_FILE), b"PEM").unwrap();
        // Exits 0 but never writes the -out file
        let tool = crate::openssl::tests::fake_openssl(dir.path(), "cat > /dev/null");
        let fetcher = Arc::new(StubFetcher::default());
        let signer = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home).with_openssl(tool),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap();

        let err = signer.sign(b"{}").await.unwrap_err();
        assert!(matches!(err, PassError::SigningIo { .. }));
        assert_eq!(err.category(), ErrorCategory::Signing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_sign_kills_tool_and_removes_scratch() {
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let home = home_with_keys(dir.path());
        std::fs::write(home.join(TRUST_ANCHOR_FILE), b"PEM").unwrap();
        let started = dir.path().join("started");
        let finished = dir.path().join("finished");
        // Reports its scratch directory, then stalls
        let script = format!(
            "out=\"\"\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-out\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\ndirname \"$out\" > \"{started}.tmp\"\nmv \"{started}.tmp\" \"{started}\"\nsleep 2\ntouch \"{finished}\"",
            started = started.display(),
            finished = finished.display(),
        );
        let tool = crate::openssl::tests::fake_openssl(dir.path(), &script);
        let fetcher = Arc::new(StubFetcher::default());
        let signer = LocalSigner::new(
            LocalSignerConfig::default().with_home(&home).with_openssl(tool),
            &resolver(dir.path(), fetcher, OpenSsl::new()),
        )
        .await
        .unwrap();

        let wait_started = async {
            while !started.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        let raced = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::select! {
                result = signer.sign(b"{}") => panic!("sign finished: {:?}", result.map(|s| s.len())),
                () = wait_started => {}
            }
        })
        .await;
        assert!(raced.is_ok(), "tool never started");

        let scratch = PathBuf::from(std::fs::read_to_string(&started).unwrap().trim());
        assert!(scratch
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("pkpassmake-sign-"));
        assert!(!scratch.exists());

        // The killed tool never reaches its last command
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!finished.exists());
    }
}
