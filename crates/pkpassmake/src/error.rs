//! Error types for the pkpassmake library.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while configuring signers, resolving trust anchors,
/// signing manifests, or assembling bundles.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Trust anchor unavailable: all {attempted} candidate source(s) failed")]
    TrustAnchorUnavailable { attempted: usize },

    #[error("Trust anchor cache error on {}: {source}", path.display())]
    AnchorCache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Signing I/O error on {}: {source}", path.display())]
    SigningIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Signing service {url} returned status {status}")]
    SigningStatus { url: String, status: u16 },

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error on {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Bundle integrity check failed: {0}")]
    Integrity(String),
}

/// Coarse classification of a [`PassError`].
///
/// Lets callers branch on the failure class without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid signer configuration. Fatal, not retried.
    Configuration,
    /// No trust anchor could be located or fetched.
    TrustAnchor,
    /// The signing backend failed or rejected the input.
    Signing,
    /// Reading the source tree or writing the archive failed.
    Bundle,
}

impl PassError {
    /// Map this error onto its [`ErrorCategory`].
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            PassError::Config(_) | PassError::MissingFile { .. } => ErrorCategory::Configuration,
            PassError::TrustAnchorUnavailable { .. } | PassError::AnchorCache { .. } => {
                ErrorCategory::TrustAnchor
            }
            PassError::ToolSpawn { .. }
            | PassError::ToolFailed { .. }
            | PassError::SigningIo { .. }
            | PassError::SigningStatus { .. }
            | PassError::Http { .. } => ErrorCategory::Signing,
            PassError::NotADirectory { .. }
            | PassError::Io { .. }
            | PassError::Archive { .. }
            | PassError::Manifest(_)
            | PassError::Integrity(_) => ErrorCategory::Bundle,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PassError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn signing_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PassError::SigningIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn anchor_cache(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PassError::AnchorCache {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for pkpassmake operations.
pub type Result<T> = std::result::Result<T, PassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            PassError::Config("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            PassError::TrustAnchorUnavailable { attempted: 6 }.category(),
            ErrorCategory::TrustAnchor
        );
        assert_eq!(
            PassError::SigningStatus {
                url: "http://localhost".into(),
                status: 500
            }
            .category(),
            ErrorCategory::Signing
        );
        assert_eq!(
            PassError::signing_io("/tmp/out", std::io::ErrorKind::NotFound.into()).category(),
            ErrorCategory::Signing
        );
        assert_eq!(
            PassError::anchor_cache("/cache", std::io::ErrorKind::PermissionDenied.into())
                .category(),
            ErrorCategory::TrustAnchor
        );
        assert_eq!(
            PassError::Manifest("bad".into()).category(),
            ErrorCategory::Bundle
        );
    }

    #[test]
    fn test_display_names_path() {
        let err = PassError::MissingFile {
            path: PathBuf::from("/etc/pkpassmake/key.pem"),
        };
        assert!(err.to_string().contains("/etc/pkpassmake/key.pem"));
    }
}
