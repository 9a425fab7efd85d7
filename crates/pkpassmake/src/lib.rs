//! Build and sign pass bundles.
//!
//! A bundle is a deflate archive holding a directory's files, a
//! `manifest.json` mapping every file to its SHA-1 digest, and a detached
//! `signature` over the manifest bytes.
//!
//! The pipeline:
//!
//! 1. **Manifest** (`manifest`) - enumerate the source tree and digest each
//!    file into a deterministic JSON document.
//! 2. **Signer** (`signer`) - sign the manifest, either locally with
//!    `openssl smime` ([`LocalSigner`]) or through a signing endpoint
//!    ([`RemoteSigner`]).
//! 3. **Bundle** (`bundle`) - write the archive and, later, verify it.
//!
//! Local signing needs a trust anchor; [`TrustAnchorResolver`] fetches and
//! caches one when the signing home does not provide it.
//!
//! The library emits `tracing` events but never installs a subscriber.

pub mod bundle;
pub mod digest;
pub mod error;
pub mod http;
pub mod manifest;
pub mod openssl;
pub mod signer;
pub mod trust_anchor;

pub use bundle::{
    assemble, default_destination, verify_bundle, BundleAssembler, VerifiedBundle,
    BUNDLE_EXTENSION,
};
pub use digest::bytes_digest;
pub use error::{ErrorCategory, PassError, Result};
pub use manifest::{Manifest, MANIFEST_FILE, SIGNATURE_FILE};
pub use openssl::OpenSsl;
pub use signer::{LocalSigner, LocalSignerConfig, RemoteSigner, Signer};
pub use trust_anchor::{CertificateFetcher, TrustAnchorResolver};
