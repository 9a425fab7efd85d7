//! Signing backends
//!
//! A [`Signer`] turns manifest bytes into a detached signature. The bundle
//! assembler and the network endpoint are written against the trait; the
//! concrete backend is chosen once at construction:
//!
//! - [`LocalSigner`]: runs `openssl smime` against a certificate and key on
//!   this host.
//! - [`RemoteSigner`]: POSTs the manifest to a signing endpoint that holds
//!   the key material.

mod local;
mod remote;

pub use local::{
    conventional_homes, resolve_home, LocalSigner, LocalSignerConfig, SigningContext, CERT_FILE,
    HOME_ENV, KEY_FILE, PASSWORD_ENV,
};
pub use remote::RemoteSigner;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Produces a detached signature over arbitrary input bytes.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `input`, returning the signature bytes.
    ///
    /// Implementations must not retry on their own; callers decide whether
    /// to rerun the whole operation.
    async fn sign(&self, input: &[u8]) -> Result<Vec<u8>>;
}

#[async_trait]
impl<S: Signer + ?Sized> Signer for Arc<S> {
    async fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        (**self).sign(input).await
    }
}

#[async_trait]
impl<S: Signer + ?Sized> Signer for Box<S> {
    async fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        (**self).sign(input).await
    }
}
