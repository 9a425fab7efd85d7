//! Content digests for manifest entries
//!
//! Every file in a bundle is identified by the lowercase hex SHA-1 of its
//! bytes. SHA-1 is what pass consumers expect inside `manifest.json`; the
//! detached signature over the manifest carries the security property.

use sha1::{Digest, Sha1};

/// Length of a hex-encoded digest (20 bytes, 40 characters).
pub const DIGEST_HEX_LEN: usize = 40;

/// Compute the hex digest of a byte slice.
#[must_use]
pub fn bytes_digest(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}
