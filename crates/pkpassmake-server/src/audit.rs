//! Audit logging for signing requests.
//!
//! Logs every request outcome with structured fields via `tracing`.
//! Request bodies, signatures and authorization values are never logged.

use std::net::SocketAddr;
use tracing::{info, warn};

/// Log a request that produced a signature.
pub fn log_signed(peer: SocketAddr, payload_bytes: usize, signature_bytes: usize) {
    info!(
        target: "pkpassmake_server::audit",
        peer = %peer,
        payload_bytes = payload_bytes,
        signature_bytes = signature_bytes,
        status = 200u16,
        "manifest signed"
    );
}

/// Log a request rejected before reaching the signer.
pub fn log_rejected(peer: SocketAddr, status: u16, reason: &str) {
    info!(
        target: "pkpassmake_server::audit",
        peer = %peer,
        status = status,
        reason = reason,
        "request rejected"
    );
}

/// Log a request whose signing attempt failed.
pub fn log_failed(peer: SocketAddr, payload_bytes: usize) {
    warn!(
        target: "pkpassmake_server::audit",
        peer = %peer,
        payload_bytes = payload_bytes,
        status = 500u16,
        "signing failed"
    );
}
